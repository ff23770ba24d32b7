//! Host-memory conversion device
//!
//! Implements the same two-pass pipeline a GPU backend runs, on the CPU:
//! the cached background is copied in first, then the luma pass and chroma
//! pass draw the source into the aspect-fit viewport. Used when no hardware
//! device is available and by the test suite.

use tracing::debug;

use super::color::{ColorMatrix, ColorRange, Colorspace};
use super::error::{DeviceError, DeviceResult};
use super::viewport::Viewport;
use super::{ConversionDevice, DeviceFactory};
use crate::encoder::DeviceType;
use crate::frame::{chroma_size, Image, PixelFormat, VideoFrame};

/// Nearest-neighbour sampling map from destination pixels to source pixels
#[derive(Debug, Clone, Default)]
struct Sampler {
    /// Destination pixel bounds `(x0, y0, x1, y1)`
    bounds: (u32, u32, u32, u32),
    x_map: Vec<u32>,
    y_map: Vec<u32>,
}

impl Sampler {
    fn new(viewport: &Viewport, src: (u32, u32), dst: (u32, u32)) -> Self {
        let bounds = viewport.pixel_bounds(dst.0, dst.1);
        let (x0, y0, x1, y1) = bounds;
        let map = |from: u32, to: u32, origin: f32, limit: u32| -> Vec<u32> {
            (from..to)
                .map(|d| {
                    let s = ((d as f32 + 0.5 - origin) / viewport.scalar).max(0.0) as u32;
                    s.min(limit.saturating_sub(1))
                })
                .collect()
        };
        Self {
            bounds,
            x_map: map(x0, x1, viewport.x, src.0),
            y_map: map(y0, y1, viewport.y, src.1),
        }
    }

    /// Source pixel for a destination pixel inside the bounds
    #[inline]
    fn source(&self, x: u32, y: u32) -> (u32, u32) {
        (
            self.x_map[(x - self.bounds.0) as usize],
            self.y_map[(y - self.bounds.1) as usize],
        )
    }

    #[inline]
    fn contains(&self, x: u32, y: u32) -> bool {
        let (x0, y0, x1, y1) = self.bounds;
        x >= x0 && x < x1 && y >= y0 && y < y1
    }
}

#[inline]
fn store(plane: &mut [u8], index: usize, value: i32, wide: bool) {
    if wide {
        let sample = ((value as u16) << 6).to_le_bytes();
        plane[index * 2..index * 2 + 2].copy_from_slice(&sample);
    } else {
        plane[index] = value as u8;
    }
}

fn luma_pass(
    src: &Image,
    sampler: &Sampler,
    matrix: &ColorMatrix,
    plane: &mut [u8],
    width: u32,
    wide: bool,
) {
    let (x0, y0, x1, y1) = sampler.bounds;
    for y in y0..y1 {
        let row = y as usize * width as usize;
        for x in x0..x1 {
            let (sx, sy) = sampler.source(x, y);
            let (r, g, b) = src.rgb(sx, sy);
            let luma = matrix.luma(r as i32, g as i32, b as i32);
            store(plane, row + x as usize, luma, wide);
        }
    }
}

fn chroma_pass(
    src: &Image,
    sampler: &Sampler,
    matrix: &ColorMatrix,
    plane: &mut [u8],
    width: u32,
    wide: bool,
) {
    let (x0, y0, x1, y1) = sampler.bounds;
    let chroma_width = chroma_size(width);

    for cy in y0 / 2..y1.div_ceil(2) {
        for cx in x0 / 2..x1.div_ceil(2) {
            let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
            for (lx, ly) in [
                (cx * 2, cy * 2),
                (cx * 2 + 1, cy * 2),
                (cx * 2, cy * 2 + 1),
                (cx * 2 + 1, cy * 2 + 1),
            ] {
                if sampler.contains(lx, ly) {
                    let (sx, sy) = sampler.source(lx, ly);
                    let (sr, sg, sb) = src.rgb(sx, sy);
                    r += sr as i32;
                    g += sg as i32;
                    b += sb as i32;
                    n += 1;
                }
            }
            if n == 0 {
                continue;
            }
            let (u, v) = matrix.chroma(r / n, g / n, b / n);
            let index = (cy as usize * chroma_width + cx as usize) * 2;
            store(plane, index, u, wide);
            store(plane, index + 1, v, wide);
        }
    }
}

/// CPU implementation of [`ConversionDevice`] for NV12 and P010 output
pub struct SoftwareDevice {
    format: PixelFormat,
    source_width: u32,
    source_height: u32,
    /// Neutral image the bars are painted from
    background: Image,
    /// Converted background, rebuilt when geometry or matrix changes
    background_planes: Option<Vec<u8>>,
    matrices: [ColorMatrix; 6],
    matrix: ColorMatrix,
    sampler: Sampler,
    viewport: Option<Viewport>,
    frame: Option<VideoFrame>,
}

impl SoftwareDevice {
    /// Bind a device to a display of `width`x`height` producing `format`
    pub fn bind(width: u32, height: u32, format: PixelFormat, background: Image) -> DeviceResult<Self> {
        if !matches!(format, PixelFormat::Nv12 | PixelFormat::P010) {
            return Err(DeviceError::UnsupportedFormat(format));
        }
        if width == 0 || height == 0 {
            return Err(DeviceError::InvalidDimensions { width, height });
        }

        let bit_depth = if format.is_high_bit_depth() { 10 } else { 8 };
        let matrices = ColorMatrix::table(bit_depth);
        let matrix = matrices[ColorMatrix::index(Colorspace::Rec601, ColorRange::Limited)];

        debug!("Software device bound: {}x{} → {}", width, height, format);

        Ok(Self {
            format,
            source_width: width,
            source_height: height,
            background,
            background_planes: None,
            matrices,
            matrix,
            sampler: Sampler::default(),
            viewport: None,
            frame: None,
        })
    }

    /// Aspect-fit placement of the source, once a frame is set
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    fn render_background(&self, frame: &VideoFrame) -> Vec<u8> {
        let mut scratch = VideoFrame::new(frame.width, frame.height, frame.format);
        let full = Viewport::fit(
            self.background.width,
            self.background.height,
            frame.width,
            frame.height,
        );
        // Stretch the background over the whole frame, bars included
        let stretched = Viewport {
            scalar: full.scalar,
            ..Viewport::full(frame.width, frame.height)
        };
        let sampler = Sampler::new(
            &stretched,
            (self.background.width, self.background.height),
            (frame.width, frame.height),
        );
        let wide = self.format.is_high_bit_depth();
        let (luma, chroma) = scratch.planes_mut();
        luma_pass(&self.background, &sampler, &self.matrix, luma, frame.width, wide);
        chroma_pass(&self.background, &sampler, &self.matrix, chroma, frame.width, wide);
        scratch.data
    }
}

impl ConversionDevice for SoftwareDevice {
    fn name(&self) -> &'static str {
        "software"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Software
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn set_source_frame(&mut self, mut frame: VideoFrame) -> DeviceResult<()> {
        if frame.format != self.format {
            return Err(DeviceError::UnsupportedFormat(frame.format));
        }
        if frame.width == 0 || frame.height == 0 {
            return Err(DeviceError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            });
        }
        let expected = frame.format.buffer_size(frame.width, frame.height);
        if frame.data.len() != expected {
            frame.data.resize(expected, 0);
        }

        let viewport = Viewport::fit(
            self.source_width,
            self.source_height,
            frame.width,
            frame.height,
        );
        debug!(
            "Viewport {}x{} → {}x{}: scale {:.3}, offset ({:.1}, {:.1})",
            self.source_width,
            self.source_height,
            frame.width,
            frame.height,
            viewport.scalar,
            viewport.x,
            viewport.y
        );

        self.sampler = Sampler::new(
            &viewport,
            (self.source_width, self.source_height),
            (frame.width, frame.height),
        );
        self.viewport = Some(viewport);
        self.background_planes = None;
        self.frame = Some(frame);
        Ok(())
    }

    fn set_colorspace(&mut self, colorspace: Colorspace, range: ColorRange) {
        self.matrix = self.matrices[ColorMatrix::index(colorspace, range)];
        self.background_planes = None;
    }

    fn convert(&mut self, image: &Image) -> DeviceResult<()> {
        if image.width != self.source_width || image.height != self.source_height {
            return Err(DeviceError::SourceMismatch {
                expected_width: self.source_width,
                expected_height: self.source_height,
                actual_width: image.width,
                actual_height: image.height,
            });
        }
        let Some(frame) = self.frame.as_ref() else {
            return Err(DeviceError::FrameNotSet);
        };
        if self.background_planes.is_none() {
            self.background_planes = Some(self.render_background(frame));
        }

        let (Some(frame), Some(background)) = (self.frame.as_mut(), &self.background_planes) else {
            return Err(DeviceError::FrameNotSet);
        };
        frame.data.copy_from_slice(background);

        let width = frame.width;
        let wide = self.format.is_high_bit_depth();
        let (luma, chroma) = frame.planes_mut();
        luma_pass(image, &self.sampler, &self.matrix, luma, width, wide);
        chroma_pass(image, &self.sampler, &self.matrix, chroma, width, wide);
        Ok(())
    }

    fn frame(&self) -> Option<&VideoFrame> {
        self.frame.as_ref()
    }

    fn frame_mut(&mut self) -> Option<&mut VideoFrame> {
        self.frame.as_mut()
    }
}

/// Hands out [`SoftwareDevice`]s bound to one display's geometry
#[derive(Debug, Clone)]
pub struct SoftwareDeviceFactory {
    width: u32,
    height: u32,
    background: Image,
}

impl SoftwareDeviceFactory {
    pub fn new(width: u32, height: u32, background: Image) -> Self {
        Self {
            width,
            height,
            background,
        }
    }
}

impl DeviceFactory for SoftwareDeviceFactory {
    fn make_device(&self, format: PixelFormat) -> DeviceResult<Box<dyn ConversionDevice>> {
        let device = SoftwareDevice::bind(self.width, self.height, format, self.background.clone())?;
        Ok(Box::new(device))
    }
}
