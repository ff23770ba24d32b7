//! Surfaces passed between capture, conversion and encoding
//!
//! A captured [`Image`] is always packed BGRA. Conversion devices turn it
//! into a planar [`VideoFrame`] in the encoder's pixel format; the frame is
//! owned by the device and lent to the encoder for every encode call.

use std::fmt;
use std::time::Instant;

use crate::encoder::DeviceType;

/// Pixel formats known to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// BGRA 32-bit, captured desktop surfaces
    Bgra,
    /// YUV 4:2:0 semi-planar, 8-bit
    Nv12,
    /// YUV 4:2:0 semi-planar, 10-bit in the high bits of 16-bit samples
    P010,
    /// YUV 4:2:0 planar, 8-bit
    Yuv420p,
    /// YUV 4:2:0 planar, 10-bit little endian
    Yuv420p10,
}

impl PixelFormat {
    /// Bytes per luma sample (or per pixel for packed formats)
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Bgra => 4,
            Self::Nv12 | Self::Yuv420p => 1,
            Self::P010 | Self::Yuv420p10 => 2,
        }
    }

    /// Whether samples carry more than 8 bits
    pub const fn is_high_bit_depth(&self) -> bool {
        matches!(self, Self::P010 | Self::Yuv420p10)
    }

    /// Whether chroma is interleaved in a single plane
    pub const fn is_semi_planar(&self) -> bool {
        matches!(self, Self::Nv12 | Self::P010)
    }

    /// Total buffer size for a tightly packed surface
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            Self::Bgra => w * h * 4,
            _ => {
                let chroma = chroma_size(width) * chroma_size(height) * 2;
                (w * h + chroma) * self.bytes_per_sample()
            }
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bgra => "bgra",
            Self::Nv12 => "nv12",
            Self::P010 => "p010",
            Self::Yuv420p => "yuv420p",
            Self::Yuv420p10 => "yuv420p10",
        };
        f.write_str(name)
    }
}

/// Chroma dimension for a 4:2:0 luma dimension
pub const fn chroma_size(luma: u32) -> usize {
    luma.div_ceil(2) as usize
}

/// A captured desktop surface (packed BGRA)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub row_pitch: usize,
    pub data: Vec<u8>,
    /// When the display produced this content
    pub captured_at: Option<Instant>,
}

impl Image {
    /// Allocate a black, opaque image
    pub fn new(width: u32, height: u32) -> Self {
        let mut image = Self {
            width,
            height,
            row_pitch: width as usize * 4,
            data: vec![0; width as usize * height as usize * 4],
            captured_at: None,
        };
        image.fill(0, 0, 0);
        image
    }

    /// Paint every pixel with one colour
    pub fn fill(&mut self, r: u8, g: u8, b: u8) {
        for pixel in self.data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&[b, g, r, 0xFF]);
        }
    }

    /// `(r, g, b)` at a pixel
    #[inline]
    pub fn rgb(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let offset = y as usize * self.row_pitch + x as usize * 4;
        (
            self.data[offset + 2],
            self.data[offset + 1],
            self.data[offset],
        )
    }

    /// Set a pixel
    pub fn set_rgb(&mut self, x: u32, y: u32, (r, g, b): (u8, u8, u8)) {
        let offset = y as usize * self.row_pitch + x as usize * 4;
        self.data[offset..offset + 4].copy_from_slice(&[b, g, r, 0xFF]);
    }
}

/// Native device handle an encoder binds its hardware frames to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwDeviceContext {
    pub device_type: DeviceType,
    pub handle: u64,
}

/// Hardware frame pool description attached to a device-backed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwFramesContext {
    pub device: HwDeviceContext,
    /// Format of the surfaces inside the pool
    pub sw_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

/// Encoder input frame, owned by a conversion device
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Presentation timestamp in frame units
    pub pts: i64,
    /// Ask the encoder for a self-contained picture
    pub force_keyframe: bool,
    /// Luma samples followed by chroma samples
    pub data: Vec<u8>,
    /// Set when the surface lives in a hardware frame pool
    pub hw_frames: Option<HwFramesContext>,
}

impl VideoFrame {
    /// Allocate a zeroed frame
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            pts: 0,
            force_keyframe: false,
            data: vec![0; format.buffer_size(width, height)],
            hw_frames: None,
        }
    }

    /// Byte length of the luma plane
    pub fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_sample()
    }

    /// Luma plane
    pub fn luma(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    /// Chroma plane(s)
    pub fn chroma(&self) -> &[u8] {
        &self.data[self.luma_len()..]
    }

    /// Split into mutable luma and chroma planes
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        let split = self.luma_len();
        self.data.split_at_mut(split)
    }
}
