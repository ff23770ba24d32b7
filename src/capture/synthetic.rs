//! Synthetic display backend
//!
//! Generates a moving test pattern at the requested framerate. Failures can
//! be scripted so activation, retry and reinitialization paths run without a
//! real compositor.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::display::{CaptureStatus, Display, DisplayBackend, Snapshot, SnapshotCallback};
use super::error::{CaptureError, CaptureResult};
use crate::device::{DeviceFactory, SoftwareDeviceFactory};
use crate::encoder::DeviceType;
use crate::frame::Image;

/// Colour bars, left to right
const BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235),
    (235, 235, 16),
    (16, 235, 235),
    (16, 235, 16),
    (235, 16, 235),
    (235, 16, 16),
    (16, 16, 235),
    (16, 16, 16),
];

/// Failures the backend should produce
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntheticScript {
    /// Number of acquisitions to refuse before succeeding
    pub acquire_failures: u32,
    /// Report `Reinit` once after this many frames
    pub reinit_after: Option<u64>,
    /// Fail `enumerate_names`
    pub fail_enumeration: bool,
    /// Report `Timeout` after every this many frames of one capture call
    pub timeout_every: Option<u64>,
}

/// Backend serving test-pattern displays
#[derive(Debug)]
pub struct SyntheticBackend {
    names: Vec<String>,
    width: u32,
    height: u32,
    script: Mutex<SyntheticScript>,
    acquisitions: Mutex<Vec<Instant>>,
}

impl SyntheticBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            names: vec!["synthetic-0".to_string()],
            width,
            height,
            script: Mutex::new(SyntheticScript::default()),
            acquisitions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_script(self, script: SyntheticScript) -> Self {
        *self.script.lock() = script;
        self
    }

    /// Replace the script of a running backend
    pub fn set_script(&self, script: SyntheticScript) {
        *self.script.lock() = script;
    }

    /// When every acquisition attempt happened, successful or not
    pub fn acquire_attempts(&self) -> Vec<Instant> {
        self.acquisitions.lock().clone()
    }
}

impl DisplayBackend for SyntheticBackend {
    fn enumerate_names(&self, device_type: DeviceType) -> CaptureResult<Vec<String>> {
        if self.script.lock().fail_enumeration {
            return Err(CaptureError::EnumerationFailed(format!(
                "no {} adapter",
                device_type
            )));
        }
        Ok(self.names.clone())
    }

    fn acquire(&self, _device_type: DeviceType, name: &str, framerate: u32) -> Option<Box<dyn Display>> {
        self.acquisitions.lock().push(Instant::now());

        let (reinit_after, timeout_every) = {
            let mut script = self.script.lock();
            if script.acquire_failures > 0 {
                script.acquire_failures -= 1;
                debug!("Synthetic display {} refused ({} more)", name, script.acquire_failures);
                return None;
            }
            (script.reinit_after.take(), script.timeout_every)
        };

        let name = if name.is_empty() {
            self.names.first()?.clone()
        } else if self.names.iter().any(|n| n == name) {
            name.to_string()
        } else {
            debug!("No synthetic display named {}", name);
            return None;
        };

        let display = SyntheticDisplay::new(name, self.width, self.height, framerate, reinit_after);
        Some(Box::new(match timeout_every {
            Some(frames) => display.with_timeout_every(frames),
            None => display,
        }))
    }
}

/// One acquired test-pattern display
pub struct SyntheticDisplay {
    name: String,
    width: u32,
    height: u32,
    interval: Duration,
    frames: u64,
    reinit_after: Option<u64>,
    timeout_every: Option<u64>,
    factory: Arc<SoftwareDeviceFactory>,
}

impl SyntheticDisplay {
    pub fn new(name: String, width: u32, height: u32, framerate: u32, reinit_after: Option<u64>) -> Self {
        Self {
            name,
            width,
            height,
            interval: Duration::from_millis(1000 / u64::from(framerate.max(1))),
            frames: 0,
            reinit_after,
            timeout_every: None,
            factory: Arc::new(SoftwareDeviceFactory::new(width, height, Image::new(width, height))),
        }
    }

    /// Return `Timeout` once `frames` frames were delivered by one capture call
    pub fn with_timeout_every(mut self, frames: u64) -> Self {
        self.timeout_every = Some(frames.max(1));
        self
    }

    /// Colour bars with a white column sweeping one pixel per frame
    fn render(&self, image: &mut Image) {
        let width = self.width as usize;
        let sweep = (self.frames % u64::from(self.width.max(1))) as usize;
        let row = &mut image.data[..width * 4];
        for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
            let (r, g, b) = if x == sweep {
                (255, 255, 255)
            } else {
                BARS[x * BARS.len() / width]
            };
            pixel.copy_from_slice(&[b, g, r, 0xFF]);
        }
        for y in 1..self.height as usize {
            image.data.copy_within(0..width * 4, y * image.row_pitch);
        }
        image.captured_at = Some(Instant::now());
    }

    /// Sleep until the next frame is due, in whole milliseconds
    fn pace(&self, next: &mut Instant) {
        let now = Instant::now();
        if *next > now {
            let wait = (*next - now).as_millis() as u64;
            thread::sleep(Duration::from_millis(wait));
        }
        *next += self.interval;
        if *next < now {
            *next = now + self.interval;
        }
    }
}

impl Display for SyntheticDisplay {
    fn name(&self) -> &str {
        &self.name
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn alloc_image(&self) -> Image {
        Image::new(self.width, self.height)
    }

    fn dummy_image(&self, image: &mut Image) -> CaptureResult<()> {
        if image.width != self.width || image.height != self.height {
            return Err(CaptureError::ImageInit(format!(
                "image is {}x{}, display is {}x{}",
                image.width, image.height, self.width, self.height
            )));
        }
        image.fill(0, 0, 0);
        Ok(())
    }

    fn device_factory(&self) -> Arc<dyn DeviceFactory> {
        Arc::clone(&self.factory) as Arc<dyn DeviceFactory>
    }

    fn capture(
        &mut self,
        on_snapshot: &mut SnapshotCallback<'_>,
        image: &mut Image,
        blocking: bool,
    ) -> CaptureStatus {
        let mut next = Instant::now();
        let mut delivered = 0;
        loop {
            if self.reinit_after.is_some_and(|limit| self.frames >= limit) {
                self.reinit_after = None;
                debug!("Synthetic display {} requests reinit", self.name);
                return CaptureStatus::Reinit;
            }
            if self.timeout_every.is_some_and(|limit| delivered >= limit) {
                trace!("Synthetic display {} timed out", self.name);
                return CaptureStatus::Timeout;
            }

            if blocking {
                self.pace(&mut next);
            }
            self.render(image);
            self.frames += 1;
            delivered += 1;
            trace!("Synthetic frame {} on {}", self.frames, self.name);

            if let Snapshot::Stop(status) = on_snapshot(image) {
                return status;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumeration_and_acquire() {
        let backend = SyntheticBackend::new(64, 32).with_names(["left", "right"]);
        assert_eq!(
            backend.enumerate_names(DeviceType::Software).unwrap(),
            vec!["left".to_string(), "right".to_string()]
        );

        let display = backend.acquire(DeviceType::Software, "right", 60).unwrap();
        assert_eq!(display.name(), "right");
        assert_eq!((display.width(), display.height()), (64, 32));

        assert_eq!(backend.acquire(DeviceType::Software, "", 60).unwrap().name(), "left");
        assert!(backend.acquire(DeviceType::Software, "missing", 60).is_none());
        assert_eq!(backend.acquire_attempts().len(), 3);
    }

    #[test]
    fn test_scripted_failures() {
        let backend = SyntheticBackend::new(16, 16).with_script(SyntheticScript {
            acquire_failures: 1,
            fail_enumeration: true,
            ..Default::default()
        });
        assert!(backend.enumerate_names(DeviceType::Software).is_err());
        assert!(backend.acquire(DeviceType::Software, "", 60).is_none());
        assert!(backend.acquire(DeviceType::Software, "", 60).is_some());
    }

    #[test]
    fn test_capture_renders_and_stops() {
        let mut display = SyntheticDisplay::new("s".to_string(), 16, 8, 1000, None);
        let mut image = display.alloc_image();
        display.dummy_image(&mut image).unwrap();

        let mut ticks = 0;
        let status = display.capture(
            &mut |img: &Image| {
                ticks += 1;
                // Sweep column sits at x = frame index
                assert_eq!(img.rgb(ticks - 1, 7), (255, 255, 255));
                if ticks == 3 {
                    Snapshot::Stop(CaptureStatus::Timeout)
                } else {
                    Snapshot::Continue
                }
            },
            &mut image,
            false,
        );
        assert_eq!(status, CaptureStatus::Timeout);
        assert_eq!(ticks, 3);
        assert!(image.captured_at.is_some());
        // Last bar is near-black
        assert_eq!(image.rgb(15, 0), (16, 16, 16));
    }

    #[test]
    fn test_reinit_after_frames() {
        let mut display = SyntheticDisplay::new("s".to_string(), 8, 8, 1000, Some(2));
        let mut image = display.alloc_image();
        let mut ticks = 0;
        let status = display.capture(
            &mut |_: &Image| {
                ticks += 1;
                Snapshot::Continue
            },
            &mut image,
            false,
        );
        assert_eq!(status, CaptureStatus::Reinit);
        assert_eq!(ticks, 2);
    }

    #[test]
    fn test_timeout_every_frames() {
        let mut display =
            SyntheticDisplay::new("s".to_string(), 8, 8, 1000, None).with_timeout_every(3);
        let mut image = display.alloc_image();
        let mut ticks = 0;
        for _ in 0..2 {
            let status = display.capture(
                &mut |_: &Image| {
                    ticks += 1;
                    Snapshot::Continue
                },
                &mut image,
                false,
            );
            assert_eq!(status, CaptureStatus::Timeout);
        }
        // The count restarts with every capture call
        assert_eq!(ticks, 6);
    }

    #[test]
    fn test_dummy_image_rejects_wrong_geometry() {
        let display = SyntheticDisplay::new("s".to_string(), 8, 8, 60, None);
        let mut image = Image::new(4, 4);
        assert!(matches!(
            display.dummy_image(&mut image),
            Err(CaptureError::ImageInit(_))
        ));
    }
}
