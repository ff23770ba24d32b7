//! Display collaborator
//!
//! A [`DisplayBackend`] lists and acquires displays; an acquired [`Display`]
//! is owned by the capture thread for the whole activation and pushes every
//! captured image into the coordinator's fan-out callback.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::error::CaptureResult;
use crate::device::DeviceFactory;
use crate::encoder::DeviceType;
use crate::frame::Image;

/// Outcome of a capture call or an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Ok,
    /// Displays or adapters changed; the activation must start over
    Reinit,
    /// No new content arrived in time
    Timeout,
    Error,
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Reinit => "reinit",
            Self::Timeout => "timeout",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// What the fan-out callback asks the display to do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Snapshot {
    /// Keep capturing
    Continue,
    /// Return from `capture` with this status
    Stop(CaptureStatus),
}

/// Callback invoked once per captured image
pub type SnapshotCallback<'a> = dyn FnMut(&Image) -> Snapshot + 'a;

/// An acquired display, confined to the capture thread
pub trait Display {
    fn name(&self) -> &str;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Allocate an image matching the display geometry
    fn alloc_image(&self) -> Image;

    /// Fill `image` with neutral content so early conversions have input
    fn dummy_image(&self, image: &mut Image) -> CaptureResult<()>;

    /// Factory binding conversion devices to this display
    fn device_factory(&self) -> Arc<dyn DeviceFactory>;

    /// Capture into `image`, calling `on_snapshot` after every new frame
    ///
    /// Returns when the callback asks to stop or the display fails. With
    /// `blocking` set the display waits up to one frame interval for new
    /// content.
    fn capture(
        &mut self,
        on_snapshot: &mut SnapshotCallback<'_>,
        image: &mut Image,
        blocking: bool,
    ) -> CaptureStatus;
}

/// Lists and opens displays for one kind of device
pub trait DisplayBackend: Send + Sync {
    /// Display names in adapter order
    fn enumerate_names(&self, device_type: DeviceType) -> CaptureResult<Vec<String>>;

    /// Open a display, or `None` if it is not available right now
    fn acquire(&self, device_type: DeviceType, name: &str, framerate: u32) -> Option<Box<dyn Display>>;
}

/// Display acquisition retry contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquirePolicy {
    pub attempts: u32,
    /// Sleep between two failed attempts
    pub backoff: Duration,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_millis(200),
        }
    }
}
