//! GPU conversion devices
//!
//! A conversion device turns the shared captured image into one session's
//! encoder input. Each session owns its own device and therefore its own
//! destination surface; the captured image is only ever read.
//!
//! ```text
//!  captured BGRA ──▶ [black background blit] ──▶ luma pass ──▶ Y plane
//!   (shared)                                  └─▶ chroma pass ─▶ UV plane
//!                                                               │
//!                                        VideoFrame (owned by device) ──▶ encoder
//! ```
//!
//! Backends implement [`ConversionDevice`]; displays hand out a
//! [`DeviceFactory`] so sessions admitted mid-capture can bind new devices
//! without touching the display itself.

pub mod color;
mod error;
mod software;
mod viewport;

pub use color::{ColorMatrix, ColorRange, ColorSpaceConfig, Colorspace};
pub use error::{DeviceError, DeviceResult};
pub use software::{SoftwareDevice, SoftwareDeviceFactory};
pub use viewport::Viewport;

use crate::encoder::DeviceType;
use crate::frame::{Image, PixelFormat, VideoFrame};

/// A device bound to one encoder-compatible pixel format
pub trait ConversionDevice: Send {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Kind of device, matched against the encoder's capability descriptor
    fn device_type(&self) -> DeviceType;

    /// Format of the frames this device produces
    fn pixel_format(&self) -> PixelFormat;

    /// Native device handle for building a hardware encoder context
    fn native_handle(&self) -> Option<u64> {
        None
    }

    /// Declare the destination surface and size the render targets for it
    fn set_source_frame(&mut self, frame: VideoFrame) -> DeviceResult<()>;

    /// Select the conversion matrix
    fn set_colorspace(&mut self, colorspace: Colorspace, range: ColorRange);

    /// Convert a captured image into the destination surface
    fn convert(&mut self, image: &Image) -> DeviceResult<()>;

    /// The destination surface, once set
    fn frame(&self) -> Option<&VideoFrame>;

    fn frame_mut(&mut self) -> Option<&mut VideoFrame>;
}

/// Binds conversion devices to the display a coordinator captures from
pub trait DeviceFactory: Send + Sync {
    /// Create a device producing `format`
    fn make_device(&self, format: PixelFormat) -> DeviceResult<Box<dyn ConversionDevice>>;
}
