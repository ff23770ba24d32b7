//! Conversion device errors

use thiserror::Error;

use crate::frame::PixelFormat;

/// Errors from binding or driving a conversion device
///
/// Every variant is fatal for the session that owns the device: a failed
/// device is torn down, never retried in place.
#[derive(Debug, Error)]
pub enum DeviceError {
    // =========================================================================
    // Binding Errors
    // =========================================================================
    /// The device cannot produce this pixel format
    #[error("Pixel format {0} not supported by conversion device")]
    UnsupportedFormat(PixelFormat),

    /// Creating a native resource (texture, buffer, shader) failed
    #[error("Failed to create {resource}: {reason}")]
    ResourceCreation {
        resource: &'static str,
        reason: String,
    },

    // =========================================================================
    // Conversion Errors
    // =========================================================================
    /// Frame geometry is unusable
    #[error("Invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// `convert` was called before a destination frame was set
    #[error("No destination frame set")]
    FrameNotSet,

    /// The captured image no longer matches the bound display geometry
    #[error("Source image {actual_width}x{actual_height} does not match bound display {expected_width}x{expected_height}")]
    SourceMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

/// Result type for conversion device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
