//! Encoder session errors
//!
//! Session construction fails either because the request is rejected by the
//! capability descriptor (nothing native was touched) or because a native
//! resource could not be created. Per-frame errors are fatal for the session
//! that produced them and never for its neighbours.

use thiserror::Error;

use super::native::NativeError;
use crate::device::DeviceError;

/// Errors from building or driving a hardware encoder session
#[derive(Debug, Error)]
pub enum EncoderError {
    // =========================================================================
    // Configuration Rejected
    // =========================================================================
    /// The descriptor does not offer the requested codec
    #[error("{encoder}: {codec} mode not supported")]
    ProfileUnsupported {
        encoder: String,
        codec: &'static str,
    },

    /// The requested codec has no HDR support
    #[error("{encoder}: dynamic range not supported for {codec}")]
    DynamicRangeUnsupported {
        encoder: String,
        codec: &'static str,
    },

    /// Neither constant bitrate nor a quantizer option is available
    #[error("Couldn't set video quality: encoder {encoder} supports neither CBR nor qp")]
    NoRateControl { encoder: String },

    // =========================================================================
    // Resource Creation
    // =========================================================================
    /// The codec backend does not know the named encoder
    #[error("Encoder {name} not available")]
    EncoderNotFound { name: String },

    /// The native encoder refused to open
    #[error("Could not open codec {name}: {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: NativeError,
    },

    /// Hardware device or frame context could not be created
    #[error("Hardware context creation failed: {0}")]
    HwContextFailed(String),

    /// The conversion device rejected the encoder's frame
    #[error("Conversion device error: {0}")]
    Device(#[from] DeviceError),

    // =========================================================================
    // Per-frame
    // =========================================================================
    /// Submitting a frame failed
    #[error("Could not send a frame for encoding: {0}")]
    SendFailed(#[source] NativeError),

    /// Draining packets failed with something other than "again"/"eof"
    #[error("Could not receive an encoded packet: {0}")]
    ReceiveFailed(#[source] NativeError),
}

impl EncoderError {
    /// Whether the descriptor rejected the session before any native
    /// resource was created
    pub fn is_configuration_rejected(&self) -> bool {
        matches!(
            self,
            EncoderError::ProfileUnsupported { .. }
                | EncoderError::DynamicRangeUnsupported { .. }
                | EncoderError::NoRateControl { .. }
        )
    }

    /// Whether a fresh admission might succeed where this one failed
    pub fn is_recoverable(&self) -> bool {
        !self.is_configuration_rejected() && !matches!(self, EncoderError::EncoderNotFound { .. })
    }
}

/// Result type for encoder operations
pub type EncodeResult<T> = Result<T, EncoderError>;
