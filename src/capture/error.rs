//! Capture error types

use thiserror::Error;

use super::context::SessionId;
use crate::encoder::EncoderError;

/// Result type for capture operations
pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

/// Errors raised while activating or driving the capture thread
#[derive(Error, Debug)]
pub enum CaptureError {
    // =========================================================================
    // Display Errors
    // =========================================================================
    /// Listing the displays of an adapter failed
    #[error("Display enumeration failed: {0}")]
    EnumerationFailed(String),

    /// The display could not be acquired within the retry limit
    #[error("Display {name} unavailable after {attempts} attempts")]
    DisplayUnavailable { name: String, attempts: u32 },

    /// Seeding the capture image failed
    #[error("Failed to initialize capture image: {0}")]
    ImageInit(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// A pending context could not be turned into a live session
    #[error("Failed to build {session}: {source}")]
    SessionBuild {
        session: SessionId,
        #[source]
        source: EncoderError,
    },

    /// Another session's build failure ended the activation
    #[error("Capture aborted: {session} could not be built")]
    ActivationAborted { session: SessionId },

    // =========================================================================
    // Thread Errors
    // =========================================================================
    /// The capture thread could not be started
    #[error("Failed to spawn capture thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Why a session admitted through `capture()` ended abnormally
#[derive(Error, Debug)]
pub enum SessionError {
    /// The pipeline was shut down before or while the session ran
    #[error("Capture pipeline stopped")]
    PipelineStopped,

    /// The capture thread tore the session down
    #[error("Session {session} failed: {reason}")]
    Failed { session: SessionId, reason: String },

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl CaptureError {
    /// Errors that a fresh activation may clear
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EnumerationFailed(_) | Self::DisplayUnavailable { .. } | Self::ImageInit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_errors_are_recoverable() {
        let err = CaptureError::DisplayUnavailable {
            name: "synthetic-0".to_string(),
            attempts: 2,
        };
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Display synthetic-0 unavailable after 2 attempts"
        );

        let err = CaptureError::SessionBuild {
            session: SessionId::new(3),
            source: EncoderError::EncoderNotFound {
                name: "hevc_nvenc".to_string(),
            },
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("session-3"));
    }
}
