//! Bitstream parsing errors

use thiserror::Error;

/// Errors raised while extracting or rewriting parameter sets
#[derive(Debug, Error)]
pub enum BitstreamError {
    /// The packet does not contain the expected NAL unit
    #[error("{codec} packet contains no {nal} NAL unit")]
    MissingNal {
        codec: &'static str,
        nal: &'static str,
    },

    /// The RBSP ended before the syntax element was complete
    #[error("Truncated {nal} at bit {bit}")]
    Truncated { nal: &'static str, bit: usize },

    /// A syntax element holds a value the rewriter cannot handle
    #[error("Invalid {field} in {nal}: {value}")]
    InvalidField {
        nal: &'static str,
        field: &'static str,
        value: u32,
    },
}

/// Result type for bitstream operations
pub type BitstreamResult<T> = Result<T, BitstreamError>;
