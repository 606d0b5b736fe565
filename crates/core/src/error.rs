//! Error types shared across the workspace

use thiserror::Error;

/// Audio codec errors
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// PCM16 input must contain whole little-endian samples
    #[error("PCM16 input has odd byte length: {0}")]
    OddPcmLength(usize),
}
