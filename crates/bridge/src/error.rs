//! Bridge errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("telephony start event never arrived")]
    NoStart,

    #[error("model websocket connect failed: {0}")]
    ModelConnect(String),

    #[error("model peer closed during setup")]
    ModelClosed,

    #[error("bridge cancelled")]
    Cancelled,
}
