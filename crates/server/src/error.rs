//! Server errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] hvac_voice_persistence::PersistenceError),
}
