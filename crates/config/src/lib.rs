//! Configuration management for the HVAC voice agent
//!
//! Supports loading configuration from:
//! - YAML/TOML files (config/default.yaml, config/{env}.yaml)
//! - Environment variables (MODEL_API_KEY, KV_URL, MAX_CALL_DURATION_SECONDS, ...)
//! - Runtime overrides
//!
//! Tenant configuration lives in the `tenants` section; the environment
//! variables `COMPANY_NAME`, `DEFAULT_GREETING`, `TRANSFER_PHONE` and
//! `EMERGENCY_PHONE` seed the default tenant only.

pub mod constants;
pub mod settings;
pub mod tenant;

pub use settings::{
    load_settings, BreakerSettings, CallLimits, ModelAudioFormat, ModelSettings, ServerSettings,
    SessionStoreSettings, Settings, TtsPreference, TtsSettings, VadSettings,
};
pub use tenant::{CallPath, TenantConfig, TenantDirectory};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
