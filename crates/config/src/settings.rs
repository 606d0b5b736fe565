//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{breaker, limits, session, timeouts};
use crate::tenant::TenantDirectory;
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// HTTP/WS listener
    #[serde(default)]
    pub server: ServerSettings,

    /// Realtime model endpoint and session parameters
    #[serde(default)]
    pub model: ModelSettings,

    /// Session store (shared KV + local cache)
    #[serde(default)]
    pub session: SessionStoreSettings,

    /// Per-call and per-caller limits
    #[serde(default)]
    pub limits: CallLimits,

    /// TTS fallback chain
    #[serde(default)]
    pub tts: TtsSettings,

    /// Circuit breaker defaults
    #[serde(default)]
    pub breaker: BreakerSettings,

    /// Tenant directory keyed by dialed number
    #[serde(default)]
    pub tenants: TenantDirectory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable hostname used in stream URLs
    #[serde(default = "default_external_host")]
    pub external_host: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_external_host() -> String {
    std::env::var("EXTERNAL_HOST").unwrap_or_else(|_| "localhost:8080".to_string())
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            external_host: default_external_host(),
        }
    }
}

/// Audio format spoken with the realtime model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelAudioFormat {
    /// PCM16 at 24 kHz; the bridge converts to/from telephony μ-law
    #[default]
    Pcm16,
    /// μ-law 8 kHz end to end; no conversion at the bridge
    G711Ulaw,
}

impl ModelAudioFormat {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
        }
    }
}

/// Server-side voice activity detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,
    #[serde(default = "default_vad_prefix")]
    pub prefix_padding_ms: u32,
    #[serde(default = "default_vad_silence")]
    pub silence_duration_ms: u32,
}

fn default_vad_threshold() -> f32 {
    0.5
}

fn default_vad_prefix() -> u32 {
    300
}

fn default_vad_silence() -> u32 {
    500
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: default_vad_threshold(),
            prefix_padding_ms: default_vad_prefix(),
            silence_duration_ms: default_vad_silence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_model_api_key")]
    pub api_key: String,
    #[serde(default = "default_model_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
    #[serde(default)]
    pub audio_format: ModelAudioFormat,
    #[serde(default)]
    pub vad: VadSettings,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_first_audio_deadline")]
    pub first_audio_deadline_seconds: u64,
}

fn default_model_api_key() -> String {
    std::env::var("MODEL_API_KEY").unwrap_or_default()
}

fn default_model_ws_url() -> String {
    std::env::var("MODEL_WS_URL")
        .unwrap_or_else(|_| "wss://api.openai.com/v1/realtime?model=gpt-realtime".to_string())
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_response_tokens() -> u32 {
    4096
}

fn default_connect_timeout() -> u64 {
    timeouts::MODEL_CONNECT_SECONDS
}

fn default_first_audio_deadline() -> u64 {
    timeouts::FIRST_AUDIO_DEADLINE_SECONDS
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: default_model_api_key(),
            ws_url: default_model_ws_url(),
            voice: default_voice(),
            temperature: default_temperature(),
            max_response_tokens: default_max_response_tokens(),
            audio_format: ModelAudioFormat::default(),
            vad: VadSettings::default(),
            connect_timeout_seconds: default_connect_timeout(),
            first_audio_deadline_seconds: default_first_audio_deadline(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreSettings {
    /// Shared KV endpoint; absent means in-memory only
    #[serde(default = "default_kv_url")]
    pub kv_url: Option<String>,
    #[serde(default = "default_kv_keyspace")]
    pub kv_keyspace: String,
    #[serde(default = "default_kv_ttl")]
    pub kv_ttl_seconds: u64,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

fn default_kv_url() -> Option<String> {
    std::env::var("KV_URL").ok()
}

fn default_kv_keyspace() -> String {
    std::env::var("KV_KEYSPACE").unwrap_or_else(|_| "hvac_voice".to_string())
}

fn default_kv_ttl() -> u64 {
    env_u64("KV_TTL_SECONDS", session::KV_TTL_SECONDS)
}

fn default_cache_size() -> usize {
    env_u64("SESSION_CACHE_SIZE", session::CACHE_SIZE as u64) as usize
}

fn default_cache_ttl() -> u64 {
    env_u64("SESSION_CACHE_TTL", session::CACHE_TTL_SECONDS)
}

impl Default for SessionStoreSettings {
    fn default() -> Self {
        Self {
            kv_url: default_kv_url(),
            kv_keyspace: default_kv_keyspace(),
            kv_ttl_seconds: default_kv_ttl(),
            cache_size: default_cache_size(),
            cache_ttl_seconds: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLimits {
    #[serde(default = "default_max_call_duration")]
    pub max_call_duration_seconds: u64,
    #[serde(default = "default_per_caller_limit")]
    pub per_caller_call_limit: u32,
    #[serde(default = "default_per_caller_window")]
    pub per_caller_window_seconds: u64,
    #[serde(default = "default_tool_budget")]
    pub tool_budget_per_response: u32,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_seconds: u64,
}

fn default_max_call_duration() -> u64 {
    env_u64(
        "MAX_CALL_DURATION_SECONDS",
        limits::MAX_CALL_DURATION_SECONDS,
    )
}

fn default_per_caller_limit() -> u32 {
    env_u64("PER_CALLER_CALL_LIMIT", limits::PER_CALLER_CALL_LIMIT as u64) as u32
}

fn default_per_caller_window() -> u64 {
    env_u64(
        "PER_CALLER_WINDOW_SECONDS",
        limits::PER_CALLER_WINDOW_SECONDS,
    )
}

fn default_tool_budget() -> u32 {
    env_u64(
        "TOOL_BUDGET_PER_RESPONSE",
        limits::TOOL_BUDGET_PER_RESPONSE as u64,
    ) as u32
}

fn default_tool_timeout() -> u64 {
    env_u64("TOOL_TIMEOUT_SECONDS", timeouts::TOOL_TIMEOUT_SECONDS)
}

impl Default for CallLimits {
    fn default() -> Self {
        Self {
            max_call_duration_seconds: default_max_call_duration(),
            per_caller_call_limit: default_per_caller_limit(),
            per_caller_window_seconds: default_per_caller_window(),
            tool_budget_per_response: default_tool_budget(),
            tool_timeout_seconds: default_tool_timeout(),
        }
    }
}

/// Ordering preference for the TTS fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TtsPreference {
    /// Quality first
    Best,
    /// Lowest observed latency first
    Fast,
    /// Fewest recent failures first
    #[default]
    Reliable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    /// Ordered provider names; empty means the built-in chain
    #[serde(default = "default_tts_providers")]
    pub providers: Vec<String>,
    #[serde(default = "default_tts_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_tts_providers() -> Vec<String> {
    std::env::var("TTS_PROVIDERS")
        .map(|s| {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn default_tts_timeout_ms() -> u64 {
    env_u64("TTS_TIMEOUT_MS", timeouts::TTS_TIMEOUT_MS)
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            providers: default_tts_providers(),
            timeout_ms: default_tts_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_breaker_threshold")]
    pub threshold: u32,
    #[serde(default = "default_breaker_recovery")]
    pub recovery_seconds: u64,
    #[serde(default = "default_half_open_successes")]
    pub half_open_successes: u32,
}

fn default_breaker_threshold() -> u32 {
    env_u64("BREAKER_THRESHOLD", breaker::FAILURE_THRESHOLD as u64) as u32
}

fn default_breaker_recovery() -> u64 {
    env_u64("BREAKER_RECOVERY_SECONDS", breaker::RECOVERY_SECONDS)
}

fn default_half_open_successes() -> u32 {
    breaker::HALF_OPEN_SUCCESSES
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: default_breaker_threshold(),
            recovery_seconds: default_breaker_recovery(),
            half_open_successes: default_half_open_successes(),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Validate process-level configuration. Call-level problems (unknown
    /// tenant, unknown location) fail the individual call instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.api_key.is_empty() {
            return Err(ConfigError::MissingField("model.api_key".to_string()));
        }
        if !self.model.ws_url.starts_with("ws://") && !self.model.ws_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue {
                field: "model.ws_url".to_string(),
                message: format!("not a websocket URL: {}", self.model.ws_url),
            });
        }
        if self.limits.tool_budget_per_response == 0 {
            return Err(ConfigError::InvalidValue {
                field: "limits.tool_budget_per_response".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.session.cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.cache_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
pub fn load_settings(env_name: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if Path::new("config/default.yaml").exists() {
        builder = builder.add_source(File::with_name("config/default"));
    }
    if let Some(env) = env_name {
        let path = format!("config/{env}");
        if Path::new(&format!("{path}.yaml")).exists() {
            builder = builder.add_source(File::with_name(&path));
        }
    }
    builder = builder.add_source(Environment::with_prefix("HVAC_VOICE").separator("__"));

    let settings: Settings = builder.build()?.try_deserialize()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.limits.max_call_duration_seconds, 600);
        assert_eq!(s.limits.per_caller_call_limit, 5);
        assert_eq!(s.limits.per_caller_window_seconds, 3600);
        assert_eq!(s.limits.tool_budget_per_response, 5);
        assert_eq!(s.limits.tool_timeout_seconds, 3);
        assert_eq!(s.session.kv_ttl_seconds, 3600);
        assert_eq!(s.session.cache_size, 1000);
        assert_eq!(s.session.cache_ttl_seconds, 300);
        assert_eq!(s.tts.timeout_ms, 2000);
        assert_eq!(s.breaker.threshold, 5);
        assert_eq!(s.breaker.recovery_seconds, 60);
    }

    #[test]
    fn validate_requires_api_key() {
        let mut s = Settings::default();
        s.model.api_key = String::new();
        assert!(s.validate().is_err());

        s.model.api_key = "sk-test".to_string();
        assert!(s.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_ws_url() {
        let mut s = Settings::default();
        s.model.api_key = "sk-test".to_string();
        s.model.ws_url = "https://example.com".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn model_audio_format_wire_names() {
        assert_eq!(ModelAudioFormat::Pcm16.wire_name(), "pcm16");
        assert_eq!(ModelAudioFormat::G711Ulaw.wire_name(), "g711_ulaw");
    }
}
