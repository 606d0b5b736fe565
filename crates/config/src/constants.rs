//! Centralized constants
//!
//! Single source of truth for default values used across the workspace.
//! Settings fields fall back to these; runtime code should read the loaded
//! `Settings` rather than these directly.

/// Audio framing
pub mod audio {
    /// μ-law bytes per 20 ms frame at 8 kHz
    pub const ULAW_FRAME_BYTES: usize = 160;

    /// Telephony sample rate
    pub const TELEPHONY_RATE_HZ: u32 = 8_000;

    /// Realtime model sample rate for PCM16
    pub const MODEL_RATE_HZ: u32 = 24_000;
}

/// Session store defaults
pub mod session {
    /// KV TTL for a call session (seconds)
    pub const KV_TTL_SECONDS: u64 = 3_600;

    /// Max entries in the local write-through cache
    pub const CACHE_SIZE: usize = 1_000;

    /// Local cache entry TTL (seconds)
    pub const CACHE_TTL_SECONDS: u64 = 300;

    /// KV health probe window (seconds)
    pub const HEALTH_WINDOW_SECONDS: u64 = 15;
}

/// Per-call and per-caller limits
pub mod limits {
    /// Wall-clock cap per call (seconds)
    pub const MAX_CALL_DURATION_SECONDS: u64 = 600;

    /// Calls allowed per caller per window
    pub const PER_CALLER_CALL_LIMIT: u32 = 5;

    /// Sliding window for the per-caller limit (seconds)
    pub const PER_CALLER_WINDOW_SECONDS: u64 = 3_600;

    /// Tool invocations allowed per model response
    pub const TOOL_BUDGET_PER_RESPONSE: u32 = 5;
}

/// Timeouts
pub mod timeouts {
    /// Model websocket connect (seconds)
    pub const MODEL_CONNECT_SECONDS: u64 = 5;

    /// First audio delta after response.create (seconds)
    pub const FIRST_AUDIO_DEADLINE_SECONDS: u64 = 4;

    /// Tool handler execution (seconds)
    pub const TOOL_TIMEOUT_SECONDS: u64 = 3;

    /// TTS first byte (milliseconds)
    pub const TTS_TIMEOUT_MS: u64 = 2_000;

    /// Outbound telephony write must drain within this (milliseconds)
    pub const BACKPRESSURE_MS: u64 = 2_000;
}

/// Circuit breaker defaults
pub mod breaker {
    /// Consecutive failures before opening
    pub const FAILURE_THRESHOLD: u32 = 5;

    /// Open → half-open after this many seconds
    pub const RECOVERY_SECONDS: u64 = 60;

    /// Consecutive half-open successes before closing
    pub const HALF_OPEN_SUCCESSES: u32 = 2;
}

/// Scheduling windows for appointment slots
pub mod scheduling {
    /// How far forward get_next_available_slots scans (days)
    pub const SCAN_DAYS: i64 = 14;

    /// Max slots returned per query
    pub const MAX_SLOTS: usize = 5;

    /// Default appointment duration (minutes)
    pub const DEFAULT_DURATION_MIN: u32 = 60;
}
