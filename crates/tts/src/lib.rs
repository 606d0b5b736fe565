//! Streaming TTS with ordered fallback
//!
//! Used on the turn-based path and for fixed announcements on the streaming
//! path. Providers are tried in an order derived from the caller's
//! preference and current health; output is μ-law 8 kHz frames, or a marker
//! telling the telephony layer to use its built-in voice.

pub mod engine;
pub mod providers;

pub use engine::{TtsChunk, TtsEngine};
pub use providers::{BuiltinSayProvider, HttpTtsProvider, TtsError, TtsProvider};
