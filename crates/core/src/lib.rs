//! Core traits and types for the HVAC voice agent
//!
//! This crate provides foundational types used across all other crates:
//! - Telephony audio codec (μ-law 8 kHz ⇄ PCM16 24 kHz) and frame chunking
//! - Call session model (turns, slots, flags, counters)
//! - Error types

pub mod audio;
pub mod error;
pub mod session;

pub use audio::{
    pcm16_24k_to_ulaw8k, ulaw8k_to_pcm16_24k, FrameChunker, SampleRate, ULAW_FRAME_BYTES,
};
pub use error::CodecError;
pub use session::{
    CallCounters, CallFlags, CallSession, CallSlots, EndedReason, Turn, TurnRole,
};
