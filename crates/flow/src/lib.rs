//! Turn-based voice flow
//!
//! The fallback path when streaming is unavailable: each webhook turn
//! carries one speech-gather result, the state machine fills one slot per
//! turn, and the response is an instruction document (verb XML) telling the
//! telephony provider what to do next.

pub mod machine;
pub mod parse;
pub mod twiml;

pub use machine::{FlowState, TurnFlow, TurnOutcome};
pub use parse::{contains_emergency, map_city_to_location, parse_phone, PhoneParse};
pub use twiml::InstructionDocument;
