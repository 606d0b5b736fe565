//! Realtime bridge for the HVAC voice agent
//!
//! For one call, joins the telephony media stream and the realtime model
//! websocket, routing audio both ways with barge-in semantics, mediating
//! tool calls, and enforcing the per-call limits. The coordinator is
//! transport-agnostic: it speaks typed events over bounded channels, and
//! the adapters pump real websockets into those channels.

pub mod adapter;
pub mod bridge;
pub mod error;
pub mod model;
pub mod telephony;

pub use adapter::connect_model_peer;
pub use bridge::{
    run_bridge, BridgeConfig, BridgeDeps, BridgeOutcome, ModelPeer, TelephonyPeer,
};
pub use error::BridgeError;
pub use model::{ModelCommand, ModelEvent};
pub use telephony::{MediaFormat, MediaPayload, StartMeta, TelephonyCommand, TelephonyEvent};
