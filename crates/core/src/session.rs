//! Call session model
//!
//! One [`CallSession`] exists per live telephone call, keyed by the
//! provider's call id. It is serialized as JSON into the shared session
//! store and mutated only by the owning coordinator; turns are append-only
//! with strictly monotonic timestamps.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Caller,
    Agent,
    Tool,
}

/// One conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Optional intent or emotion tag attached by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Structured fields collected during the call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallSlots {
    pub name: Option<String>,
    /// Callback phone in E.164
    pub callback_phone: Option<String>,
    pub address: Option<String>,
    pub issue: Option<String>,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub confirmation_channel: Option<String>,
    /// Service location resolved from the caller's city
    pub location_code: Option<String>,
}

impl CallSlots {
    /// Everything a booking needs is present
    pub fn booking_complete(&self) -> bool {
        self.name.is_some()
            && self.callback_phone.is_some()
            && self.issue.is_some()
            && self.preferred_date.is_some()
            && self.preferred_time.is_some()
    }
}

/// Boolean call outcomes plus frustration tracking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallFlags {
    pub emergency_detected: bool,
    pub transfer_requested: bool,
    pub appointment_booked: bool,
    /// 0 (calm) to 5 (escalate)
    pub frustration: u8,
}

/// Per-call counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallCounters {
    pub turns: u32,
    pub tool_calls: u32,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Why a call ended, recorded on the final call record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndedReason {
    Completed,
    CallerHangup,
    DurationCap,
    ModelFatal,
    Backpressure,
    RateLimited,
    Transferred,
    Error,
}

impl EndedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CallerHangup => "caller_hangup",
            Self::DurationCap => "duration_cap",
            Self::ModelFatal => "model_fatal",
            Self::Backpressure => "backpressure",
            Self::RateLimited => "rate_limited",
            Self::Transferred => "transferred",
            Self::Error => "error",
        }
    }
}

/// Per-call state, created on inbound call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    /// Provider call id (opaque)
    pub call_id: String,
    pub caller_phone: String,
    pub dialed_phone: String,
    pub tenant_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,

    /// Append-only conversation, strictly monotonic timestamps
    pub turns: Vec<Turn>,
    pub slots: CallSlots,
    pub flags: CallFlags,

    /// Stream id issued by telephony after the websocket handshake
    pub stream_id: Option<String>,
    /// Last model response id, for interrupt addressing
    pub last_response_id: Option<String>,
    /// Confirmation id once a booking exists
    pub confirmation_id: Option<i64>,

    pub counters: CallCounters,
    /// Names of tools invoked during the call, in order
    pub tools_used: Vec<String>,

    /// Turn-based path: current state machine node
    #[serde(default)]
    pub flow_state: Option<String>,
    /// Turn-based path: reprompts consumed in the current state
    #[serde(default)]
    pub flow_retries: u8,
    /// Turn-based path: digits collected so far across turns
    #[serde(default)]
    pub flow_partial_phone: Option<String>,
}

impl CallSession {
    pub fn new(
        call_id: impl Into<String>,
        caller_phone: impl Into<String>,
        dialed_phone: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            caller_phone: caller_phone.into(),
            dialed_phone: dialed_phone.into(),
            tenant_id: tenant_id.into(),
            started_at: now,
            last_activity: now,
            turns: Vec::new(),
            slots: CallSlots::default(),
            flags: CallFlags::default(),
            stream_id: None,
            last_response_id: None,
            confirmation_id: None,
            counters: CallCounters::default(),
            tools_used: Vec::new(),
            flow_state: None,
            flow_retries: 0,
            flow_partial_phone: None,
        }
    }

    /// Append a turn, clamping the timestamp forward so the sequence stays
    /// strictly monotonic even under clock skew.
    pub fn push_turn(&mut self, role: TurnRole, text: impl Into<String>, tag: Option<String>) {
        let mut timestamp = Utc::now();
        if let Some(last) = self.turns.last() {
            if timestamp <= last.timestamp {
                timestamp = last.timestamp + Duration::microseconds(1);
            }
        }
        self.turns.push(Turn {
            role,
            text: text.into(),
            timestamp,
            tag,
        });
        self.counters.turns += 1;
        self.last_activity = timestamp;
    }

    /// Record a tool invocation against the counters
    pub fn record_tool_call(&mut self, name: &str) {
        self.counters.tool_calls += 1;
        self.tools_used.push(name.to_string());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn duration_s(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Render the conversation as plain text for notifications
    pub fn transcript_text(&self) -> String {
        self.turns
            .iter()
            .map(|t| {
                let role = match t.role {
                    TurnRole::Caller => "caller",
                    TurnRole::Agent => "agent",
                    TurnRole::Tool => "tool",
                };
                format!("[{role}] {}", t.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CallSession {
        CallSession::new("CA100", "+15550001111", "+15559990000", "default")
    }

    #[test]
    fn turns_are_strictly_monotonic() {
        let mut s = session();
        for i in 0..50 {
            s.push_turn(TurnRole::Caller, format!("turn {i}"), None);
        }
        for pair in s.turns.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
        assert_eq!(s.counters.turns, 50);
    }

    #[test]
    fn booking_complete_requires_all_core_slots() {
        let mut s = session();
        assert!(!s.slots.booking_complete());
        s.slots.name = Some("Alice".into());
        s.slots.callback_phone = Some("+15551234567".into());
        s.slots.issue = Some("AC out".into());
        s.slots.preferred_date = Some("2025-02-10".into());
        assert!(!s.slots.booking_complete());
        s.slots.preferred_time = Some("09:00".into());
        assert!(s.slots.booking_complete());
    }

    #[test]
    fn session_round_trips_through_json() {
        let mut s = session();
        s.push_turn(TurnRole::Agent, "Hello!", Some("greeting".into()));
        s.flags.emergency_detected = true;
        s.record_tool_call("log_emergency");

        let json = serde_json::to_string(&s).unwrap();
        let back: CallSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.call_id, s.call_id);
        assert_eq!(back.turns.len(), 1);
        assert!(back.flags.emergency_detected);
        assert_eq!(back.tools_used, vec!["log_emergency".to_string()]);
    }

    #[test]
    fn ended_reason_strings_are_stable() {
        assert_eq!(EndedReason::DurationCap.as_str(), "duration_cap");
        assert_eq!(EndedReason::ModelFatal.as_str(), "model_fatal");
    }
}
