//! Telephony media-stream protocol
//!
//! JSON text frames over the provider's websocket. Inbound events are
//! `connected`, `start`, `media`, `mark`, `stop`; the server sends `media`,
//! `mark` and `clear` (flush the caller's playback queue, the barge-in
//! primitive). Commands that have no wire envelope (`announce`, `transfer`,
//! `hangup`) are executed by the transport adapter through the provider's
//! call-control API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Media format advertised in the start event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    pub channels: u32,
}

/// Payload of an inbound media event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Base64 μ-law bytes
    pub payload: String,
}

/// Metadata carried by the start event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMeta {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid")]
    pub call_sid: String,
    #[serde(rename = "mediaFormat", default)]
    pub media_format: Option<MediaFormat>,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: Option<Value>,
}

impl StartMeta {
    fn custom_param(&self, name: &str) -> Option<String> {
        self.custom_parameters
            .as_ref()
            .and_then(|p| p.get(name))
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Caller number, when the webhook forwarded it as a custom parameter
    pub fn from_number(&self) -> Option<String> {
        self.custom_param("from")
    }

    /// Dialed number, when forwarded
    pub fn to_number(&self) -> Option<String> {
        self.custom_param("to")
    }
}

/// Mark payload (echoed synchronization marker)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Events received from the telephony peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Start {
        start: StartMeta,
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    Stop {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl TelephonyEvent {
    /// Parse a text frame; None means a malformed or unknown frame which the
    /// bridge logs and drops.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Commands the bridge issues toward the caller.
///
/// `Media`, `Mark` and `Clear` map directly onto websocket frames via
/// [`TelephonyCommand::to_wire`]; the rest are call-control actions for the
/// adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyCommand {
    /// One μ-law frame, base64 payload
    Media { stream_sid: String, payload: String },
    Mark { stream_sid: String, name: String },
    /// Flush the caller's playback queue (barge-in)
    Clear { stream_sid: String },
    /// Speak with the provider's built-in voice
    Announce { text: String },
    /// Dial the caller onward to a human
    Transfer { to: String },
    Hangup,
}

impl TelephonyCommand {
    /// The JSON frame for wire-level commands; None for call-control actions
    pub fn to_wire(&self) -> Option<String> {
        let value = match self {
            Self::Media { stream_sid, payload } => serde_json::json!({
                "event": "media",
                "streamSid": stream_sid,
                "media": { "payload": payload },
            }),
            Self::Mark { stream_sid, name } => serde_json::json!({
                "event": "mark",
                "streamSid": stream_sid,
                "mark": { "name": name },
            }),
            Self::Clear { stream_sid } => serde_json::json!({
                "event": "clear",
                "streamSid": stream_sid,
            }),
            _ => return None,
        };
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_start_event() {
        let text = r#"{
            "event": "start",
            "start": {
                "streamSid": "MZ1",
                "callSid": "CA1",
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {"from": "+15550001111", "to": "+15559990000"}
            }
        }"#;
        let event = TelephonyEvent::parse(text).unwrap();
        let TelephonyEvent::Start { start, .. } = event else {
            panic!("expected start");
        };
        assert_eq!(start.call_sid, "CA1");
        assert_eq!(start.stream_sid, "MZ1");
        assert_eq!(start.from_number().as_deref(), Some("+15550001111"));
        assert_eq!(start.media_format.unwrap().sample_rate, 8000);
    }

    #[test]
    fn parses_media_and_stop() {
        let media = TelephonyEvent::parse(
            r#"{"event":"media","streamSid":"MZ1","media":{"track":"inbound","chunk":"1","timestamp":"20","payload":"AAAA"}}"#,
        )
        .unwrap();
        assert!(matches!(media, TelephonyEvent::Media { .. }));

        let stop = TelephonyEvent::parse(r#"{"event":"stop","streamSid":"MZ1"}"#).unwrap();
        assert!(matches!(stop, TelephonyEvent::Stop { .. }));
    }

    #[test]
    fn malformed_frames_are_dropped() {
        assert!(TelephonyEvent::parse("not json").is_none());
        assert!(TelephonyEvent::parse(r#"{"event":"unheard_of"}"#).is_none());
    }

    #[test]
    fn wire_commands_serialize_and_control_commands_do_not() {
        let media = TelephonyCommand::Media {
            stream_sid: "MZ1".to_string(),
            payload: "AAAA".to_string(),
        };
        let wire = media.to_wire().unwrap();
        assert!(wire.contains(r#""event":"media""#));
        assert!(wire.contains(r#""payload":"AAAA""#));

        let clear = TelephonyCommand::Clear {
            stream_sid: "MZ1".to_string(),
        };
        assert!(clear.to_wire().unwrap().contains(r#""event":"clear""#));

        assert!(TelephonyCommand::Hangup.to_wire().is_none());
        assert!(TelephonyCommand::Transfer {
            to: "+1555".to_string()
        }
        .to_wire()
        .is_none());
    }
}
