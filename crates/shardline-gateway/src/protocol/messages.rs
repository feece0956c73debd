//! Gateway message format
//!
//! Every frame is a JSON object `{op, d, s, t}`.

use super::{
    GuildSubscribePayload, HelloPayload, IdentifyPayload, OpCode, RequestGuildMembersPayload,
    ResumePayload, VoiceStateUpdatePayload,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shardline_core::PresenceData;

/// Gateway message format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event payload (`null` when absent)
    #[serde(default)]
    pub d: Value,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name (only for op=0 Dispatch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// Why an inbound frame could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown op code: {0}")]
    UnknownOpcode(u64),
}

#[derive(Deserialize)]
struct RawMessage {
    op: u64,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

impl GatewayMessage {
    fn new(op: OpCode, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    fn with_payload<T: Serialize>(op: OpCode, payload: &T) -> Self {
        Self::new(op, serde_json::to_value(payload).unwrap_or_default())
    }

    // === Client Messages ===

    /// Heartbeat (op=1) carrying the last sequence seen
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::new(OpCode::Heartbeat, last_sequence.map_or(Value::Null, Value::from))
    }

    #[must_use]
    pub fn identify(payload: &IdentifyPayload) -> Self {
        Self::with_payload(OpCode::Identify, payload)
    }

    #[must_use]
    pub fn resume(payload: &ResumePayload) -> Self {
        Self::with_payload(OpCode::Resume, payload)
    }

    #[must_use]
    pub fn presence_update(presence: &PresenceData) -> Self {
        Self::with_payload(OpCode::PresenceUpdate, presence)
    }

    #[must_use]
    pub fn request_guild_members(payload: &RequestGuildMembersPayload) -> Self {
        Self::with_payload(OpCode::RequestGuildMembers, payload)
    }

    #[must_use]
    pub fn voice_state_update(payload: &VoiceStateUpdatePayload) -> Self {
        Self::with_payload(OpCode::VoiceStateUpdate, payload)
    }

    #[must_use]
    pub fn guild_subscribe(payload: &GuildSubscribePayload) -> Self {
        Self::with_payload(OpCode::GuildSubscribe, payload)
    }

    // === Server Messages ===

    /// Dispatch (op=0)
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d: data,
            s: Some(sequence),
            t: Some(event_type.into()),
        }
    }

    /// Hello (op=10)
    #[must_use]
    pub fn hello(heartbeat_interval: u64) -> Self {
        Self::with_payload(OpCode::Hello, &HelloPayload { heartbeat_interval })
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, Value::Null)
    }

    #[must_use]
    pub fn reconnect() -> Self {
        Self::new(OpCode::Reconnect, Value::Null)
    }

    /// Invalid Session (op=9); `resumable` indicates if the session can be resumed
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::new(OpCode::InvalidSession, Value::Bool(resumable))
    }

    // === Parsing ===

    /// Try to parse the `d` field as a typed payload
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.d)
    }

    /// Heartbeat interval of a Hello frame
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.payload().ok()
    }

    /// `resumable` flag of an Invalid Session frame
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_bool().unwrap_or(false))
    }

    /// Decode a text frame, separating unknown op codes from broken JSON
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let raw: RawMessage = serde_json::from_str(text)?;
        let op = u8::try_from(raw.op)
            .ok()
            .and_then(OpCode::from_u8)
            .ok_or(FrameError::UnknownOpcode(raw.op))?;
        Ok(Self {
            op,
            d: raw.d,
            s: raw.s,
            t: raw.t,
        })
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
