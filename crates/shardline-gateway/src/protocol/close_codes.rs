//! WebSocket close codes and what a shard does after each one.

use serde::{Deserialize, Serialize};

/// Gateway WebSocket close codes
///
/// 4015 and 4016 are never sent by the server: the shard uses them to close
/// its own socket so that self-initiated closes stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure, the session is gone
    Normal = 1000,
    /// Server going away (restart, load balancing)
    GoingAway = 1001,
    /// Connection dropped without a close frame
    Abnormal = 1006,
    /// Unknown error occurred
    UnknownError = 4000,
    /// Invalid opcode sent
    UnknownOpcode = 4001,
    /// Invalid payload encoding
    DecodeError = 4002,
    /// Sent payload before Identify
    NotAuthenticated = 4003,
    /// Invalid token provided
    AuthenticationFailed = 4004,
    /// Sent Identify twice
    AlreadyAuthenticated = 4005,
    /// Invalid sequence number for Resume
    InvalidSequence = 4007,
    /// Too many requests (rate limited)
    RateLimited = 4008,
    /// Session has timed out
    SessionTimeout = 4009,
    /// Invalid shard configuration
    InvalidShard = 4010,
    /// Sharding is required
    ShardingRequired = 4011,
    /// Invalid/outdated API version
    InvalidApiVersion = 4012,
    /// Invalid intents bitfield
    InvalidIntents = 4013,
    /// Intents not enabled for this application
    DisallowedIntents = 4014,
    /// Heartbeat or handshake went unanswered (client side)
    Zombie = 4015,
    /// Shard destroyed on purpose (client side)
    Destroyed = 4016,
}

/// What the shard does after its socket closed with a given code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseDisposition {
    /// Reconnect and resume, keeping the session
    Resume,
    /// Reconnect and identify again, discarding the session
    Reidentify,
    /// Caller-initiated teardown, never reconnect
    Voluntary,
    /// Permanent rejection, surface as a hard error
    Fatal,
}

impl CloseDisposition {
    /// Classify a raw close code. Unknown codes are fatal.
    #[must_use]
    pub fn classify(code: u16) -> Self {
        CloseCode::from_u16(code).map_or(Self::Fatal, CloseCode::disposition)
    }

    #[must_use]
    pub const fn reconnects(self) -> bool {
        matches!(self, Self::Resume | Self::Reidentify)
    }
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1006 => Some(Self::Abnormal),
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            4015 => Some(Self::Zombie),
            4016 => Some(Self::Destroyed),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn disposition(self) -> CloseDisposition {
        match self {
            Self::GoingAway
            | Self::Abnormal
            | Self::UnknownError
            | Self::UnknownOpcode
            | Self::DecodeError
            | Self::NotAuthenticated
            | Self::AlreadyAuthenticated
            | Self::RateLimited
            | Self::Zombie => CloseDisposition::Resume,
            Self::Normal | Self::InvalidSequence | Self::SessionTimeout => {
                CloseDisposition::Reidentify
            }
            Self::Destroyed => CloseDisposition::Voluntary,
            Self::AuthenticationFailed
            | Self::InvalidShard
            | Self::ShardingRequired
            | Self::InvalidApiVersion
            | Self::InvalidIntents
            | Self::DisallowedIntents => CloseDisposition::Fatal,
        }
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Normal => "Normal closure",
            Self::GoingAway => "Going away",
            Self::Abnormal => "Connection lost",
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::InvalidSequence => "Invalid sequence number",
            Self::RateLimited => "Rate limited",
            Self::SessionTimeout => "Session timeout",
            Self::InvalidShard => "Invalid shard configuration",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid API version",
            Self::InvalidIntents => "Invalid intents",
            Self::DisallowedIntents => "Disallowed intents",
            Self::Zombie => "No heartbeat acknowledgement",
            Self::Destroyed => "Shard destroyed",
        }
    }

    /// Get the name of this close code
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::GoingAway => "GoingAway",
            Self::Abnormal => "Abnormal",
            Self::UnknownError => "UnknownError",
            Self::UnknownOpcode => "UnknownOpcode",
            Self::DecodeError => "DecodeError",
            Self::NotAuthenticated => "NotAuthenticated",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::AlreadyAuthenticated => "AlreadyAuthenticated",
            Self::InvalidSequence => "InvalidSequence",
            Self::RateLimited => "RateLimited",
            Self::SessionTimeout => "SessionTimeout",
            Self::InvalidShard => "InvalidShard",
            Self::ShardingRequired => "ShardingRequired",
            Self::InvalidApiVersion => "InvalidApiVersion",
            Self::InvalidIntents => "InvalidIntents",
            Self::DisallowedIntents => "DisallowedIntents",
            Self::Zombie => "Zombie",
            Self::Destroyed => "Destroyed",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.as_u16(), self.description())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
