//! Shard error types

use std::time::Duration;
use thiserror::Error;

use crate::connection::TransportError;
use crate::protocol::CloseCode;

/// Shard error type
///
/// Clone so that one failure can be handed to both the start-up waiter and
/// every event subscriber.
#[derive(Debug, Clone, Error)]
pub enum ShardError {
    /// Socket could not be opened or broke during the first handshake
    #[error("shard {shard_id}: {source}")]
    Connect {
        shard_id: u32,
        #[source]
        source: TransportError,
    },

    /// The gateway rejected the shard permanently
    #[error("shard {shard_id} closed with code {code}: {reason}")]
    FatalClose {
        shard_id: u32,
        code: u16,
        reason: String,
    },

    /// Reconnect attempts ran out
    #[error("shard {shard_id} gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { shard_id: u32, attempts: u32 },

    /// The gateway kept invalidating the session
    #[error("shard {shard_id} gave up after {attempts} invalid sessions in a row")]
    SessionInvalidated { shard_id: u32, attempts: u32 },

    /// Operation on a shard that was destroyed
    #[error("shard {0} was destroyed")]
    Destroyed(u32),

    /// The shard task ended without reporting a result
    #[error("shard {0} task stopped")]
    TaskStopped(u32),

    /// A member lookup did not complete in time
    #[error("member lookup on shard {shard_id} timed out after {timeout:?}")]
    LookupTimedOut { shard_id: u32, timeout: Duration },

    /// A member lookup was dropped before its last chunk arrived
    #[error("member lookup on shard {0} was abandoned")]
    LookupAbandoned(u32),
}

/// Coarse error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardErrorKind {
    /// Network trouble; retrying may help
    Transient,
    /// The gateway refused the session for good
    Fatal,
    /// Reconnect budget used up
    Exhausted,
    /// The session could not be established again
    Session,
    /// Caller-side teardown
    Closed,
    /// Member lookup failure
    Lookup,
}

impl ShardError {
    pub(crate) fn fatal_close(shard_id: u32, code: u16) -> Self {
        let reason = CloseCode::from_u16(code)
            .map_or("unknown close code", CloseCode::description)
            .to_string();
        Self::FatalClose {
            shard_id,
            code,
            reason,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ShardErrorKind {
        match self {
            Self::Connect { .. } => ShardErrorKind::Transient,
            Self::FatalClose { .. } => ShardErrorKind::Fatal,
            Self::ReconnectExhausted { .. } => ShardErrorKind::Exhausted,
            Self::SessionInvalidated { .. } => ShardErrorKind::Session,
            Self::Destroyed(_) | Self::TaskStopped(_) => ShardErrorKind::Closed,
            Self::LookupTimedOut { .. } | Self::LookupAbandoned(_) => ShardErrorKind::Lookup,
        }
    }

    /// Whether trying the same start again may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ShardErrorKind::Transient
    }
}
