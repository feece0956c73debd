//! Observable shard state.

use serde::Serialize;
use std::time::Duration;

/// Connection lifecycle of one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    #[default]
    Idle,
    Connecting,
    /// Socket open, waiting for Hello
    AwaitingHandshake,
    Identifying,
    Resuming,
    Ready,
    /// Heartbeat or handshake went unanswered; the socket is being torn down
    ZombieDetected,
    Reconnecting,
    /// Terminal: failed or destroyed
    Closed,
}

impl ShardState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Snapshot of a shard, cheap to copy out of its lock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardStatus {
    pub state: ShardState,
    /// Last heartbeat round trip; `None` until the first ack of the
    /// current connection
    pub ping: Option<Duration>,
    pub sequence: Option<u64>,
    pub session_id: Option<String>,
}

impl ShardStatus {
    /// Ping in fractional milliseconds
    #[must_use]
    pub fn ping_ms(&self) -> Option<f64> {
        self.ping.map(|ping| ping.as_secs_f64() * 1000.0)
    }
}
