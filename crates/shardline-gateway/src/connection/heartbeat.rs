//! Heartbeat bookkeeping for one connection.

use std::time::Duration;
use tokio::time::Instant;

/// Zombie deadline as a multiple of the heartbeat interval
const ZOMBIE_FACTOR: f64 = 2.5;

/// Per-connection heartbeat state; dropped with the connection
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    last_sent: Option<Instant>,
    zombie_deadline: Option<Instant>,
    ping: Option<Duration>,
}

impl Heartbeat {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            zombie_deadline: None,
            ping: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a heartbeat sent at `now`
    ///
    /// The zombie deadline is armed only if none is pending, so a second
    /// heartbeat before an ack does not push it back.
    pub fn sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
        if self.zombie_deadline.is_none() {
            self.zombie_deadline = Some(now + self.interval.mul_f64(ZOMBIE_FACTOR));
        }
    }

    /// Record an ack received at `now` and return the measured ping
    pub fn acked(&mut self, now: Instant) -> Option<Duration> {
        self.zombie_deadline = None;
        if let Some(sent) = self.last_sent {
            self.ping = Some(now.saturating_duration_since(sent));
        }
        self.ping
    }

    pub fn zombie_deadline(&self) -> Option<Instant> {
        self.zombie_deadline
    }

    pub fn ack_pending(&self) -> bool {
        self.zombie_deadline.is_some()
    }

    pub fn ping(&self) -> Option<Duration> {
        self.ping
    }
}
