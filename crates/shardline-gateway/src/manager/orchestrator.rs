//! Shard orchestrator
//!
//! Owns every shard of the process: starts them in rate-limited batches,
//! routes guilds to shards and fans presence and teardown out to all of them.

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use shardline_common::GatewayConfig;
use shardline_core::{PresenceData, ShardInfo, Snowflake};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

use super::{AssignmentError, GatewayMetadata, ManagerError, ShardAssignment};
use crate::connection::Transport;
use crate::events::ClientEvent;
use crate::shard::{GatewayShard, ReadyOutcome, ShardConfig, ShardError};

/// Capacity of the client-wide event bus
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Manages every shard of one client
pub struct ShardManager {
    token: RwLock<String>,
    gateway: GatewayConfig,
    assignment: Option<ShardAssignment>,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<ClientEvent>,

    /// Running shards by id
    shards: DashMap<u32, Arc<GatewayShard>>,

    metadata: RwLock<Option<GatewayMetadata>>,
    /// Effective shard count; `None` while unsharded
    total: RwLock<Option<u32>>,
    presence: RwLock<Option<PresenceData>>,
}

impl ShardManager {
    #[must_use]
    pub fn new(
        token: impl Into<String>,
        gateway: GatewayConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            token: RwLock::new(token.into()),
            gateway,
            assignment: None,
            transport,
            events,
            shards: DashMap::new(),
            metadata: RwLock::new(None),
            total: RwLock::new(None),
            presence: RwLock::new(None),
        }
    }

    /// Run the given shard ids instead of a single unsharded connection
    #[must_use]
    pub fn with_assignment(mut self, assignment: Option<ShardAssignment>) -> Self {
        self.assignment = assignment;
        self
    }

    /// Presence sent with every identify
    #[must_use]
    pub fn with_presence(self, presence: PresenceData) -> Self {
        *self.presence.write() = Some(presence);
        self
    }

    /// Token used by shards spawned from now on
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn assignment(&self) -> Option<&ShardAssignment> {
        self.assignment.as_ref()
    }

    /// Record where to connect and settle the shard count
    ///
    /// An explicit count that differs from the recommendation is kept, with
    /// a warning. Metadata without a recommendation (user accounts) forces an
    /// unsharded connection unless an explicit count was configured.
    pub fn apply_gateway_metadata(&self, metadata: GatewayMetadata) -> Result<(), AssignmentError> {
        let total = match &self.assignment {
            Some(assignment) => {
                let total = assignment.effective_total(metadata.shards)?;
                if let Some(recommended) = metadata.shards {
                    if recommended != total {
                        tracing::warn!(
                            configured = total,
                            recommended,
                            "Configured shard count differs from the recommended count"
                        );
                    }
                }
                Some(total)
            }
            None => None,
        };

        tracing::info!(
            url = %metadata.url,
            shard_count = ?total,
            max_concurrency = metadata.max_concurrency(),
            "Gateway metadata applied"
        );
        *self.total.write() = total;
        *self.metadata.write() = Some(metadata);
        Ok(())
    }

    /// Effective shard count; `None` when unsharded
    pub fn shard_count(&self) -> Option<u32> {
        *self.total.read()
    }

    /// Start every assigned shard and wait until all are ready
    ///
    /// Shards start in ascending id order, `max_concurrency` at a time, with
    /// a quiet period between batches. Returns the user from the last READY.
    pub async fn start_all(&self) -> Result<Option<Value>, ManagerError> {
        let metadata = self
            .metadata
            .read()
            .clone()
            .ok_or(ManagerError::MissingMetadata)?;
        let configs = self.shard_configs(&metadata)?;
        let concurrency = metadata.max_concurrency() as usize;

        let mut user = None;
        for (index, batch) in configs.chunks(concurrency).enumerate() {
            if index > 0 {
                sleep(self.quiet_period()).await;
            }

            let ids: Vec<u32> = batch.iter().map(|config| config.id).collect();
            tracing::info!(batch = index, shards = ?ids, "Starting shard batch");

            let results = join_all(batch.iter().cloned().map(|config| self.start_shard(config))).await;
            for result in results {
                if let Some(current) = result?.user() {
                    user = Some(current.clone());
                }
            }
        }

        tracing::info!(shards = self.shards.len(), "All shards ready");
        Ok(user)
    }

    /// Shard that receives events for `guild_id`, if this process runs it
    pub fn for_guild_id(&self, guild_id: Snowflake) -> Option<Arc<GatewayShard>> {
        let id = match self.shard_count() {
            Some(total) => guild_id.shard_id(total),
            None => 0,
        };
        self.get(id)
    }

    pub fn get(&self, id: u32) -> Option<Arc<GatewayShard>> {
        self.shards.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Running shard ids, ascending
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.shards.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Mean heartbeat round trip in milliseconds over shards that have one
    pub fn aggregate_ping(&self) -> Option<f64> {
        mean_ping_ms(self.shards.iter().map(|entry| entry.value().ping()))
    }

    /// Send a presence to every shard and keep it for later identifies
    ///
    /// Returns how many shards accepted the update.
    pub fn broadcast_presence(&self, presence: &PresenceData) -> usize {
        *self.presence.write() = Some(presence.clone());

        let mut updated = 0;
        for shard in self.snapshot() {
            match shard.set_presence(presence.clone()) {
                Ok(()) => updated += 1,
                Err(error) => {
                    tracing::warn!(shard_id = shard.id(), error = %error, "Presence update skipped");
                }
            }
        }
        updated
    }

    /// Destroy every shard and empty the registry. Idempotent.
    pub async fn destroy_all(&self) {
        let shards = self.snapshot();
        self.shards.clear();
        if shards.is_empty() {
            return;
        }

        tracing::info!(shards = shards.len(), "Destroying all shards");
        join_all(shards.iter().map(|shard| shard.destroy())).await;
    }

    async fn start_shard(&self, config: ShardConfig) -> Result<ReadyOutcome, ShardError> {
        let id = config.id;
        let max_attempts = self.gateway.max_initial_connect_attempts.max(1);
        let mut attempt = 1;

        loop {
            let (shard, ready) = GatewayShard::spawn(
                config.clone(),
                Arc::clone(&self.transport),
                self.events.clone(),
            );
            self.register(shard).await;

            match ready.wait().await {
                Ok(outcome) => return Ok(outcome),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        shard_id = id,
                        attempt,
                        error = %error,
                        "Shard failed to connect, retrying"
                    );
                    attempt += 1;
                    sleep(self.quiet_period()).await;
                }
                Err(error) => {
                    if let Some((_, shard)) = self.shards.remove(&id) {
                        shard.destroy().await;
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Insert a shard, destroying any previous one with the same id first
    async fn register(&self, shard: GatewayShard) {
        let id = shard.id();
        if let Some((_, previous)) = self.shards.remove(&id) {
            tracing::debug!(shard_id = id, "Replacing existing shard");
            previous.destroy().await;
        }
        self.shards.insert(id, Arc::new(shard));
    }

    fn shard_configs(&self, metadata: &GatewayMetadata) -> Result<Vec<ShardConfig>, AssignmentError> {
        let base = self.shard_config(&metadata.url);
        match (&self.assignment, self.shard_count()) {
            (Some(assignment), Some(total)) => assignment
                .ids()
                .iter()
                .map(|&id| {
                    ShardInfo::new(id, total)
                        .map(|info| base.clone().with_shard(info))
                        .map_err(|_| AssignmentError::ShardIdOutOfRange { id, total })
                })
                .collect(),
            _ => Ok(vec![base]),
        }
    }

    fn shard_config(&self, url: &str) -> ShardConfig {
        let mut config = ShardConfig::from_gateway_config(&self.gateway, self.token.read().clone(), url);
        config.presence = self.presence.read().clone();
        config
    }

    fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.gateway.shard_start_quiet_period_ms)
    }

    fn snapshot(&self) -> Vec<Arc<GatewayShard>> {
        self.shards
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

fn mean_ping_ms(pings: impl Iterator<Item = Option<Duration>>) -> Option<f64> {
    let (sum, count) = pings
        .flatten()
        .fold((0.0, 0u32), |(sum, count), ping| {
            (sum + ping.as_secs_f64() * 1000.0, count + 1)
        });
    (count > 0).then(|| sum / f64::from(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_ping_excludes_unknown() {
        let pings = [
            Some(Duration::from_millis(40)),
            None,
            Some(Duration::from_millis(80)),
        ];
        let mean = mean_ping_ms(pings.into_iter()).unwrap();
        assert!((mean - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_mean_ping_without_samples() {
        assert_eq!(mean_ping_ms([None, None].into_iter()), None);
        assert_eq!(mean_ping_ms(std::iter::empty()), None);
    }
}
