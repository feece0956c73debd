//! Public handle to a running shard.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use shardline_core::{PresenceData, ShardInfo, Snowflake};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::lookup::{GuildMembers, GuildMembersRequest};
use super::runner::{ShardCommand, ShardRunner};
use super::{ShardConfig, ShardError, ShardState, ShardStatus};
use crate::connection::Transport;
use crate::events::{ClientEvent, ReadyPayload};
use crate::protocol::VoiceStateUpdatePayload;

/// How a shard's first handshake completed
#[derive(Debug, Clone)]
pub enum ReadyOutcome {
    Ready(Box<ReadyPayload>),
    Resumed,
}

impl ReadyOutcome {
    /// Current user from READY
    #[must_use]
    pub fn user(&self) -> Option<&Value> {
        match self {
            Self::Ready(ready) => Some(&ready.user),
            Self::Resumed => None,
        }
    }
}

/// Resolves when the shard first becomes ready or fails trying
#[must_use = "the start-up result is only observable through this future"]
pub struct PendingReady {
    shard_id: u32,
    rx: oneshot::Receiver<Result<ReadyOutcome, ShardError>>,
}

impl PendingReady {
    pub async fn wait(self) -> Result<ReadyOutcome, ShardError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(ShardError::TaskStopped(self.shard_id)),
        }
    }
}

/// Handle to one gateway shard
///
/// The connection lives in a background task; the handle sends it commands
/// and reads its status. Dropping the last handle stops the task.
pub struct GatewayShard {
    id: u32,
    info: Option<ShardInfo>,
    commands: mpsc::UnboundedSender<ShardCommand>,
    shutdown: watch::Sender<bool>,
    status: Arc<RwLock<ShardStatus>>,
    task: Mutex<Option<JoinHandle<Result<(), ShardError>>>>,
}

impl GatewayShard {
    /// Start the shard task. Dispatches and diagnostics go to `events`.
    pub fn spawn(
        config: ShardConfig,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<ClientEvent>,
    ) -> (Self, PendingReady) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();
        let status = Arc::new(RwLock::new(ShardStatus::default()));

        let id = config.id;
        let info = config.info;
        tracing::info!(shard_id = id, shard = ?info, "Spawning shard");

        let runner = ShardRunner::new(
            config,
            transport,
            events,
            commands_rx,
            shutdown_rx,
            Arc::clone(&status),
            ready_tx,
        );
        let task = tokio::spawn(runner.run());

        let shard = Self {
            id,
            info,
            commands: commands_tx,
            shutdown: shutdown_tx,
            status,
            task: Mutex::new(Some(task)),
        };
        (
            shard,
            PendingReady {
                shard_id: id,
                rx: ready_rx,
            },
        )
    }

    /// Spawn and wait for the first READY/RESUMED
    pub async fn connect(
        config: ShardConfig,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Result<(Self, ReadyOutcome), ShardError> {
        let (shard, ready) = Self::spawn(config, transport, events);
        let outcome = ready.wait().await?;
        Ok((shard, outcome))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// `None` for an unsharded connection
    pub fn info(&self) -> Option<ShardInfo> {
        self.info
    }

    pub fn status(&self) -> ShardStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> ShardState {
        self.status.read().state
    }

    /// Last heartbeat round trip of the current connection
    pub fn ping(&self) -> Option<Duration> {
        self.status.read().ping
    }

    pub fn is_destroyed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Update presence now (if ready) and for every later identify
    pub fn set_presence(&self, presence: PresenceData) -> Result<(), ShardError> {
        self.command(ShardCommand::SetPresence(presence))
    }

    /// Subscribe to typing and presence events of a guild (op 14)
    pub fn add_guild_events(&self, guild_id: Snowflake) -> Result<(), ShardError> {
        self.command(ShardCommand::AddGuildEvents(guild_id))
    }

    pub fn update_voice_state(&self, payload: VoiceStateUpdatePayload) -> Result<(), ShardError> {
        self.command(ShardCommand::UpdateVoiceState(payload))
    }

    /// Look up guild members and wait for every chunk
    ///
    /// Waits as long as it takes; see
    /// [`Self::request_guild_members_with_timeout`] for a bounded wait.
    pub async fn request_guild_members(
        &self,
        request: GuildMembersRequest,
    ) -> Result<GuildMembers, ShardError> {
        let reply = self.submit_lookup(request)?;
        reply.await.map_err(|_| ShardError::LookupAbandoned(self.id))
    }

    pub async fn request_guild_members_with_timeout(
        &self,
        request: GuildMembersRequest,
        timeout: Duration,
    ) -> Result<GuildMembers, ShardError> {
        let reply = self.submit_lookup(request)?;
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(members)) => Ok(members),
            Ok(Err(_)) => Err(ShardError::LookupAbandoned(self.id)),
            Err(_) => Err(ShardError::LookupTimedOut {
                shard_id: self.id,
                timeout,
            }),
        }
    }

    /// Close with 4016 and wait for the task to finish. Idempotent.
    pub async fn destroy(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!(shard_id = self.id, "Destroying shard");
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                tracing::warn!(shard_id = self.id, error = %error, "Shard task panicked");
            }
        }
    }

    fn submit_lookup(
        &self,
        request: GuildMembersRequest,
    ) -> Result<oneshot::Receiver<GuildMembers>, ShardError> {
        let (reply, rx) = oneshot::channel();
        self.command(ShardCommand::RequestMembers { request, reply })?;
        Ok(rx)
    }

    fn command(&self, command: ShardCommand) -> Result<(), ShardError> {
        if self.is_destroyed() {
            return Err(ShardError::Destroyed(self.id));
        }
        self.commands
            .send(command)
            .map_err(|_| ShardError::TaskStopped(self.id))
    }
}

impl std::fmt::Debug for GatewayShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayShard")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("status", &*self.status.read())
            .finish()
    }
}
