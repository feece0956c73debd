//! The task that owns a shard's socket
//!
//! One runner per shard. It connects, performs the Hello/Identify/Resume
//! handshake, heartbeats, forwards dispatches to the event bus and decides
//! after every close whether to resume, identify again or give up.

use parking_lot::RwLock;
use rand::Rng;
use shardline_core::{PresenceData, Snowflake};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, sleep_until, Instant, Interval, MissedTickBehavior};

use super::lookup::{GuildMembers, GuildMembersRequest, PendingLookups};
use super::{ReadyOutcome, ShardConfig, ShardError, ShardState, ShardStatus};
use crate::connection::{GatewaySocket, Heartbeat, Session, Transport, TransportError, WsFrame};
use crate::events::{ClientEvent, DispatchEvent, DispatchPayload};
use crate::protocol::{
    CloseCode, CloseDisposition, FrameError, GatewayMessage, GuildSubscribePayload,
    IdentifyPayload, OpCode, VoiceStateUpdatePayload,
};

/// Backoff base before the first Hello told us the heartbeat interval
const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(5);

/// Random wait before identifying after a non-resumable invalid session
const INVALID_SESSION_DELAY_MIN_MS: u64 = 1_000;
const INVALID_SESSION_DELAY_MAX_MS: u64 = 5_000;

/// Requests from the shard handle, served only while the shard is ready
pub(crate) enum ShardCommand {
    SetPresence(PresenceData),
    RequestMembers {
        request: GuildMembersRequest,
        reply: oneshot::Sender<GuildMembers>,
    },
    AddGuildEvents(Snowflake),
    UpdateVoiceState(VoiceStateUpdatePayload),
}

/// Why a connection ended
enum Disconnect {
    Closed(u16),
    Shutdown,
    Failed(ShardError),
}

/// Outcome of handling one event on a live connection
enum Step {
    Continue,
    /// Close the socket ourselves with this code
    Close(CloseCode),
    /// The socket is unusable
    Lost,
    /// Give up on the shard after closing the socket
    Fail(ShardError),
}

impl From<Result<(), TransportError>> for Step {
    fn from(result: Result<(), TransportError>) -> Self {
        match result {
            Ok(()) => Self::Continue,
            Err(_) => Self::Lost,
        }
    }
}

/// Timers scoped to one socket
struct Connection {
    heartbeat: Option<Heartbeat>,
    ticker: Option<Interval>,
    handshake_deadline: Option<Instant>,
    identify_at: Option<Instant>,
}

pub(crate) struct ShardRunner {
    config: ShardConfig,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<ClientEvent>,
    commands: mpsc::UnboundedReceiver<ShardCommand>,
    shutdown: watch::Receiver<bool>,
    status: Arc<RwLock<ShardStatus>>,
    ready: Option<oneshot::Sender<Result<ReadyOutcome, ShardError>>>,
    session: Session,
    lookups: PendingLookups,
    reconnect_attempts: u32,
    /// Invalid sessions since the last READY or RESUMED
    invalid_sessions: u32,
    heartbeat_interval: Option<Duration>,
}

impl ShardRunner {
    pub(crate) fn new(
        config: ShardConfig,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<ClientEvent>,
        commands: mpsc::UnboundedReceiver<ShardCommand>,
        shutdown: watch::Receiver<bool>,
        status: Arc<RwLock<ShardStatus>>,
        ready: oneshot::Sender<Result<ReadyOutcome, ShardError>>,
    ) -> Self {
        Self {
            config,
            transport,
            events,
            commands,
            shutdown,
            status,
            ready: Some(ready),
            session: Session::new(),
            lookups: PendingLookups::default(),
            reconnect_attempts: 0,
            invalid_sessions: 0,
            heartbeat_interval: None,
        }
    }

    /// Run until destroyed or failed
    pub(crate) async fn run(mut self) -> Result<(), ShardError> {
        let mut connected_once = false;

        loop {
            if *self.shutdown.borrow() {
                self.stopped();
                return Ok(());
            }

            let url = self
                .config
                .connect_url(self.session.connect_url(&self.config.gateway_url));
            self.set_state(ShardState::Connecting);
            self.debug(format!("Connecting to {url}"));

            let connected = tokio::select! {
                result = self.transport.connect(&url) => result,
                () = wait_for_shutdown(&mut self.shutdown) => {
                    self.stopped();
                    return Ok(());
                }
            };

            match connected {
                Ok(socket) => {
                    connected_once = true;
                    match self.drive(socket).await {
                        Disconnect::Shutdown => {
                            self.stopped();
                            return Ok(());
                        }
                        Disconnect::Failed(error) => return Err(self.fail(error)),
                        Disconnect::Closed(code) => match CloseDisposition::classify(code) {
                            CloseDisposition::Resume => {
                                self.debug(format!("Connection closed with {code}, will resume"));
                            }
                            CloseDisposition::Reidentify => {
                                self.debug(format!(
                                    "Connection closed with {code}, session discarded"
                                ));
                                self.forget_session();
                            }
                            CloseDisposition::Voluntary => {
                                self.stopped();
                                return Ok(());
                            }
                            CloseDisposition::Fatal => {
                                let error = ShardError::fatal_close(self.config.id, code);
                                return Err(self.fail(error));
                            }
                        },
                    }
                }
                Err(source) if !connected_once => {
                    let error = ShardError::Connect {
                        shard_id: self.config.id,
                        source,
                    };
                    return Err(self.fail(error));
                }
                Err(error) => {
                    tracing::warn!(
                        shard_id = self.config.id,
                        error = %error,
                        "Reconnect failed"
                    );
                }
            }

            if !self.backoff().await? {
                self.stopped();
                return Ok(());
            }
        }
    }

    /// Serve one socket until it closes
    async fn drive(&mut self, mut socket: Box<dyn GatewaySocket>) -> Disconnect {
        self.set_state(ShardState::AwaitingHandshake);
        let mut conn = Connection {
            heartbeat: None,
            ticker: None,
            handshake_deadline: Some(Instant::now() + self.config.handshake_timeout),
            identify_at: None,
        };

        let disconnect = loop {
            let zombie_at = conn.heartbeat.as_ref().and_then(Heartbeat::zombie_deadline);
            let handshake_at = conn.handshake_deadline;
            let identify_at = conn.identify_at;
            let ready = self.status.read().state == ShardState::Ready;

            let step = tokio::select! {
                frame = socket.recv() => match frame {
                    Some(Ok(WsFrame::Text(text))) => {
                        self.handle_frame(&text, socket.as_mut(), &mut conn).await
                    }
                    Some(Ok(WsFrame::Close(code))) => {
                        let code = code.unwrap_or(CloseCode::Abnormal.as_u16());
                        self.debug(format!("Gateway closed the connection with {code}"));
                        break Disconnect::Closed(code);
                    }
                    Some(Err(error)) => {
                        tracing::warn!(shard_id = self.config.id, error = %error, "Socket error");
                        Step::Lost
                    }
                    None => Step::Lost,
                },
                () = tick(&mut conn.ticker) => {
                    self.send_heartbeat(socket.as_mut(), &mut conn).await.into()
                }
                () = sleep_until_some(zombie_at) => {
                    tracing::warn!(shard_id = self.config.id, "Heartbeat not acknowledged");
                    self.set_state(ShardState::ZombieDetected);
                    Step::Close(CloseCode::Zombie)
                }
                () = sleep_until_some(handshake_at) => {
                    tracing::warn!(shard_id = self.config.id, "Handshake timed out");
                    self.set_state(ShardState::ZombieDetected);
                    Step::Close(CloseCode::Zombie)
                }
                () = sleep_until_some(identify_at) => {
                    conn.identify_at = None;
                    conn.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout);
                    self.identify(socket.as_mut()).await.into()
                }
                Some(command) = self.commands.recv(), if ready => {
                    self.handle_command(socket.as_mut(), command).await.into()
                }
                () = wait_for_shutdown(&mut self.shutdown) => {
                    let code = CloseCode::Destroyed;
                    if let Err(error) = socket.close(code.as_u16(), code.description()).await {
                        tracing::debug!(shard_id = self.config.id, error = %error, "Close failed");
                    }
                    break Disconnect::Shutdown;
                }
            };

            match step {
                Step::Continue => {}
                Step::Close(code) => {
                    if let Err(error) = socket.close(code.as_u16(), code.description()).await {
                        tracing::debug!(shard_id = self.config.id, error = %error, "Close failed");
                    }
                    break Disconnect::Closed(code.as_u16());
                }
                Step::Lost => break Disconnect::Closed(CloseCode::Abnormal.as_u16()),
                Step::Fail(error) => {
                    let code = CloseCode::Normal;
                    if let Err(error) = socket.close(code.as_u16(), code.description()).await {
                        tracing::debug!(shard_id = self.config.id, error = %error, "Close failed");
                    }
                    break Disconnect::Failed(error);
                }
            }
        };

        self.status.write().ping = None;
        disconnect
    }

    async fn handle_frame(
        &mut self,
        text: &str,
        socket: &mut dyn GatewaySocket,
        conn: &mut Connection,
    ) -> Step {
        let message = match GatewayMessage::decode(text) {
            Ok(message) => message,
            Err(FrameError::UnknownOpcode(op)) => {
                tracing::debug!(shard_id = self.config.id, op, "Ignoring unknown opcode");
                return Step::Continue;
            }
            Err(error) => {
                tracing::warn!(shard_id = self.config.id, error = %error, "Dropping malformed frame");
                return Step::Continue;
            }
        };

        if !message.op.is_server_op() {
            tracing::debug!(shard_id = self.config.id, op = %message.op, "Ignoring client opcode");
            return Step::Continue;
        }

        if let Some(sequence) = message.s {
            self.session.observe_sequence(sequence);
            self.status.write().sequence = Some(sequence);
        }

        match message.op {
            OpCode::Hello => self.on_hello(&message, socket, conn).await,
            OpCode::Heartbeat => self.send_heartbeat(socket, conn).await.into(),
            OpCode::HeartbeatAck => {
                if let Some(heartbeat) = conn.heartbeat.as_mut() {
                    let ping = heartbeat.acked(Instant::now());
                    self.status.write().ping = ping;
                }
                Step::Continue
            }
            OpCode::Reconnect => {
                self.debug("Gateway requested a reconnect");
                Step::Close(CloseCode::UnknownError)
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                self.on_invalid_session(resumable, socket, conn).await
            }
            OpCode::Dispatch => {
                self.on_dispatch(message, conn);
                Step::Continue
            }
            _ => Step::Continue,
        }
    }

    async fn on_hello(
        &mut self,
        message: &GatewayMessage,
        socket: &mut dyn GatewaySocket,
        conn: &mut Connection,
    ) -> Step {
        let Some(hello) = message.as_hello().filter(|h| h.heartbeat_interval > 0) else {
            tracing::warn!(shard_id = self.config.id, "Hello without a usable heartbeat interval");
            return Step::Continue;
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        self.heartbeat_interval = Some(interval);
        self.debug(format!("Hello received, heartbeat every {interval:?}"));

        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        conn.ticker = Some(ticker);
        conn.heartbeat = Some(Heartbeat::new(interval));

        if self.send_heartbeat(socket, conn).await.is_err() {
            return Step::Lost;
        }

        match self.session.resume_payload(&self.config.token) {
            Some(resume) => {
                self.set_state(ShardState::Resuming);
                self.debug(format!(
                    "Resuming session {} at sequence {}",
                    resume.session_id, resume.seq
                ));
                self.send(socket, &GatewayMessage::resume(&resume)).await.into()
            }
            None => self.identify(socket).await.into(),
        }
    }

    async fn on_invalid_session(
        &mut self,
        resumable: bool,
        socket: &mut dyn GatewaySocket,
        conn: &mut Connection,
    ) -> Step {
        self.invalid_sessions += 1;
        if self.invalid_sessions > self.config.max_reconnect_attempts {
            return Step::Fail(ShardError::SessionInvalidated {
                shard_id: self.config.id,
                attempts: self.invalid_sessions,
            });
        }

        if resumable {
            if let Some(resume) = self.session.resume_payload(&self.config.token) {
                self.set_state(ShardState::Resuming);
                self.debug("Invalid session, resuming");
                return self.send(socket, &GatewayMessage::resume(&resume)).await.into();
            }
        }

        self.forget_session();
        self.set_state(ShardState::Identifying);
        let delay = invalid_session_delay();
        self.debug(format!("Invalid session, identifying in {delay:?}"));
        conn.handshake_deadline = None;
        conn.identify_at = Some(Instant::now() + delay);
        Step::Continue
    }

    fn on_dispatch(&mut self, message: GatewayMessage, conn: &mut Connection) {
        let GatewayMessage { d, s, t, .. } = message;
        let name = t.unwrap_or_default();
        let payload = DispatchPayload::parse(&name, d);

        match &payload {
            DispatchPayload::Ready(ready) => {
                self.session
                    .establish(ready.session_id.clone(), ready.resume_gateway_url.clone());
                self.status.write().session_id = Some(ready.session_id.clone());
                self.mark_ready(conn, ReadyOutcome::Ready(ready.clone()));
            }
            DispatchPayload::Resumed => self.mark_ready(conn, ReadyOutcome::Resumed),
            DispatchPayload::GuildMembersChunk(chunk) => {
                if self.lookups.accept(chunk) {
                    tracing::debug!(
                        shard_id = self.config.id,
                        guild_id = %chunk.guild_id,
                        "Member lookup complete"
                    );
                }
            }
            DispatchPayload::Other(_) => {}
        }

        let event = DispatchEvent {
            name,
            shard_id: self.config.id,
            sequence: s,
            payload,
        };
        // No subscribers is fine
        let _ = self.events.send(ClientEvent::Dispatch(Arc::new(event)));
    }

    fn mark_ready(&mut self, conn: &mut Connection, outcome: ReadyOutcome) {
        conn.handshake_deadline = None;
        conn.identify_at = None;
        self.reconnect_attempts = 0;
        self.invalid_sessions = 0;
        self.set_state(ShardState::Ready);

        let message = match &outcome {
            ReadyOutcome::Ready(ready) => format!("Ready with session {}", ready.session_id),
            ReadyOutcome::Resumed => "Session resumed".to_string(),
        };
        tracing::info!(shard_id = self.config.id, "{message}");
        self.debug(message);

        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(outcome));
        }
    }

    async fn handle_command(
        &mut self,
        socket: &mut dyn GatewaySocket,
        command: ShardCommand,
    ) -> Result<(), TransportError> {
        match command {
            ShardCommand::SetPresence(presence) => {
                let message = GatewayMessage::presence_update(&presence);
                self.config.presence = Some(presence);
                self.send(socket, &message).await
            }
            ShardCommand::RequestMembers { request, reply } => {
                let nonce = self.lookups.register(request.guild_id, reply);
                tracing::debug!(
                    shard_id = self.config.id,
                    guild_id = %request.guild_id,
                    nonce = %nonce,
                    pending = self.lookups.len(),
                    "Requesting guild members"
                );
                let payload = request.into_payload(nonce);
                self.send(socket, &GatewayMessage::request_guild_members(&payload))
                    .await
            }
            ShardCommand::AddGuildEvents(guild_id) => {
                let payload = GuildSubscribePayload {
                    guild_id,
                    typing: true,
                };
                self.send(socket, &GatewayMessage::guild_subscribe(&payload))
                    .await
            }
            ShardCommand::UpdateVoiceState(payload) => {
                self.send(socket, &GatewayMessage::voice_state_update(&payload))
                    .await
            }
        }
    }

    async fn identify(&mut self, socket: &mut dyn GatewaySocket) -> Result<(), TransportError> {
        let payload = IdentifyPayload {
            token: self.config.token.clone(),
            intents: self.config.intents,
            properties: self.config.properties.clone(),
            shard: self.config.info,
            presence: self.config.presence.clone(),
            large_threshold: self.config.large_threshold,
            compress: false,
        };

        self.set_state(ShardState::Identifying);
        match self.config.info {
            Some(info) => self.debug(format!("Identifying as shard {info}")),
            None => self.debug("Identifying"),
        }
        self.send(socket, &GatewayMessage::identify(&payload)).await
    }

    async fn send_heartbeat(
        &mut self,
        socket: &mut dyn GatewaySocket,
        conn: &mut Connection,
    ) -> Result<(), TransportError> {
        if let Some(heartbeat) = conn.heartbeat.as_mut() {
            heartbeat.sent(Instant::now());
        }
        let sequence = self.session.sequence();
        tracing::trace!(shard_id = self.config.id, sequence = ?sequence, "Sending heartbeat");
        self.send(socket, &GatewayMessage::heartbeat(sequence)).await
    }

    async fn send(
        &mut self,
        socket: &mut dyn GatewaySocket,
        message: &GatewayMessage,
    ) -> Result<(), TransportError> {
        let text = message
            .to_json()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        let result = socket.send(text).await;
        if let Err(error) = &result {
            tracing::warn!(
                shard_id = self.config.id,
                op = %message.op,
                error = %error,
                "Failed to send frame"
            );
        }
        result
    }

    /// Count a reconnect attempt and wait before it. Returns false when the
    /// wait was cut short by shutdown.
    async fn backoff(&mut self) -> Result<bool, ShardError> {
        self.reconnect_attempts += 1;
        if self.reconnect_attempts > self.config.max_reconnect_attempts {
            let error = ShardError::ReconnectExhausted {
                shard_id: self.config.id,
                attempts: self.config.max_reconnect_attempts,
            };
            return Err(self.fail(error));
        }

        let base = self.heartbeat_interval.unwrap_or(DEFAULT_RECONNECT_BASE) / 2;
        let delay = base * self.reconnect_attempts;
        self.set_state(ShardState::Reconnecting);
        self.debug(format!(
            "Reconnect attempt {} in {delay:?}",
            self.reconnect_attempts
        ));

        tokio::select! {
            () = sleep(delay) => Ok(true),
            () = wait_for_shutdown(&mut self.shutdown) => Ok(false),
        }
    }

    fn forget_session(&mut self) {
        self.session.reset();
        let mut status = self.status.write();
        status.session_id = None;
        status.sequence = None;
    }

    /// Terminal failure. The error goes to the start-up waiter if one is
    /// still pending, to event subscribers otherwise.
    fn fail(&mut self, error: ShardError) -> ShardError {
        tracing::error!(shard_id = self.config.id, error = %error, "Shard failed");
        self.set_state(ShardState::Closed);

        match self.ready.take() {
            Some(ready) => {
                let _ = ready.send(Err(error.clone()));
            }
            None => {
                let _ = self.events.send(ClientEvent::ShardFailed {
                    shard_id: self.config.id,
                    error: error.clone(),
                });
            }
        }
        error
    }

    fn stopped(&mut self) {
        tracing::info!(shard_id = self.config.id, "Shard stopped");
        self.set_state(ShardState::Closed);
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(ShardError::Destroyed(self.config.id)));
        }
    }

    fn set_state(&self, state: ShardState) {
        let previous = std::mem::replace(&mut self.status.write().state, state);
        if previous != state {
            tracing::debug!(
                shard_id = self.config.id,
                from = ?previous,
                to = ?state,
                "Shard state changed"
            );
        }
    }

    fn debug(&self, message: impl Into<String>) {
        let _ = self.events.send(ClientEvent::debug(self.config.id, message));
    }
}

fn invalid_session_delay() -> Duration {
    let millis =
        rand::thread_rng().gen_range(INVALID_SESSION_DELAY_MIN_MS..=INVALID_SESSION_DELAY_MAX_MS);
    Duration::from_millis(millis)
}

/// Resolves once shutdown was requested or the handle is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
