//! The client facade: one REST dispatcher, one shard manager, one cache

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use shardline_cache::{CacheObserver, EntityCache};
use shardline_common::ClientConfig;
use shardline_core::PresenceData;
use shardline_gateway::{
    ClientEvent, GatewayMetadata, GuildMembers, GuildMembersRequest, ShardAssignment,
    ShardManager, Transport, TungsteniteTransport,
};
use shardline_rest::{routes, HttpTransport, RateLimitDispatcher, ReqwestTransport, RestRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::api::UserApi;
use crate::{ClientError, ClientOptions};

/// Entry point of the library
///
/// Construct it, subscribe to [`Client::events`], then [`Client::login`].
pub struct Client {
    options: ClientOptions,
    rest: RateLimitDispatcher,
    manager: ShardManager,
    cache: Arc<EntityCache>,
    observer: Mutex<Option<CacheObserver>>,
    user: RwLock<Option<Value>>,
}

impl Client {
    /// Client over the network transports
    pub fn new(options: ClientOptions) -> Result<Self, ClientError> {
        Self::with_transports(
            options,
            Arc::new(ReqwestTransport::new()),
            Arc::new(TungsteniteTransport),
        )
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::new(ClientOptions::from_config(config))
    }

    /// Client over caller-provided transports
    ///
    /// Shard options are validated here, before anything connects.
    pub fn with_transports(
        options: ClientOptions,
        http: Arc<dyn HttpTransport>,
        gateway: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        let assignment = ShardAssignment::from_config(&options.sharding)?;

        let mut manager = ShardManager::new(String::new(), options.gateway.clone(), gateway)
            .with_assignment(assignment);
        if let Some(presence) = options.presence.clone() {
            manager = manager.with_presence(presence);
        }

        Ok(Self {
            rest: RateLimitDispatcher::new(options.api.clone(), http),
            cache: Arc::new(EntityCache::new(options.cache)),
            manager,
            options,
            observer: Mutex::new(None),
            user: RwLock::new(None),
        })
    }

    /// Fetch gateway metadata, start every shard and return the own user
    ///
    /// Fails fast on an invalid token. If any shard fails to start, the
    /// ones already running are destroyed before the error is returned.
    pub async fn login(&self, token: impl Into<String>) -> Result<Value, ClientError> {
        let token = token.into();
        self.rest.set_token(token.clone())?;
        self.manager.set_token(token);

        let route = if self.options.api.user_bot {
            routes::gateway()
        } else {
            routes::gateway_bot()
        };
        let metadata: GatewayMetadata = self.rest.execute_as(RestRequest::get(route)).await?;
        self.manager.apply_gateway_metadata(metadata)?;

        self.start_observer();

        let user = match self.manager.start_all().await {
            Ok(Some(user)) => user,
            Ok(None) => self.users().current().await?,
            Err(error) => {
                tracing::error!(error = %error, "Login failed, tearing shards down");
                self.manager.destroy_all().await;
                return Err(error.into());
            }
        };

        tracing::info!(user_id = ?user.get("id"), shards = self.manager.len(), "Logged in");
        *self.user.write() = Some(user.clone());
        Ok(user)
    }

    /// Update the presence on every shard; returns how many accepted it
    pub fn set_presence(&self, presence: &PresenceData) -> usize {
        self.manager.broadcast_presence(presence)
    }

    /// Dispatch, debug and failure events of every shard
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.manager.subscribe()
    }

    /// Mean heartbeat round trip in milliseconds
    pub fn ping(&self) -> Option<f64> {
        self.manager.aggregate_ping()
    }

    pub fn rest(&self) -> &RateLimitDispatcher {
        &self.rest
    }

    pub fn shards(&self) -> &ShardManager {
        &self.manager
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// User from the last successful login
    pub fn user(&self) -> Option<Value> {
        self.user.read().clone()
    }

    pub fn users(&self) -> UserApi<'_> {
        UserApi::new(&self.rest)
    }

    /// Member lookup on the shard that owns the guild
    ///
    /// Without a timeout the call waits until the last chunk arrives or the
    /// shard is destroyed.
    pub async fn request_guild_members(
        &self,
        request: GuildMembersRequest,
        timeout: Option<Duration>,
    ) -> Result<GuildMembers, ClientError> {
        let shard = self
            .manager
            .for_guild_id(request.guild_id)
            .ok_or(ClientError::NoShardForGuild(request.guild_id))?;
        let members = match timeout {
            Some(timeout) => shard.request_guild_members_with_timeout(request, timeout).await?,
            None => shard.request_guild_members(request).await?,
        };
        Ok(members)
    }

    /// Close every shard, stop the cache observer and forget the token.
    /// Idempotent.
    pub async fn destroy(&self) {
        self.manager.destroy_all().await;
        if let Some(observer) = self.observer.lock().take() {
            observer.stop();
        }
        self.rest.clear_token();
        self.user.write().take();
        tracing::debug!("Client destroyed");
    }

    fn start_observer(&self) {
        let mut observer = self.observer.lock();
        if observer.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }
        *observer = Some(self.cache.observe(self.manager.subscribe()));
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("shards", &self.manager.ids())
            .field("user_bot", &self.options.api.user_bot)
            .finish_non_exhaustive()
    }
}
