//! Programmatic client configuration

use shardline_cache::CacheOptions;
use shardline_common::{ApiConfig, ClientConfig, GatewayConfig, ShardingConfig};
use shardline_core::{Intents, PresenceData};

/// Everything [`Client`](crate::Client) needs besides the token
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub api: ApiConfig,
    pub gateway: GatewayConfig,
    pub sharding: ShardingConfig,
    pub cache: CacheOptions,
    /// Presence sent with every identify
    pub presence: Option<PresenceData>,
}

impl ClientOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            api: config.api.clone(),
            gateway: config.gateway.clone(),
            sharding: config.sharding.clone(),
            cache: CacheOptions::from(&config.cache),
            presence: None,
        }
    }

    pub fn intents(mut self, intents: Intents) -> Self {
        self.gateway.intents = intents;
        self
    }

    pub fn presence(mut self, presence: PresenceData) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Run `ids` out of `count` shards
    pub fn shards(mut self, ids: impl IntoIterator<Item = i64>, count: u32) -> Self {
        self.sharding.shard_ids = Some(ids.into_iter().collect());
        self.sharding.shard_count = Some(count);
        self
    }

    /// Run `ids` out of the recommended shard count
    pub fn recommended_shards(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.sharding.shard_ids = Some(ids.into_iter().collect());
        self.sharding.use_recommended_shard_count = true;
        self
    }

    /// User accounts fetch `/gateway` and send the raw token
    pub fn user_bot(mut self, user_bot: bool) -> Self {
        self.api.user_bot = user_bot;
        self
    }

    pub fn api_version(mut self, version: u8) -> Self {
        self.api.version = version;
        self
    }

    pub fn api_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.base_url = base_url.into();
        self
    }

    pub fn cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }
}
