//! Per-shard connection settings.

use shardline_common::GatewayConfig;
use shardline_core::{Intents, PresenceData, ShardInfo};
use std::fmt;
use std::time::Duration;

use crate::protocol::IdentifyProperties;

/// Gateway protocol version requested in the connect URL
pub const DEFAULT_GATEWAY_VERSION: u8 = 10;

/// Everything a shard needs to connect and identify
#[derive(Clone)]
pub struct ShardConfig {
    pub id: u32,
    /// `None` for an unsharded connection
    pub info: Option<ShardInfo>,
    pub token: String,
    /// Gateway URL without query string
    pub gateway_url: String,
    pub version: u8,
    pub intents: Intents,
    pub presence: Option<PresenceData>,
    pub large_threshold: u16,
    pub properties: IdentifyProperties,
    /// Time allowed from socket open to READY/RESUMED
    pub handshake_timeout: Duration,
    /// Consecutive failed reconnects before the shard gives up
    pub max_reconnect_attempts: u32,
}

impl ShardConfig {
    /// Unsharded config with default gateway settings
    #[must_use]
    pub fn new(token: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        Self::from_gateway_config(&GatewayConfig::default(), token, gateway_url)
    }

    #[must_use]
    pub fn from_gateway_config(
        config: &GatewayConfig,
        token: impl Into<String>,
        gateway_url: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            info: None,
            token: token.into(),
            gateway_url: gateway_url.into(),
            version: DEFAULT_GATEWAY_VERSION,
            intents: config.intents,
            presence: None,
            large_threshold: config.large_threshold,
            properties: IdentifyProperties::default(),
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }

    /// Place this shard at `info.id` of `info.total`
    #[must_use]
    pub fn with_shard(mut self, info: ShardInfo) -> Self {
        self.id = info.id();
        self.info = Some(info);
        self
    }

    #[must_use]
    pub fn with_presence(mut self, presence: PresenceData) -> Self {
        self.presence = Some(presence);
        self
    }

    #[must_use]
    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// `base` with the version and encoding query appended
    pub(crate) fn connect_url(&self, base: &str) -> String {
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}v={}&encoding=json", self.version)
    }
}

impl fmt::Debug for ShardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardConfig")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("token", &"<redacted>")
            .field("gateway_url", &self.gateway_url)
            .field("version", &self.version)
            .field("intents", &self.intents)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish()
    }
}
