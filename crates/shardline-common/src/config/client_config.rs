//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use serde::Deserialize;
use shardline_core::Intents;
use std::env;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub app: AppSettings,
    pub api: ApiConfig,
    pub gateway: GatewayConfig,
    pub sharding: ShardingConfig,
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// REST API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub version: u8,
    /// Prefix of the `Authorization` header (`Bot <token>`); ignored for user bots
    #[serde(default = "default_auth_prefix")]
    pub auth_prefix: String,
    /// User bots fetch `/gateway` and send the raw token
    #[serde(default)]
    pub user_bot: bool,
}

impl ApiConfig {
    /// Versioned API root, e.g. `https://discord.com/api/v10`
    #[must_use]
    pub fn versioned_base_url(&self) -> String {
        format!("{}/v{}", self.base_url.trim_end_matches('/'), self.version)
    }

    /// `Authorization` header value for a token
    #[must_use]
    pub fn authorization(&self, token: &str) -> String {
        if self.user_bot || self.auth_prefix.is_empty() {
            token.to_string()
        } else {
            format!("{} {token}", self.auth_prefix)
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            version: default_api_version(),
            auth_prefix: default_auth_prefix(),
            user_bot: false,
        }
    }
}

/// Gateway connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub intents: Intents,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u16,
    /// Time allowed between Hello and READY/RESUMED
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Quiet period between start-up batches
    #[serde(default = "default_shard_start_quiet_period_ms")]
    pub shard_start_quiet_period_ms: u64,
    #[serde(default = "default_max_initial_connect_attempts")]
    pub max_initial_connect_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            intents: Intents::default(),
            large_threshold: default_large_threshold(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            shard_start_quiet_period_ms: default_shard_start_quiet_period_ms(),
            max_initial_connect_attempts: default_max_initial_connect_attempts(),
        }
    }
}

/// Sharding configuration
///
/// Ids are kept signed so that negative values reach shard assignment
/// validation instead of failing to parse.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShardingConfig {
    #[serde(default)]
    pub shard_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub shard_count: Option<u32>,
    #[serde(default)]
    pub use_recommended_shard_count: bool,
}

/// Which collections the passive cache mirrors
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub guilds: bool,
    #[serde(default = "default_true")]
    pub channels: bool,
    #[serde(default = "default_true")]
    pub roles: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            guilds: true,
            channels: true,
            roles: true,
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "shardline".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_api_base_url() -> String {
    "https://discord.com/api".to_string()
}

fn default_api_version() -> u8 {
    10
}

fn default_auth_prefix() -> String {
    "Bot".to_string()
}

fn default_large_threshold() -> u16 {
    50
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_shard_start_quiet_period_ms() -> u64 {
    5_000
}

fn default_max_initial_connect_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app: AppSettings {
                name: default_app_name(),
                env: default_env(),
            },
            api: ApiConfig::default(),
            gateway: GatewayConfig::default(),
            sharding: ShardingConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a sharding or intents variable is present but malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).and_then(|s| parse_bool(&s));

        Ok(Self {
            app: AppSettings {
                name: lookup("SHARDLINE_APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("SHARDLINE_ENV")
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
            },
            api: ApiConfig {
                base_url: lookup("SHARDLINE_API_BASE_URL").unwrap_or_else(default_api_base_url),
                version: parse_var(&lookup, "SHARDLINE_API_VERSION")?.unwrap_or_else(default_api_version),
                auth_prefix: lookup("SHARDLINE_AUTH_PREFIX").unwrap_or_else(default_auth_prefix),
                user_bot: flag("SHARDLINE_USER_BOT").unwrap_or(false),
            },
            gateway: GatewayConfig {
                intents: match lookup("SHARDLINE_INTENTS") {
                    Some(raw) => Intents::parse(&raw)
                        .map_err(|_| ConfigError::InvalidValue("SHARDLINE_INTENTS", raw))?,
                    None => Intents::default(),
                },
                large_threshold: parse_var(&lookup, "SHARDLINE_LARGE_THRESHOLD")?
                    .unwrap_or_else(default_large_threshold),
                handshake_timeout_ms: parse_var(&lookup, "SHARDLINE_HANDSHAKE_TIMEOUT_MS")?
                    .unwrap_or_else(default_handshake_timeout_ms),
                max_reconnect_attempts: parse_var(&lookup, "SHARDLINE_MAX_RECONNECT_ATTEMPTS")?
                    .unwrap_or_else(default_max_reconnect_attempts),
                shard_start_quiet_period_ms: parse_var(&lookup, "SHARDLINE_SHARD_START_QUIET_PERIOD_MS")?
                    .unwrap_or_else(default_shard_start_quiet_period_ms),
                max_initial_connect_attempts: parse_var(&lookup, "SHARDLINE_MAX_INITIAL_CONNECT_ATTEMPTS")?
                    .unwrap_or_else(default_max_initial_connect_attempts),
            },
            sharding: ShardingConfig {
                shard_ids: lookup("SHARDLINE_SHARD_IDS")
                    .map(|raw| parse_shard_ids(&raw))
                    .transpose()?,
                shard_count: parse_var(&lookup, "SHARDLINE_SHARD_COUNT")?,
                use_recommended_shard_count: flag("SHARDLINE_USE_RECOMMENDED_SHARD_COUNT")
                    .unwrap_or(false),
            },
            cache: CacheConfig {
                guilds: flag("SHARDLINE_CACHE_GUILDS").unwrap_or(true),
                channels: flag("SHARDLINE_CACHE_CHANNELS").unwrap_or(true),
                roles: flag("SHARDLINE_CACHE_ROLES").unwrap_or(true),
            },
        })
    }
}

impl ClientConfig {
    /// Token from `SHARDLINE_TOKEN` (after loading `.env`)
    pub fn token_from_env() -> Result<String, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::token_from_lookup(|key| env::var(key).ok())
    }

    pub fn token_from_lookup<F>(lookup: F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup("SHARDLINE_TOKEN")
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or(ConfigError::MissingVar("SHARDLINE_TOKEN"))
    }
}

/// Unset is `None`; set but unparsable is an error
fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key, raw))
        })
        .transpose()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_shard_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ConfigError::InvalidValue("SHARDLINE_SHARD_IDS", raw.to_string()))
        })
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
