//! # shardline
//!
//! Client facade over the sharded gateway, the rate-limited REST dispatcher
//! and the passive cache.
//!
//! ```ignore
//! use shardline::{Client, ClientOptions, Intents};
//!
//! let client = Client::new(ClientOptions::default().intents(Intents::GUILDS))?;
//! let mut events = client.events();
//! let me = client.login(token).await?;
//! ```

pub mod api;
mod client;
mod error;
mod options;

pub use api::{GuildsQuery, UserApi};
pub use client::Client;
pub use error::ClientError;
pub use options::ClientOptions;

pub use shardline_cache::{CacheOptions, EntityCache};
pub use shardline_common::{ClientConfig, ConfigError};
pub use shardline_core::{Activity, ActivityType, Intents, PresenceData, ShardInfo, Snowflake, UserStatus};
pub use shardline_gateway::{
    ClientEvent, DispatchEvent, DispatchPayload, GatewayEventType, GatewayShard, GuildMembers,
    GuildMembersRequest, ShardError, ShardManager, ShardState,
};
pub use shardline_rest::{RateLimitDispatcher, RestError};
