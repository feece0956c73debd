//! Typed payloads for the dispatch events the shard itself consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shardline_core::{ShardInfo, Snowflake};

/// READY event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Gateway protocol version
    #[serde(default)]
    pub v: u8,

    /// Current user, kept opaque
    pub user: Value,

    /// Guilds the user is in (initially unavailable)
    #[serde(default)]
    pub guilds: Vec<Value>,

    /// Session ID for resuming
    pub session_id: String,

    /// Gateway URL for resuming
    #[serde(default)]
    pub resume_gateway_url: Option<String>,

    #[serde(default)]
    pub shard: Option<ShardInfo>,

    #[serde(default)]
    pub application: Option<Value>,
}

/// GUILD_MEMBERS_CHUNK event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMembersChunkPayload {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub members: Vec<Value>,
    pub chunk_index: u32,
    pub chunk_count: u32,
    #[serde(default)]
    pub not_found: Vec<Snowflake>,
    #[serde(default)]
    pub presences: Vec<Value>,
    #[serde(default)]
    pub nonce: Option<String>,
}
