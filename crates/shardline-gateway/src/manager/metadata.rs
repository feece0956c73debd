//! Gateway metadata as returned by `GET /gateway/bot` (or `/gateway`).

use serde::{Deserialize, Serialize};

/// Where to connect and how many shards to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMetadata {
    pub url: String,
    /// Recommended shard count; absent for user accounts
    #[serde(default)]
    pub shards: Option<u32>,
    #[serde(default)]
    pub session_start_limit: Option<SessionStartLimit>,
}

/// Identify quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets
    pub reset_after: u64,
    /// Shards that may identify at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}

impl GatewayMetadata {
    /// Metadata for an unsharded connection to `url`
    #[must_use]
    pub fn unsharded(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shards: None,
            session_start_limit: None,
        }
    }

    /// Shards started per batch, at least 1
    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.session_start_limit
            .map_or(1, |limit| limit.max_concurrency.max(1))
    }
}
