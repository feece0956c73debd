//! Shard identity tuple `[shard_id, shard_count]`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity a shard declares at identify time
///
/// Serialized as the two-element array the gateway expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u32; 2]")]
pub struct ShardInfo {
    id: u32,
    total: u32,
}

/// Rejected shard identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShardInfoError {
    #[error("shard count must be at least 1")]
    ZeroCount,

    #[error("shard id {id} is out of range for {total} shards")]
    OutOfRange { id: u32, total: u32 },
}

impl ShardInfo {
    pub fn new(id: u32, total: u32) -> Result<Self, ShardInfoError> {
        if total == 0 {
            return Err(ShardInfoError::ZeroCount);
        }
        if id >= total {
            return Err(ShardInfoError::OutOfRange { id, total });
        }
        Ok(Self { id, total })
    }

    #[inline]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub const fn total(&self) -> u32 {
        self.total
    }
}

impl TryFrom<[u32; 2]> for ShardInfo {
    type Error = ShardInfoError;

    fn try_from([id, total]: [u32; 2]) -> Result<Self, Self::Error> {
        Self::new(id, total)
    }
}

impl From<ShardInfo> for [u32; 2] {
    fn from(info: ShardInfo) -> Self {
        [info.id, info.total]
    }
}

impl fmt::Display for ShardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.id, self.total)
    }
}
