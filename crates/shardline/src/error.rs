//! Facade error type

use shardline_common::ConfigError;
use shardline_core::Snowflake;
use shardline_gateway::{AssignmentError, ManagerError, ShardError};
use shardline_rest::RestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid shard options: {0}")]
    Assignment(#[from] AssignmentError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error(transparent)]
    Shard(#[from] ShardError),

    /// The guild maps to a shard this process does not run
    #[error("no running shard handles guild {0}")]
    NoShardForGuild(Snowflake),
}

impl ClientError {
    /// Whether retrying the same call may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rest(error) => error.kind() == shardline_rest::RestErrorKind::Transient,
            Self::Shard(error) | Self::Manager(ManagerError::Shard(error)) => error.is_transient(),
            _ => false,
        }
    }
}
