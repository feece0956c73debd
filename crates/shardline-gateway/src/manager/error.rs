//! Orchestrator error types

use thiserror::Error;

use super::AssignmentError;
use crate::shard::ShardError;

#[derive(Debug, Clone, Error)]
pub enum ManagerError {
    /// `start_all` before gateway metadata was applied
    #[error("gateway metadata has not been applied")]
    MissingMetadata,

    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    #[error(transparent)]
    Shard(#[from] ShardError),
}
