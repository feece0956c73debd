//! Shard orchestration
//!
//! Assignment validation, gateway metadata and the [`ShardManager`] that
//! runs every shard of the process.

mod assignment;
mod error;
mod metadata;
mod orchestrator;


pub use assignment::{AssignmentError, ShardAssignment};
pub use error::ManagerError;
pub use metadata::{GatewayMetadata, SessionStartLimit};
pub use orchestrator::{ShardManager, EVENT_CHANNEL_CAPACITY};
