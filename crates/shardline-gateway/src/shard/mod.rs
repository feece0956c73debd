//! Gateway shard
//!
//! A [`GatewayShard`] is a handle to a background task that keeps one
//! gateway session alive across reconnects.

mod config;
mod error;
mod handle;
mod lookup;
mod runner;
mod status;

#[cfg(test)]
mod tests;

pub use config::{ShardConfig, DEFAULT_GATEWAY_VERSION};
pub use error::{ShardError, ShardErrorKind};
pub use handle::{GatewayShard, PendingReady, ReadyOutcome};
pub use lookup::{GuildMembers, GuildMembersRequest};
pub use status::{ShardState, ShardStatus};
