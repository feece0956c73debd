//! # shardline-core
//!
//! Domain value objects shared by the gateway, REST and cache crates.
//! This crate has no runtime or network dependencies.

pub mod entities;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{Activity, ActivityType, PresenceData, UserStatus};
pub use value_objects::{Intents, ShardInfo, ShardInfoError, Snowflake, SnowflakeParseError};
