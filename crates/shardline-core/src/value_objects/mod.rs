//! Value objects - immutable types that represent protocol concepts

mod intents;
mod shard_info;
mod snowflake;

pub use intents::Intents;
pub use shard_info::{ShardInfo, ShardInfoError};
pub use snowflake::{Snowflake, SnowflakeParseError};
