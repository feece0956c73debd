//! # shardline-gateway
//!
//! Sharded WebSocket gateway client: one state machine per shard plus the
//! orchestrator that starts, routes and tears them down.

pub mod connection;
pub mod events;
pub mod manager;
pub mod protocol;
pub mod shard;

pub use connection::{MemoryServer, MemoryTransport, Transport, TungsteniteTransport};
pub use events::{ClientEvent, DispatchEvent, DispatchPayload, GatewayEventType};
pub use manager::{
    AssignmentError, GatewayMetadata, ManagerError, SessionStartLimit, ShardAssignment,
    ShardManager,
};
pub use shard::{
    GatewayShard, GuildMembers, GuildMembersRequest, PendingReady, ReadyOutcome, ShardConfig,
    ShardError, ShardErrorKind, ShardState, ShardStatus,
};
