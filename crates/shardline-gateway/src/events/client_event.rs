//! Events published by shards on the client-wide broadcast bus.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{GatewayEventType, GuildMembersChunkPayload, ReadyPayload};
use crate::shard::ShardError;

/// Everything a subscriber (facade, cache, application) can observe
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A dispatch frame, in socket order per shard
    Dispatch(Arc<DispatchEvent>),
    /// Free-form diagnostic line
    Debug { shard_id: u32, message: String },
    /// A shard stopped for good
    ShardFailed { shard_id: u32, error: ShardError },
}

impl ClientEvent {
    pub(crate) fn debug(shard_id: u32, message: impl Into<String>) -> Self {
        Self::Debug {
            shard_id,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn shard_id(&self) -> u32 {
        match self {
            Self::Dispatch(event) => event.shard_id,
            Self::Debug { shard_id, .. } | Self::ShardFailed { shard_id, .. } => *shard_id,
        }
    }

    /// The dispatch event, if this is one
    #[must_use]
    pub fn as_dispatch(&self) -> Option<&DispatchEvent> {
        match self {
            Self::Dispatch(event) => Some(event.as_ref()),
            _ => None,
        }
    }
}

/// A decoded dispatch frame tagged with the shard that received it
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub name: String,
    pub shard_id: u32,
    pub sequence: Option<u64>,
    pub payload: DispatchPayload,
}

impl DispatchEvent {
    #[must_use]
    pub fn kind(&self) -> Option<GatewayEventType> {
        GatewayEventType::from_str(&self.name)
    }
}

/// Dispatch data: typed for the events the shard consumes, opaque otherwise
#[derive(Debug, Clone)]
pub enum DispatchPayload {
    Ready(Box<ReadyPayload>),
    Resumed,
    GuildMembersChunk(GuildMembersChunkPayload),
    Other(Value),
}

impl DispatchPayload {
    /// Decode `d` for the named event. Payloads that do not match their
    /// expected shape are kept opaque rather than dropped.
    #[must_use]
    pub fn parse(name: &str, data: Value) -> Self {
        match GatewayEventType::from_str(name) {
            Some(GatewayEventType::Ready) => match ReadyPayload::deserialize(&data) {
                Ok(ready) => Self::Ready(Box::new(ready)),
                Err(_) => Self::Other(data),
            },
            Some(GatewayEventType::Resumed) => Self::Resumed,
            Some(GatewayEventType::GuildMembersChunk) => {
                match GuildMembersChunkPayload::deserialize(&data) {
                    Ok(chunk) => Self::GuildMembersChunk(chunk),
                    Err(_) => Self::Other(data),
                }
            }
            _ => Self::Other(data),
        }
    }

    /// Raw JSON of an opaque payload
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Other(value) => Some(value),
            _ => None,
        }
    }
}
