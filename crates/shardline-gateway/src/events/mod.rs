//! Gateway events
//!
//! Dispatch names, typed payloads and the client-wide event enum.

mod client_event;
mod event_types;
mod payloads;

pub use client_event::{ClientEvent, DispatchEvent, DispatchPayload};
pub use event_types::GatewayEventType;
pub use payloads::{GuildMembersChunkPayload, ReadyPayload};
