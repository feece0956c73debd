//! Gateway protocol definitions
//!
//! Op codes, message framing, close-code classification and payloads.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseCode, CloseDisposition};
pub use messages::{FrameError, GatewayMessage};
pub use opcodes::OpCode;
pub use payloads::{
    GuildSubscribePayload, HelloPayload, IdentifyPayload, IdentifyProperties,
    RequestGuildMembersPayload, ResumePayload, VoiceStateUpdatePayload,
};
