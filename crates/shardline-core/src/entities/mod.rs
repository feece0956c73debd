//! Entities exchanged with the gateway that the client builds itself

mod presence;

pub use presence::{Activity, ActivityType, PresenceData, UserStatus};
