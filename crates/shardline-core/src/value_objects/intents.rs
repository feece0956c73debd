//! Gateway intent bitflags
//!
//! Intents declare which event groups a shard wants to receive. They are sent
//! as a plain integer in the identify payload.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags! {
    /// Gateway intents declared at identify time
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        const GUILDS                        = 1 << 0;
        /// Privileged
        const GUILD_MEMBERS                 = 1 << 1;
        const GUILD_MODERATION              = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS     = 1 << 3;
        const GUILD_INTEGRATIONS            = 1 << 4;
        const GUILD_WEBHOOKS                = 1 << 5;
        const GUILD_INVITES                 = 1 << 6;
        const GUILD_VOICE_STATES            = 1 << 7;
        /// Privileged
        const GUILD_PRESENCES               = 1 << 8;
        const GUILD_MESSAGES                = 1 << 9;
        const GUILD_MESSAGE_REACTIONS       = 1 << 10;
        const GUILD_MESSAGE_TYPING          = 1 << 11;
        const DIRECT_MESSAGES               = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS      = 1 << 13;
        const DIRECT_MESSAGE_TYPING         = 1 << 14;
        /// Privileged
        const MESSAGE_CONTENT               = 1 << 15;
        const GUILD_SCHEDULED_EVENTS        = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION     = 1 << 21;

        /// Intents that must be enabled in the application settings
        const PRIVILEGED = Self::GUILD_MEMBERS.bits()
            | Self::GUILD_PRESENCES.bits()
            | Self::MESSAGE_CONTENT.bits();
    }
}

impl Intents {
    /// Every intent that does not require approval
    pub fn non_privileged() -> Self {
        Self::all() - Self::PRIVILEGED
    }

    #[inline]
    pub fn is_privileged(&self) -> bool {
        self.intersects(Self::PRIVILEGED)
    }

    /// Parse from string representation (decimal number)
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        s.trim().parse::<u64>().map(Intents::from_bits_truncate)
    }
}

impl Default for Intents {
    fn default() -> Self {
        Intents::GUILDS
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

// Deserialize from string or number
impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct IntentsVisitor;

        impl Visitor<'_> for IntentsVisitor {
            type Value = Intents;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or integer representing intent bits")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Intents, E>
            where
                E: de::Error,
            {
                u64::try_from(value)
                    .map(Intents::from_bits_truncate)
                    .map_err(|_| de::Error::custom("negative intent bits"))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Intents, E>
            where
                E: de::Error,
            {
                Ok(Intents::from_bits_truncate(value))
            }

            fn visit_str<E>(self, value: &str) -> Result<Intents, E>
            where
                E: de::Error,
            {
                Intents::parse(value).map_err(|_| de::Error::custom("invalid intents string"))
            }
        }

        deserializer.deserialize_any(IntentsVisitor)
    }
}

impl From<u64> for Intents {
    fn from(bits: u64) -> Self {
        Intents::from_bits_truncate(bits)
    }
}

impl From<Intents> for u64 {
    fn from(intents: Intents) -> Self {
        intents.bits()
    }
}
