use shardline_common::CacheConfig;

/// Which collections are mirrored
///
/// Channels and roles hang off their guild, so they are only kept while
/// `guilds` is enabled too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub guilds: bool,
    pub channels: bool,
    pub roles: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            guilds: true,
            channels: true,
            roles: true,
        }
    }
}

impl CacheOptions {
    /// Cache nothing
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            guilds: false,
            channels: false,
            roles: false,
        }
    }

    pub(crate) fn channels_enabled(&self) -> bool {
        self.guilds && self.channels
    }

    pub(crate) fn roles_enabled(&self) -> bool {
        self.guilds && self.roles
    }
}

impl From<&CacheConfig> for CacheOptions {
    fn from(config: &CacheConfig) -> Self {
        Self {
            guilds: config.guilds,
            channels: config.channels,
            roles: config.roles,
        }
    }
}
