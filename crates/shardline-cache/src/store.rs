//! Entity maps and the dispatch handlers that fill them

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use shardline_core::Snowflake;
use shardline_gateway::{DispatchEvent, GatewayEventType};

use crate::CacheOptions;

/// Guild fields that are never stored; channels and roles get their own maps
const DROPPED_GUILD_FIELDS: [&str; 5] = ["members", "emojis", "stickers", "channels", "roles"];

#[derive(Debug, Clone, PartialEq)]
pub struct CachedGuild {
    pub id: Snowflake,
    /// Shard that delivered the guild
    pub shard_id: u32,
    pub data: Map<String, Value>,
}

impl CachedGuild {
    pub fn name(&self) -> Option<&str> {
        self.data.get("name").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedChannel {
    pub id: Snowflake,
    pub guild_id: Snowflake,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedRole {
    pub id: Snowflake,
    pub guild_id: Snowflake,
    pub data: Value,
}

/// Concurrent guild, channel and role maps
#[derive(Debug, Default)]
pub struct EntityCache {
    options: CacheOptions,
    guilds: DashMap<Snowflake, CachedGuild>,
    channels: DashMap<Snowflake, CachedChannel>,
    roles: DashMap<Snowflake, CachedRole>,
}

impl EntityCache {
    #[must_use]
    pub fn new(options: CacheOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> CacheOptions {
        self.options
    }

    pub fn guild(&self, id: Snowflake) -> Option<CachedGuild> {
        self.guilds.get(&id).map(|entry| entry.value().clone())
    }

    pub fn channel(&self, id: Snowflake) -> Option<CachedChannel> {
        self.channels.get(&id).map(|entry| entry.value().clone())
    }

    pub fn role(&self, id: Snowflake) -> Option<CachedRole> {
        self.roles.get(&id).map(|entry| entry.value().clone())
    }

    /// Channels of a guild, ordered by id
    pub fn guild_channels(&self, guild_id: Snowflake) -> Vec<CachedChannel> {
        let mut channels: Vec<CachedChannel> = self
            .channels
            .iter()
            .filter(|entry| entry.guild_id == guild_id)
            .map(|entry| entry.value().clone())
            .collect();
        channels.sort_by_key(|channel| channel.id);
        channels
    }

    /// Roles of a guild, ordered by id
    pub fn guild_roles(&self, guild_id: Snowflake) -> Vec<CachedRole> {
        let mut roles: Vec<CachedRole> = self
            .roles
            .iter()
            .filter(|entry| entry.guild_id == guild_id)
            .map(|entry| entry.value().clone())
            .collect();
        roles.sort_by_key(|role| role.id);
        roles
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn clear(&self) {
        self.guilds.clear();
        self.channels.clear();
        self.roles.clear();
    }

    /// Fold one dispatch event into the maps. Events the cache does not
    /// track, and payloads without the ids it needs, are ignored.
    pub fn apply(&self, event: &DispatchEvent) {
        let (Some(kind), Some(data)) = (event.kind(), event.payload.as_value()) else {
            return;
        };

        match kind {
            GatewayEventType::GuildCreate => self.guild_create(event.shard_id, data),
            GatewayEventType::GuildUpdate => self.guild_update(event.shard_id, data),
            GatewayEventType::GuildDelete => self.guild_delete(data),
            GatewayEventType::ChannelCreate | GatewayEventType::ChannelUpdate => {
                self.channel_upsert(data);
            }
            GatewayEventType::ChannelDelete => self.channel_delete(data),
            GatewayEventType::GuildRoleCreate | GatewayEventType::GuildRoleUpdate => {
                self.role_upsert(data);
            }
            GatewayEventType::GuildRoleDelete => self.role_delete(data),
            _ => {}
        }
    }

    fn guild_create(&self, shard_id: u32, data: &Value) {
        if !self.options.guilds {
            return;
        }
        let (Some(id), Some(object)) = (snowflake(data, "id"), data.as_object()) else {
            return;
        };

        if self.options.channels_enabled() {
            for channel in array(data, "channels") {
                self.insert_channel(id, channel);
            }
        }
        if self.options.roles_enabled() {
            for role in array(data, "roles") {
                self.insert_role(id, role);
            }
        }

        self.guilds.insert(
            id,
            CachedGuild {
                id,
                shard_id,
                data: stripped(object),
            },
        );
        tracing::trace!(guild_id = %id, shard_id, "Guild cached");
    }

    /// Merge the update over the stored guild, or store it if unseen
    fn guild_update(&self, shard_id: u32, data: &Value) {
        if !self.options.guilds {
            return;
        }
        let (Some(id), Some(object)) = (snowflake(data, "id"), data.as_object()) else {
            return;
        };

        self.guilds
            .entry(id)
            .and_modify(|guild| {
                guild.shard_id = shard_id;
                guild.data.extend(stripped(object));
            })
            .or_insert_with(|| CachedGuild {
                id,
                shard_id,
                data: stripped(object),
            });
    }

    fn guild_delete(&self, data: &Value) {
        if !self.options.guilds {
            return;
        }
        let Some(id) = snowflake(data, "id") else {
            return;
        };

        if self.guilds.remove(&id).is_some() {
            self.channels.retain(|_, channel| channel.guild_id != id);
            self.roles.retain(|_, role| role.guild_id != id);
            tracing::trace!(guild_id = %id, "Guild evicted");
        }
    }

    fn channel_upsert(&self, data: &Value) {
        if !self.options.channels_enabled() {
            return;
        }
        let Some(guild_id) = self.known_guild(data) else {
            return;
        };
        self.insert_channel(guild_id, data);
    }

    fn channel_delete(&self, data: &Value) {
        if !self.options.channels_enabled() {
            return;
        }
        if let Some(id) = snowflake(data, "id") {
            self.channels.remove(&id);
        }
    }

    fn role_upsert(&self, data: &Value) {
        if !self.options.roles_enabled() {
            return;
        }
        let Some(guild_id) = self.known_guild(data) else {
            return;
        };
        if let Some(role) = data.get("role") {
            self.insert_role(guild_id, role);
        }
    }

    fn role_delete(&self, data: &Value) {
        if !self.options.roles_enabled() {
            return;
        }
        if let Some(id) = snowflake(data, "role_id") {
            self.roles.remove(&id);
        }
    }

    /// `guild_id` of the payload, if that guild is cached
    fn known_guild(&self, data: &Value) -> Option<Snowflake> {
        let guild_id = snowflake(data, "guild_id")?;
        if self.guilds.contains_key(&guild_id) {
            Some(guild_id)
        } else {
            tracing::debug!(guild_id = %guild_id, "Event for uncached guild ignored");
            None
        }
    }

    fn insert_channel(&self, guild_id: Snowflake, data: &Value) {
        if let Some(id) = snowflake(data, "id") {
            self.channels.insert(
                id,
                CachedChannel {
                    id,
                    guild_id,
                    data: data.clone(),
                },
            );
        }
    }

    fn insert_role(&self, guild_id: Snowflake, data: &Value) {
        if let Some(id) = snowflake(data, "id") {
            self.roles.insert(
                id,
                CachedRole {
                    id,
                    guild_id,
                    data: data.clone(),
                },
            );
        }
    }
}

fn snowflake(data: &Value, key: &str) -> Option<Snowflake> {
    data.get(key).and_then(|id| Snowflake::deserialize(id).ok())
}

fn array<'a>(data: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    data.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn stripped(object: &Map<String, Value>) -> Map<String, Value> {
    object
        .iter()
        .filter(|(key, _)| !DROPPED_GUILD_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
