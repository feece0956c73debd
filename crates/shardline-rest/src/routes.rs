//! Path builders for the endpoints the client uses

use shardline_core::Snowflake;

pub fn gateway() -> String {
    "/gateway".to_string()
}

pub fn gateway_bot() -> String {
    "/gateway/bot".to_string()
}

/// `/users/{id}`, or the current user for `None`
pub fn user(user_id: Option<Snowflake>) -> String {
    match user_id {
        Some(id) => format!("/users/{id}"),
        None => current_user(),
    }
}

pub fn current_user() -> String {
    "/users/@me".to_string()
}

pub fn user_guilds() -> String {
    "/users/@me/guilds".to_string()
}

pub fn user_guild(guild_id: Snowflake) -> String {
    format!("/users/@me/guilds/{guild_id}")
}

pub fn user_guild_member(guild_id: Snowflake) -> String {
    format!("/users/@me/guilds/{guild_id}/member")
}

pub fn user_channels() -> String {
    "/users/@me/channels".to_string()
}

pub fn user_connections() -> String {
    "/users/@me/connections".to_string()
}

pub fn user_application_role_connection(application_id: Snowflake) -> String {
    format!("/users/@me/applications/{application_id}/role-connection")
}

pub fn channel(channel_id: Snowflake) -> String {
    format!("/channels/{channel_id}")
}

pub fn channel_messages(channel_id: Snowflake) -> String {
    format!("/channels/{channel_id}/messages")
}

pub fn channel_message(channel_id: Snowflake, message_id: Snowflake) -> String {
    format!("/channels/{channel_id}/messages/{message_id}")
}

pub fn guild(guild_id: Snowflake) -> String {
    format!("/guilds/{guild_id}")
}

pub fn guild_members(guild_id: Snowflake) -> String {
    format!("/guilds/{guild_id}/members")
}

/// Append `key=value` pairs, skipping `None` values
pub fn with_query<'a>(
    path: String,
    params: impl IntoIterator<Item = (&'a str, Option<String>)>,
) -> String {
    let query: Vec<String> = params
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| format!("{key}={value}")))
        .collect();
    if query.is_empty() {
        path
    } else {
        format!("{path}?{}", query.join("&"))
    }
}
