//! Canned payloads served by the mock

use serde_json::{json, Value};

/// Token the mock accepts
pub const VALID_TOKEN: &str = "valid-token";

/// Bucket reported for message routes
pub const MESSAGES_BUCKET: &str = "messages";

/// User returned by READY and `/users/@me`
pub fn bot_user() -> Value {
    json!({"id": "900", "username": "mock-bot", "discriminator": "0", "bot": true})
}

/// A guild id that routes to `shard_id` for any shard count above it
pub fn guild_for_shard(shard_id: i64) -> i64 {
    (shard_id << 22) + 1
}

/// GUILD_CREATE payload with one channel and one role
pub fn guild_create(guild_id: i64) -> Value {
    json!({
        "id": guild_id.to_string(),
        "name": format!("guild {guild_id}"),
        "channels": [{"id": (guild_id + 10).to_string(), "name": "general", "type": 0}],
        "roles": [{"id": guild_id.to_string(), "name": "@everyone"}],
        "members": [{"user": {"id": "900"}}],
    })
}

/// One member chunk answering a lookup
pub fn member_chunk(guild_id: &Value, nonce: &Value, index: u32, count: u32) -> Value {
    json!({
        "guild_id": guild_id,
        "members": [{"user": {"id": (index + 1).to_string()}}],
        "chunk_index": index,
        "chunk_count": count,
        "not_found": [],
        "nonce": nonce,
    })
}

/// Body of a 429
pub fn rate_limited(retry_after: f64) -> Value {
    json!({"message": "You are being rate limited.", "retry_after": retry_after, "global": false})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guild_routes_to_shard() {
        for shard in 0..4 {
            assert_eq!((guild_for_shard(shard) >> 22) % 4, shard);
        }
    }
}
