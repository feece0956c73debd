//! Gateway end-to-end tests over real WebSockets
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use integration_tests::{
    eventually, guild_for_shard, MockDiscord, MockSettings, VALID_TOKEN,
};
use serde_json::json;
use shardline::{
    Client, ClientError, GuildMembersRequest, Intents, PresenceData, ShardState, Snowflake,
    UserStatus,
};
use std::time::Duration;

// ============================================================================
// Login
// ============================================================================

#[tokio::test]
async fn test_login_single_shard() {
    let mock = MockDiscord::start().await.expect("Failed to start mock");
    let options = mock.options().intents(Intents::GUILDS | Intents::GUILD_MESSAGES);
    let client = Client::new(options).unwrap();

    let user = client.login(VALID_TOKEN).await.expect("Login failed");
    assert_eq!(user["username"], "mock-bot");
    assert_eq!(client.shards().ids(), vec![0]);

    let identifies = mock.identifies();
    assert_eq!(identifies.len(), 1);
    let identify = &identifies[0].payload;
    assert_eq!(identify["token"], VALID_TOKEN);
    assert_eq!(identify["intents"], json!(513));
    assert!(identify.get("shard").is_none());

    let gateway_requests = mock.requests_to("/gateway/bot");
    assert_eq!(gateway_requests.len(), 1);
    assert_eq!(
        gateway_requests[0].authorization.as_deref(),
        Some("Bot valid-token")
    );

    client.destroy().await;
}

#[tokio::test]
async fn test_user_bot_login() {
    let mock = MockDiscord::start().await.expect("Failed to start mock");
    let client = Client::new(mock.options().user_bot(true)).unwrap();

    client.login(VALID_TOKEN).await.expect("Login failed");

    let requests = mock.requests_to("/gateway");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].authorization.as_deref(), Some(VALID_TOKEN));
    assert!(mock.requests_to("/gateway/bot").is_empty());

    client.destroy().await;
}

#[tokio::test]
async fn test_invalid_token_never_connects() {
    let mock = MockDiscord::start().await.expect("Failed to start mock");
    let client = Client::new(mock.options()).unwrap();

    let error = client.login("wrong-token").await.unwrap_err();
    match error {
        ClientError::Rest(error) => assert_eq!(error.status(), Some(401)),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(mock.identifies().is_empty());
    assert!(client.shards().is_empty());
}

// ============================================================================
// Sharding
// ============================================================================

#[tokio::test]
async fn test_sharded_start_in_batches() {
    let mock = MockDiscord::start_with(MockSettings {
        shards: 4,
        max_concurrency: 2,
        ..MockSettings::default()
    })
    .await
    .expect("Failed to start mock");
    let client = Client::new(mock.options().shards([3, 1, 0, 2], 4)).unwrap();

    client.login(VALID_TOKEN).await.expect("Login failed");
    assert_eq!(client.shards().ids(), vec![0, 1, 2, 3]);

    let mut identifies = mock.identifies();
    assert_eq!(identifies.len(), 4);
    identifies.sort_by_key(|seen| seen.payload["shard"][0].as_u64());
    for (id, seen) in identifies.iter().enumerate() {
        assert_eq!(seen.payload["shard"], json!([id, 4]));
    }

    // The second batch waits for the first to be ready plus the quiet period
    let first_batch_done = identifies[0].at.max(identifies[1].at);
    let second_batch_start = identifies[2].at.min(identifies[3].at);
    assert!(second_batch_start.duration_since(first_batch_done) >= Duration::from_millis(300));

    // Every shard received its own guild and the cache saw all of them
    let cache = client.cache().clone();
    assert!(
        eventually(|| cache.guild_count() == 4).await,
        "cache did not fill"
    );
    for shard in 0..4 {
        let guild = Snowflake::new(guild_for_shard(shard));
        let routed = client.shards().for_guild_id(guild).unwrap();
        assert_eq!(i64::from(routed.id()), shard);
        assert_eq!(cache.guild_channels(guild).len(), 1);
    }

    client.destroy().await;
}

#[tokio::test]
async fn test_shard_count_differing_from_recommendation_is_kept() {
    let mock = MockDiscord::start_with(MockSettings {
        shards: 4,
        ..MockSettings::default()
    })
    .await
    .expect("Failed to start mock");
    let client = Client::new(mock.options().shards([0, 1], 2)).unwrap();

    client.login(VALID_TOKEN).await.expect("Login failed");
    assert_eq!(client.shards().shard_count(), Some(2));

    client.destroy().await;
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_resume_after_server_close() {
    let mock = MockDiscord::start_with(MockSettings {
        heartbeat_interval_ms: 400,
        close_after_ready: vec![4000],
        ..MockSettings::default()
    })
    .await
    .expect("Failed to start mock");
    let client = Client::new(mock.options()).unwrap();

    client.login(VALID_TOKEN).await.expect("Login failed");
    assert!(
        eventually(|| mock.resumes().len() == 1).await,
        "client never resumed"
    );

    let resume = &mock.resumes()[0].payload;
    assert_eq!(resume["token"], VALID_TOKEN);
    assert_eq!(resume["session_id"], "session-0");
    assert_eq!(resume["seq"], 2);
    assert_eq!(mock.identifies().len(), 1);

    let shard = client.shards().get(0).unwrap();
    assert!(eventually(|| shard.state() == ShardState::Ready).await);

    client.destroy().await;
}

#[tokio::test]
async fn test_destroy_closes_with_4016() {
    let mock = MockDiscord::start().await.expect("Failed to start mock");
    let client = Client::new(mock.options()).unwrap();
    client.login(VALID_TOKEN).await.expect("Login failed");

    client.destroy().await;
    client.destroy().await;

    assert!(eventually(|| mock.closes() == vec![4016]).await);
    assert!(client.shards().is_empty());
    assert!(client.user().is_none());
}

#[tokio::test]
async fn test_heartbeat_ack_sets_ping() {
    let mock = MockDiscord::start_with(MockSettings {
        heartbeat_interval_ms: 200,
        ..MockSettings::default()
    })
    .await
    .expect("Failed to start mock");
    let client = Client::new(mock.options()).unwrap();
    client.login(VALID_TOKEN).await.expect("Login failed");

    assert!(eventually(|| client.ping().is_some()).await, "no heartbeat ack");
    let status = client.shards().get(0).unwrap().status();
    assert!(status.ping_ms().is_some());
    assert_eq!(status.session_id.as_deref(), Some("session-0"));

    client.destroy().await;
}

// ============================================================================
// Presence and member lookups
// ============================================================================

#[tokio::test]
async fn test_presence_update_reaches_gateway() {
    let mock = MockDiscord::start().await.expect("Failed to start mock");
    let client = Client::new(mock.options()).unwrap();
    client.login(VALID_TOKEN).await.expect("Login failed");

    let presence = PresenceData::new(UserStatus::Dnd);
    assert_eq!(client.set_presence(&presence), 1);

    assert!(eventually(|| !mock.frames().is_empty()).await);
    let frame = &mock.frames()[0].payload;
    assert_eq!(frame["status"], "dnd");
    assert_eq!(frame["afk"], false);
    assert_eq!(frame["activities"], json!([]));

    client.destroy().await;
}

#[tokio::test]
async fn test_member_lookup_collects_chunks() {
    let mock = MockDiscord::start().await.expect("Failed to start mock");
    let client = Client::new(mock.options()).unwrap();
    client.login(VALID_TOKEN).await.expect("Login failed");

    let guild = Snowflake::new(guild_for_shard(0));
    let members = client
        .request_guild_members(
            GuildMembersRequest::new(guild).query("", 0),
            Some(Duration::from_secs(5)),
        )
        .await
        .expect("Lookup failed");

    assert_eq!(members.guild_id, guild);
    assert_eq!(members.chunks, 2);
    assert_eq!(members.members.len(), 2);
    assert_eq!(members.members[0]["user"]["id"], "1");

    let request = &mock.frames()[0].payload;
    assert_eq!(request["guild_id"], guild.to_string());
    assert_eq!(request["query"], "");
    assert_eq!(request["limit"], 0);

    client.destroy().await;
}
