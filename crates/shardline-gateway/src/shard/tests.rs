use serde_json::{json, Value};
use shardline_core::{Intents, PresenceData, ShardInfo, Snowflake, UserStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};

use super::*;
use crate::connection::{ClientFrame, MemoryConnection, MemoryServer, MemoryTransport};
use crate::events::ClientEvent;
use crate::protocol::{
    GatewayMessage, IdentifyPayload, OpCode, ResumePayload, VoiceStateUpdatePayload,
};

fn spawn_shard(
    transport: MemoryTransport,
) -> (GatewayShard, PendingReady, broadcast::Receiver<ClientEvent>) {
    spawn_with(transport, ShardConfig::new("token", "memory://gateway"))
}

fn spawn_with(
    transport: MemoryTransport,
    config: ShardConfig,
) -> (GatewayShard, PendingReady, broadcast::Receiver<ClientEvent>) {
    let (events, rx) = broadcast::channel(1024);
    let (shard, ready) = GatewayShard::spawn(config, Arc::new(transport), events);
    (shard, ready, rx)
}

fn ready_data(session_id: &str) -> Value {
    json!({
        "v": 10,
        "user": {"id": "1", "username": "bot"},
        "guilds": [],
        "session_id": session_id,
        "resume_gateway_url": "memory://resume"
    })
}

/// Accept a connection, say Hello, wait for Identify and answer READY
async fn handshake(server: &mut MemoryServer, interval: u64) -> MemoryConnection {
    let mut conn = server.accept().await.unwrap();
    conn.hello(interval);
    conn.expect_op(OpCode::Identify).await.unwrap();
    conn.dispatch("READY", 1, ready_data("abc"));
    conn
}

/// First handshake op after Hello, skipping heartbeats
async fn handshake_op(conn: &mut MemoryConnection) -> GatewayMessage {
    loop {
        match conn.recv().await {
            Some(ClientFrame::Message(message)) if message.op == OpCode::Heartbeat => {}
            Some(ClientFrame::Message(message)) => return message,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn next_failure(events: &mut broadcast::Receiver<ClientEvent>) -> ShardError {
    loop {
        match events.recv().await {
            Ok(ClientEvent::ShardFailed { error, .. }) => return error,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_identify_carries_token_and_connect_url() {
    let (transport, mut server) = MemoryTransport::new();
    let config = ShardConfig::new("token", "memory://gateway")
        .with_shard(ShardInfo::new(1, 2).unwrap())
        .with_intents(Intents::GUILDS | Intents::GUILD_MESSAGES);
    let (shard, ready, _events) = spawn_with(transport, config);

    let mut conn = server.accept().await.unwrap();
    assert_eq!(conn.url, "memory://gateway?v=10&encoding=json");
    conn.hello(41_250);

    let heartbeat = conn.expect_op(OpCode::Heartbeat).await.unwrap();
    assert_eq!(heartbeat.d, Value::Null);

    let identify: IdentifyPayload = conn
        .expect_op(OpCode::Identify)
        .await
        .unwrap()
        .payload()
        .unwrap();
    assert_eq!(identify.token, "token");
    assert_eq!(identify.shard, Some(ShardInfo::new(1, 2).unwrap()));
    assert_eq!(identify.intents, Intents::GUILDS | Intents::GUILD_MESSAGES);

    conn.dispatch("READY", 1, ready_data("abc"));
    let outcome = ready.wait().await.unwrap();
    assert_eq!(outcome.user().unwrap()["username"], "bot");

    let status = shard.status();
    assert_eq!(status.state, ShardState::Ready);
    assert_eq!(status.session_id.as_deref(), Some("abc"));
    assert_eq!(status.sequence, Some(1));

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_resumable_close_carries_session_and_sequence() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let conn = handshake(&mut server, 41_250).await;
    assert!(matches!(ready.wait().await.unwrap(), ReadyOutcome::Ready(_)));

    conn.dispatch("MESSAGE_CREATE", 42, json!({"content": "hi"}));
    conn.close(1001);

    let mut next = server.accept().await.unwrap();
    assert_eq!(next.url, "memory://resume?v=10&encoding=json");
    next.hello(41_250);

    let resume: ResumePayload = handshake_op(&mut next).await.payload().unwrap();
    assert_eq!(
        resume,
        ResumePayload {
            token: "token".into(),
            session_id: "abc".into(),
            seq: 42,
        }
    );

    next.dispatch("RESUMED", 43, Value::Null);
    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_resumable_close_identifies_again() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();
    conn.close(4007);

    let mut next = server.accept().await.unwrap();
    assert_eq!(next.url, "memory://gateway?v=10&encoding=json");
    next.hello(41_250);

    // Sequence was discarded with the session
    let heartbeat = next.expect_op(OpCode::Heartbeat).await.unwrap();
    assert_eq!(heartbeat.d, Value::Null);
    assert_eq!(handshake_op(&mut next).await.op, OpCode::Identify);

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_request_closes_with_4000_and_resumes() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();

    conn.send(&GatewayMessage::reconnect());
    assert_eq!(conn.expect_close().await, Some(4000));

    let mut next = server.accept().await.unwrap();
    next.hello(41_250);
    assert_eq!(handshake_op(&mut next).await.op, OpCode::Resume);

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_session_identifies_on_same_connection_after_jitter() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();

    let start = Instant::now();
    conn.send(&GatewayMessage::invalid_session(false));
    conn.expect_op(OpCode::Identify).await.unwrap();

    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(1), "waited {waited:?}");
    assert!(waited <= Duration::from_millis(5_001), "waited {waited:?}");
    assert_eq!(shard.status().session_id, None);

    conn.dispatch("READY", 1, ready_data("def"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(shard.status().session_id.as_deref(), Some("def"));

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_invalid_sessions_fail_the_shard() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = server.accept().await.unwrap();
    conn.hello(41_250);
    for _ in 0..6 {
        conn.expect_op_acking(OpCode::Identify).await.unwrap();
        conn.send(&GatewayMessage::invalid_session(false));
    }

    match ready.wait().await {
        Err(ShardError::SessionInvalidated { shard_id, attempts }) => {
            assert_eq!(shard_id, 0);
            assert_eq!(attempts, 6);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(conn.expect_close().await, Some(1000));
    assert_eq!(shard.state(), ShardState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_ready_resets_invalid_session_count() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = server.accept().await.unwrap();
    conn.hello(41_250);
    for _ in 0..5 {
        conn.expect_op_acking(OpCode::Identify).await.unwrap();
        conn.send(&GatewayMessage::invalid_session(false));
    }
    conn.expect_op_acking(OpCode::Identify).await.unwrap();
    conn.dispatch("READY", 1, ready_data("abc"));
    ready.wait().await.unwrap();

    conn.send(&GatewayMessage::invalid_session(false));
    conn.expect_op_acking(OpCode::Identify).await.unwrap();
    assert_eq!(shard.state(), ShardState::Identifying);

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_resumable_invalid_session_resumes_immediately() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();
    conn.dispatch("TYPING_START", 7, json!({}));

    let start = Instant::now();
    conn.send(&GatewayMessage::invalid_session(true));
    let resume: ResumePayload = conn
        .expect_op(OpCode::Resume)
        .await
        .unwrap()
        .payload()
        .unwrap();
    assert_eq!(resume.session_id, "abc");
    assert_eq!(resume.seq, 7);
    assert_eq!(start.elapsed(), Duration::ZERO);

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_unacked_heartbeats_close_as_zombie_and_resume() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let start = Instant::now();
    let mut conn = handshake(&mut server, 1_000).await;
    ready.wait().await.unwrap();

    assert_eq!(conn.expect_close().await, Some(4015));
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(2_500), "waited {waited:?}");
    assert!(waited < Duration::from_millis(2_600), "waited {waited:?}");

    let mut next = server.accept().await.unwrap();
    next.hello(1_000);
    assert_eq!(handshake_op(&mut next).await.op, OpCode::Resume);

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_acked_heartbeats_keep_connection_and_measure_ping() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = handshake(&mut server, 1_000).await;
    ready.wait().await.unwrap();

    for _ in 0..10 {
        conn.expect_op(OpCode::Heartbeat).await.unwrap();
        conn.send(&GatewayMessage::heartbeat_ack());
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(shard.state(), ShardState::Ready);
    assert_eq!(shard.ping(), Some(Duration::ZERO));

    shard.destroy().await;
    assert_eq!(shard.ping(), None);
}

#[tokio::test(start_paused = true)]
async fn test_server_heartbeat_request_is_answered() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();

    conn.send(&GatewayMessage::heartbeat(None));
    let heartbeat = conn.expect_op(OpCode::Heartbeat).await.unwrap();
    assert_eq!(heartbeat.d, json!(1));

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_closes_as_zombie() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, _ready, _events) = spawn_shard(transport);

    let start = Instant::now();
    let mut conn = server.accept().await.unwrap();
    assert_eq!(conn.expect_close().await, Some(4015));
    assert!(start.elapsed() >= Duration::from_secs(10));

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_member_lookup_resolves_after_every_chunk() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);
    let shard = Arc::new(shard);

    let mut conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();

    let lookup = tokio::spawn({
        let shard = Arc::clone(&shard);
        async move {
            shard
                .request_guild_members(GuildMembersRequest::new(Snowflake::new(10)))
                .await
        }
    });

    let request = conn.expect_op(OpCode::RequestGuildMembers).await.unwrap();
    assert_eq!(request.d["guild_id"], "10");
    assert_eq!(request.d["query"], "");
    assert_eq!(request.d["limit"], 0);
    assert_eq!(request.d["presences"], false);
    let nonce = request.d["nonce"].as_str().unwrap().to_string();

    for index in 0..3u32 {
        conn.dispatch(
            "GUILD_MEMBERS_CHUNK",
            u64::from(index) + 2,
            json!({
                "guild_id": "10",
                "members": [{"user": {"id": (100 + index).to_string()}}],
                "chunk_index": index,
                "chunk_count": 3,
                "nonce": nonce,
            }),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(lookup.is_finished(), index == 2);
    }

    let members = lookup.await.unwrap().unwrap();
    let ids: Vec<_> = members
        .members
        .iter()
        .map(|m| m["user"]["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["100", "101", "102"]);
    assert_eq!(members.chunks, 3);

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_member_lookup_times_out() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let _conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();

    let result = shard
        .request_guild_members_with_timeout(
            GuildMembersRequest::new(Snowflake::new(10)).user_ids([Snowflake::new(5)]),
            Duration::from_secs(5),
        )
        .await;
    assert!(matches!(result, Err(ShardError::LookupTimedOut { shard_id: 0, .. })));

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_destroy_closes_with_4016_and_abandons_lookups() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);
    let shard = Arc::new(shard);

    let mut conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();

    let lookup = tokio::spawn({
        let shard = Arc::clone(&shard);
        async move {
            shard
                .request_guild_members(GuildMembersRequest::new(Snowflake::new(10)))
                .await
        }
    });
    conn.expect_op(OpCode::RequestGuildMembers).await.unwrap();

    shard.destroy().await;
    assert_eq!(conn.expect_close().await, Some(4016));
    assert!(matches!(lookup.await.unwrap(), Err(ShardError::LookupAbandoned(0))));

    assert_eq!(shard.state(), ShardState::Closed);
    assert!(shard.is_destroyed());
    assert!(matches!(
        shard.set_presence(PresenceData::default()),
        Err(ShardError::Destroyed(0))
    ));

    // Second destroy is a no-op
    shard.destroy().await;
    assert!(timeout(Duration::from_secs(60), server.accept())
        .await
        .map_or(true, |conn| conn.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_destroy_before_ready_fails_the_waiter() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let _conn = server.accept().await.unwrap();
    shard.destroy().await;
    assert!(matches!(ready.wait().await, Err(ShardError::Destroyed(0))));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_close_during_startup_fails_the_waiter() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = server.accept().await.unwrap();
    conn.hello(41_250);
    conn.expect_op(OpCode::Identify).await.unwrap();
    conn.close(4004);

    match ready.wait().await {
        Err(ShardError::FatalClose { code, .. }) => assert_eq!(code, 4004),
        other => panic!("unexpected result: {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(shard.state(), ShardState::Closed);

    // No reconnect after a fatal close
    assert!(timeout(Duration::from_secs(60), server.accept())
        .await
        .map_or(true, |conn| conn.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_close_after_ready_is_published() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, mut events) = spawn_shard(transport);

    let conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();
    conn.close(4014);

    let error = next_failure(&mut events).await;
    assert!(matches!(error, ShardError::FatalClose { code: 4014, .. }));
    assert_eq!(shard.state(), ShardState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_close_code_is_fatal() {
    let (transport, mut server) = MemoryTransport::new();
    let (_shard, ready, mut events) = spawn_shard(transport);

    let conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();
    conn.close(4999);

    assert!(matches!(
        next_failure(&mut events).await,
        ShardError::FatalClose { code: 4999, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_give_up_after_limit() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, mut events) = spawn_shard(transport.clone());

    let conn = handshake(&mut server, 1_000).await;
    ready.wait().await.unwrap();

    transport.refuse_next(100);
    conn.close(1001);

    let error = next_failure(&mut events).await;
    assert!(matches!(
        error,
        ShardError::ReconnectExhausted {
            shard_id: 0,
            attempts: 5
        }
    ));
    assert_eq!(shard.state(), ShardState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_first_connect_failure_is_transient() {
    let (transport, _server) = MemoryTransport::new();
    transport.refuse_next(1);
    let (_shard, ready, _events) = spawn_shard(transport);

    let error = ready.wait().await.unwrap_err();
    assert!(error.is_transient());
}

#[tokio::test(start_paused = true)]
async fn test_dispatches_reach_the_bus_and_unknown_ops_are_ignored() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, mut events) = spawn_shard(transport);

    let conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();

    conn.send_raw(r#"{"op":99,"d":null}"#);
    conn.send_raw("not json");
    conn.dispatch("MESSAGE_CREATE", 2, json!({"content": "hi"}));

    let mut names = Vec::new();
    while names.len() < 2 {
        if let ClientEvent::Dispatch(event) = events.recv().await.unwrap() {
            assert_eq!(event.shard_id, 0);
            names.push((event.name.clone(), event.sequence));
        }
    }
    assert_eq!(
        names,
        [
            ("READY".to_string(), Some(1)),
            ("MESSAGE_CREATE".to_string(), Some(2))
        ]
    );
    assert_eq!(shard.state(), ShardState::Ready);

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_presence_is_sent_and_reused_on_identify() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();

    let idle = PresenceData {
        status: UserStatus::Idle,
        ..PresenceData::default()
    };
    shard.set_presence(idle).unwrap();
    let update = conn.expect_op(OpCode::PresenceUpdate).await.unwrap();
    assert_eq!(update.d["status"], "idle");

    conn.close(1000);
    let mut next = server.accept().await.unwrap();
    next.hello(41_250);
    let identify: IdentifyPayload = handshake_op(&mut next).await.payload().unwrap();
    assert_eq!(identify.presence.map(|p| p.status), Some(UserStatus::Idle));

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_guild_subscribe_command() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();

    shard.add_guild_events(Snowflake::new(77)).unwrap();
    let subscribe = conn.expect_op(OpCode::GuildSubscribe).await.unwrap();
    assert_eq!(subscribe.d, json!({"guild_id": "77", "typing": true}));

    shard.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_voice_state_command() {
    let (transport, mut server) = MemoryTransport::new();
    let (shard, ready, _events) = spawn_shard(transport);

    let mut conn = handshake(&mut server, 41_250).await;
    ready.wait().await.unwrap();

    shard
        .update_voice_state(VoiceStateUpdatePayload {
            guild_id: Snowflake::new(77),
            channel_id: Some(Snowflake::new(78)),
            self_mute: true,
            self_deaf: false,
        })
        .unwrap();
    let update = conn.expect_op(OpCode::VoiceStateUpdate).await.unwrap();
    assert_eq!(update.d["channel_id"], "78");
    assert_eq!(update.d["self_mute"], true);

    shard.destroy().await;
}
