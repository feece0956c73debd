//! Mock gateway and REST server
//!
//! One axum app bound to an ephemeral port serves `/gateway` as a WebSocket
//! endpoint and `/api/v10/*` as the REST API, recording everything the
//! client sends.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use shardline::ClientOptions;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::fixtures::{
    bot_user, guild_create, guild_for_shard, member_chunk, rate_limited, MESSAGES_BUCKET,
    VALID_TOKEN,
};

/// How the mock behaves
#[derive(Debug, Clone)]
pub struct MockSettings {
    /// Recommended shard count in `/gateway/bot`
    pub shards: u32,
    pub max_concurrency: u32,
    pub heartbeat_interval_ms: u64,
    /// Close codes sent right after READY, one per connection
    pub close_after_ready: Vec<u16>,
    /// How many message creates are answered with 429 first
    pub limited_messages: usize,
    /// Seconds, sent as `retry-after`
    pub retry_after: f64,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            shards: 1,
            max_concurrency: 1,
            heartbeat_interval_ms: 45_000,
            close_after_ready: Vec::new(),
            limited_messages: 0,
            retry_after: 0.25,
        }
    }
}

/// A gateway frame the mock received, with its arrival time
#[derive(Debug, Clone)]
pub struct SeenFrame {
    pub payload: Value,
    pub at: Instant,
}

/// A REST request the mock received
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: Method,
    /// Path below `/api/v10`, query included
    pub path: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
    pub at: Instant,
}

/// Shared state of the mock
pub struct MockState {
    settings: MockSettings,
    ws_url: String,
    connections: AtomicUsize,
    close_after_ready: Mutex<VecDeque<u16>>,
    limited_left: Mutex<usize>,
    identifies: Mutex<Vec<SeenFrame>>,
    resumes: Mutex<Vec<SeenFrame>>,
    frames: Mutex<Vec<SeenFrame>>,
    closes: Mutex<Vec<u16>>,
    requests: Mutex<Vec<SeenRequest>>,
}

impl MockState {
    fn new(settings: MockSettings, ws_url: String) -> Self {
        Self {
            close_after_ready: Mutex::new(settings.close_after_ready.iter().copied().collect()),
            limited_left: Mutex::new(settings.limited_messages),
            settings,
            ws_url,
            connections: AtomicUsize::new(0),
            identifies: Mutex::new(Vec::new()),
            resumes: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

/// Running mock server
pub struct MockDiscord {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockDiscord {
    pub async fn start() -> Result<Self> {
        Self::start_with(MockSettings::default()).await
    }

    pub async fn start_with(settings: MockSettings) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(MockState::new(settings, format!("ws://{addr}/gateway")));

        let app = Router::new()
            .route("/gateway", get(gateway))
            .route("/api/*rest", any(rest))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    /// API root without the version segment
    pub fn api_base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Client options pointing at this mock, with a short start-up quiet period
    pub fn options(&self) -> ClientOptions {
        let mut options = ClientOptions::default().api_base_url(self.api_base_url());
        options.gateway.shard_start_quiet_period_ms = 300;
        options
    }

    pub fn identifies(&self) -> Vec<SeenFrame> {
        self.state.identifies.lock().clone()
    }

    pub fn resumes(&self) -> Vec<SeenFrame> {
        self.state.resumes.lock().clone()
    }

    /// Client frames other than heartbeat, identify and resume
    pub fn frames(&self) -> Vec<SeenFrame> {
        self.state.frames.lock().clone()
    }

    /// Close codes sent by the client
    pub fn closes(&self) -> Vec<u16> {
        self.state.closes.lock().clone()
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<SeenRequest> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|request| request.path == path)
            .cloned()
            .collect()
    }
}

impl Drop for MockDiscord {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Poll `check` every 20 ms for up to five seconds
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

async fn gateway(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(mut socket: WebSocket, state: Arc<MockState>) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst);
    let mut sequence = 0u64;

    let hello = json!({"op": 10, "d": {"heartbeat_interval": state.settings.heartbeat_interval_ms}});
    if !send(&mut socket, &hello).await {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let frame: Value = match message {
            Message::Text(text) => match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(_) => continue,
            },
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    state.closes.lock().push(frame.code);
                }
                return;
            }
            _ => continue,
        };
        let seen = SeenFrame {
            payload: frame["d"].clone(),
            at: Instant::now(),
        };

        match frame["op"].as_u64() {
            Some(1) => {
                send(&mut socket, &json!({"op": 11, "d": null})).await;
            }
            Some(2) => {
                let shard = seen.payload["shard"].clone();
                state.identifies.lock().push(seen);

                let ready = json!({
                    "v": 10,
                    "user": bot_user(),
                    "guilds": [],
                    "session_id": format!("session-{connection}"),
                    "resume_gateway_url": state.ws_url,
                    "shard": shard,
                });
                sequence += 1;
                send(&mut socket, &dispatch("READY", sequence, ready)).await;

                let shard_id = shard[0].as_i64().unwrap_or(0);
                sequence += 1;
                let guild = guild_create(guild_for_shard(shard_id));
                send(&mut socket, &dispatch("GUILD_CREATE", sequence, guild)).await;

                let close = state.close_after_ready.lock().pop_front();
                if let Some(code) = close {
                    let frame = CloseFrame {
                        code,
                        reason: Cow::Borrowed("scripted close"),
                    };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    return;
                }
            }
            Some(6) => {
                state.resumes.lock().push(seen);
                sequence += 1;
                send(&mut socket, &dispatch("RESUMED", sequence, Value::Null)).await;
            }
            Some(8) => {
                let guild_id = seen.payload["guild_id"].clone();
                let nonce = seen.payload["nonce"].clone();
                state.frames.lock().push(seen);
                for index in 0..2 {
                    sequence += 1;
                    let chunk = member_chunk(&guild_id, &nonce, index, 2);
                    send(&mut socket, &dispatch("GUILD_MEMBERS_CHUNK", sequence, chunk)).await;
                }
            }
            _ => state.frames.lock().push(seen),
        }
    }
}

fn dispatch(event: &str, sequence: u64, data: Value) -> Value {
    json!({"op": 0, "t": event, "s": sequence, "d": data})
}

async fn send(socket: &mut WebSocket, frame: &Value) -> bool {
    socket.send(Message::Text(frame.to_string())).await.is_ok()
}

async fn rest(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path_and_query()
        .map_or(uri.path(), |path| path.as_str())
        .trim_start_matches("/api/v10")
        .to_string();
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let authorization = header("authorization");

    state.requests.lock().push(SeenRequest {
        method: method.clone(),
        path: path.clone(),
        authorization: authorization.clone(),
        content_type: header("content-type"),
        body: String::from_utf8_lossy(&body).into_owned(),
        at: Instant::now(),
    });

    let authorized = matches!(
        authorization.as_deref(),
        Some(value) if value == VALID_TOKEN || value == format!("Bot {VALID_TOKEN}")
    );
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "401: Unauthorized", "code": 0})),
        )
            .into_response();
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match (method, segments.as_slice()) {
        (Method::GET, ["gateway", "bot"]) => Json(json!({
            "url": state.ws_url,
            "shards": state.settings.shards,
            "session_start_limit": {
                "total": 1000,
                "remaining": 999,
                "reset_after": 14_400_000,
                "max_concurrency": state.settings.max_concurrency,
            },
        }))
        .into_response(),
        (Method::GET, ["gateway"]) => Json(json!({"url": state.ws_url})).into_response(),
        (Method::GET, ["users", "@me"]) => Json(bot_user()).into_response(),
        (Method::POST, ["channels", channel_id, "messages"]) => {
            let limited = {
                let mut left = state.limited_left.lock();
                let limited = *left > 0;
                *left = left.saturating_sub(1);
                limited
            };
            if limited {
                let retry_after = state.settings.retry_after;
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [
                        ("retry-after", retry_after.to_string()),
                        ("x-ratelimit-bucket", MESSAGES_BUCKET.to_string()),
                        ("x-ratelimit-limit", "5".to_string()),
                        ("x-ratelimit-remaining", "0".to_string()),
                        ("x-ratelimit-reset-after", retry_after.to_string()),
                    ],
                    Json(rate_limited(retry_after)),
                )
                    .into_response();
            }

            let sent: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            (
                [
                    ("x-ratelimit-bucket", MESSAGES_BUCKET.to_string()),
                    ("x-ratelimit-limit", "5".to_string()),
                    ("x-ratelimit-remaining", "4".to_string()),
                    ("x-ratelimit-reset-after", "1.0".to_string()),
                ],
                Json(json!({
                    "id": "1",
                    "channel_id": channel_id,
                    "content": sent["content"],
                })),
            )
                .into_response()
        }
        (Method::DELETE, ["channels", _, "messages", _]) => StatusCode::NO_CONTENT.into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "404: Not Found", "code": 0})),
        )
            .into_response(),
    }
}
