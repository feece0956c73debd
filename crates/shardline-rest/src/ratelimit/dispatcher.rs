//! Rate-limited request dispatcher
//!
//! Every request goes through [`RateLimitDispatcher::execute`]. Requests to
//! an endpoint that has a queue join its tail; a 429 or 502 parks the
//! request in that queue and a per-endpoint drain task replays the queue in
//! order, `limit` requests per `retry_after` window.

use parking_lot::{Mutex, RwLock};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use shardline_common::ApiConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};

use super::table::{Queued, RateLimitTable, SpawnDrain};
use super::{BucketInfo, RateLimitHeaders};
use crate::endpoint::endpoint_key;
use crate::error::RestError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::request::{FileAttachment, RestRequest};

/// Wait used when a 429/502 names no window
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Shared handle; clones use the same queues and buckets
#[derive(Clone)]
pub struct RateLimitDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    api: ApiConfig,
    base_url: String,
    token: RwLock<Option<String>>,
    transport: Arc<dyn HttpTransport>,
    table: Mutex<RateLimitTable>,
}

enum Outcome {
    Done(Result<Value, RestError>),
    Limited(Duration),
}

/// `{message, code, errors}` error body; 429 bodies add `retry_after`
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    errors: Option<Value>,
    #[serde(default)]
    retry_after: Option<f64>,
}

impl RateLimitDispatcher {
    pub fn new(api: ApiConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let base_url = api.versioned_base_url();
        Self {
            inner: Arc::new(Inner {
                api,
                base_url,
                token: RwLock::new(None),
                transport,
                table: Mutex::new(RateLimitTable::default()),
            }),
        }
    }

    pub fn with_token(self, token: impl Into<String>) -> Result<Self, RestError> {
        self.set_token(token)?;
        Ok(self)
    }

    /// Replace the token. Empty tokens and tokens containing whitespace are refused.
    pub fn set_token(&self, token: impl Into<String>) -> Result<(), RestError> {
        let token = token.into();
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return Err(RestError::InvalidToken);
        }
        *self.inner.token.write() = Some(token);
        Ok(())
    }

    pub fn clear_token(&self) {
        *self.inner.token.write() = None;
    }

    pub fn has_token(&self) -> bool {
        self.inner.token.read().is_some()
    }

    pub fn api(&self) -> &ApiConfig {
        &self.inner.api
    }

    /// Versioned API root requests are resolved against
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Bucket state for the endpoint `path` belongs to
    pub fn bucket(&self, path: &str) -> Option<BucketInfo> {
        self.inner.table.lock().bucket(&endpoint_key(path))
    }

    /// Requests waiting in the queue of the endpoint `path` belongs to
    pub fn queued(&self, path: &str) -> usize {
        self.inner.table.lock().queued(&endpoint_key(path))
    }

    /// Send a request, waiting out rate limits
    ///
    /// Resolves with the decoded JSON body: `{}` for 204, `null` for an
    /// empty body. Rejections (400, 401, 403, 404, 405) and unknown
    /// statuses are returned as errors and never retried.
    pub async fn execute(&self, request: RestRequest) -> Result<Value, RestError> {
        self.inner.authorization()?;
        let endpoint = endpoint_key(&request.path);

        let (ticket, admission) = {
            let mut table = self.inner.table.lock();
            let ticket = table.ticket(&endpoint);
            (ticket, table.admission(&endpoint, Instant::now()))
        };
        if let Some(deadline) = admission {
            tracing::debug!(endpoint = %endpoint, "Request joined endpoint queue");
            let (reply, rx) = oneshot::channel();
            self.inner.enqueue(
                &endpoint,
                Queued {
                    ticket,
                    request,
                    deadline,
                    reply,
                },
            );
            return wait(endpoint, rx).await;
        }

        match self.inner.send(&endpoint, &request).await {
            Outcome::Done(result) => result,
            Outcome::Limited(retry_after) => {
                let (reply, rx) = oneshot::channel();
                let SpawnDrain(spawn) = self.inner.table.lock().push_limited(
                    &endpoint,
                    ticket,
                    request,
                    reply,
                    retry_after,
                    Instant::now(),
                );
                if spawn {
                    self.inner.spawn_drain(&endpoint);
                }
                wait(endpoint, rx).await
            }
        }
    }

    /// [`execute`](Self::execute) and deserialize the body
    pub async fn execute_as<T: DeserializeOwned>(&self, request: RestRequest) -> Result<T, RestError> {
        let endpoint = endpoint_key(&request.path);
        let value = self.execute(request).await?;
        serde_json::from_value(value).map_err(|e| RestError::Decode {
            endpoint,
            reason: e.to_string(),
        })
    }

    pub async fn get(&self, path: impl Into<String>) -> Result<Value, RestError> {
        self.execute(RestRequest::get(path)).await
    }

    pub async fn delete(&self, path: impl Into<String>) -> Result<Value, RestError> {
        self.execute(RestRequest::delete(path)).await
    }

    pub async fn post(&self, path: impl Into<String>, body: Value) -> Result<Value, RestError> {
        self.execute(RestRequest::post(path).json(body)).await
    }

    pub async fn patch(&self, path: impl Into<String>, body: Value) -> Result<Value, RestError> {
        self.execute(RestRequest::patch(path).json(body)).await
    }

    pub async fn put(&self, path: impl Into<String>, body: Value) -> Result<Value, RestError> {
        self.execute(RestRequest::put(path).json(body)).await
    }

    /// POST a JSON payload with file attachments
    pub async fn post_files(
        &self,
        path: impl Into<String>,
        payload: Value,
        files: Vec<FileAttachment>,
    ) -> Result<Value, RestError> {
        self.execute(RestRequest::post(path).multipart(payload, files))
            .await
    }
}

impl fmt::Debug for RateLimitDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitDispatcher")
            .field("base_url", &self.inner.base_url)
            .field("has_token", &self.has_token())
            .finish()
    }
}

impl Inner {
    fn authorization(&self) -> Result<String, RestError> {
        self.token
            .read()
            .as_deref()
            .map(|token| self.api.authorization(token))
            .ok_or(RestError::MissingToken)
    }

    fn enqueue(self: &Arc<Self>, endpoint: &str, queued: Queued) {
        let SpawnDrain(spawn) = self.table.lock().push_back(endpoint, queued);
        if spawn {
            self.spawn_drain(endpoint);
        }
    }

    fn spawn_drain(self: &Arc<Self>, endpoint: &str) {
        tokio::spawn(Arc::clone(self).drain(endpoint.to_string()));
    }

    /// Replay an endpoint queue head first until it is empty
    async fn drain(self: Arc<Self>, endpoint: String) {
        tracing::debug!(endpoint = %endpoint, "Draining endpoint queue");
        loop {
            let now = Instant::now();
            let next = self.table.lock().next_deadline(&endpoint, now);
            let Some(deadline) = next else {
                break;
            };
            if deadline > now {
                sleep_until(deadline).await;
                continue;
            }

            let popped = self.table.lock().pop_front(&endpoint);
            let Some(queued) = popped else {
                continue;
            };
            if queued.reply.is_closed() {
                tracing::debug!(endpoint = %endpoint, "Queued request abandoned by caller");
                continue;
            }

            match self.send(&endpoint, &queued.request).await {
                Outcome::Done(result) => {
                    let _ = queued.reply.send(result);
                }
                Outcome::Limited(retry_after) => {
                    self.table.lock().push_front_limited(
                        &endpoint,
                        queued,
                        retry_after,
                        Instant::now(),
                    );
                }
            }
        }
        tracing::debug!(endpoint = %endpoint, "Endpoint queue drained");
    }

    async fn send(&self, endpoint: &str, request: &RestRequest) -> Outcome {
        let authorization = match self.authorization() {
            Ok(authorization) => authorization,
            Err(error) => return Outcome::Done(Err(error)),
        };

        tracing::debug!(method = %request.method, endpoint, "Sending request");
        let http_request = HttpRequest {
            method: request.method.clone(),
            url: join_url(&self.base_url, &request.path),
            authorization,
            body: request.body.clone(),
        };

        let response = match self.transport.send(http_request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(endpoint, error = %error, "Request failed");
                return Outcome::Done(Err(RestError::Transport {
                    endpoint: endpoint.to_string(),
                    reason: error.to_string(),
                }));
            }
        };

        let headers = RateLimitHeaders::parse(&response.headers);
        self.table.lock().observe(endpoint, &headers, Instant::now());
        classify(&request.method, endpoint, &response, &headers)
    }
}

async fn wait(
    endpoint: String,
    rx: oneshot::Receiver<Result<Value, RestError>>,
) -> Result<Value, RestError> {
    rx.await
        .unwrap_or_else(|_| Err(RestError::QueueClosed(endpoint)))
}

fn classify(
    method: &Method,
    endpoint: &str,
    response: &HttpResponse,
    headers: &RateLimitHeaders,
) -> Outcome {
    match response.status {
        204 => Outcome::Done(Ok(json!({}))),
        200..=299 | 304 => Outcome::Done(decode(endpoint, &response.body)),
        400 | 401 | 403 | 404 | 405 => {
            let error = rejection(method, endpoint, response);
            tracing::warn!(endpoint, status = response.status, error = %error, "Request rejected");
            Outcome::Done(Err(error))
        }
        429 | 502 => {
            let retry_after = headers
                .wait()
                .or_else(|| body_retry_after(&response.body))
                .unwrap_or(DEFAULT_RETRY_AFTER);
            tracing::warn!(
                endpoint,
                status = response.status,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limited, queueing request"
            );
            Outcome::Limited(retry_after)
        }
        status => {
            tracing::error!(endpoint, status, "Unexpected response status");
            Outcome::Done(Err(RestError::UnexpectedStatus {
                method: method.clone(),
                endpoint: endpoint.to_string(),
                status,
            }))
        }
    }
}

/// JSON body, `null` when empty
fn decode(endpoint: &str, body: &[u8]) -> Result<Value, RestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| RestError::Decode {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

fn rejection(method: &Method, endpoint: &str, response: &HttpResponse) -> RestError {
    let body: ErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
    let message = body.message.unwrap_or_else(|| {
        reqwest::StatusCode::from_u16(response.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("request rejected")
            .to_string()
    });

    RestError::Rejected {
        method: method.clone(),
        endpoint: endpoint.to_string(),
        status: response.status,
        message,
        code: body.code,
        errors: body.errors,
    }
}

fn body_retry_after(body: &[u8]) -> Option<Duration> {
    let body: ErrorBody = serde_json::from_slice(body).ok()?;
    body.retry_after
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
