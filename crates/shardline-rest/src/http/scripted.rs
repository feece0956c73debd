//! Scripted transport: answers from a closure or a fixed sequence and
//! records every request with the (virtual) time it was sent.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{HttpRequest, HttpResponse, HttpTransport, HttpTransportError};

type Responder = dyn Fn(&HttpRequest) -> Result<HttpResponse, HttpTransportError> + Send + Sync;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: HttpRequest,
    pub at: Instant,
}

impl RecordedRequest {
    /// Request URL without the API root
    #[must_use]
    pub fn path(&self) -> &str {
        let url = self.request.url.as_str();
        let start = url.find("://").map_or(0, |index| index + 3);
        let mut offset = start;
        for segment in url[start..].split('/') {
            let end = offset + segment.len();
            let is_version = segment.len() > 1
                && segment.starts_with('v')
                && segment[1..].bytes().all(|b| b.is_ascii_digit());
            if is_version {
                return &url[end..];
            }
            offset = end + 1;
        }
        url
    }

    /// JSON request body, if any
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> {
        match &self.request.body {
            crate::request::RequestBody::Json(body) => Some(body),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ScriptedHttp {
    responder: Arc<Responder>,
    latency: Duration,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedHttp {
    pub fn new(
        responder: impl Fn(&HttpRequest) -> Result<HttpResponse, HttpTransportError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(responder),
            latency: Duration::ZERO,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer with `responses` in order, then `200 {}` forever
    pub fn sequence(responses: impl IntoIterator<Item = HttpResponse>) -> Self {
        let queue = Mutex::new(responses.into_iter().collect::<VecDeque<_>>());
        Self::new(move |_| {
            Ok(queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| HttpResponse::new(200).with_json(&json!({}))))
        })
    }

    /// Delay every response by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpTransportError> {
        self.log.lock().push(RecordedRequest {
            request: request.clone(),
            at: Instant::now(),
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.responder)(&request)
    }
}
