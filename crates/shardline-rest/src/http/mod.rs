//! HTTP abstraction the dispatcher sends through.

mod reqwest_transport;
mod scripted;

pub use reqwest_transport::ReqwestTransport;
pub use scripted::{RecordedRequest, ScriptedHttp};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;

use crate::request::RequestBody;

/// Fully resolved request handed to a transport
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// `Authorization` header value
    pub authorization: String,
    pub body: RequestBody,
}

/// Raw response; status handling is the dispatcher's job
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Add a header. Invalid names or values are skipped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_json(mut self, body: &Value) -> Self {
        self.body = body.to_string().into_bytes();
        self
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HttpTransportError(pub String);

#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpTransportError>;
}
