//! # shardline-rest
//!
//! REST side of the client: a dispatcher that learns per-bucket limits from
//! response headers, queues requests that would exceed them and replays
//! them in submission order.

pub mod endpoint;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod request;
pub mod routes;

pub use endpoint::endpoint_key;
pub use error::{RestError, RestErrorKind};
pub use http::{
    HttpRequest, HttpResponse, HttpTransport, HttpTransportError, RecordedRequest,
    ReqwestTransport, ScriptedHttp,
};
pub use ratelimit::{replay_delay, BucketInfo, RateLimitDispatcher, RateLimitHeaders};
pub use request::{FileAttachment, RequestBody, RestRequest};

pub use reqwest::Method;
