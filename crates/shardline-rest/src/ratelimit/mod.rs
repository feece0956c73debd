//! Per-bucket rate limiting: header parsing, the bucket/queue table and the
//! dispatcher that drives them.

mod dispatcher;
mod headers;
mod table;


pub use dispatcher::{RateLimitDispatcher, DEFAULT_RETRY_AFTER};
pub use headers::RateLimitHeaders;
pub use table::{replay_delay, BucketInfo};
