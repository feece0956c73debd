use reqwest::header::HeaderMap;
use std::time::Duration;

pub const BUCKET: &str = "x-ratelimit-bucket";
pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const RETRY_AFTER: &str = "retry-after";

/// Rate-limit metadata of one response. Absent or unparsable headers are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub bucket: Option<String>,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    #[must_use]
    pub fn parse(headers: &HeaderMap) -> Self {
        Self {
            bucket: text(headers, BUCKET)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            limit: text(headers, LIMIT).and_then(|s| s.parse().ok()),
            remaining: text(headers, REMAINING).and_then(|s| s.parse().ok()),
            reset_after: text(headers, RESET_AFTER).and_then(seconds),
            retry_after: text(headers, RETRY_AFTER).and_then(seconds),
        }
    }

    /// How long to wait before replaying a rate-limited request
    #[must_use]
    pub fn wait(&self) -> Option<Duration> {
        self.retry_after.or(self.reset_after)
    }
}

fn text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok().map(str::trim)
}

fn seconds(value: &str) -> Option<Duration> {
    let secs: f64 = value.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}
