//! Bucket and endpoint-queue bookkeeping
//!
//! Lives behind the dispatcher's mutex; nothing here awaits.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::RateLimitHeaders;
use crate::error::RestError;
use crate::request::RestRequest;

/// Delay before replaying the request at 1-based `position` of an endpoint queue
///
/// Items drain `limit` per window: the first `limit` after one window, the
/// next `limit` after two, and so on.
#[must_use]
pub fn replay_delay(retry_after: Duration, position: usize, limit: u32) -> Duration {
    let limit = limit.max(1) as usize;
    let windows = u32::try_from(position.saturating_sub(1) / limit).unwrap_or(u32::MAX);
    retry_after.saturating_add(retry_after.saturating_mul(windows))
}

/// What the dispatcher knows about a bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketInfo {
    /// Server bucket id, `None` until a response named one
    pub id: Option<String>,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub retry_after: Option<Duration>,
    pub reset_at: Option<Instant>,
}

impl BucketInfo {
    /// Deadline before which a request would certainly be rate limited
    fn exhausted_until(&self, now: Instant) -> Option<Instant> {
        match (self.remaining, self.reset_at) {
            (Some(0), Some(reset_at)) if reset_at > now => Some(reset_at),
            _ => None,
        }
    }

    fn observe(&mut self, headers: &RateLimitHeaders, now: Instant) {
        if let Some(limit) = headers.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = Some(remaining);
        }
        if let Some(reset_after) = headers.reset_after {
            self.reset_at = Some(now + reset_after);
        }
    }
}

pub(crate) type Reply = oneshot::Sender<Result<Value, RestError>>;

pub(crate) struct Queued {
    /// Submission order within the endpoint
    pub ticket: u64,
    pub request: RestRequest,
    pub deadline: Instant,
    pub reply: Reply,
}

#[derive(Default)]
struct EndpointQueue {
    bucket: Option<String>,
    pending: VecDeque<Queued>,
    /// A drain task owns this queue
    draining: bool,
    next_ticket: u64,
}

impl EndpointQueue {
    fn tail_deadline(&self) -> Option<Instant> {
        self.pending.back().map(|item| item.deadline)
    }

    /// Insert in ticket order and return the index
    fn insert(&mut self, queued: Queued) -> usize {
        let index = self
            .pending
            .iter()
            .position(|item| item.ticket > queued.ticket)
            .unwrap_or(self.pending.len());
        self.pending.insert(index, queued);
        index
    }

    /// Pace everything from `from` on at `limit` per `retry_after`,
    /// never earlier than the item ahead
    fn reschedule(&mut self, from: usize, retry_after: Duration, limit: u32, now: Instant) {
        let mut floor = from
            .checked_sub(1)
            .and_then(|index| self.pending.get(index))
            .map_or(now, |item| item.deadline);
        for (index, item) in self.pending.iter_mut().enumerate().skip(from) {
            let paced = now + replay_delay(retry_after, index + 1, limit);
            item.deadline = item.deadline.max(paced).max(floor);
            floor = item.deadline;
        }
    }
}

/// Whether the caller has to start a drain task after queueing
#[must_use]
pub(crate) struct SpawnDrain(pub bool);

#[derive(Default)]
pub(crate) struct RateLimitTable {
    endpoints: HashMap<String, EndpointQueue>,
    /// Keyed by server bucket id, or by endpoint key until one is known
    buckets: HashMap<String, BucketInfo>,
}

impl RateLimitTable {
    /// Record a response's headers for `endpoint`
    pub fn observe(&mut self, endpoint: &str, headers: &RateLimitHeaders, now: Instant) {
        let queue = self.endpoints.entry(endpoint.to_string()).or_default();
        if let Some(bucket) = &headers.bucket {
            if queue.bucket.as_ref() != Some(bucket) {
                tracing::debug!(endpoint, bucket = %bucket, "Endpoint mapped to bucket");
                queue.bucket = Some(bucket.clone());
            }
        }
        let key = Self::bucket_key(queue, endpoint);
        let info = self.buckets.entry(key).or_default();
        if headers.bucket.is_some() {
            info.id.clone_from(&headers.bucket);
        }
        info.observe(headers, now);
    }

    /// Remember the window a rate-limited response asked for
    pub fn record_retry(&mut self, endpoint: &str, retry_after: Duration) {
        self.bucket_mut(endpoint).retry_after = Some(retry_after);
    }

    pub fn bucket(&self, endpoint: &str) -> Option<BucketInfo> {
        let queue = self.endpoints.get(endpoint)?;
        self.buckets.get(&Self::bucket_key(queue, endpoint)).cloned()
    }

    /// Next submission number for `endpoint`
    pub fn ticket(&mut self, endpoint: &str) -> u64 {
        let queue = self.endpoints.entry(endpoint.to_string()).or_default();
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        ticket
    }

    pub fn queued(&self, endpoint: &str) -> usize {
        self.endpoints
            .get(endpoint)
            .map_or(0, |queue| queue.pending.len())
    }

    /// Deadline for a fresh request, or `None` if it may be sent right away
    ///
    /// A request waits when its endpoint already has a queue (FIFO) or when
    /// the bucket has no requests left before its reset.
    pub fn admission(&self, endpoint: &str, now: Instant) -> Option<Instant> {
        let queue = self.endpoints.get(endpoint)?;
        let exhausted = self.exhausted_until(endpoint, now);
        if !queue.draining && queue.pending.is_empty() {
            return exhausted;
        }

        let position = queue.pending.len() + 1;
        let paced = self
            .bucket(endpoint)
            .and_then(|info| info.retry_after)
            .filter(|_| !queue.pending.is_empty())
            .map(|window| now + replay_delay(window, position, self.limit(endpoint)));
        [Some(now), queue.tail_deadline(), exhausted, paced]
            .into_iter()
            .flatten()
            .max()
    }

    /// Queue a request that has not been sent yet
    pub fn push_back(&mut self, endpoint: &str, queued: Queued) -> SpawnDrain {
        let queue = self.endpoints.entry(endpoint.to_string()).or_default();
        let index = queue.insert(queued);
        if let Some(ahead) = index.checked_sub(1).and_then(|i| queue.pending.get(i)) {
            let floor = ahead.deadline;
            for item in queue.pending.iter_mut().skip(index) {
                item.deadline = item.deadline.max(floor);
            }
        }
        Self::claim(queue)
    }

    /// Queue a request that was just rate limited, in submission order
    ///
    /// A request whose 429 arrives after a later submission's still goes
    /// ahead of it; everything from its slot on is paced again.
    pub fn push_limited(
        &mut self,
        endpoint: &str,
        ticket: u64,
        request: RestRequest,
        reply: Reply,
        retry_after: Duration,
        now: Instant,
    ) -> SpawnDrain {
        self.record_retry(endpoint, retry_after);
        let limit = self.limit(endpoint);
        let queue = self.endpoints.entry(endpoint.to_string()).or_default();
        let index = queue.insert(Queued {
            ticket,
            request,
            deadline: now,
            reply,
        });
        queue.reschedule(index, retry_after, limit, now);

        let deadline = queue.pending[index].deadline;
        tracing::debug!(
            endpoint,
            position = index + 1,
            delay_ms = deadline.duration_since(now).as_millis() as u64,
            "Request queued after rate limit"
        );
        Self::claim(queue)
    }

    /// Put a replay that was rate limited again back in its slot (normally
    /// the head) and push everything behind it out to the new window
    pub fn push_front_limited(
        &mut self,
        endpoint: &str,
        mut queued: Queued,
        retry_after: Duration,
        now: Instant,
    ) {
        self.record_retry(endpoint, retry_after);
        let limit = self.limit(endpoint);
        let queue = self.endpoints.entry(endpoint.to_string()).or_default();

        queued.deadline = now;
        let index = queue.insert(queued);
        queue.reschedule(index, retry_after, limit, now);
    }

    /// When the drain task should send the head of the queue
    ///
    /// Releases the queue (returns `None`) once it is empty.
    pub fn next_deadline(&mut self, endpoint: &str, now: Instant) -> Option<Instant> {
        let exhausted = self.exhausted_until(endpoint, now);
        let queue = self.endpoints.get_mut(endpoint)?;
        match queue.pending.front() {
            Some(head) => Some(exhausted.map_or(head.deadline, |until| until.max(head.deadline))),
            None => {
                queue.draining = false;
                None
            }
        }
    }

    pub fn pop_front(&mut self, endpoint: &str) -> Option<Queued> {
        self.endpoints.get_mut(endpoint)?.pending.pop_front()
    }

    fn limit(&self, endpoint: &str) -> u32 {
        self.bucket(endpoint)
            .and_then(|info| info.limit)
            .unwrap_or(1)
            .max(1)
    }

    fn exhausted_until(&self, endpoint: &str, now: Instant) -> Option<Instant> {
        self.bucket(endpoint)?.exhausted_until(now)
    }

    fn bucket_mut(&mut self, endpoint: &str) -> &mut BucketInfo {
        let queue = self.endpoints.entry(endpoint.to_string()).or_default();
        let key = Self::bucket_key(queue, endpoint);
        self.buckets.entry(key).or_default()
    }

    fn bucket_key(queue: &EndpointQueue, endpoint: &str) -> String {
        queue
            .bucket
            .as_ref()
            .map_or_else(|| format!("endpoint:{endpoint}"), |id| format!("bucket:{id}"))
    }

    fn claim(queue: &mut EndpointQueue) -> SpawnDrain {
        let spawn = !queue.draining;
        queue.draining = true;
        SpawnDrain(spawn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(bucket: &str, limit: u32, remaining: u32, reset_after: u64) -> RateLimitHeaders {
        RateLimitHeaders {
            bucket: Some(bucket.to_string()),
            limit: Some(limit),
            remaining: Some(remaining),
            reset_after: Some(Duration::from_secs(reset_after)),
            retry_after: None,
        }
    }

    fn queued(
        ticket: u64,
        deadline: Instant,
    ) -> (Queued, oneshot::Receiver<Result<Value, RestError>>) {
        let (reply, rx) = oneshot::channel();
        (
            Queued {
                ticket,
                request: RestRequest::get("/gateway"),
                deadline,
                reply,
            },
            rx,
        )
    }

    #[test]
    fn test_replay_delay_staggers_by_limit() {
        let window = Duration::from_secs(2);
        assert_eq!(replay_delay(window, 1, 5), window);
        assert_eq!(replay_delay(window, 5, 5), window);
        assert_eq!(replay_delay(window, 6, 5), window * 2);
        assert_eq!(replay_delay(window, 7, 5) - replay_delay(window, 1, 5), window);
        assert_eq!(replay_delay(window, 11, 5), window * 3);
    }

    #[test]
    fn test_replay_delay_zero_limit_is_one() {
        let window = Duration::from_secs(1);
        assert_eq!(replay_delay(window, 3, 0), window * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_bucket_across_endpoints() {
        let now = Instant::now();
        let mut table = RateLimitTable::default();
        table.observe("/channels/1/messages", &headers("b1", 5, 4, 1), now);
        table.observe("/channels/2/messages", &headers("b1", 5, 0, 3), now);

        let first = table.bucket("/channels/1/messages").unwrap();
        let second = table.bucket("/channels/2/messages").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.id.as_deref(), Some("b1"));
        assert_eq!(first.remaining, Some(0));

        // Both endpoints see the exhausted shared bucket
        let until = now + Duration::from_secs(3);
        assert_eq!(table.admission("/channels/1/messages", now), Some(until));
        assert_eq!(table.admission("/channels/2/messages", now), Some(until));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_endpoint_is_admitted() {
        let table = RateLimitTable::default();
        assert_eq!(table.admission("/gateway", Instant::now()), None);
        assert_eq!(table.bucket("/gateway"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_front_requeue_pushes_rest_back() {
        let now = Instant::now();
        let mut table = RateLimitTable::default();
        let (first, _rx1) = queued(0, now);
        let (second, _rx2) = queued(1, now + Duration::from_secs(1));
        let SpawnDrain(spawn) = table.push_back("/gateway", second);
        assert!(spawn);

        table.push_front_limited("/gateway", first, Duration::from_secs(3), now);
        assert_eq!(table.queued("/gateway"), 2);
        assert_eq!(
            table.next_deadline("/gateway", now),
            Some(now + Duration::from_secs(3))
        );

        table.pop_front("/gateway");
        let rest = table.pop_front("/gateway").unwrap();
        assert_eq!(rest.deadline, now + Duration::from_secs(6));
        assert_eq!(table.next_deadline("/gateway", now), None);
        assert_eq!(table.admission("/gateway", now), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_rate_limit_keeps_submission_order() {
        let now = Instant::now();
        let window = Duration::from_millis(250);
        let mut table = RateLimitTable::default();
        let endpoint = "/channels/1/messages";
        assert_eq!(table.ticket(endpoint), 0);
        assert_eq!(table.ticket(endpoint), 1);

        let (reply, _rx1) = oneshot::channel();
        let SpawnDrain(spawn) =
            table.push_limited(endpoint, 1, RestRequest::get(endpoint), reply, window, now);
        assert!(spawn);

        let later = now + Duration::from_millis(150);
        let (reply, _rx0) = oneshot::channel();
        let SpawnDrain(spawn) =
            table.push_limited(endpoint, 0, RestRequest::get(endpoint), reply, window, later);
        assert!(!spawn);

        let head = table.pop_front(endpoint).unwrap();
        assert_eq!(head.ticket, 0);
        assert_eq!(head.deadline, later + window);
        let next = table.pop_front(endpoint).unwrap();
        assert_eq!(next.ticket, 1);
        assert_eq!(next.deadline, later + window * 2);
    }
}
