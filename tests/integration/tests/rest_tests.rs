//! REST dispatcher end-to-end tests over real HTTP
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use integration_tests::{MockDiscord, MockSettings, MESSAGES_BUCKET, VALID_TOKEN};
use serde_json::json;
use shardline_core::Snowflake;
use shardline_rest::{
    routes, FileAttachment, RateLimitDispatcher, ReqwestTransport, RestError, RestErrorKind,
};
use std::sync::Arc;
use std::time::Duration;

fn dispatcher(mock: &MockDiscord) -> RateLimitDispatcher {
    let api = mock.options().api;
    RateLimitDispatcher::new(api, Arc::new(ReqwestTransport::new()))
        .with_token(VALID_TOKEN)
        .unwrap()
}

#[tokio::test]
async fn test_rate_limited_request_is_replayed() {
    let mock = MockDiscord::start_with(MockSettings {
        limited_messages: 1,
        retry_after: 0.25,
        ..MockSettings::default()
    })
    .await
    .expect("Failed to start mock");
    let rest = dispatcher(&mock);

    let path = routes::channel_messages(Snowflake::new(123));
    let message = rest
        .post(path.clone(), json!({"content": "hello"}))
        .await
        .expect("Request failed");
    assert_eq!(message["content"], "hello");
    assert_eq!(message["channel_id"], "123");

    let attempts = mock.requests_to(&path);
    assert_eq!(attempts.len(), 2);
    let gap = attempts[1].at.duration_since(attempts[0].at);
    assert!(gap >= Duration::from_millis(250), "replayed after {gap:?}");

    let bucket = rest.bucket(&path).expect("bucket not recorded");
    assert_eq!(bucket.id.as_deref(), Some(MESSAGES_BUCKET));
    assert_eq!(bucket.limit, Some(5));
}

#[tokio::test]
async fn test_no_content_resolves_to_empty_object() {
    let mock = MockDiscord::start().await.expect("Failed to start mock");
    let rest = dispatcher(&mock);

    let result = rest
        .delete(routes::channel_message(Snowflake::new(123), Snowflake::new(9)))
        .await
        .expect("Request failed");
    assert_eq!(result, json!({}));
}

#[tokio::test]
async fn test_not_found_is_rejected() {
    let mock = MockDiscord::start().await.expect("Failed to start mock");
    let rest = dispatcher(&mock);

    let error = rest.get(routes::guild(Snowflake::new(5))).await.unwrap_err();
    assert_eq!(error.kind(), RestErrorKind::Rejected);
    assert_eq!(error.status(), Some(404));
    match error {
        RestError::Rejected { endpoint, message, .. } => {
            assert_eq!(endpoint, "/guilds/5");
            assert_eq!(message, "404: Not Found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(mock.requests().len(), 1);
}

#[tokio::test]
async fn test_multipart_upload() {
    let mock = MockDiscord::start().await.expect("Failed to start mock");
    let rest = dispatcher(&mock);

    let path = routes::channel_messages(Snowflake::new(77));
    let file = FileAttachment::new("notes.txt", b"remember the milk".to_vec())
        .with_content_type("text/plain");
    rest.post_files(path.clone(), json!({"content": "see attached"}), vec![file])
        .await
        .expect("Upload failed");

    let requests = mock.requests_to(&path);
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request
        .content_type
        .as_deref()
        .is_some_and(|value| value.starts_with("multipart/form-data")));
    assert!(request.body.contains("name=\"payload_json\""));
    assert!(request.body.contains("filename=\"notes.txt\""));
    assert!(request.body.contains("remember the milk"));
    assert_eq!(request.authorization.as_deref(), Some("Bot valid-token"));
}

#[tokio::test]
async fn test_missing_token() {
    let mock = MockDiscord::start().await.expect("Failed to start mock");
    let rest = RateLimitDispatcher::new(mock.options().api, Arc::new(ReqwestTransport::new()));

    let error = rest.get(routes::current_user()).await.unwrap_err();
    assert!(matches!(error, RestError::MissingToken));
    assert!(mock.requests().is_empty());
}
