//! HTTP tests for the reqwest fetcher and the retrying event-stream relay.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use chatkit_messenger::{
    AbortController, AbortSignal, HttpFetch, HttpRequest, ReqwestFetcher, RequestBody,
    fetch_event_source_with_retry,
};
use chatkit_protocol::{ErrorKind, FileBlob, FormData, RetryPolicy};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5), max_attempts)
}

#[tokio::test]
async fn test_get_resolves_relative_url_against_base() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/threads"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "req_7")
                .set_body_json(json!({ "data": [] })),
        )
        .mount(&mock_server)
        .await;

    let base_url = Url::parse(&format!("{}/v1/", mock_server.uri()))?;
    let fetcher = ReqwestFetcher::default().with_base_url(base_url);

    let response = fetcher
        .fetch(HttpRequest::get("threads"), AbortSignal::never())
        .await?;

    assert!(response.ok());
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.header("X-Request-Id"), Some("req_7"));
    assert_eq!(response.json().await?, json!({ "data": [] }));
    Ok(())
}

#[tokio::test]
async fn test_post_sends_headers_and_text_body() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/threads"))
        .and(header("authorization", "Bearer t"))
        .and(body_string(r#"{"title":"hi"}"#))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "thr_1" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut request = HttpRequest::get(format!("{}/threads", mock_server.uri()));
    request.method = "POST".to_string();
    request
        .headers
        .insert("authorization".to_string(), "Bearer t".to_string());
    request.body = Some(RequestBody::Text(r#"{"title":"hi"}"#.to_string()));

    let response = ReqwestFetcher::default()
        .fetch(request, AbortSignal::never())
        .await?;

    assert_eq!(response.status, 201);
    assert_eq!(response.json().await?, json!({ "id": "thr_1" }));
    Ok(())
}

#[tokio::test]
async fn test_form_body_is_sent_as_multipart() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&mock_server)
        .await;

    let form = FormData::new()
        .with("purpose", "attachment")
        .with("file", FileBlob::new("notes.txt", "text/plain", b"hello".to_vec()));
    let mut request = HttpRequest::get(format!("{}/files", mock_server.uri()));
    request.method = "POST".to_string();
    request.body = Some(RequestBody::Form(form));

    ReqwestFetcher::default()
        .fetch(request, AbortSignal::never())
        .await?;

    let received = mock_server.received_requests().await.unwrap();
    let content_type = received[0]
        .headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = String::from_utf8_lossy(&received[0].body);
    assert!(content_type.starts_with("multipart/form-data"));
    assert!(body.contains("name=\"purpose\""));
    assert!(body.contains("attachment"));
    assert!(body.contains("filename=\"notes.txt\""));
    assert!(body.contains("hello"));
    Ok(())
}

#[tokio::test]
async fn test_aborted_signal_stops_the_request() {
    let fetcher = ReqwestFetcher::default();
    let controller = AbortController::new();
    controller.abort(None);

    let result = fetcher
        .fetch(HttpRequest::get("http://127.0.0.1:9/never"), controller.signal())
        .await;

    assert!(matches!(
        result,
        Err(chatkit_messenger::FetchError::Aborted { .. })
    ));
}

// ============================================================================
// Event stream relay
// ============================================================================

#[tokio::test]
async fn test_stream_retries_server_errors_then_streams() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("event: delta\ndata: hello\n\ndata: bye\n\n", "text/event-stream"),
        )
        .mount(&mock_server)
        .await;

    let mut messages = Vec::new();
    fetch_event_source_with_retry(
        &ReqwestFetcher::default(),
        HttpRequest::get(format!("{}/stream", mock_server.uri())),
        AbortSignal::never(),
        fast_retry(5),
        |message| messages.push(message),
    )
    .await?;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].event.as_deref(), Some("delta"));
    assert_eq!(messages[0].data, "hello");
    assert_eq!(messages[1].data, "bye");
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_stream_client_error_is_not_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&mock_server)
        .await;

    let error = fetch_event_source_with_retry(
        &ReqwestFetcher::default(),
        HttpRequest::get(format!("{}/stream", mock_server.uri())),
        AbortSignal::never(),
        fast_retry(5),
        |_| {},
    )
    .await
    .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Http);
    assert_eq!(error.status(), Some(403));
    assert_eq!(error.message(), "Streaming failed: Forbidden");
}

#[tokio::test]
async fn test_stream_gives_up_after_max_attempts() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let error = fetch_event_source_with_retry(
        &ReqwestFetcher::default(),
        HttpRequest::get(format!("{}/stream", mock_server.uri())),
        AbortSignal::never(),
        fast_retry(2),
        |_| {},
    )
    .await
    .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Http);
    assert_eq!(error.status(), Some(503));
    assert_eq!(error.message(), "Streaming failed: Service Unavailable");
}

#[tokio::test]
async fn test_stream_wrong_content_type_is_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "not": "a stream" })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let result = fetch_event_source_with_retry(
        &ReqwestFetcher::default(),
        HttpRequest::get(format!("{}/stream", mock_server.uri())),
        AbortSignal::never(),
        fast_retry(1),
        |_| {},
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_aborted_stream_resolves_quietly() {
    let controller = AbortController::new();
    controller.abort(None);

    let result = fetch_event_source_with_retry(
        &ReqwestFetcher::default(),
        HttpRequest::get("http://127.0.0.1:9/stream"),
        controller.signal(),
        fast_retry(5),
        |_| {},
    )
    .await;

    assert!(result.is_ok());
}
