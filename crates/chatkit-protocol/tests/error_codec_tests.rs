//! Frame-safe error codec tests
//!
//! Errors must survive the trip through plain JSON with their kind, message
//! and origin stack intact, while foreign values pass through untouched.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use chatkit_protocol::{
    ChatKitError, ErrorKind, FRAME_SAFE_ERROR_KEY, FrameSafeError, ResponseMetadata,
};
use serde_json::{Value, json};

/// Simulate structured cloning: serialize to text and parse back.
fn clone_across_boundary(value: &Value) -> Value {
    serde_json::from_str(&serde_json::to_string(value).unwrap()).unwrap()
}

/// GIVEN: a native error of every kind
/// WHEN: encoded to its frame-safe form and decoded on the other side
/// THEN: the kind and message are unchanged
#[test]
fn test_every_kind_round_trips() {
    for kind in ErrorKind::ALL {
        let original = ChatKitError::new(kind, "something broke");
        let wire = clone_across_boundary(&original.to_value());

        let decoded = ChatKitError::from_possible_frame_safe_error(&wire)
            .unwrap_or_else(|| panic!("{kind} did not decode"));

        assert_eq!(decoded.kind(), kind);
        assert_eq!(decoded.message(), original.message());
    }
}

/// GIVEN: an HTTP error with status and request id
/// WHEN: it round-trips
/// THEN: status, status text and metadata survive
#[test]
fn test_http_error_keeps_response_details() {
    let original = ChatKitError::http("not found", 404, "Not Found")
        .with_metadata(ResponseMetadata::with_request_id("req_123"));

    let decoded =
        ChatKitError::from_possible_frame_safe_error(&clone_across_boundary(&original.to_value()))
            .unwrap();

    assert_eq!(decoded.kind(), ErrorKind::Http);
    assert_eq!(decoded.status(), Some(404));
    assert_eq!(decoded.status_text(), Some("Not Found"));
    assert_eq!(decoded.request_id(), Some("req_123"));
}

/// GIVEN: an encoded error
/// WHEN: decoded
/// THEN: the stack is the one captured where the error was created
#[test]
fn test_decoded_stack_is_origin_stack() {
    let original = ChatKitError::new(ErrorKind::Stream, "stream closed");
    let decoded = ChatKitError::from_possible_frame_safe_error(&original.to_value()).unwrap();

    assert_eq!(decoded.stack(), original.stack());
    assert!(decoded.stack().unwrap().contains("error_codec_tests.rs"));
}

/// GIVEN: values without a recognized marker
/// WHEN: classified
/// THEN: none of them decode, so callers keep the raw value
#[test]
fn test_unrecognized_values_pass_through() {
    let values = [
        json!({ "name": "AbortError", "message": "aborted" }),
        json!({ FRAME_SAFE_ERROR_KEY: "SyntaxError", "message": "bad" }),
        json!("plain string"),
        json!(42),
        Value::Null,
    ];

    for value in values {
        assert!(ChatKitError::from_possible_frame_safe_error(&value).is_none());
    }
}

/// GIVEN: a frame-safe integration error that also carries HTTP fields
/// WHEN: classified
/// THEN: the integration decoder wins and the HTTP fields are ignored
#[test]
fn test_integration_takes_precedence() {
    let value = json!({
        FRAME_SAFE_ERROR_KEY: "IntegrationError",
        "message": "misuse",
        "status": 500,
        "statusText": "Internal Server Error"
    });

    let decoded = ChatKitError::from_possible_frame_safe_error(&value).unwrap();

    assert_eq!(decoded.kind(), ErrorKind::Integration);
    assert_eq!(decoded.status(), None);
}

/// GIVEN: an already-prefixed wrapped message from the other side
/// WHEN: decoded
/// THEN: the prefix is not applied twice
#[test]
fn test_prefix_not_duplicated_after_round_trip() {
    let original = ChatKitError::new(ErrorKind::StreamEventHandling, "handler threw");
    let decoded = ChatKitError::from_possible_frame_safe_error(&original.to_value()).unwrap();

    assert_eq!(
        decoded.message(),
        "Failed to handle stream event: handler threw"
    );
    assert_eq!(decoded.event_name(), "error.streamEventHandling");
}

/// GIVEN: a frame-safe error without a message field
/// WHEN: decoded
/// THEN: the message is empty rather than the decode failing
#[test]
fn test_missing_message_defaults_to_empty() {
    let value = json!({ FRAME_SAFE_ERROR_KEY: "FatalAppError" });
    let decoded = ChatKitError::from_possible_frame_safe_error(&value).unwrap();

    assert_eq!(decoded.kind(), ErrorKind::FatalApp);
    assert_eq!(decoded.message(), "");
}

/// GIVEN: a frame-safe error parsed from JSON
/// WHEN: written back out
/// THEN: absent optional fields stay absent
#[test]
fn test_frame_safe_value_omits_absent_fields() {
    let value = json!({ FRAME_SAFE_ERROR_KEY: "StreamError", "message": "x" });
    let parsed = FrameSafeError::parse(&value).unwrap();

    assert_eq!(parsed.into_value(), value);
}
