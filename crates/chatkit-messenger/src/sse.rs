//! Server-sent event parsing and the retrying stream relay.
//!
//! # Retry policy
//!
//! - Open succeeds (2xx with `text/event-stream`): retry counter resets
//! - Open fails with 4xx: fatal, no retry
//! - Open fails otherwise (5xx, wrong content type): retryable with
//!   half-jitter backoff until the policy's attempts run out, then fatal
//! - Network or mid-stream failure: fatal
//!
//! Aborting the signal ends the relay successfully.

use chatkit_protocol::{ChatKitError, ErrorKind, EventSourceMessage, RetryPolicy, RetryState};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::abort::AbortSignal;
use crate::error::FetchError;
use crate::fetch::{HttpFetch, HttpRequest, HttpResponse};

/// Content type a stream response must carry.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Incremental parser for the `text/event-stream` format.
///
/// Lines may end in `\n`, `\r` or `\r\n`, and may be split across chunks
/// at any byte.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    skip_lf: bool,
    message: EventSourceMessage,
    has_fields: bool,
    last_event_id: Option<String>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last `id` seen, sent back as `last-event-id` when reconnecting.
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feed a chunk and collect every message it completes.
    ///
    /// # Errors
    /// Returns a `StreamEventParsingError` when a line is not valid UTF-8.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<EventSourceMessage>, ChatKitError> {
        let mut messages = Vec::new();
        for &byte in chunk {
            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\n' | b'\r' => {
                    self.skip_lf = byte == b'\r';
                    let line = std::mem::take(&mut self.line);
                    if let Some(message) = self.process_line(&line)? {
                        messages.push(message);
                    }
                }
                _ => self.line.push(byte),
            }
        }
        Ok(messages)
    }

    fn process_line(&mut self, line: &[u8]) -> Result<Option<EventSourceMessage>, ChatKitError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }

        let line = std::str::from_utf8(line).map_err(|e| {
            ChatKitError::new(
                ErrorKind::StreamEventParsing,
                format!("invalid utf-8 in event stream: {e}"),
            )
        })?;
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.message.data.is_empty() {
                    self.message.data = value.to_string();
                } else {
                    self.message.data.push('\n');
                    self.message.data.push_str(value);
                }
            }
            "event" => self.message.event = Some(value.to_string()),
            "id" => {
                self.message.id = Some(value.to_string());
                self.last_event_id = Some(value.to_string());
            }
            "retry" => match value.parse() {
                Ok(retry) => self.message.retry = Some(retry),
                Err(_) => return Ok(None),
            },
            _ => return Ok(None),
        }
        self.has_fields = true;
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<EventSourceMessage> {
        let message = std::mem::take(&mut self.message);
        std::mem::replace(&mut self.has_fields, false).then_some(message)
    }
}

enum Failure {
    Fatal(ChatKitError),
    Retryable(ChatKitError),
}

enum StreamEnd {
    Closed,
    Aborted,
}

/// Open an event stream and relay its messages, reconnecting per `policy`.
///
/// # Errors
/// Returns the fatal failure: an `HttpError` for a 4xx open or exhausted
/// retries, a `NetworkError` when the request cannot be sent, a `StreamError`
/// when the body fails mid-stream, or a `StreamEventParsingError`.
pub async fn fetch_event_source_with_retry<F>(
    fetcher: &dyn HttpFetch,
    request: HttpRequest,
    signal: AbortSignal,
    policy: RetryPolicy,
    mut on_message: F,
) -> Result<(), ChatKitError>
where
    F: FnMut(EventSourceMessage) + Send,
{
    let mut retry = policy.state();
    let mut last_event_id: Option<String> = None;

    loop {
        let mut attempt = request.clone();
        attempt.default_header("accept", EVENT_STREAM_CONTENT_TYPE);
        if let Some(id) = &last_event_id {
            attempt.headers.insert("last-event-id".to_string(), id.clone());
        }

        let outcome = stream_once(
            fetcher,
            attempt,
            &signal,
            &mut retry,
            &mut last_event_id,
            &mut on_message,
        )
        .await;
        let failure = match outcome {
            Ok(StreamEnd::Closed) => {
                debug!(url = %request.url, "Event stream closed");
                return Ok(());
            }
            Ok(StreamEnd::Aborted) => {
                debug!(url = %request.url, "Event stream aborted");
                return Ok(());
            }
            Err(Failure::Fatal(error)) => return Err(error),
            Err(Failure::Retryable(error)) => error,
        };

        let Some(delay) = retry.next_retry() else {
            warn!(url = %request.url, error = %failure, "Event stream retries exhausted");
            return Err(failure);
        };
        warn!(
            url = %request.url,
            attempt = retry.attempt(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %failure,
            "Retrying event stream"
        );
        tokio::select! {
            biased;
            _ = signal.aborted() => return Ok(()),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

async fn stream_once<F>(
    fetcher: &dyn HttpFetch,
    request: HttpRequest,
    signal: &AbortSignal,
    retry: &mut RetryState,
    last_event_id: &mut Option<String>,
    on_message: &mut F,
) -> Result<StreamEnd, Failure>
where
    F: FnMut(EventSourceMessage) + Send,
{
    let response = match fetcher.fetch(request, signal.clone()).await {
        Ok(response) => response,
        Err(FetchError::Aborted { .. }) => return Ok(StreamEnd::Aborted),
        Err(error) => return Err(Failure::Fatal(ChatKitError::wrap(ErrorKind::Network, error))),
    };
    check_open(&response)?;
    retry.reset();

    let mut parser = SseParser::new();
    let mut body = response.into_body();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = signal.aborted() => return Ok(StreamEnd::Aborted),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else {
            return Ok(StreamEnd::Closed);
        };
        let chunk =
            chunk.map_err(|error| Failure::Fatal(ChatKitError::wrap(ErrorKind::Stream, error)))?;
        let messages = parser.feed(&chunk).map_err(Failure::Fatal)?;
        if let Some(id) = parser.last_event_id() {
            *last_event_id = Some(id.to_string());
        }
        for message in messages {
            on_message(message);
        }
    }
}

fn check_open(response: &HttpResponse) -> Result<(), Failure> {
    let is_event_stream = response
        .header("content-type")
        .is_some_and(|content_type| content_type.starts_with(EVENT_STREAM_CONTENT_TYPE));
    if response.ok() && is_event_stream {
        return Ok(());
    }

    let error = ChatKitError::http(
        format!("Streaming failed: {}", response.status_text),
        response.status,
        response.status_text.clone(),
    );
    if (400..500).contains(&response.status) {
        Err(Failure::Fatal(error))
    } else {
        Err(Failure::Retryable(error))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;

    fn data(messages: &[EventSourceMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.data.as_str()).collect()
    }

    #[test]
    fn test_parses_fields_and_joins_data_lines() {
        let mut parser = SseParser::new();

        let messages = parser
            .feed(b"id: 7\nevent: delta\ndata: hello\ndata: world\nretry: 1500\n\n")
            .unwrap();

        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.id.as_deref(), Some("7"));
        assert_eq!(message.event.as_deref(), Some("delta"));
        assert_eq!(message.data, "hello\nworld");
        assert_eq!(message.retry, Some(1500));
        assert_eq!(parser.last_event_id(), Some("7"));
    }

    #[test]
    fn test_chunks_split_anywhere() {
        let mut parser = SseParser::new();

        assert!(parser.feed(b"da").unwrap().is_empty());
        assert!(parser.feed(b"ta: one\r").unwrap().is_empty());
        let messages = parser.feed(b"\n\r\ndata: two\n").unwrap();
        assert_eq!(data(&messages), vec!["one"]);
        assert_eq!(data(&parser.feed(b"\n").unwrap()), vec!["two"]);
    }

    #[test]
    fn test_cr_only_line_endings() {
        let mut parser = SseParser::new();
        let messages = parser.feed(b"data: a\r\rdata: b\r\r").unwrap();
        assert_eq!(data(&messages), vec!["a", "b"]);
    }

    #[test]
    fn test_comments_and_unknown_fields_are_ignored() {
        let mut parser = SseParser::new();
        let messages = parser.feed(b": keepalive\n\nfoo: bar\n\ndata:x\n\n").unwrap();
        assert_eq!(data(&messages), vec!["x"]);
    }

    #[test]
    fn test_invalid_retry_is_ignored() {
        let mut parser = SseParser::new();
        let messages = parser.feed(b"retry: soon\ndata: x\n\n").unwrap();
        assert_eq!(messages[0].retry, None);
    }

    #[test]
    fn test_invalid_utf8_is_a_parsing_error() {
        let mut parser = SseParser::new();
        let error = parser.feed(b"data: \xff\xfe\n").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::StreamEventParsing);
        assert!(error.message().starts_with("Failed to parse stream event: "));
    }

    #[test]
    fn test_check_open_classifies_responses() {
        let ok = HttpResponse::from_bytes(200, "OK", [("content-type", "text/event-stream; charset=utf-8")], "");
        assert!(check_open(&ok).is_ok());

        let wrong_type = HttpResponse::from_bytes(200, "OK", [("content-type", "application/json")], "");
        assert!(matches!(check_open(&wrong_type), Err(Failure::Retryable(_))));

        let client = HttpResponse::from_bytes(401, "Unauthorized", [("content-type", "text/plain")], "");
        match check_open(&client) {
            Err(Failure::Fatal(error)) => {
                assert_eq!(error.kind(), ErrorKind::Http);
                assert_eq!(error.status(), Some(401));
                assert_eq!(error.message(), "Streaming failed: Unauthorized");
            }
            _ => panic!("expected fatal failure"),
        }

        let server = HttpResponse::from_bytes(503, "Service Unavailable", [("content-type", "text/plain")], "");
        assert!(matches!(check_open(&server), Err(Failure::Retryable(_))));
    }
}
