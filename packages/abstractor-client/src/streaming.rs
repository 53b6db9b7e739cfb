//! SSE parser for the job progress feed.
//!
//! Converts a raw `reqwest` byte stream into `ProgressEvent` values.
//! Handles partial lines, multi-line `data:` fields and the server's
//! `close` / `error` control payloads.

use bytes::Bytes;
use futures::stream::Stream;
use reqwest::StatusCode;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::ApiError;
use crate::types::{JobSnapshot, ProgressEvent, RemoteJobStatus};

/// Stream adapter that converts raw SSE bytes into `ProgressEvent` values.
pub struct ProgressStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
    data: String,
    finished: bool,
}

impl ProgressStream {
    pub(crate) fn new(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: Vec::new(),
            data: String::new(),
            finished: false,
        }
    }
}

impl Stream for ProgressStream {
    type Item = Result<ProgressEvent, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = try_parse_event(&mut this.buffer, &mut this.data) {
                return Poll::Ready(Some(event));
            }

            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(ApiError::from_reqwest(e))));
                }
                Poll::Ready(None) => {
                    // Flush a trailing event that was not followed by a blank line
                    this.finished = true;
                    this.buffer.extend_from_slice(b"\n\n");
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Try to extract a complete SSE event from the buffer.
/// Returns `None` if no complete event is available yet.
fn try_parse_event(
    buffer: &mut Vec<u8>,
    data: &mut String,
) -> Option<Result<ProgressEvent, ApiError>> {
    loop {
        let newline_pos = buffer.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = buffer.drain(..=newline_pos).collect();
        let line = match std::str::from_utf8(&raw) {
            Ok(text) => text.trim_end_matches(['\n', '\r']),
            Err(e) => {
                return Some(Err(ApiError::invalid_body(
                    StatusCode::OK,
                    format!("invalid UTF-8 in progress stream: {}", e),
                )));
            }
        };

        // Blank line terminates an event
        if line.is_empty() {
            if data.is_empty() {
                continue;
            }
            let payload = std::mem::take(data);
            return Some(parse_payload(&payload));
        }

        if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.strip_prefix(' ').unwrap_or(value));
        }

        // Skip comments and non-data fields (e.g., "event:", "id:", "retry:")
    }
}

/// Decode one event payload.
pub(crate) fn parse_payload(payload: &str) -> Result<ProgressEvent, ApiError> {
    let value: serde_json::Value = serde_json::from_str(payload).map_err(|e| {
        ApiError::invalid_body(
            StatusCode::OK,
            format!("{} (data: {})", e, payload.chars().take(200).collect::<String>()),
        )
    })?;

    match value.get("type").and_then(|t| t.as_str()) {
        Some("close") => {
            let status = value
                .get("status")
                .cloned()
                .and_then(|s| serde_json::from_value::<RemoteJobStatus>(s).ok());
            Ok(ProgressEvent::Closed { status })
        }
        Some("error") => {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("progress stream error")
                .to_string();
            Ok(ProgressEvent::StreamError { message })
        }
        _ => {
            let snapshot: JobSnapshot = serde_json::from_value(value)
                .map_err(|e| ApiError::invalid_body(StatusCode::OK, e))?;
            let snapshot = snapshot
                .validate()
                .map_err(|e| ApiError::invalid_body(StatusCode::OK, e))?;
            Ok(ProgressEvent::Snapshot(snapshot))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepStatus;
    use futures::StreamExt;

    fn make_sse_bytes(lines: &[&str]) -> Vec<Result<Bytes, reqwest::Error>> {
        lines
            .iter()
            .map(|line| Ok(Bytes::from(format!("{}\n", line))))
            .collect()
    }

    const PROCESSING: &str = r#"data: {"job_id":"j1","status":"processing","steps":[{"id":"scrape","name":"Scraping Article","status":"processing","message":"Scraping article content...","timestamp":"2025-03-02T10:15:30"}],"result":null,"error":null,"created_at":"2025-03-02T10:15:00","updated_at":"2025-03-02T10:15:30"}"#;

    #[tokio::test]
    async fn test_parse_snapshot_then_close() {
        let data = make_sse_bytes(&[
            PROCESSING,
            "",
            r#"data: {"type": "close", "status": "completed"}"#,
            "",
        ]);

        let mut stream = ProgressStream::new(futures::stream::iter(data));

        match stream.next().await.unwrap().unwrap() {
            ProgressEvent::Snapshot(snapshot) => {
                assert_eq!(snapshot.job_id.as_str(), "j1");
                assert_eq!(snapshot.steps[0].status, StepStatus::Processing);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }

        let closed = stream.next().await.unwrap().unwrap();
        assert_eq!(
            closed,
            ProgressEvent::Closed {
                status: Some(RemoteJobStatus::Completed)
            }
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_event_split_across_chunks() {
        let (head, tail) = PROCESSING.split_at(40);
        let data: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from(head.to_string())),
            Ok(Bytes::from(format!("{}\r\n", tail))),
            Ok(Bytes::from_static(b"\r\n")),
        ];

        let mut stream = ProgressStream::new(futures::stream::iter(data));
        let event = stream.next().await.unwrap().unwrap();
        assert!(matches!(event, ProgressEvent::Snapshot(_)));
    }

    #[tokio::test]
    async fn test_error_event_and_comments() {
        let data = make_sse_bytes(&[
            ": keep-alive",
            "event: message",
            r#"data: {"type": "error", "message": "Stream error: boom"}"#,
            "",
        ]);

        let mut stream = ProgressStream::new(futures::stream::iter(data));
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(
            event,
            ProgressEvent::StreamError {
                message: "Stream error: boom".into()
            }
        );
    }

    #[tokio::test]
    async fn test_trailing_event_without_blank_line() {
        let data = make_sse_bytes(&[r#"data: {"type": "close", "status": "failed"}"#]);

        let mut stream = ProgressStream::new(futures::stream::iter(data));
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(
            event,
            ProgressEvent::Closed {
                status: Some(RemoteJobStatus::Failed)
            }
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_server_error() {
        let data = make_sse_bytes(&["data: {not json", ""]);

        let mut stream = ProgressStream::new(futures::stream::iter(data));
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ApiError::Server { status: 200, .. }));
    }
}
