// Stream relay - committed byte source to outbound response
//
// The source is polled only when the transport asks for more, so at most
// one chunk is held in memory at a time. When the client goes away hyper
// drops the body, which drops the source and with it the child process
// or upstream connection.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tracing::{error, info};

use super::models::{ByteSource, CommittedStream, Metadata, DEFAULT_CONTENT_TYPE};

/// Bookkeeping for one relayed stream; logs an early drop.
struct RelayTracker {
    source_label: &'static str,
    bytes: u64,
    started: Instant,
    finished: bool,
}

impl RelayTracker {
    fn new(source_label: &'static str) -> Self {
        Self {
            source_label,
            bytes: 0,
            started: Instant::now(),
            finished: false,
        }
    }
}

impl Drop for RelayTracker {
    fn drop(&mut self) {
        if !self.finished {
            info!(
                resolver = self.source_label,
                bytes = self.bytes,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "client went away, source released"
            );
        }
    }
}

/// `"<stem>.mp3"` from metadata, else from the reference id.
pub fn attachment_filename(metadata: Option<&Metadata>, fallback_id: &str) -> String {
    let stem = metadata
        .map(|m| m.file_stem().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            fallback_id
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .collect()
        });

    if stem.is_empty() {
        "audio.mp3".to_string()
    } else {
        format!("{}.mp3", stem)
    }
}

fn monitor(source: ByteSource, source_label: &'static str) -> ByteSource {
    let tracker = RelayTracker::new(source_label);
    stream::unfold(Some((source, tracker)), |state| async move {
        let (mut source, mut tracker) = state?;
        match source.next().await {
            Some(Ok(chunk)) => {
                tracker.bytes += chunk.len() as u64;
                Some((Ok(chunk), Some((source, tracker))))
            }
            Some(Err(e)) => {
                tracker.finished = true;
                // headers are gone already; the only signal left is aborting the body
                error!(
                    resolver = tracker.source_label,
                    bytes = tracker.bytes,
                    error = %e,
                    "stream failed after commit, aborting response"
                );
                Some((Err(e), None))
            }
            None => {
                tracker.finished = true;
                info!(
                    resolver = tracker.source_label,
                    bytes = tracker.bytes,
                    elapsed_ms = tracker.started.elapsed().as_millis() as u64,
                    "relay complete"
                );
                None
            }
        }
    })
    .boxed()
}

/// Turn the committed stream into the outbound response.
pub fn relay(committed: CommittedStream, metadata: Option<&Metadata>, fallback_id: &str) -> Response {
    let content_type = HeaderValue::from_str(committed.content_type())
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let filename = attachment_filename(metadata, fallback_id);
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"audio.mp3\""));

    info!(
        resolver = committed.source_label,
        content_type = ?content_type,
        filename = %filename,
        "relaying committed stream"
    );

    let body = Body::from_stream(monitor(committed.source, committed.source_label));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CACHE_CONTROL, "no-store")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
