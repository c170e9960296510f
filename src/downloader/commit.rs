// Commit policy: the single irrevocable point where a resolver's output
// becomes the response. Probing -> Committed | Failed, never revisited.

use futures::future;
use futures::stream::{self, StreamExt};
use std::io;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

use super::errors::DownloadError;
use super::models::{ByteSource, CommittedStream};
use super::traits::ResolverConfig;
use super::utils::{browser_headers, declared_content_type, ensure_body};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Probing,
    Committed,
    Failed,
}

/// Tracks commit evidence for one resolver attempt.
#[derive(Debug)]
pub struct CommitProbe {
    label: &'static str,
    limit: Duration,
    state: CommitState,
}

impl CommitProbe {
    pub fn new(label: &'static str, limit: Duration) -> Self {
        Self {
            label,
            limit,
            state: CommitState::Probing,
        }
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    fn settle<T>(&mut self, result: Result<T, DownloadError>) -> Result<T, DownloadError> {
        if self.state != CommitState::Probing {
            return Err(DownloadError::Unknown(format!(
                "{}: commit decision already taken ({:?})",
                self.label, self.state
            )));
        }
        self.state = match result {
            Ok(_) => CommitState::Committed,
            Err(_) => CommitState::Failed,
        };
        debug!(resolver = self.label, state = ?self.state, "commit decision");
        result
    }

    /// Wait (bounded) for the first non-empty chunk. On success the chunk is
    /// stitched back in front of the remaining stream.
    pub async fn await_first_byte(&mut self, mut source: ByteSource) -> Result<ByteSource, DownloadError> {
        let deadline = Instant::now() + self.limit;
        let result = loop {
            match timeout_at(deadline, source.next()).await {
                Err(_) => {
                    break Err(DownloadError::NetworkTimeout(format!(
                        "{}: no output within {}ms",
                        self.label,
                        self.limit.as_millis()
                    )))
                }
                Ok(None) => {
                    break Err(DownloadError::NoOutput(format!(
                        "{}: source ended before the first byte",
                        self.label
                    )))
                }
                Ok(Some(Err(e))) => break Err(DownloadError::ExecutionError(e.to_string())),
                Ok(Some(Ok(chunk))) if chunk.is_empty() => continue,
                Ok(Some(Ok(chunk))) => break Ok(chunk),
            }
        };

        // dropping `source` on failure tears down whatever feeds it
        let first = self.settle(result)?;
        Ok(stream::once(future::ready(Ok(first))).chain(source).boxed())
    }

}

/// GET `url` with the browser headers and commit on the first non-empty
/// chunk of a 2xx response.
///
/// The wait for headers and the wait for the first chunk are each bounded by
/// `request_timeout`; the rest of the body may take as long as the client
/// keeps reading.
pub async fn fetch_committed(
    client: &reqwest::Client,
    config: &ResolverConfig,
    url: &str,
    label: &'static str,
) -> Result<CommittedStream, DownloadError> {
    let request = client.get(url).headers(browser_headers(config));
    let response = timeout(config.request_timeout, request.send())
        .await
        .map_err(|_| {
            DownloadError::NetworkTimeout(format!(
                "{}: no response within {}s",
                label,
                config.request_timeout.as_secs()
            ))
        })??;

    let response = ensure_body(response, &format!("{} stream fetch", label))?;
    let content_type = declared_content_type(&response);

    // chunked bodies carry no length, so only a real chunk proves there is audio
    let mut probe = CommitProbe::new(label, config.request_timeout);
    let source = probe
        .await_first_byte(response.bytes_stream().map(|r| r.map_err(io::Error::other)).boxed())
        .await?;

    Ok(CommittedStream {
        source,
        content_type,
        source_label: label,
    })
}
