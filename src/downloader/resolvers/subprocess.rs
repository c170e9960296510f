// Subprocess resolver - pipes the local extractor binary's stdout
//
// The child is owned by the byte stream. Dropping the stream (client gone,
// commit timeout, failed probe) kills the process.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::downloader::commit::CommitProbe;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{ByteSource, CommittedStream, MediaReference, ResolverOutcome};
use crate::downloader::tools::ToolManager;
use crate::downloader::traits::{Resolver, ResolverConfig};
use crate::downloader::utils::{is_progress_line, summarize_stderr};

const STDERR_TAIL_LINES: usize = 20;

type StderrTail = Arc<Mutex<VecDeque<String>>>;

pub struct SubprocessResolver {
    tools: ToolManager,
    config: ResolverConfig,
}

impl SubprocessResolver {
    pub const LABEL: &'static str = "subprocess";

    pub fn new(tools: ToolManager, config: ResolverConfig) -> Self {
        Self { tools, config }
    }

    /// Best audio to stdout, nothing written to disk.
    fn build_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            "bestaudio".to_string(),
            "-o".to_string(),
            "-".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-check-certificates".to_string(),
            "--add-header".to_string(),
            format!("referer:{}", self.config.referer),
            "--add-header".to_string(),
            format!("user-agent:{}", self.config.user_agent),
            "--socket-timeout".to_string(),
            self.config.request_timeout.as_secs().max(1).to_string(),
        ];

        if let Some(proxy) = &self.config.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(url.to_string());
        args
    }

    fn spawn(&self, program: &Path, url: &str) -> Result<(ByteSource, StderrTail), DownloadError> {
        let args = self.build_args(url);
        debug!(program = %program.display(), args = %args.join(" "), "spawning extractor");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    DownloadError::ToolNotFound(format!("{}: {}", program.display(), e))
                }
                _ => DownloadError::ExecutionError(format!("Failed to start extractor: {}", e)),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::ExecutionError("Failed to capture extractor stdout".to_string()))?;

        let tail: StderrTail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if is_progress_line(&line) {
                        continue;
                    }
                    if line.trim_start().starts_with("ERROR:") {
                        warn!(resolver = Self::LABEL, "{}", line.trim());
                    } else {
                        debug!(resolver = Self::LABEL, "{}", line.trim());
                    }
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        let state = ProcessStream {
            child,
            stdout: ReaderStream::with_capacity(stdout, self.config.chunk_size),
            stderr_task,
            tail: tail.clone(),
        };

        Ok((process_stream(state), tail))
    }
}

struct ProcessStream {
    child: Child,
    stdout: ReaderStream<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    tail: StderrTail,
}

fn tail_summary(tail: &StderrTail) -> String {
    let lines: Vec<String> = tail.lock().iter().cloned().collect();
    summarize_stderr(&lines.join("\n"))
}

/// Stdout chunks, then the exit status: a non-zero exit becomes a final
/// `io::Error` item so the consumer never mistakes it for a clean end.
fn process_stream(state: ProcessStream) -> ByteSource {
    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        match state.stdout.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), Some(state))),
            Some(Err(e)) => Some((Err(e), None)),
            None => {
                let status = state.child.wait().await;
                if let Some(task) = state.stderr_task.take() {
                    let _ = task.await;
                }
                match status {
                    Ok(status) if status.success() => None,
                    Ok(status) => {
                        let summary = tail_summary(&state.tail);
                        Some((
                            Err(io::Error::other(format!("extractor exited with {}: {}", status, summary))),
                            None,
                        ))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl Resolver for SubprocessResolver {
    fn name(&self) -> &'static str {
        Self::LABEL
    }

    async fn resolve(&self, reference: &MediaReference) -> ResolverOutcome {
        // metadata, chmod and copy are blocking filesystem calls
        let program = match self.tools.prepare_blocking().await {
            Ok(path) => path,
            Err(e) => return ResolverOutcome::failed(Self::LABEL, e),
        };

        let (source, tail) = match self.spawn(&program, reference.url()) {
            Ok(spawned) => spawned,
            Err(e) => return ResolverOutcome::failed(Self::LABEL, e),
        };

        let mut probe = CommitProbe::new(Self::LABEL, self.config.first_byte_timeout);
        match probe.await_first_byte(source).await {
            Ok(source) => ResolverOutcome::Committed(CommittedStream {
                source,
                content_type: None,
                source_label: Self::LABEL,
            }),
            Err(DownloadError::NoOutput(_)) => ResolverOutcome::Indeterminate {
                reason: DownloadError::NoOutput(format!(
                    "extractor exited cleanly without output ({})",
                    tail_summary(&tail)
                )),
                source_label: Self::LABEL,
            },
            Err(DownloadError::ExecutionError(msg)) => {
                // prefer a classified reason when stderr names one
                let reason = match DownloadError::from(msg) {
                    DownloadError::Unknown(msg) => DownloadError::ExecutionError(msg),
                    classified => classified,
                };
                ResolverOutcome::failed(Self::LABEL, reason)
            }
            Err(e) => ResolverOutcome::failed(Self::LABEL, e),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn resolver(dir: &Path, body: &str, first_byte: Duration) -> SubprocessResolver {
        let bin = script(dir, body);
        SubprocessResolver::new(
            ToolManager::new(Some(bin), dir.join("scratch")),
            ResolverConfig::default().with_first_byte_timeout(first_byte),
        )
    }

    fn reference() -> MediaReference {
        MediaReference::parse("dQw4w9WgXcQ").unwrap()
    }

    #[test]
    fn test_args_request_audio_on_stdout() {
        let r = SubprocessResolver::new(
            ToolManager::new(None, PathBuf::from("/tmp")),
            ResolverConfig::default().with_proxy(Some("socks5://127.0.0.1:1080".into())),
        );
        let args = r.build_args("https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(&args[..4], &["-f", "bestaudio", "-o", "-"]);
        assert!(args.windows(2).any(|w| w[0] == "--proxy" && w[1] == "socks5://127.0.0.1:1080"));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn test_output_commits() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path(), "printf 'ID3audio'", Duration::from_secs(5));

        let committed = r.resolve(&reference()).await.into_result().unwrap();
        assert_eq!(committed.source_label, "subprocess");
        let body: Vec<u8> = committed
            .source
            .map(|c| c.unwrap().to_vec())
            .concat()
            .await;
        assert_eq!(body, b"ID3audio".to_vec());
    }

    #[tokio::test]
    async fn test_clean_exit_without_bytes_is_indeterminate() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path(), "exit 0", Duration::from_secs(5));

        let outcome = r.resolve(&reference()).await;
        assert!(matches!(outcome, ResolverOutcome::Indeterminate { .. }));
        assert!(!outcome.is_committed());
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(
            dir.path(),
            "echo 'ERROR: [youtube] dQw4w9WgXcQ: Video unavailable' >&2\nexit 1",
            Duration::from_secs(5),
        );

        match r.resolve(&reference()).await {
            ResolverOutcome::Failed { reason, source_label } => {
                assert_eq!(source_label, "subprocess");
                assert!(reason.to_string().contains("Video unavailable"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_fails_immediately() {
        let r = SubprocessResolver::new(
            ToolManager::new(Some(PathBuf::from("/nonexistent/yt-dlp")), PathBuf::from("/tmp")),
            ResolverConfig::default(),
        );
        match r.resolve(&reference()).await {
            ResolverOutcome::Failed { reason, .. } => {
                assert!(matches!(reason, DownloadError::ToolNotFound(_)))
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hung_process_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(dir.path(), "exec sleep 30", Duration::from_millis(200));

        match r.resolve(&reference()).await {
            ResolverOutcome::Failed { reason, .. } => {
                assert!(matches!(reason, DownloadError::NetworkTimeout(_)))
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_after_output_surfaces_as_stream_error() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver(
            dir.path(),
            "printf 'partial'\necho 'ERROR: HTTP Error 403: Forbidden' >&2\nexit 1",
            Duration::from_secs(5),
        );

        let committed = r.resolve(&reference()).await.into_result().unwrap();
        let items: Vec<io::Result<bytes::Bytes>> = committed.source.collect().await;
        assert!(items.first().unwrap().is_ok());
        let last = items.last().unwrap().as_ref().unwrap_err();
        assert!(last.to_string().contains("403"));
    }
}
