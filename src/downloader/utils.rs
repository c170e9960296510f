// Helper functions shared by resolvers, metadata and the HTTP surface

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use super::errors::DownloadError;
use super::traits::ResolverConfig;

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const PLATFORM_REFERER: &str = "https://www.youtube.com/";
pub const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

lazy_static::lazy_static! {
    static ref BARE_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
    static ref VIDEO_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap();
    static ref URL_ID_RE: Regex = Regex::new(
        r"(?:youtube\.com/(?:watch\?(?:[^#]*&)?v=|shorts/|embed/|live/|v/)|youtu\.be/)([A-Za-z0-9_-]{11})"
    ).unwrap();
    static ref PROGRESS_RE: Regex = Regex::new(
        r"^\[download\]\s+(\d+\.?\d*%|Destination:|100%)|ETA\s+\S+|\(frag\s+\d+/\d+\)"
    ).unwrap();
}

/// Strip everything outside `[A-Za-z0-9_\s]`.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect()
}

/// Generic reference validity: bare id or absolute http(s) URL.
pub fn is_valid_reference(reference: &str) -> bool {
    if reference.is_empty() || reference.len() > 2048 {
        return false;
    }
    if reference
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return false;
    }
    if BARE_ID_RE.is_match(reference) {
        return true;
    }
    match reqwest::Url::parse(reference) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Bare ids become watch URLs; URLs pass through.
pub fn normalize_reference(reference: &str) -> String {
    if BARE_ID_RE.is_match(reference) {
        format!("{}{}", WATCH_URL_PREFIX, reference)
    } else {
        reference.to_string()
    }
}

/// Platform-specific id rule: an 11-character video id, bare or inside a
/// recognised watch/short/embed URL.
pub fn platform_video_id(reference: &str) -> Option<String> {
    if VIDEO_ID_RE.is_match(reference) {
        return Some(reference.to_string());
    }
    URL_ID_RE
        .captures(reference)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Anti-automation headers expected by the platform.
pub fn browser_headers(config: &ResolverConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(&config.user_agent) {
        headers.insert(USER_AGENT, ua);
    }
    if let Ok(referer) = HeaderValue::from_str(&config.referer) {
        headers.insert(REFERER, referer);
    }
    headers
}

/// Build the shared outbound client (optional proxy, connect bound).
pub fn build_http_client(config: &ResolverConfig) -> Result<reqwest::Client, DownloadError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.request_timeout)
        .user_agent(config.user_agent.clone());

    if let Some(proxy_url) = config.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| DownloadError::Request(format!("Invalid proxy {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| DownloadError::Request(format!("Failed to build HTTP client: {}", e)))
}

/// Commit evidence for an HTTP fetch: 2xx and a body that is not known to be empty.
pub fn ensure_body(response: reqwest::Response, context: &str) -> Result<reqwest::Response, DownloadError> {
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus {
            status: status.as_u16(),
            context: context.to_string(),
        });
    }
    if response.content_length() == Some(0) {
        return Err(DownloadError::NoOutput(format!("{} returned an empty body", context)));
    }
    Ok(response)
}

/// Content type declared by an HTTP response, if any.
pub fn declared_content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Routine extractor chatter that should not reach the logs.
pub fn is_progress_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || PROGRESS_RE.is_match(trimmed)
}

/// Short reason from extractor stderr: `ERROR:` / HTTP lines first, else the last line.
pub fn summarize_stderr(stderr: &str) -> String {
    let important: Vec<&str> = stderr
        .lines()
        .map(|l| l.trim())
        .filter(|s| {
            s.starts_with("ERROR:")
                || s.contains("HTTP Error")
                || s.contains("Forbidden")
                || s.contains("Requested format is not available")
        })
        .take(2)
        .collect();

    if !important.is_empty() {
        return important.join(" | ");
    }

    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no diagnostic output")
        .chars()
        .take(160)
        .collect()
}

/// Run command with timeout, capturing both pipes.
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    limit: Duration,
) -> Result<std::process::Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                DownloadError::ToolNotFound(format!("{}: {}", program, e))
            }
            _ => DownloadError::ExecutionError(format!("Failed to start {}: {}", program, e)),
        })?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program)))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(limit, child.wait()).await {
        Ok(status_res) => {
            let status = status_res
                .map_err(|e| DownloadError::ExecutionError(format!("Failed to wait for {}: {}", program, e)))?;
            let stdout = join_pipe(stdout_task, "stdout").await?;
            let stderr = join_pipe(stderr_task, "stderr").await?;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::NetworkTimeout(format!(
                "{} timed out after {}s",
                program,
                limit.as_secs()
            )))
        }
    }
}

async fn join_pipe(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
    name: &str,
) -> Result<Vec<u8>, DownloadError> {
    task.await
        .map_err(|e| DownloadError::ExecutionError(format!("{} task failed: {}", name, e)))?
        .map_err(|e| DownloadError::ExecutionError(format!("Failed to read {}: {}", name, e)))
}
