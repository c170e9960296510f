// Error types for resolvers and the download endpoint

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::fmt;

use super::resolvers::diagnostics::BlockingReason;

/// User-facing message returned when every strategy failed.
pub const USER_FACING_FAILURE: &str = "Gagal memproses audio. Silakan coba lagi nanti.";

/// Why a single resolution strategy failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DownloadError {
    /// Reference failed validation
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Extractor binary missing or not runnable
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Upstream did not answer within the configured bound
    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned HTTP {status}: {context}")]
    HttpStatus { status: u16, context: String },

    /// Upstream answered with something we could not understand
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Process spawn/wait failure or non-zero exit
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Source finished without emitting a single byte
    #[error("No audio produced: {0}")]
    NoOutput(String),

    /// Every relay endpoint was tried without commit evidence
    #[error("All relay endpoints failed: {}", .0.join("; "))]
    EndpointsExhausted(Vec<String>),

    /// Transport-level request failure
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// Blocking classification of this failure, if the text gives it away.
    pub fn blocking_reason(&self) -> Option<BlockingReason> {
        match self {
            Self::InvalidReference(_) | Self::ToolNotFound(_) | Self::ParseError(_) => None,
            Self::HttpStatus { status: 403, .. } => Some(BlockingReason::Http403Forbidden),
            Self::HttpStatus { status: 429, .. } => Some(BlockingReason::RateLimited),
            Self::NetworkTimeout(_) => Some(BlockingReason::NetworkTimeout),
            other => super::resolvers::diagnostics::diagnose_error(&other.to_string()),
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::NetworkTimeout(e.to_string());
        }
        if let Some(status) = e.status() {
            return Self::HttpStatus {
                status: status.as_u16(),
                context: e.to_string(),
            };
        }
        if e.is_decode() {
            return Self::ParseError(e.to_string());
        }
        Self::Request(e.to_string())
    }
}

// Free-form extractor messages
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            return Self::NetworkTimeout(s);
        }

        // upstream "404: Not Found" must not read as a missing binary
        if lower.contains("command not found") || lower.contains("no such file or directory") {
            return Self::ToolNotFound(s);
        }

        if lower.contains("parse") || lower.contains("json") {
            return Self::ParseError(s);
        }

        if lower.contains("invalid url") || lower.contains("unsupported url") {
            return Self::InvalidReference(s);
        }

        Self::Unknown(s)
    }
}

/// One failed strategy, as recorded by the fallback chain.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub source_label: &'static str,
    pub reason: String,
    pub blocking: Option<BlockingReason>,
}

impl FailureRecord {
    pub fn new(source_label: &'static str, error: &DownloadError) -> Self {
        Self {
            source_label,
            reason: error.to_string(),
            blocking: error.blocking_reason(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.source_label, self.reason)?;
        if let Some(reason) = self.blocking {
            write!(f, " ({})", reason.description())?;
        }
        Ok(())
    }
}

/// Every resolver in the chain failed before commit. Records are in chain order.
#[derive(Debug, Clone, Default)]
pub struct ChainFailure {
    pub failures: Vec<FailureRecord>,
}

impl ChainFailure {
    pub fn labels(&self) -> Vec<&'static str> {
        self.failures.iter().map(|f| f.source_label).collect()
    }
}

impl fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no resolvers configured");
        }
        let parts: Vec<String> = self.failures.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(" | "))
    }
}

impl std::error::Error for ChainFailure {}

/// Errors surfaced by the HTTP boundary before any byte is sent.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Required query parameter absent or blank; carries what was missing
    #[error("Missing {0}")]
    MissingReference(&'static str),

    #[error("{0}")]
    InvalidReference(DownloadError),

    #[error("All strategies failed: {0}")]
    ChainExhausted(ChainFailure),

    #[error("Metadata lookup failed: {0}")]
    Metadata(DownloadError),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub error: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RelayError::MissingReference(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            RelayError::InvalidReference(_) => {
                (StatusCode::BAD_REQUEST, "Invalid video reference".to_string())
            }
            RelayError::ChainExhausted(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                USER_FACING_FAILURE.to_string(),
            ),
            RelayError::Metadata(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process URL".to_string(),
            ),
        };

        let body = ErrorBody {
            message,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
