// Common data models for the resolution pipeline

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

use super::errors::DownloadError;
use super::utils::{is_valid_reference, normalize_reference, platform_video_id, sanitize_title};

/// Owned, single-consumer audio byte stream.
pub type ByteSource = BoxStream<'static, io::Result<Bytes>>;

/// Content type used when a resolver does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";

/// A validated media reference (bare id or URL).
///
/// The only way to obtain one is [`MediaReference::parse`], so resolvers
/// never see unvalidated input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    raw: String,
    url: String,
}

impl MediaReference {
    pub fn parse(raw: &str) -> Result<Self, DownloadError> {
        let raw = raw.trim();
        if !is_valid_reference(raw) {
            return Err(DownloadError::InvalidReference(raw.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            url: normalize_reference(raw),
        })
    }

    /// Canonical watch URL handed to extractors.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Platform video id, when the reference follows platform id rules.
    pub fn video_id(&self) -> Option<String> {
        platform_video_id(&self.raw)
    }

    /// Best identifier for naming output: platform id, else the raw reference.
    pub fn display_id(&self) -> String {
        self.video_id().unwrap_or_else(|| self.raw.clone())
    }
}

impl fmt::Display for MediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Display information for a reference; only used to name the output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub raw_title: String,
    pub sanitized_title: String,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
}

impl Metadata {
    pub fn new(id: impl Into<String>, raw_title: impl Into<String>) -> Self {
        let raw_title = raw_title.into();
        Self {
            id: id.into(),
            sanitized_title: sanitize_title(&raw_title),
            raw_title,
            author: None,
            thumbnail: None,
        }
    }

    /// Suggested download filename stem; falls back to the id when
    /// sanitizing left nothing usable.
    pub fn file_stem(&self) -> &str {
        let trimmed = self.sanitized_title.trim();
        if trimmed.is_empty() {
            &self.id
        } else {
            trimmed
        }
    }
}

/// A stream that passed the commit policy.
pub struct CommittedStream {
    pub source: ByteSource,
    pub content_type: Option<String>,
    pub source_label: &'static str,
}

impl CommittedStream {
    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

impl fmt::Debug for CommittedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommittedStream")
            .field("content_type", &self.content_type)
            .field("source_label", &self.source_label)
            .finish_non_exhaustive()
    }
}

/// Result of one resolver attempt.
#[derive(Debug)]
pub enum ResolverOutcome {
    Committed(CommittedStream),
    Failed {
        reason: DownloadError,
        source_label: &'static str,
    },
    /// Process started but exited before producing a byte.
    Indeterminate {
        reason: DownloadError,
        source_label: &'static str,
    },
}

impl ResolverOutcome {
    pub fn failed(source_label: &'static str, reason: DownloadError) -> Self {
        Self::Failed {
            reason,
            source_label,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// Collapse into commit-or-failure; `Indeterminate` counts as failure.
    pub fn into_result(self) -> Result<CommittedStream, (&'static str, DownloadError)> {
        match self {
            Self::Committed(stream) => Ok(stream),
            Self::Failed {
                reason,
                source_label,
            }
            | Self::Indeterminate {
                reason,
                source_label,
            } => Err((source_label, reason)),
        }
    }
}

/// A third-party relay-service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEndpoint {
    pub base_url: String,
}

impl RelayEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Built-in instance list, in priority order.
    pub fn defaults() -> Vec<Self> {
        [
            "https://api.cobalt.tools",
            "https://cobalt-api.meowing.de",
            "https://kityune.imput.net",
            "https://blossom.imput.net",
        ]
        .into_iter()
        .map(Self::new)
        .collect()
    }
}

/// Summary returned by the reference lookup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDetails {
    pub id: String,
    pub title: String,
    pub platform: String,
    pub thumbnail: Option<String>,
    pub download_url: String,
}

impl ReferenceDetails {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            id: metadata.id.clone(),
            title: metadata.raw_title.clone(),
            platform: "YouTube".to_string(),
            thumbnail: metadata.thumbnail.clone(),
            download_url: format!("/api/download?id={}", metadata.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_reference_parse() {
        let r = MediaReference::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(r.url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(r.video_id().as_deref(), Some("dQw4w9WgXcQ"));

        let r = MediaReference::parse("abc123XYZ_").unwrap();
        assert_eq!(r.display_id(), "abc123XYZ_");

        assert!(MediaReference::parse("").is_err());
        assert!(MediaReference::parse("not a reference").is_err());
    }

    #[test]
    fn test_metadata_file_stem() {
        let m = Metadata::new("abc", "Song: Title! (Live)");
        assert_eq!(m.sanitized_title, "Song Title Live");
        assert_eq!(m.file_stem(), "Song Title Live");

        let m = Metadata::new("abc", "!!!");
        assert_eq!(m.file_stem(), "abc");
    }

    #[test]
    fn test_outcome_indeterminate_is_failure() {
        let outcome = ResolverOutcome::Indeterminate {
            reason: DownloadError::NoOutput("exit 0".into()),
            source_label: "subprocess",
        };
        assert!(!outcome.is_committed());
        match outcome.into_result() {
            Err((label, reason)) => {
                assert_eq!(label, "subprocess");
                assert!(matches!(reason, DownloadError::NoOutput(_)));
            }
            Ok(_) => panic!("indeterminate outcome must not commit"),
        }
    }

    #[test]
    fn test_default_content_type() {
        let stream = CommittedStream {
            source: futures::stream::empty().boxed(),
            content_type: None,
            source_label: "library",
        };
        assert_eq!(stream.content_type(), DEFAULT_CONTENT_TYPE);
    }
}
