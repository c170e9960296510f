// Resolver and metadata traits plus their shared configuration

use async_trait::async_trait;
use std::time::Duration;

use super::errors::DownloadError;
use super::models::{MediaReference, Metadata, ResolverOutcome};
use super::utils::{BROWSER_USER_AGENT, PLATFORM_REFERER};

/// Settings shared by every resolver and the metadata fetcher.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Bound for every outbound HTTP call
    pub request_timeout: Duration,
    /// Bound for the subprocess first-byte wait
    pub first_byte_timeout: Duration,
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Read size for subprocess stdout chunks
    pub chunk_size: usize,
    pub user_agent: String,
    pub referer: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            first_byte_timeout: Duration::from_secs(20),
            proxy: None,
            chunk_size: 64 * 1024,
            user_agent: BROWSER_USER_AGENT.to_string(),
            referer: PLATFORM_REFERER.to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_first_byte_timeout(mut self, timeout: Duration) -> Self {
        self.first_byte_timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

/// One independent strategy for turning a reference into audio bytes.
///
/// Implementations must decide commit-or-fail before returning: a
/// `Committed` outcome carries a stream with evidence of life.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Label used in logs and failure records
    fn name(&self) -> &'static str;

    async fn resolve(&self, reference: &MediaReference) -> ResolverOutcome;
}

/// Best-effort display metadata lookup.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, reference: &MediaReference) -> Result<Metadata, DownloadError>;
}
