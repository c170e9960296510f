// Command-line / environment configuration

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::downloader::models::RelayEndpoint;
use crate::downloader::tools::ToolManager;
use crate::downloader::traits::ResolverConfig;

/// Resolution strategies that can be placed in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ResolverKind {
    /// Local yt-dlp binary
    Subprocess,
    /// In-process rusty_ytdl extraction
    Library,
    /// Third-party relay instances
    RelayService,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "youtube-audio-relay")]
#[command(about = "Relays YouTube audio through a chain of fallback resolvers")]
#[command(version)]
pub struct RelayConfig {
    /// Address to listen on
    #[arg(long, env = "RELAY_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Explicit yt-dlp binary (auto-detected when unset)
    #[arg(long, env = "YTDLP_PATH")]
    pub ytdlp_path: Option<PathBuf>,

    /// Writable directory for staging the extractor binary
    #[arg(long, env = "RELAY_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Resolver chain, in priority order
    #[arg(
        long,
        env = "RELAY_RESOLVERS",
        value_enum,
        value_delimiter = ',',
        default_values_t = [ResolverKind::Subprocess, ResolverKind::Library, ResolverKind::RelayService]
    )]
    pub resolvers: Vec<ResolverKind>,

    /// Relay-service base URLs, in priority order (built-in list when empty)
    #[arg(long, env = "RELAY_ENDPOINTS", value_delimiter = ',')]
    pub relay_endpoints: Vec<String>,

    /// Max wait for the extractor's first byte
    #[arg(long, env = "RELAY_FIRST_BYTE_TIMEOUT", default_value_t = 20)]
    pub first_byte_timeout_secs: u64,

    /// Bound for every outbound HTTP call
    #[arg(long, env = "RELAY_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// How long a failed relay endpoint is skipped (0 disables)
    #[arg(long, env = "RELAY_ENDPOINT_QUARANTINE", default_value_t = 60)]
    pub endpoint_quarantine_secs: u64,

    /// SOCKS5/HTTP proxy for outbound traffic
    #[arg(long, env = "RELAY_PROXY")]
    pub proxy: Option<String>,

    /// Read size for extractor stdout
    #[arg(long, env = "RELAY_CHUNK_SIZE", default_value_t = 64 * 1024)]
    pub chunk_size: usize,
}

impl RelayConfig {
    pub fn resolver_config(&self) -> ResolverConfig {
        // a zero bound would fail every attempt instantly
        ResolverConfig::default()
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs.max(1)))
            .with_first_byte_timeout(Duration::from_secs(self.first_byte_timeout_secs.max(1)))
            .with_proxy(self.proxy.clone().filter(|p| !p.trim().is_empty()))
            .with_chunk_size(self.chunk_size)
    }

    pub fn endpoints(&self) -> Vec<RelayEndpoint> {
        let configured: Vec<RelayEndpoint> = self
            .relay_endpoints
            .iter()
            .map(|e| e.trim().trim_end_matches('/'))
            .filter(|e| !e.is_empty())
            .map(RelayEndpoint::new)
            .collect();

        if configured.is_empty() {
            RelayEndpoint::defaults()
        } else {
            configured
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(ToolManager::default_scratch_dir)
    }

    pub fn quarantine_window(&self) -> Duration {
        Duration::from_secs(self.endpoint_quarantine_secs)
    }
}
