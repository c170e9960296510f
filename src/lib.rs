pub mod config;
pub mod downloader;
pub mod server;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use config::ResolverKind;
use downloader::resolvers::{EndpointQuarantine, LibraryResolver, RelayServiceResolver, SubprocessResolver};
use downloader::utils::build_http_client;
use downloader::{FallbackChain, OEmbedMetadataFetcher, ToolManager};

pub use config::RelayConfig;
pub use server::{build_router, AppState};

/// Assemble the resolver chain in the configured priority order.
pub fn build_chain(config: &RelayConfig, client: &reqwest::Client) -> FallbackChain {
    let resolver_config = config.resolver_config();
    let quarantine = Arc::new(EndpointQuarantine::new(config.quarantine_window()));
    let mut chain = FallbackChain::new();

    for kind in &config.resolvers {
        match kind {
            ResolverKind::Subprocess => chain.add_resolver(Arc::new(SubprocessResolver::new(
                ToolManager::new(config.ytdlp_path.clone(), config.scratch_dir()),
                resolver_config.clone(),
            ))),
            ResolverKind::Library => chain.add_resolver(Arc::new(LibraryResolver::with_rusty_ytdl(
                client.clone(),
                resolver_config.clone(),
            ))),
            ResolverKind::RelayService => chain.add_resolver(Arc::new(
                RelayServiceResolver::new(config.endpoints(), client.clone(), resolver_config.clone())
                    .with_quarantine(quarantine.clone()),
            )),
        }
    }

    chain
}

pub async fn run(config: RelayConfig) -> Result<()> {
    let resolver_config = config.resolver_config();
    let client = build_http_client(&resolver_config).context("Failed to build HTTP client")?;

    if config.resolvers.contains(&ResolverKind::Subprocess) {
        let tool = ToolManager::new(config.ytdlp_path.clone(), config.scratch_dir())
            .get_tool_info()
            .await;
        if tool.is_available {
            info!(path = ?tool.path, version = ?tool.version, "extractor binary ready");
        } else {
            warn!("yt-dlp not found, subprocess resolver will fail over to the next strategy");
        }
    }

    let chain = build_chain(&config, &client);
    let labels = chain.labels();
    let metadata = Arc::new(OEmbedMetadataFetcher::new(client, resolver_config));
    let app = build_router(AppState::new(chain, metadata));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(addr = %config.bind, resolvers = ?labels, "audio relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_chain_follows_configured_order() {
        let config = RelayConfig::try_parse_from([
            "youtube-audio-relay",
            "--resolvers",
            "library,subprocess,relay-service",
        ])
        .unwrap();

        let chain = build_chain(&config, &reqwest::Client::new());
        assert_eq!(chain.labels(), vec!["library", "subprocess", "relay-service"]);
    }
}
