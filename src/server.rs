// Inbound HTTP surface

use axum::extract::{Query, State};
use axum::response::{Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::downloader::errors::RelayError;
use crate::downloader::models::{MediaReference, ReferenceDetails};
use crate::downloader::orchestrator::FallbackChain;
use crate::downloader::relay::relay;
use crate::downloader::traits::MetadataSource;
use crate::downloader::DownloadError;

/// Shared per-process state; immutable after startup.
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<FallbackChain>,
    pub metadata: Arc<dyn MetadataSource>,
}

impl AppState {
    pub fn new(chain: FallbackChain, metadata: Arc<dyn MetadataSource>) -> Self {
        Self {
            chain: Arc::new(chain),
            metadata,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/download", get(download))
        .route("/api/url-download", get(url_download))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UrlQuery {
    url: Option<String>,
}

fn required(value: Option<String>, what: &'static str) -> Result<String, RelayError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(RelayError::MissingReference(what))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "resolvers": state.chain.labels(),
    }))
}

/// GET /api/download?id=<reference>
async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, RelayError> {
    let raw = required(query.id, "video ID")?;
    let reference = MediaReference::parse(&raw).map_err(RelayError::InvalidReference)?;
    info!(reference = %reference, "download requested");

    // naming only; never fatal
    let metadata = match state.metadata.fetch(&reference).await {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!(reference = %reference, error = %e, "metadata unavailable, naming by id");
            None
        }
    };

    let committed = state.chain.run(&reference).await.map_err(|failure| {
        error!(reference = %reference, failure = %failure, "every resolver failed");
        RelayError::ChainExhausted(failure)
    })?;

    Ok(relay(committed, metadata.as_ref(), &reference.display_id()))
}

/// GET /api/url-download?url=<watch url>
async fn url_download(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<ReferenceDetails>, RelayError> {
    let raw = required(query.url, "URL parameter")?;
    let reference = MediaReference::parse(&raw).map_err(RelayError::InvalidReference)?;
    if reference.video_id().is_none() {
        return Err(RelayError::InvalidReference(DownloadError::InvalidReference(format!(
            "{} is not a YouTube video URL",
            reference
        ))));
    }

    let metadata = state
        .metadata
        .fetch(&reference)
        .await
        .map_err(RelayError::Metadata)?;
    Ok(Json(ReferenceDetails::from_metadata(&metadata)))
}
