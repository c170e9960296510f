// Relay-service resolver - third-party instances that hand back a fetchable URL
//
// Endpoints are tried in list order. Any failure on one endpoint (status,
// missing URL, failed follow-up fetch) moves on to the next.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, ORIGIN, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::downloader::commit::fetch_committed;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{
    CommittedStream, MediaReference, RelayEndpoint, ResolverOutcome, DEFAULT_CONTENT_TYPE,
};
use crate::downloader::traits::{Resolver, ResolverConfig};

const RELAY_ORIGIN: &str = "https://cobalt.tools";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    url: &'a str,
    download_mode: &'static str,
    audio_format: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Per-process memory of endpoints that failed recently.
#[derive(Debug)]
pub struct EndpointQuarantine {
    window: Duration,
    failed_at: Mutex<HashMap<String, Instant>>,
}

impl EndpointQuarantine {
    /// A zero window disables quarantine.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            failed_at: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_quarantined(&self, endpoint: &RelayEndpoint) -> bool {
        if self.window.is_zero() {
            return false;
        }
        let mut failed_at = self.failed_at.lock();
        match failed_at.get(&endpoint.base_url) {
            Some(at) if at.elapsed() < self.window => true,
            Some(_) => {
                failed_at.remove(&endpoint.base_url);
                false
            }
            None => false,
        }
    }

    pub fn mark_failed(&self, endpoint: &RelayEndpoint) {
        if !self.window.is_zero() {
            self.failed_at
                .lock()
                .insert(endpoint.base_url.clone(), Instant::now());
        }
    }

    pub fn mark_healthy(&self, endpoint: &RelayEndpoint) {
        self.failed_at.lock().remove(&endpoint.base_url);
    }
}

pub struct RelayServiceResolver {
    endpoints: Vec<RelayEndpoint>,
    quarantine: Arc<EndpointQuarantine>,
    client: reqwest::Client,
    config: ResolverConfig,
}

impl RelayServiceResolver {
    pub const LABEL: &'static str = "relay-service";

    pub fn new(endpoints: Vec<RelayEndpoint>, client: reqwest::Client, config: ResolverConfig) -> Self {
        Self {
            endpoints,
            quarantine: Arc::new(EndpointQuarantine::disabled()),
            client,
            config,
        }
    }

    pub fn with_quarantine(mut self, quarantine: Arc<EndpointQuarantine>) -> Self {
        self.quarantine = quarantine;
        self
    }

    async fn try_endpoint(
        &self,
        endpoint: &RelayEndpoint,
        reference: &MediaReference,
    ) -> Result<CommittedStream, DownloadError> {
        let request = RelayRequest {
            url: reference.url(),
            download_mode: "audio",
            audio_format: "mp3",
        };

        let response = self
            .client
            .post(&endpoint.base_url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &self.config.user_agent)
            .header(ORIGIN, RELAY_ORIGIN)
            .timeout(self.config.request_timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                context: format!("relay endpoint {}", endpoint.base_url),
            });
        }

        let body: RelayResponse = response
            .json()
            .await
            .map_err(|e| DownloadError::ParseError(format!("relay response: {}", e)))?;

        let url = body.url.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
            DownloadError::ParseError(format!(
                "no download URL in relay response (status {})",
                body.status.as_deref().unwrap_or("missing")
            ))
        })?;

        info!(endpoint = %endpoint.base_url, "relay endpoint returned a download URL");

        let mut committed = fetch_committed(&self.client, &self.config, &url, Self::LABEL).await?;
        // mp3 was negotiated above
        committed.content_type = Some(DEFAULT_CONTENT_TYPE.to_string());
        Ok(committed)
    }
}

#[async_trait]
impl Resolver for RelayServiceResolver {
    fn name(&self) -> &'static str {
        Self::LABEL
    }

    async fn resolve(&self, reference: &MediaReference) -> ResolverOutcome {
        let all_quarantined = self
            .endpoints
            .iter()
            .all(|ep| self.quarantine.is_quarantined(ep));

        let mut reasons = Vec::with_capacity(self.endpoints.len());

        for endpoint in &self.endpoints {
            if !all_quarantined && self.quarantine.is_quarantined(endpoint) {
                debug!(endpoint = %endpoint.base_url, "skipping recently failed relay endpoint");
                reasons.push(format!("{}: skipped (failed recently)", endpoint.base_url));
                continue;
            }

            debug!(endpoint = %endpoint.base_url, "trying relay endpoint");
            match self.try_endpoint(endpoint, reference).await {
                Ok(committed) => {
                    self.quarantine.mark_healthy(endpoint);
                    return ResolverOutcome::Committed(committed);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint.base_url, error = %e, "relay endpoint failed");
                    self.quarantine.mark_failed(endpoint);
                    reasons.push(format!("{}: {}", endpoint.base_url, e));
                }
            }
        }

        ResolverOutcome::failed(Self::LABEL, DownloadError::EndpointsExhausted(reasons))
    }
}
