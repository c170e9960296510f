// Metadata fetcher - display title lookup through the platform's oEmbed API

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::errors::DownloadError;
use super::models::{MediaReference, Metadata};
use super::traits::{MetadataSource, ResolverConfig};
use super::utils::browser_headers;

pub const OEMBED_ENDPOINT: &str = "https://www.youtube.com/oembed";

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: String,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
}

pub struct OEmbedMetadataFetcher {
    client: reqwest::Client,
    config: ResolverConfig,
    endpoint: String,
}

impl OEmbedMetadataFetcher {
    pub fn new(client: reqwest::Client, config: ResolverConfig) -> Self {
        Self {
            client,
            config,
            endpoint: OEMBED_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl MetadataSource for OEmbedMetadataFetcher {
    async fn fetch(&self, reference: &MediaReference) -> Result<Metadata, DownloadError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("url", reference.url()), ("format", "json")])
            .headers(browser_headers(&self.config))
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                context: "metadata lookup".to_string(),
            });
        }

        let body: OEmbedResponse = response
            .json()
            .await
            .map_err(|e| DownloadError::ParseError(format!("oEmbed response: {}", e)))?;

        let mut metadata = Metadata::new(reference.display_id(), body.title);
        metadata.author = body.author_name;
        metadata.thumbnail = body.thumbnail_url;

        debug!(id = %metadata.id, title = %metadata.raw_title, "metadata fetched");
        Ok(metadata)
    }
}
