// Library resolver - in-process extraction, then a direct fetch

use async_trait::async_trait;
use rusty_ytdl::{choose_format, Video, VideoOptions, VideoQuality, VideoSearchOptions};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::debug;

use crate::downloader::commit::fetch_committed;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{CommittedStream, MediaReference, ResolverOutcome};
use crate::downloader::traits::{Resolver, ResolverConfig};

/// Best audio-only track found by an extraction library: a temporary
/// upstream URL, fetched next with browser headers.
#[derive(Debug, Clone)]
pub struct LocatedTrack {
    pub url: String,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait TrackLocator: Send + Sync {
    async fn locate(&self, video_id: &str) -> Result<LocatedTrack, DownloadError>;
}

/// `rusty_ytdl` backed locator.
pub struct RustyYtdlLocator;

impl RustyYtdlLocator {
    fn options() -> VideoOptions {
        VideoOptions {
            quality: VideoQuality::HighestAudio,
            filter: VideoSearchOptions::Audio,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TrackLocator for RustyYtdlLocator {
    async fn locate(&self, video_id: &str) -> Result<LocatedTrack, DownloadError> {
        let video = Video::new_with_options(video_id, Self::options())
            .map_err(|e| DownloadError::InvalidReference(e.to_string()))?;
        let info = video
            .get_info()
            .await
            .map_err(|e| DownloadError::from(e.to_string()))?;

        let format = choose_format(&info.formats, &Self::options())
            .map_err(|e| DownloadError::ParseError(format!("No audio format: {}", e)))?;

        debug!(
            video_id,
            title = %info.video_details.title,
            mime = %format.mime_type.mime,
            "library located audio track"
        );

        Ok(LocatedTrack {
            content_type: Some(format.mime_type.mime.to_string()),
            url: format.url,
        })
    }
}

pub struct LibraryResolver {
    locator: Arc<dyn TrackLocator>,
    client: reqwest::Client,
    config: ResolverConfig,
}

impl LibraryResolver {
    pub const LABEL: &'static str = "library";

    pub fn new(locator: Arc<dyn TrackLocator>, client: reqwest::Client, config: ResolverConfig) -> Self {
        Self {
            locator,
            client,
            config,
        }
    }

    pub fn with_rusty_ytdl(client: reqwest::Client, config: ResolverConfig) -> Self {
        Self::new(Arc::new(RustyYtdlLocator), client, config)
    }

    async fn try_resolve(&self, video_id: &str) -> Result<CommittedStream, DownloadError> {
        let located = timeout(self.config.request_timeout, self.locator.locate(video_id))
            .await
            .map_err(|_| {
                DownloadError::NetworkTimeout(format!(
                    "track lookup exceeded {}s",
                    self.config.request_timeout.as_secs()
                ))
            })??;

        let mut committed = fetch_committed(&self.client, &self.config, &located.url, Self::LABEL).await?;
        // the library knows the codec better than a CDN header
        if located.content_type.is_some() {
            committed.content_type = located.content_type;
        }
        Ok(committed)
    }
}

#[async_trait]
impl Resolver for LibraryResolver {
    fn name(&self) -> &'static str {
        Self::LABEL
    }

    async fn resolve(&self, reference: &MediaReference) -> ResolverOutcome {
        let Some(video_id) = reference.video_id() else {
            return ResolverOutcome::failed(
                Self::LABEL,
                DownloadError::InvalidReference(format!("{} is not a platform video id", reference)),
            );
        };

        match self.try_resolve(&video_id).await {
            Ok(committed) => ResolverOutcome::Committed(committed),
            Err(e) => ResolverOutcome::failed(Self::LABEL, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::test_support::serve;
    use axum::body::Body;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Plan {
        Url(String),
        Error,
    }

    struct FakeLocator {
        plan: Plan,
        calls: AtomicUsize,
    }

    impl FakeLocator {
        fn new(plan: Plan) -> Arc<Self> {
            Arc::new(Self {
                plan,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TrackLocator for FakeLocator {
        async fn locate(&self, _video_id: &str) -> Result<LocatedTrack, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.plan {
                Plan::Url(url) => Ok(LocatedTrack {
                    url: url.clone(),
                    content_type: None,
                }),
                Plan::Error => Err(DownloadError::from("Video unavailable".to_string())),
            }
        }
    }

    fn resolver(locator: Arc<FakeLocator>) -> LibraryResolver {
        let config = ResolverConfig::default();
        let client = reqwest::Client::new();
        LibraryResolver::new(locator, client, config)
    }

    async fn audio_upstream() -> String {
        let app = Router::new()
            .route(
                "/track",
                get(|headers: HeaderMap| async move {
                    // reject anything that does not look like a browser
                    let referer_ok = headers
                        .get(header::REFERER)
                        .is_some_and(|v| v == "https://www.youtube.com/");
                    let ua_ok = headers
                        .get(header::USER_AGENT)
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|ua| ua.starts_with("Mozilla/5.0"));
                    if referer_ok && ua_ok {
                        Ok(([(header::CONTENT_TYPE, "audio/webm")], "webm-bytes"))
                    } else {
                        Err(StatusCode::FORBIDDEN)
                    }
                }),
            )
            .route("/gone", get(|| async { StatusCode::NOT_FOUND }))
            // 200, chunked, zero bytes
            .route(
                "/hollow",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "audio/webm")],
                        Body::from_stream(stream::iter(Vec::<io::Result<Bytes>>::new())),
                    )
                }),
            );
        serve(app).await
    }

    fn reference() -> MediaReference {
        MediaReference::parse("https://youtu.be/dQw4w9WgXcQ").unwrap()
    }

    #[tokio::test]
    async fn test_non_platform_reference_skips_lookup() {
        let locator = FakeLocator::new(Plan::Error);
        let r = resolver(locator.clone());

        let outcome = r.resolve(&MediaReference::parse("abc123XYZ_").unwrap()).await;
        assert!(matches!(outcome, ResolverOutcome::Failed { source_label: "library", .. }));
        assert_eq!(locator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_url_track_commits_with_browser_headers() {
        let base = audio_upstream().await;
        let r = resolver(FakeLocator::new(Plan::Url(format!("{}/track", base))));

        let committed = r.resolve(&reference()).await.into_result().unwrap();
        assert_eq!(committed.content_type(), "audio/webm");
        let body: Vec<u8> = committed.source.map(|c| c.unwrap().to_vec()).concat().await;
        assert_eq!(body, b"webm-bytes".to_vec());
    }

    #[tokio::test]
    async fn test_non_2xx_fetch_fails() {
        let base = audio_upstream().await;
        let r = resolver(FakeLocator::new(Plan::Url(format!("{}/gone", base))));

        match r.resolve(&reference()).await {
            ResolverOutcome::Failed { reason, .. } => {
                assert!(matches!(reason, DownloadError::HttpStatus { status: 404, .. }))
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_chunked_body_fails() {
        let base = audio_upstream().await;
        let r = resolver(FakeLocator::new(Plan::Url(format!("{}/hollow", base))));

        match r.resolve(&reference()).await {
            ResolverOutcome::Failed { source_label, reason } => {
                assert_eq!(source_label, "library");
                assert!(matches!(reason, DownloadError::NoOutput(_)));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_library_content_type_wins_over_upstream_header() {
        struct TypedLocator(String);

        #[async_trait]
        impl TrackLocator for TypedLocator {
            async fn locate(&self, _video_id: &str) -> Result<LocatedTrack, DownloadError> {
                Ok(LocatedTrack {
                    url: self.0.clone(),
                    content_type: Some("audio/mp4".into()),
                })
            }
        }

        let base = audio_upstream().await;
        let r = LibraryResolver::new(
            Arc::new(TypedLocator(format!("{}/track", base))),
            reqwest::Client::new(),
            ResolverConfig::default(),
        );
        let committed = r.resolve(&reference()).await.into_result().unwrap();
        assert_eq!(committed.content_type(), "audio/mp4");
    }

    #[tokio::test]
    async fn test_lookup_error_fails() {
        let r = resolver(FakeLocator::new(Plan::Error));
        let outcome = r.resolve(&reference()).await;
        assert!(!outcome.is_committed());
    }
}
