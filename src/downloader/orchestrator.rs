// Fallback chain: runs resolvers strictly in priority order until one commits

use std::sync::Arc;
use tracing::{info, warn};

use super::errors::{ChainFailure, FailureRecord};
use super::models::{CommittedStream, MediaReference};
use super::traits::Resolver;

pub struct FallbackChain {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    pub fn add_resolver(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolvers.push(resolver);
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.add_resolver(resolver);
        self
    }

    /// Resolver labels in priority order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Run the chain. Sequential on purpose: at most one subprocess or
    /// upstream connection is alive per request.
    pub async fn run(&self, reference: &MediaReference) -> Result<CommittedStream, ChainFailure> {
        let mut failure = ChainFailure::default();

        for (idx, resolver) in self.resolvers.iter().enumerate() {
            info!(
                resolver = resolver.name(),
                attempt = idx + 1,
                total = self.resolvers.len(),
                reference = %reference,
                "trying resolver"
            );

            match resolver.resolve(reference).await.into_result() {
                Ok(stream) => {
                    info!(resolver = stream.source_label, reference = %reference, "resolver committed");
                    return Ok(stream);
                }
                Err((label, reason)) => {
                    let record = FailureRecord::new(label, &reason);
                    warn!(
                        resolver = label,
                        reason = %record.reason,
                        permanent = record.blocking.is_some_and(|b| b.is_permanent()),
                        "resolver failed"
                    );
                    failure.failures.push(record);
                }
            }
        }

        Err(failure)
    }
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::errors::DownloadError;
    use crate::downloader::models::ResolverOutcome;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Commit,
        Fail,
        Silent,
    }

    struct FakeResolver {
        label: &'static str,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeResolver {
        fn new(label: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                label,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn resolve(&self, _reference: &MediaReference) -> ResolverOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Commit => ResolverOutcome::Committed(CommittedStream {
                    source: stream::iter(vec![Ok(Bytes::from_static(b"audio"))]).boxed(),
                    content_type: None,
                    source_label: self.label,
                }),
                Behaviour::Fail => ResolverOutcome::failed(
                    self.label,
                    DownloadError::ExecutionError(format!("{} broke", self.label)),
                ),
                Behaviour::Silent => ResolverOutcome::Indeterminate {
                    reason: DownloadError::NoOutput("exit 0".into()),
                    source_label: self.label,
                },
            }
        }
    }

    fn reference() -> MediaReference {
        MediaReference::parse("abc123XYZ_").unwrap()
    }

    #[tokio::test]
    async fn test_short_circuits_after_commit() {
        let first = FakeResolver::new("first", Behaviour::Fail);
        let second = FakeResolver::new("second", Behaviour::Commit);
        let third = FakeResolver::new("third", Behaviour::Commit);

        let chain = FallbackChain::new()
            .with_resolver(first.clone())
            .with_resolver(second.clone())
            .with_resolver(third.clone());

        let committed = chain.run(&reference()).await.unwrap();
        assert_eq!(committed.source_label, "second");
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(third.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_records_one_reason_per_resolver_in_order() {
        let chain = FallbackChain::new()
            .with_resolver(FakeResolver::new("subprocess", Behaviour::Silent))
            .with_resolver(FakeResolver::new("library", Behaviour::Fail))
            .with_resolver(FakeResolver::new("relay-service", Behaviour::Fail));

        let failure = chain.run(&reference()).await.unwrap_err();
        assert_eq!(failure.labels(), vec!["subprocess", "library", "relay-service"]);
        assert!(failure.failures[1].reason.contains("library broke"));
    }

    #[tokio::test]
    async fn test_indeterminate_is_not_committed() {
        let silent = FakeResolver::new("subprocess", Behaviour::Silent);
        let chain = FallbackChain::new().with_resolver(silent.clone());

        let failure = chain.run(&reference()).await.unwrap_err();
        assert_eq!(failure.failures.len(), 1);
        assert!(failure.failures[0].reason.contains("No audio produced"));
    }

    #[tokio::test]
    async fn test_empty_chain_fails() {
        let chain = FallbackChain::new();
        assert!(chain.is_empty());
        let failure = chain.run(&reference()).await.unwrap_err();
        assert!(failure.failures.is_empty());
    }
}
