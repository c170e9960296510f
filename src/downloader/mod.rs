// Downloader module - resolution-and-relay core
//
// reference -> metadata (best effort) -> fallback chain of resolvers ->
// commit -> stream relay

pub mod commit;
pub mod errors;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod relay;
pub mod resolvers;
pub mod tools;
pub mod traits;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{ChainFailure, DownloadError, FailureRecord, RelayError};
pub use metadata::OEmbedMetadataFetcher;
pub use models::{ByteSource, CommittedStream, MediaReference, Metadata, RelayEndpoint, ResolverOutcome};
pub use orchestrator::FallbackChain;
pub use relay::relay;
pub use tools::ToolManager;
pub use traits::{MetadataSource, Resolver, ResolverConfig};
