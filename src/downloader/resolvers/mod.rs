// Resolver strategies, in default chain priority:
// - subprocess: local yt-dlp binary, stdout piped through
// - library: in-process rusty_ytdl lookup plus a direct fetch
// - relay-service: third-party relay instances returning a download URL

pub mod diagnostics;
pub mod library;
pub mod relay_service;
pub mod subprocess;

pub use diagnostics::{diagnose_error, BlockingReason};
pub use library::{LibraryResolver, LocatedTrack, RustyYtdlLocator, TrackLocator};
pub use relay_service::{EndpointQuarantine, RelayServiceResolver};
pub use subprocess::SubprocessResolver;
