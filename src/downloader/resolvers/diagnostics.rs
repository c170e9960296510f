// Blocking diagnostics - classifies why an upstream refused us
//
// Used to annotate failure records so the aggregated error says *why*
// a strategy failed, not only that it did.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingReason {
    /// HTTP 403 Forbidden
    Http403Forbidden,

    /// 429 or explicit rate limit message
    RateLimited,

    /// Bot / captcha / sign-in-to-confirm gate
    BotDetection,

    /// Age gate requiring login
    AgeRestricted,

    /// Geographic restriction
    GeoBlocked,

    /// Private video
    PrivateVideo,

    /// Deleted, removed or otherwise gone
    VideoUnavailable,

    /// DRM / paid content
    DrmProtected,

    /// Timeout or refused connection
    NetworkTimeout,

    Unknown,
}

impl BlockingReason {
    /// Nothing another strategy can do about it
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::VideoUnavailable | Self::PrivateVideo | Self::DrmProtected
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Http403Forbidden => "Access denied (HTTP 403)",
            Self::RateLimited => "Rate limited by upstream",
            Self::BotDetection => "Bot detection triggered",
            Self::AgeRestricted => "Age-restricted content",
            Self::GeoBlocked => "Geographic restriction",
            Self::PrivateVideo => "Private video",
            Self::VideoUnavailable => "Video unavailable",
            Self::DrmProtected => "DRM-protected content",
            Self::NetworkTimeout => "Network timeout (possible IP throttling)",
            Self::Unknown => "Unknown blocking reason",
        }
    }
}

/// Classify an error message. `None` only for empty input.
pub fn diagnose_error(error: &str) -> Option<BlockingReason> {
    let lower = error.to_lowercase();

    if lower.contains("drm")
        || lower.contains("widevine")
        || lower.contains("requires purchase")
        || lower.contains("youtube premium")
    {
        return Some(BlockingReason::DrmProtected);
    }

    if lower.contains("age-restricted")
        || lower.contains("sign in to confirm your age")
        || lower.contains("age_verification")
    {
        return Some(BlockingReason::AgeRestricted);
    }

    if lower.contains("private video") || lower.contains("video is private") {
        return Some(BlockingReason::PrivateVideo);
    }

    if lower.contains("video unavailable")
        || lower.contains("video has been removed")
        || lower.contains("no longer available")
        || lower.contains("video is unavailable")
    {
        return Some(BlockingReason::VideoUnavailable);
    }

    if lower.contains("not available in your country") || lower.contains("blocked in your country") {
        return Some(BlockingReason::GeoBlocked);
    }

    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        return Some(BlockingReason::RateLimited);
    }

    if lower.contains("not a bot")
        || lower.contains("captcha")
        || lower.contains("unusual traffic")
        || lower.contains("bot detection")
    {
        return Some(BlockingReason::BotDetection);
    }

    if lower.contains("403") || lower.contains("forbidden") {
        return Some(BlockingReason::Http403Forbidden);
    }

    if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection refused")
        || lower.contains("network unreachable")
    {
        return Some(BlockingReason::NetworkTimeout);
    }

    if !error.trim().is_empty() {
        return Some(BlockingReason::Unknown);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_403_detection() {
        let error = "ERROR: unable to download video data: HTTP Error 403: Forbidden";
        assert_eq!(diagnose_error(error), Some(BlockingReason::Http403Forbidden));
    }

    #[test]
    fn test_bot_gate_detection() {
        let error = "ERROR: [youtube] dQw4w9WgXcQ: Sign in to confirm you're not a bot";
        assert_eq!(diagnose_error(error), Some(BlockingReason::BotDetection));
    }

    #[test]
    fn test_age_restricted_detection() {
        assert_eq!(
            diagnose_error("Sign in to confirm your age"),
            Some(BlockingReason::AgeRestricted)
        );
    }

    #[test]
    fn test_unavailable_is_permanent() {
        let reason = diagnose_error("ERROR: [youtube] abc: Video unavailable").unwrap();
        assert_eq!(reason, BlockingReason::VideoUnavailable);
        assert!(reason.is_permanent());
        assert!(!BlockingReason::RateLimited.is_permanent());
    }

    #[test]
    fn test_timeout_detection() {
        assert_eq!(
            diagnose_error("yt-dlp timed out after 30s"),
            Some(BlockingReason::NetworkTimeout)
        );
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(diagnose_error("weird failure"), Some(BlockingReason::Unknown));
        assert_eq!(diagnose_error("   "), None);
    }
}
