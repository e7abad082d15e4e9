//! Position source abstraction.
//!
//! A `PositionSource` answers "where is the vehicle now?" once per call.
//! Implementations:
//! - `HttpJsonSource`: JSON document at a URL
//! - `FindMyCacheSource`: the local Find My items cache
//! - `ReplaySource`: a recorded location history, one entry per poll
//!
//! New sources can be added by implementing the trait.

use std::future::Future;
use std::pin::Pin;

use foundation::Position;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The position source could not produce a fix.
///
/// Always recoverable: the feed keeps the last-known position and polls again.
#[derive(Debug)]
pub struct FeedError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "feed unavailable: {}", self.message)?;
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl FeedError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Trait for live position providers.
///
/// Implementations must be `Send + Sync` for use across async tasks.
pub trait PositionSource: Send + Sync {
    /// Human-readable source name for logs.
    fn name(&self) -> &str;

    /// Fetch the current fix.
    fn fetch_position(&self) -> BoxFuture<'_, Result<Position, FeedError>>;
}

#[cfg(test)]
mod tests {
    use super::FeedError;

    #[test]
    fn display_mentions_unavailability() {
        let e = FeedError::unavailable("cache not found");
        assert_eq!(e.to_string(), "feed unavailable: cache not found");

        let e = FeedError::with_source("read failed", std::io::Error::other("denied"));
        assert_eq!(e.to_string(), "feed unavailable: read failed (denied)");
    }
}
