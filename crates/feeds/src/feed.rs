use std::sync::Arc;

use foundation::Position;
use parking_lot::Mutex;
use runtime::PollCadence;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::source::{FeedError, PositionSource};

/// What a subscriber is told after each poll.
#[derive(Debug)]
pub enum FeedUpdate {
    /// A newer fix than anything delivered before.
    Position(Position),
    /// The source answered but the vehicle has no newer fix; carries last-known.
    Unchanged(Position),
    /// The source could not be reached. `last_known` is what the display keeps.
    Unavailable {
        error: FeedError,
        last_known: Option<Position>,
        consecutive_failures: u32,
    },
}

/// Result of comparing a fetched fix against last-known.
#[derive(Debug)]
enum PollOutcome {
    Fresh(Position),
    Unchanged(Position),
    Failed(FeedError),
}

/// Live position feed for one vehicle.
///
/// Owns the last-known position. Fixes older than last-known are dropped so
/// consumers never see the vehicle jump backwards in time.
pub struct PositionFeed {
    source: Arc<dyn PositionSource>,
    cadence: PollCadence,
    last_known: Arc<Mutex<Option<Position>>>,
}

impl PositionFeed {
    pub fn new(source: Arc<dyn PositionSource>, cadence: PollCadence) -> Self {
        Self {
            source,
            cadence,
            last_known: Arc::new(Mutex::new(None)),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn cadence(&self) -> &PollCadence {
        &self.cadence
    }

    /// Most recent successfully fetched position, kept through outages.
    pub fn last_known(&self) -> Option<Position> {
        self.last_known.lock().clone()
    }

    /// Poll the source once.
    ///
    /// When the source reports a fix older than last-known, last-known is
    /// returned instead. On failure last-known is left untouched.
    pub async fn get_current_position(&self) -> Result<Position, FeedError> {
        match poll_once(self.source.as_ref(), &self.last_known).await {
            PollOutcome::Fresh(p) | PollOutcome::Unchanged(p) => Ok(p),
            PollOutcome::Failed(e) => Err(e),
        }
    }

    /// Poll on the feed's cadence and hand every update to `callback`, in order.
    ///
    /// The first poll happens immediately. Polling stops when the returned
    /// `Subscription` is cancelled or dropped. Must be called inside a tokio runtime.
    pub fn subscribe<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(FeedUpdate) + Send + 'static,
    {
        let source = self.source.clone();
        let last_known = self.last_known.clone();
        let mut cadence = self.cadence.clone();

        info!(
            "subscribing to {} every {:?} (backoff up to {:?})",
            source.name(),
            cadence.base(),
            cadence.max_backoff()
        );

        let handle = tokio::spawn(async move {
            loop {
                match poll_once(source.as_ref(), &last_known).await {
                    PollOutcome::Fresh(p) => {
                        cadence.record_success();
                        callback(FeedUpdate::Position(p));
                    }
                    PollOutcome::Unchanged(p) => {
                        cadence.record_success();
                        callback(FeedUpdate::Unchanged(p));
                    }
                    PollOutcome::Failed(error) => {
                        cadence.record_failure();
                        let last_known = last_known.lock().clone();
                        callback(FeedUpdate::Unavailable {
                            error,
                            last_known,
                            consecutive_failures: cadence.consecutive_failures(),
                        });
                    }
                }
                let delay = cadence.next_delay();
                debug!("next poll of {} in {delay:?}", source.name());
                tokio::time::sleep(delay).await;
            }
        });

        Subscription {
            handle: Some(handle),
        }
    }
}

async fn poll_once(source: &dyn PositionSource, last_known: &Mutex<Option<Position>>) -> PollOutcome {
    let fetched = match source.fetch_position().await {
        Ok(p) => p,
        Err(e) => {
            warn!("{}: {e}", source.name());
            return PollOutcome::Failed(e);
        }
    };

    let mut guard = last_known.lock();
    match guard.as_ref() {
        Some(prev) if fetched.is_older_than(prev) => {
            debug!(
                "{}: ignoring stale fix from {} (have {})",
                source.name(),
                fetched.observed_at(),
                prev.observed_at()
            );
            PollOutcome::Unchanged(prev.clone())
        }
        Some(prev) if fetched.same_fix(prev) => PollOutcome::Unchanged(prev.clone()),
        _ => {
            debug!("{}: new fix {}", source.name(), fetched.coord());
            *guard = Some(fetched.clone());
            PollOutcome::Fresh(fetched)
        }
    }
}

/// Handle to a running feed subscription. Dropping it stops polling.
#[derive(Debug)]
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop polling. Any in-flight poll is abandoned; nothing needs undoing.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
