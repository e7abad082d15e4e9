use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use foundation::Position;

use crate::history::{HistoryError, LocationHistory};
use crate::source::{BoxFuture, FeedError, PositionSource};

/// Plays back recorded fixes, one per fetch, then keeps answering with the last.
pub struct ReplaySource {
    name: String,
    positions: Vec<Position>,
    cursor: AtomicUsize,
}

impl ReplaySource {
    pub fn new(name: impl Into<String>, positions: Vec<Position>) -> Self {
        Self {
            name: name.into(),
            positions,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Replay a saved location history file.
    pub async fn from_history_file(path: &Path) -> Result<Self, HistoryError> {
        let history = LocationHistory::load(path, "replay").await?;
        Ok(Self::new(
            format!("replay:{}", history.tracker_name),
            history.positions(),
        ))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn next_position(&self) -> Option<Position> {
        let last = self.positions.len().checked_sub(1)?;
        let i = self.cursor.fetch_add(1, Ordering::Relaxed).min(last);
        self.positions.get(i).cloned()
    }
}

impl PositionSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_position(&self) -> BoxFuture<'_, Result<Position, FeedError>> {
        let next = self.next_position();
        Box::pin(async move { next.ok_or_else(|| FeedError::unavailable("nothing to replay")) })
    }
}
