use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use foundation::{LatLon, Position, epoch_seconds, timestamp_from_epoch};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug)]
pub enum HistoryError {
    Io(std::io::Error),
    Corrupt(serde_json::Error),
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::Io(e) => write!(f, "history file error: {e}"),
            HistoryError::Corrupt(e) => write!(f, "history file corrupt: {e}"),
        }
    }
}

impl std::error::Error for HistoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HistoryError::Io(e) => Some(e),
            HistoryError::Corrupt(e) => Some(e),
        }
    }
}

/// One recorded fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Observation time, epoch seconds. Zero when unknown.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub timestamp: f64,
    #[serde(deserialize_with = "lenient_datetime")]
    pub recorded_at: DateTime<Utc>,
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

/// RFC 3339, or an ISO timestamp without offset (taken as UTC) as older
/// history files contain.
fn lenient_datetime<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(t) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("recorded_at {raw:?}: {e}")))
}

impl HistoryEntry {
    pub fn from_position(position: &Position, recorded_at: DateTime<Utc>) -> Self {
        Self {
            latitude: position.latitude(),
            longitude: position.longitude(),
            accuracy: position.accuracy_m(),
            timestamp: epoch_seconds(position.observed_at()),
            recorded_at,
        }
    }

    /// Back to a fix. Entries without a usable timestamp use `recorded_at`.
    pub fn to_position(&self) -> Position {
        let observed_at = Some(self.timestamp)
            .filter(|t| *t > 0.0)
            .and_then(timestamp_from_epoch)
            .unwrap_or(self.recorded_at);
        Position::new(LatLon::new(self.latitude, self.longitude), observed_at)
            .with_accuracy(self.accuracy)
    }
}

/// Ordered log of where the tracked vehicle has been.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationHistory {
    #[serde(alias = "airtag_name")]
    pub tracker_name: String,
    #[serde(default)]
    pub locations: Vec<HistoryEntry>,
}

impl LocationHistory {
    pub fn new(tracker_name: impl Into<String>) -> Self {
        Self {
            tracker_name: tracker_name.into(),
            locations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.locations.last()
    }

    /// Append `position` unless it is at the same coordinate as the last entry.
    ///
    /// Returns `true` when a new entry was added.
    pub fn record(&mut self, position: &Position, recorded_at: DateTime<Utc>) -> bool {
        if let Some(last) = self.locations.last() {
            if last.latitude == position.latitude() && last.longitude == position.longitude() {
                return false;
            }
        }
        self.locations
            .push(HistoryEntry::from_position(position, recorded_at));
        true
    }

    pub fn positions(&self) -> Vec<Position> {
        self.locations.iter().map(HistoryEntry::to_position).collect()
    }

    /// Load from `path`. A missing file is an empty history for `tracker_name`.
    pub async fn load(path: &Path, tracker_name: &str) -> Result<Self, HistoryError> {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => serde_json::from_str(&s).map_err(HistoryError::Corrupt),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new(tracker_name)),
            Err(e) => Err(HistoryError::Io(e)),
        }
    }

    /// Write as pretty JSON via a temp file and rename.
    pub async fn save(&self, path: &Path) -> Result<(), HistoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(HistoryError::Io)?;
        }
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(self).map_err(HistoryError::Corrupt)?;
        tokio::fs::write(&tmp, text)
            .await
            .map_err(HistoryError::Io)?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(HistoryError::Io)?;
        Ok(())
    }
}

/// File-backed history shared between the feed callback and HTTP handlers.
pub struct HistoryStore {
    path: PathBuf,
    history: Mutex<LocationHistory>,
}

impl HistoryStore {
    pub async fn open(path: impl Into<PathBuf>, tracker_name: &str) -> Result<Self, HistoryError> {
        let path = path.into();
        let history = LocationHistory::load(&path, tracker_name).await?;
        info!(
            "history {} has {} location(s)",
            path.display(),
            history.len()
        );
        Ok(Self {
            path,
            history: Mutex::new(history),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record and persist `position` if it moved. Returns whether it was new.
    pub async fn record(&self, position: &Position) -> Result<bool, HistoryError> {
        let mut history = self.history.lock().await;
        if !history.record(position, Utc::now()) {
            debug!("location unchanged since last record");
            return Ok(false);
        }
        history.save(&self.path).await?;
        info!(
            "new location recorded: {} (total {})",
            position.coord(),
            history.len()
        );
        Ok(true)
    }

    pub async fn snapshot(&self) -> LocationHistory {
        self.history.lock().await.clone()
    }
}
