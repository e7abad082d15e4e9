//! Find My items cache reader.
//!
//! macOS keeps the last known location of every Find My item (AirTags included)
//! in `~/Library/Caches/com.apple.findmy.fmipcore/Items.data`. Depending on the
//! OS version the file is plain JSON or a binary property list; the latter is
//! converted with `plutil -convert json`.
//!
//! The cache is only rewritten while Find My runs, so a source can optionally
//! open the app in the background before each read and hide it again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use foundation::{LatLon, Position, timestamp_from_epoch};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::source::{BoxFuture, FeedError, PositionSource};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMyItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Option<FindMyLocation>,
    #[serde(default)]
    pub address: Option<FindMyAddress>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMyLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub horizontal_accuracy: Option<f64>,
    /// Epoch seconds or milliseconds.
    #[serde(default)]
    pub time_stamp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMyAddress {
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub administrative_area: Option<String>,
}

impl FindMyAddress {
    /// "City, State" with whichever parts are present.
    pub fn describe(&self) -> Option<String> {
        let parts: Vec<&str> = [self.locality.as_deref(), self.administrative_area.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

impl FindMyItem {
    pub fn to_position(&self) -> Result<Position, FeedError> {
        let loc = self
            .location
            .as_ref()
            .ok_or_else(|| FeedError::unavailable(format!("no location data for '{}'", self.name)))?;
        let coord = LatLon::new(loc.latitude, loc.longitude)
            .validate()
            .map_err(|e| FeedError::with_source(format!("bad location for '{}'", self.name), e))?;
        let observed_at = loc
            .time_stamp
            .filter(|t| *t > 0.0)
            .and_then(timestamp_from_epoch)
            .unwrap_or_else(Utc::now);
        Ok(Position::new(coord, observed_at).with_accuracy(loc.horizontal_accuracy))
    }
}

/// Items from a decoded cache document.
///
/// Accepts a top-level array of items, or a keyed-archiver dump whose
/// `$objects` array contains them. Entries that are not items are skipped.
pub fn parse_items(doc: Value) -> Vec<FindMyItem> {
    let list = match doc {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("$objects") {
            Some(Value::Array(objects)) => objects,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    list.into_iter()
        .filter(Value::is_object)
        .filter_map(|v| serde_json::from_value::<FindMyItem>(v).ok())
        .filter(|item| !item.name.is_empty())
        .collect()
}

/// Case-insensitive exact name match first, then containment either way.
pub fn select_item<'a>(items: &'a [FindMyItem], name: &str) -> Option<&'a FindMyItem> {
    let wanted = name.to_lowercase();
    items
        .iter()
        .find(|item| item.name.to_lowercase() == wanted)
        .or_else(|| {
            items.iter().find(|item| {
                let have = item.name.to_lowercase();
                have.contains(&wanted) || wanted.contains(&have)
            })
        })
}

/// Opens Find My in the background, waits for it to sync, then hides it.
///
/// Failures are logged and never fail the poll.
#[derive(Debug, Clone)]
pub struct FindMyRefresh {
    open: Vec<String>,
    hide: Vec<String>,
    settle: Duration,
    timeout: Duration,
}

impl FindMyRefresh {
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(settle: Duration) -> Self {
        Self {
            open: argv(&["open", "-g", "-a", "FindMy"]),
            hide: argv(&[
                "osascript",
                "-e",
                r#"tell application "System Events" to set visible of process "FindMy" to false"#,
            ]),
            settle,
            timeout: Self::COMMAND_TIMEOUT,
        }
    }

    /// Replace the open and hide commands (program followed by arguments).
    pub fn with_commands(mut self, open: Vec<String>, hide: Vec<String>) -> Self {
        self.open = open;
        self.hide = hide;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self) {
        match run_command(&self.open, self.timeout).await {
            Ok(()) => debug!("triggered Find My sync"),
            Err(e) => {
                warn!("Find My refresh failed: {e}");
                return;
            }
        }
        tokio::time::sleep(self.settle).await;
        if let Err(e) = run_command(&self.hide, self.timeout).await {
            warn!("could not hide Find My: {e}");
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

async fn run_command(argv: &[String], timeout: Duration) -> Result<(), String> {
    let (program, args) = argv.split_first().ok_or("empty command")?;
    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();
    let output = match tokio::time::timeout(timeout, child).await {
        Err(_) => return Err(format!("{program} timed out after {timeout:?}")),
        Ok(Err(e)) => return Err(format!("failed to run {program}: {e}")),
        Ok(Ok(output)) => output,
    };
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Position source backed by the local Find My cache.
pub struct FindMyCacheSource {
    label: String,
    item_name: String,
    paths: Vec<PathBuf>,
    refresh: Option<FindMyRefresh>,
}

impl FindMyCacheSource {
    pub fn new(item_name: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        let item_name = item_name.into();
        Self {
            label: format!("findmy:{item_name}"),
            item_name,
            paths,
            refresh: None,
        }
    }

    /// Refresh the cache through the Find My app before every read, waiting
    /// `settle` for it to sync.
    pub fn with_refresh(self, settle: Duration) -> Self {
        self.with_refresher(FindMyRefresh::new(settle))
    }

    pub fn with_refresher(mut self, refresh: FindMyRefresh) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Known cache locations under `$HOME`, in lookup order.
    pub fn default_cache_paths() -> Vec<PathBuf> {
        let Some(home) = std::env::var_os("HOME").map(PathBuf::from) else {
            return Vec::new();
        };
        let dir = home.join("Library/Caches/com.apple.findmy.fmipcore");
        vec![dir.join("Items.data"), dir.join("Devices.data")]
    }

    async fn find_cache_file(&self) -> Option<&Path> {
        for path in &self.paths {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Some(path.as_path());
            }
        }
        None
    }
}

impl PositionSource for FindMyCacheSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn fetch_position(&self) -> BoxFuture<'_, Result<Position, FeedError>> {
        Box::pin(async move {
            if let Some(refresh) = &self.refresh {
                refresh.run().await;
            }
            let Some(path) = self.find_cache_file().await else {
                return Err(FeedError::unavailable(format!(
                    "Find My cache not found (checked {})",
                    self.paths
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            };

            let doc = load_cache_document(path).await?;
            let items = parse_items(doc);
            debug!("{} items in {}", items.len(), path.display());

            let item = select_item(&items, &self.item_name).ok_or_else(|| {
                FeedError::unavailable(format!(
                    "no item named '{}' among {} item(s)",
                    self.item_name,
                    items.len()
                ))
            })?;
            let position = item.to_position()?;
            match item.address.as_ref().and_then(FindMyAddress::describe) {
                Some(place) => info!("{}: {} near {place}", item.name, position.coord()),
                None => info!("{}: {}", item.name, position.coord()),
            }
            Ok(position)
        })
    }
}

async fn load_cache_document(path: &Path) -> Result<Value, FeedError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| FeedError::with_source(format!("failed to read {}", path.display()), e))?;
    if let Ok(doc) = serde_json::from_slice::<Value>(&bytes) {
        return Ok(doc);
    }

    debug!("{} is not JSON, converting with plutil", path.display());
    let output = Command::new("plutil")
        .args(["-convert", "json", "-o", "-"])
        .arg(path)
        .output()
        .await
        .map_err(|e| FeedError::with_source("failed to run plutil", e))?;
    if !output.status.success() {
        return Err(FeedError::unavailable(format!(
            "plutil could not convert {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    serde_json::from_slice(&output.stdout)
        .map_err(|e| FeedError::with_source("plutil output is not JSON", e))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use foundation::LatLon;
    use serde_json::json;

    use super::{FindMyAddress, FindMyCacheSource, FindMyRefresh, argv, parse_items, select_item};
    use crate::source::PositionSource;

    fn cache_doc() -> serde_json::Value {
        json!([
            { "name": "Keys", "location": { "latitude": 1.0, "longitude": 2.0 } },
            {
                "name": "ERAUBCU LYRIQ",
                "location": {
                    "latitude": 34.05,
                    "longitude": -118.24,
                    "horizontalAccuracy": 8.0,
                    "timeStamp": 1_700_000_000_000u64
                },
                "address": { "locality": "Los Angeles", "administrativeArea": "CA" }
            },
            { "name": "LYRIQ", "location": { "latitude": 0.0, "longitude": 0.0 } },
            { "name": "Backpack" },
            "not an item"
        ])
    }

    #[test]
    fn parses_items_and_skips_junk() {
        let items = parse_items(cache_doc());
        assert_eq!(items.len(), 4);
        assert!(items[3].location.is_none());

        let archived = json!({ "$objects": [ "$null", { "name": "Tag", "location": null } ] });
        assert_eq!(parse_items(archived).len(), 1);
        assert!(parse_items(json!("nope")).is_empty());
    }

    #[test]
    fn prefers_exact_name_match() {
        let items = parse_items(cache_doc());
        assert_eq!(select_item(&items, "lyriq").unwrap().name, "LYRIQ");
        assert_eq!(select_item(&items, "eraubcu lyriq").unwrap().name, "ERAUBCU LYRIQ");
    }

    #[test]
    fn falls_back_to_partial_match() {
        let items = parse_items(cache_doc());
        assert_eq!(select_item(&items, "key").unwrap().name, "Keys");
        assert_eq!(select_item(&items, "my backpack").unwrap().name, "Backpack");
        assert!(select_item(&items, "bicycle").is_none());
    }

    #[test]
    fn converts_item_to_position() {
        let items = parse_items(cache_doc());
        let item = select_item(&items, "ERAUBCU LYRIQ").unwrap();
        let p = item.to_position().unwrap();
        assert_eq!(p.coord(), LatLon::new(34.05, -118.24));
        assert_eq!(p.accuracy_m(), Some(8.0));
        assert_eq!(p.observed_at(), Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert_eq!(
            item.address.as_ref().and_then(FindMyAddress::describe).as_deref(),
            Some("Los Angeles, CA")
        );

        let backpack = select_item(&items, "Backpack").unwrap();
        assert!(backpack.to_position().is_err());
    }

    #[tokio::test]
    async fn reads_json_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Items.data");
        tokio::fs::write(&path, serde_json::to_vec(&cache_doc()).unwrap())
            .await
            .unwrap();

        let source = FindMyCacheSource::new(
            "ERAUBCU LYRIQ",
            vec![dir.path().join("missing.data"), path],
        );
        let p = source.fetch_position().await.unwrap();
        assert_eq!(p.coord(), LatLon::new(34.05, -118.24));
    }

    async fn cache_dir() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Items.data");
        tokio::fs::write(&path, serde_json::to_vec(&cache_doc()).unwrap())
            .await
            .unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn refresh_runs_before_the_read() {
        let (dir, path) = cache_dir().await;
        let opened = dir.path().join("opened");
        let hidden = dir.path().join("hidden");
        let refresh = FindMyRefresh::new(Duration::from_millis(1)).with_commands(
            vec!["touch".into(), opened.display().to_string()],
            vec!["touch".into(), hidden.display().to_string()],
        );

        let source = FindMyCacheSource::new("ERAUBCU LYRIQ", vec![path]).with_refresher(refresh);
        let p = source.fetch_position().await.unwrap();
        assert_eq!(p.coord(), LatLon::new(34.05, -118.24));
        assert!(opened.exists());
        assert!(hidden.exists());
    }

    #[tokio::test]
    async fn failed_refresh_does_not_fail_the_poll() {
        let (_dir, path) = cache_dir().await;
        let refreshes = [
            FindMyRefresh::new(Duration::ZERO)
                .with_commands(argv(&["no-such-command-for-findmy"]), argv(&["true"])),
            FindMyRefresh::new(Duration::ZERO).with_commands(argv(&["false"]), argv(&["false"])),
            FindMyRefresh::new(Duration::ZERO)
                .with_commands(argv(&["sleep", "5"]), Vec::new())
                .with_timeout(Duration::from_millis(50)),
        ];
        for refresh in refreshes {
            let source = FindMyCacheSource::new("LYRIQ", vec![path.clone()]).with_refresher(refresh);
            let started = std::time::Instant::now();
            assert!(source.fetch_position().await.is_ok());
            assert!(started.elapsed() < Duration::from_secs(4));
        }
    }

    #[tokio::test]
    async fn missing_cache_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = FindMyCacheSource::new("tag", vec![dir.path().join("Items.data")]);
        let err = source.fetch_position().await.unwrap_err();
        assert!(err.message.starts_with("Find My cache not found"));
    }
}
