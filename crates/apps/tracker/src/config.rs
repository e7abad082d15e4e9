use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use feeds::{FieldPointers, FindMyCacheSource, HttpJsonSource, PositionSource, ReplaySource};
use foundation::Waypoint;
use runtime::PollCadence;
use streaming::{OsrmRouter, RoutingService, StraightLineRouter};

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Local Find My items cache (macOS)
    Findmy,
    /// JSON document at a URL
    Http,
    /// Replay a recorded location history file
    Replay,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum RouterKind {
    /// OSRM route service
    Osrm,
    /// Straight segments between waypoints, no network
    Straight,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Live vehicle tracker: route between waypoints plus the vehicle's position")]
pub struct Args {
    /// Waypoint as "lat,lon[,label]"; repeat for each stop, in order
    #[arg(long = "waypoint", env = "TRACKER_WAYPOINTS", value_delimiter = ';', required = true)]
    pub waypoints: Vec<Waypoint>,

    /// Where positions come from
    #[arg(long, env = "TRACKER_SOURCE", value_enum, default_value_t = SourceKind::Findmy)]
    pub source: SourceKind,

    /// Find My item name (exact match preferred, partial accepted)
    #[arg(long, env = "TRACKER_ITEM", default_value = "ERAUBCU LYRIQ")]
    pub item: String,

    /// Find My cache file; repeat to try several (default: Items.data, then Devices.data)
    #[arg(long = "cache-file", env = "TRACKER_CACHE_FILES", value_delimiter = ';')]
    pub cache_files: Vec<PathBuf>,

    /// Open Find My in the background before each read so its cache is current (macOS)
    #[arg(long, env = "TRACKER_REFRESH_FINDMY")]
    pub refresh_findmy: bool,

    /// Seconds Find My is given to sync before it is hidden again
    #[arg(long, env = "TRACKER_REFRESH_SETTLE_SECS", default_value_t = 5)]
    pub refresh_settle_secs: u64,

    /// Position URL for the http source
    #[arg(long, env = "TRACKER_URL")]
    pub url: Option<String>,

    /// JSON pointer to the latitude in the http source document
    #[arg(long, env = "TRACKER_LAT_FIELD", default_value = "/latitude")]
    pub lat_field: String,

    /// JSON pointer to the longitude
    #[arg(long, env = "TRACKER_LON_FIELD", default_value = "/longitude")]
    pub lon_field: String,

    /// JSON pointer to the observation time ("" to always use the poll time)
    #[arg(long, env = "TRACKER_TIME_FIELD", default_value = "/timestamp")]
    pub time_field: String,

    /// JSON pointer to the accuracy radius in meters ("" for none)
    #[arg(long, env = "TRACKER_ACCURACY_FIELD", default_value = "/accuracy")]
    pub accuracy_field: String,

    /// History file to replay for the replay source (default: --history)
    #[arg(long, env = "TRACKER_REPLAY_FILE")]
    pub replay_file: Option<PathBuf>,

    /// Seconds between polls
    #[arg(long, env = "TRACKER_POLL_SECS", default_value_t = 300)]
    pub poll_secs: u64,

    /// Upper bound in seconds for the poll interval after repeated failures
    #[arg(long, env = "TRACKER_MAX_BACKOFF_SECS", default_value_t = 1800)]
    pub max_backoff_secs: u64,

    #[arg(long, env = "TRACKER_ROUTER", value_enum, default_value_t = RouterKind::Osrm)]
    pub router: RouterKind,

    #[arg(long, env = "TRACKER_OSRM_URL", default_value = OsrmRouter::DEFAULT_BASE_URL)]
    pub osrm_url: String,

    #[arg(long, env = "TRACKER_OSRM_PROFILE", default_value = OsrmRouter::DEFAULT_PROFILE)]
    pub osrm_profile: String,

    /// Routing request timeout in seconds
    #[arg(long, env = "TRACKER_ROUTE_TIMEOUT_SECS", default_value_t = 30)]
    pub route_timeout_secs: u64,

    /// Seconds between route retries while the route is unavailable
    #[arg(long, env = "TRACKER_ROUTE_RETRY_SECS", default_value_t = 60)]
    pub route_retry_secs: u64,

    /// Location history file
    #[arg(long, env = "TRACKER_HISTORY", default_value = "location_history.json")]
    pub history: PathBuf,

    /// Do not record location history
    #[arg(long, env = "TRACKER_NO_HISTORY")]
    pub no_history: bool,

    /// Address for the map/status HTTP endpoints
    #[arg(long, env = "TRACKER_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Poll and render without serving HTTP
    #[arg(long, env = "TRACKER_NO_SERVE")]
    pub no_serve: bool,

    /// Poll once, print the status as JSON and exit
    #[arg(long)]
    pub once: bool,
}

impl Args {
    /// Cross-field checks clap cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.waypoints.len() < 2 {
            return Err(ConfigError::new(format!(
                "at least two waypoints are required, got {}",
                self.waypoints.len()
            )));
        }
        if self.source == SourceKind::Http && self.url.is_none() {
            return Err(ConfigError::new("--url is required for the http source"));
        }
        if self.poll_secs == 0 {
            return Err(ConfigError::new("--poll-secs must be positive"));
        }
        Ok(())
    }

    pub fn cadence(&self) -> PollCadence {
        PollCadence::new(Duration::from_secs(self.poll_secs))
            .with_max_backoff(Duration::from_secs(self.max_backoff_secs))
    }

    pub fn route_retry(&self) -> Duration {
        Duration::from_secs(self.route_retry_secs.max(1))
    }

    /// Sync time for the Find My refresh, when enabled.
    pub fn findmy_refresh(&self) -> Option<Duration> {
        self.refresh_findmy
            .then(|| Duration::from_secs(self.refresh_settle_secs))
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        (!self.no_history).then(|| self.history.clone())
    }

    pub fn field_pointers(&self) -> FieldPointers {
        let optional = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
        FieldPointers {
            latitude: self.lat_field.trim().to_string(),
            longitude: self.lon_field.trim().to_string(),
            timestamp: optional(&self.time_field),
            accuracy: optional(&self.accuracy_field),
        }
    }

    pub async fn build_source(&self) -> Result<Arc<dyn PositionSource>, ConfigError> {
        match self.source {
            SourceKind::Findmy => {
                let paths = if self.cache_files.is_empty() {
                    FindMyCacheSource::default_cache_paths()
                } else {
                    self.cache_files.clone()
                };
                if paths.is_empty() {
                    return Err(ConfigError::new(
                        "no Find My cache path: set HOME or pass --cache-file",
                    ));
                }
                let mut source = FindMyCacheSource::new(self.item.clone(), paths);
                if let Some(settle) = self.findmy_refresh() {
                    source = source.with_refresh(settle);
                }
                Ok(Arc::new(source))
            }
            SourceKind::Http => {
                let url = self
                    .url
                    .as_deref()
                    .ok_or_else(|| ConfigError::new("--url is required for the http source"))?;
                let source = HttpJsonSource::new(url)
                    .map_err(|e| ConfigError::with_source("invalid http source", e))?
                    .with_fields(self.field_pointers());
                Ok(Arc::new(source))
            }
            SourceKind::Replay => {
                let path = self.replay_file.as_ref().unwrap_or(&self.history);
                let source = ReplaySource::from_history_file(path)
                    .await
                    .map_err(|e| {
                        ConfigError::with_source(format!("cannot replay {}", path.display()), e)
                    })?;
                if source.is_empty() {
                    return Err(ConfigError::new(format!(
                        "{} has no locations to replay",
                        path.display()
                    )));
                }
                Ok(Arc::new(source))
            }
        }
    }

    pub fn build_router(&self) -> Result<Arc<dyn RoutingService>, ConfigError> {
        match self.router {
            RouterKind::Straight => Ok(Arc::new(StraightLineRouter)),
            RouterKind::Osrm => {
                let timeout = Duration::from_secs(self.route_timeout_secs.max(1));
                let router = OsrmRouter::with_timeout(self.osrm_url.clone(), timeout)
                    .map_err(|e| ConfigError::with_source("invalid OSRM router", e))?
                    .with_profile(self.osrm_profile.clone());
                Ok(Arc::new(router))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use foundation::LatLon;
    use pretty_assertions::assert_eq;

    use super::{Args, RouterKind, SourceKind};

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "tracker",
            "--waypoint",
            "34.05,-118.24,Los Angeles",
            "--waypoint",
            "33.95,-117.40",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_the_daemon() {
        let args = parse(&[]);
        assert_eq!(args.waypoints.len(), 2);
        assert_eq!(args.waypoints[0].coord(), LatLon::new(34.05, -118.24));
        assert_eq!(args.waypoints[0].label(), Some("Los Angeles"));
        assert_eq!(args.source, SourceKind::Findmy);
        assert_eq!(args.router, RouterKind::Osrm);
        assert_eq!(args.poll_secs, 300);
        assert_eq!(args.cadence().base(), Duration::from_secs(300));
        assert_eq!(args.osrm_url, "https://router.project-osrm.org");
        assert_eq!(
            args.history_path().unwrap().to_str(),
            Some("location_history.json")
        );
        args.validate().unwrap();
    }

    #[test]
    fn rejects_bad_waypoints() {
        assert!(Args::try_parse_from(["tracker", "--waypoint", "north,south"]).is_err());
        assert!(Args::try_parse_from(["tracker", "--waypoint", "91,0"]).is_err());

        let one = Args::try_parse_from(["tracker", "--waypoint", "1,2"]).unwrap();
        assert!(one.validate().is_err());
    }

    #[test]
    fn http_source_needs_url() {
        let args = parse(&["--source", "http"]);
        assert!(args.validate().is_err());

        let args = parse(&[
            "--source",
            "http",
            "--url",
            "https://example.com/pos",
            "--time-field",
            "",
        ]);
        args.validate().unwrap();
        let fields = args.field_pointers();
        assert_eq!(fields.timestamp, None);
        assert_eq!(fields.accuracy.as_deref(), Some("/accuracy"));
    }

    #[tokio::test]
    async fn findmy_refresh_is_opt_in() {
        assert_eq!(parse(&[]).findmy_refresh(), None);

        let args = parse(&[
            "--refresh-findmy",
            "--refresh-settle-secs",
            "8",
            "--cache-file",
            "/tmp/Items.data",
        ]);
        assert_eq!(args.findmy_refresh(), Some(Duration::from_secs(8)));
        let source = args.build_source().await.unwrap();
        assert_eq!(source.name(), "findmy:ERAUBCU LYRIQ");
    }

    #[test]
    fn no_history_disables_recording() {
        assert!(parse(&["--no-history"]).history_path().is_none());
    }

    #[tokio::test]
    async fn builds_straight_router_and_replay_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.json");
        tokio::fs::write(
            &path,
            r#"{"airtag_name":"LYRIQ","locations":[{"latitude":34.0,"longitude":-118.0,"accuracy":5.0,"timestamp":1700000000.0,"recorded_at":"2024-01-01T00:00:00Z"}]}"#,
        )
        .await
        .unwrap();

        let args = parse(&[
            "--router",
            "straight",
            "--source",
            "replay",
            "--replay-file",
            path.to_str().unwrap(),
        ]);
        assert_eq!(args.build_router().unwrap().name(), "straight-line");
        let source = args.build_source().await.unwrap();
        assert_eq!(source.name(), "replay:LYRIQ");

        let missing = parse(&[
            "--source",
            "replay",
            "--replay-file",
            dir.path().join("none.json").to_str().unwrap(),
        ]);
        assert!(missing.build_source().await.is_err());
    }
}
