use std::time::Duration;

use chrono::{DateTime, Utc};
use foundation::{LatLon, Position, timestamp_from_epoch};
use serde_json::Value;

use crate::source::{BoxFuture, FeedError, PositionSource};

/// Where the fields of a fix live in the JSON document, as JSON pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPointers {
    pub latitude: String,
    pub longitude: String,
    pub timestamp: Option<String>,
    pub accuracy: Option<String>,
}

impl Default for FieldPointers {
    fn default() -> Self {
        Self {
            latitude: "/latitude".to_string(),
            longitude: "/longitude".to_string(),
            timestamp: Some("/timestamp".to_string()),
            accuracy: Some("/accuracy".to_string()),
        }
    }
}

/// Polls a URL that returns the vehicle's position as JSON.
pub struct HttpJsonSource {
    name: String,
    url: String,
    fields: FieldPointers,
    client: reqwest::Client,
}

impl HttpJsonSource {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
    const MAX_BYTES: usize = 1024 * 1024;

    pub fn new(url: impl Into<String>) -> Result<Self, FeedError> {
        let url = url.into();
        let trimmed = url.trim();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(FeedError::unavailable(format!(
                "only http(s) URLs are allowed, got '{trimmed}'"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| FeedError::with_source("failed to build HTTP client", e))?;
        Ok(Self {
            name: format!("http:{trimmed}"),
            url: trimmed.to_string(),
            fields: FieldPointers::default(),
            client,
        })
    }

    pub fn with_fields(mut self, fields: FieldPointers) -> Self {
        self.fields = fields;
        self
    }
}

impl PositionSource for HttpJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_position(&self) -> BoxFuture<'_, Result<Position, FeedError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| FeedError::with_source("HTTP request failed", e))?;

            if !resp.status().is_success() {
                return Err(FeedError::unavailable(format!(
                    "upstream HTTP {}",
                    resp.status()
                )));
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| FeedError::with_source("failed to read response", e))?;
            if bytes.len() > Self::MAX_BYTES {
                return Err(FeedError::unavailable(format!(
                    "payload too large ({} bytes, max {})",
                    bytes.len(),
                    Self::MAX_BYTES
                )));
            }

            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|e| FeedError::with_source("response is not JSON", e))?;
            position_from_json(&value, &self.fields, Utc::now())
        })
    }
}

/// Extract a fix from a JSON document. A missing timestamp means `now`.
pub fn position_from_json(
    value: &Value,
    fields: &FieldPointers,
    now: DateTime<Utc>,
) -> Result<Position, FeedError> {
    let lat = number_at(value, &fields.latitude)?
        .ok_or_else(|| FeedError::unavailable(format!("missing {}", fields.latitude)))?;
    let lon = number_at(value, &fields.longitude)?
        .ok_or_else(|| FeedError::unavailable(format!("missing {}", fields.longitude)))?;
    let coord = LatLon::new(lat, lon)
        .validate()
        .map_err(|e| FeedError::with_source("invalid coordinate", e))?;

    let observed_at = match &fields.timestamp {
        Some(ptr) => timestamp_at(value, ptr)?.unwrap_or(now),
        None => now,
    };

    let accuracy = match &fields.accuracy {
        Some(ptr) => number_at(value, ptr)?,
        None => None,
    };

    Ok(Position::new(coord, observed_at).with_accuracy(accuracy))
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number_at(value: &Value, pointer: &str) -> Result<Option<f64>, FeedError> {
    match value.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| FeedError::unavailable(format!("{pointer} is not a number: '{s}'"))),
        Some(other) => Err(FeedError::unavailable(format!(
            "{pointer} is not a number: {other}"
        ))),
    }
}

/// Epoch seconds/milliseconds, numeric string, or RFC 3339.
fn timestamp_at(value: &Value, pointer: &str) -> Result<Option<DateTime<Utc>>, FeedError> {
    let invalid = || FeedError::unavailable(format!("{pointer} is not a timestamp"));
    match value.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(timestamp_from_epoch)
            .map(Some)
            .ok_or_else(invalid),
        Some(Value::String(s)) => {
            if let Ok(raw) = s.trim().parse::<f64>() {
                return timestamp_from_epoch(raw).map(Some).ok_or_else(invalid);
            }
            DateTime::parse_from_rfc3339(s.trim())
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| FeedError::with_source(format!("{pointer} is not a timestamp"), e))
        }
        Some(_) => Err(invalid()),
    }
}
