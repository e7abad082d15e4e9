use chrono::{DateTime, Utc};

/// Epoch values above this are taken to be milliseconds rather than seconds.
pub const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Normalizes an epoch timestamp that may be in seconds or milliseconds to seconds.
pub fn normalize_epoch_seconds(raw: f64) -> f64 {
    if raw > EPOCH_MILLIS_THRESHOLD {
        raw / 1000.0
    } else {
        raw
    }
}

/// Converts an epoch timestamp (seconds or milliseconds) to UTC.
///
/// Returns `None` for non-finite or unrepresentable values.
pub fn timestamp_from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() {
        return None;
    }
    let secs = normalize_epoch_seconds(raw);
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

pub fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9
}

#[cfg(test)]
mod tests {
    use super::{epoch_seconds, normalize_epoch_seconds, timestamp_from_epoch};

    #[test]
    fn millisecond_timestamps_are_scaled() {
        assert_eq!(normalize_epoch_seconds(1_700_000_000_000.0), 1_700_000_000.0);
        assert_eq!(normalize_epoch_seconds(1_700_000_000.0), 1_700_000_000.0);
    }

    #[test]
    fn seconds_and_millis_agree() {
        let a = timestamp_from_epoch(1_700_000_000.5).unwrap();
        let b = timestamp_from_epoch(1_700_000_000_500.0).unwrap();
        assert_eq!(a, b);
        assert_eq!(epoch_seconds(a), 1_700_000_000.5);
    }

    #[test]
    fn rejects_non_finite() {
        assert!(timestamp_from_epoch(f64::NAN).is_none());
        assert!(timestamp_from_epoch(f64::INFINITY).is_none());
    }
}
