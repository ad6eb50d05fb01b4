use chrono::SecondsFormat;

pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// RFC 3339 text for `millis` after the Unix epoch.
pub fn timestamp_from_millis(millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::{timestamp, timestamp_from_millis};

    #[test]
    fn formats_with_millisecond_precision() {
        assert_eq!(timestamp_from_millis(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(timestamp_from_millis(1_250), "1970-01-01T00:00:01.250Z");
        assert!(timestamp().ends_with('Z'));
    }
}
