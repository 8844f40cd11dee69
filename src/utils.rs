//! Timestamp formatting for snapshot mtimes.
use std::fs::Metadata;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Formats a `SystemTime` into a RFC 3339 - Z format.
/// For example "2018-01-26T18:30:09.453Z"
pub fn format_system_time(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// The formatted modification time of `metadata`, falling back to the epoch
/// on platforms that do not record one.
pub fn modified_time(metadata: &Metadata) -> String {
    format_system_time(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn formats_with_millis() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_millis(1_516_991_409_453);
        assert_eq!(format_system_time(t), "2018-01-26T18:30:09.453Z");
    }
}
