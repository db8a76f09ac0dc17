// src/utils/timestamp.rs
// Unix timestamp helpers used throughout the data model (seconds) and
// transport-level freshness checks (milliseconds).

use chrono::Utc;

/// Current Unix timestamp in whole seconds.
pub fn get_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Current Unix timestamp in milliseconds.
pub fn get_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_is_roughly_seconds_times_1000() {
        let s = get_timestamp();
        let ms = get_timestamp_millis();
        assert!((ms / 1000 - s).abs() <= 1);
    }
}
