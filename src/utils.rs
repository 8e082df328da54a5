use chrono::{Duration, NaiveDateTime};
use std::path::PathBuf;

use crate::constants::PORTAL_TIMESTAMP_FORMAT;
use crate::error::{AppError, Result};

/// Get the price table root directory from the environment or use the default
pub fn get_output_dir() -> PathBuf {
    std::env::var("FX_DATA_OUTPUT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("output"))
}

/// Shift a portal timestamp ("20170501 090000") by a signed number of hours.
pub fn shift_timestamp(timestamp: &str, hours: i64) -> Result<String> {
    let parsed = NaiveDateTime::parse_from_str(timestamp.trim(), PORTAL_TIMESTAMP_FORMAT)
        .map_err(|e| AppError::Parse(format!("Invalid timestamp '{}': {}", timestamp, e)))?;
    let shifted = parsed + Duration::hours(hours);
    Ok(shifted.format(PORTAL_TIMESTAMP_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_timestamp_forward() {
        assert_eq!(
            shift_timestamp("20170501 090000", 13).unwrap(),
            "20170501 220000"
        );
    }

    #[test]
    fn test_shift_timestamp_round_trip() {
        let shifted = shift_timestamp("20170501 090000", 13).unwrap();
        assert_eq!(shift_timestamp(&shifted, -13).unwrap(), "20170501 090000");
    }

    #[test]
    fn test_shift_timestamp_crosses_midnight() {
        assert_eq!(
            shift_timestamp("20171231 230000", 2).unwrap(),
            "20180101 010000"
        );
    }

    #[test]
    fn test_shift_timestamp_rejects_garbage() {
        assert!(shift_timestamp("not a timestamp", 1).is_err());
    }
}
