use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A single 1-minute OHLC bar as stored in the price table.
///
/// Timestamps are naive by contract: the portal publishes exchange-local
/// time with no zone attached. Volume is dropped on ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Bar timestamp (naive exchange time)
    pub time: NaiveDateTime,

    /// Opening price
    pub open: f64,

    /// Highest price
    pub high: f64,

    /// Lowest price
    pub low: f64,

    /// Closing price
    pub close: f64,

    /// Currency pair code, uppercase (e.g. "EURUSD")
    pub pair: String,

    /// Partition year, derived from `time`
    pub year: i32,
}

impl PriceRecord {
    /// Create a new price record; the partition year comes from the timestamp.
    pub fn new(
        time: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        pair: String,
    ) -> Self {
        let year = time.year();
        Self {
            time,
            open,
            high,
            low,
            close,
            pair,
            year,
        }
    }
}
