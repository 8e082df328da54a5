use serde::Deserialize;
use std::path::Path;

use crate::error::{AppError, Result};

/// Immutable reference data for one currency pair, loaded once at startup.
#[derive(Debug, Clone)]
pub struct CurrencyPair {
    /// Human-readable name, e.g. "EUR/USD"
    pub name: String,

    /// Pair code, uppercase, e.g. "EURUSD"
    pub code: String,

    /// First-ever year of trading on the portal
    pub first_year: i32,

    /// First-ever month of trading within that year (1-12)
    pub first_month: u32,
}

impl CurrencyPair {
    fn from_row(row: PairRow) -> Result<Self> {
        let raw = row.history_first_trading_month.trim();
        if raw.len() != 6 || !raw.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Config(format!(
                "Invalid first trading month '{}' for pair {} (expected YYYYMM)",
                raw, row.currency_pair_code
            )));
        }

        let first_year: i32 = raw[0..4].parse().map_err(|e| {
            AppError::Config(format!(
                "Invalid year in '{}' for pair {}: {}",
                raw, row.currency_pair_code, e
            ))
        })?;
        let first_month: u32 = raw[4..6].parse().map_err(|e| {
            AppError::Config(format!(
                "Invalid month in '{}' for pair {}: {}",
                raw, row.currency_pair_code, e
            ))
        })?;
        if !(1..=12).contains(&first_month) {
            return Err(AppError::Config(format!(
                "Month out of range in '{}' for pair {}",
                raw, row.currency_pair_code
            )));
        }

        Ok(Self {
            name: row.currency_pair_name.trim().to_string(),
            code: row.currency_pair_code.trim().to_uppercase(),
            first_year,
            first_month,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PairRow {
    currency_pair_name: String,
    currency_pair_code: String,
    history_first_trading_month: String,
}

/// Load the pair list from its CSV configuration file.
///
/// Expected header:
/// `currency_pair_name,currency_pair_code,history_first_trading_month`
/// with the trading month as a YYYYMM literal (e.g. "200012").
pub fn load_pairs(path: &Path) -> Result<Vec<CurrencyPair>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        AppError::Config(format!("Cannot read pair file {}: {}", path.display(), e))
    })?;

    let mut pairs = Vec::new();
    for row in reader.deserialize() {
        let row: PairRow = row?;
        pairs.push(CurrencyPair::from_row(row)?);
    }

    if pairs.is_empty() {
        return Err(AppError::Config(format!(
            "Pair file {} contains no pairs",
            path.display()
        )));
    }

    Ok(pairs)
}
