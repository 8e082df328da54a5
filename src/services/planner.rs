//! Resume Planner: decides where a pair's download starts.

use tracing::debug;

use crate::models::{CurrencyPair, FetchUnit};
use crate::services::price_store::Watermark;

/// Where the download controller starts for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// First year to attempt as a whole-year unit.
    pub start_year: i32,

    /// Month to resume from if the starting year degrades to monthly
    /// fetches. Years after the starting year always restart at January.
    pub fallback_month: u32,
}

impl Plan {
    /// The first unit the controller will request.
    pub fn initial_unit(&self) -> FetchUnit {
        FetchUnit::Year(self.start_year)
    }
}

/// Compute the starting plan for a pair.
///
/// Without a watermark the pair is fetched from its first trading year.
/// With a watermark (Y, M), the last known year Y is always re-attempted,
/// since the most recent period may have been incomplete when last written.
/// A monthly fallback resumes at M rather than M+1, tolerating a previous
/// run that stopped mid-month after a partial write.
pub fn plan(pair: &CurrencyPair, watermark: Option<&Watermark>) -> Plan {
    match watermark {
        None => {
            debug!(pair = %pair.code, year = pair.first_year, "no watermark, planning full download");
            Plan {
                start_year: pair.first_year,
                fallback_month: 1,
            }
        }
        Some(watermark) => {
            debug!(
                pair = %pair.code,
                year = watermark.year,
                month = watermark.month,
                "resuming from watermark"
            );
            Plan {
                start_year: watermark.year,
                fallback_month: watermark.month,
            }
        }
    }
}
