//! Granularity Fallback Controller.
//!
//! Drives Document Fetcher calls for one pair as an explicit state machine:
//! whole-year requests first, degrading to month-by-month when the portal
//! rejects the year, stopping the pair at the first sign that no more data
//! exists. Every successful fetch is appended to the store before the state
//! advances, so a crash costs at most one re-fetched year on the next run.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::constants::{MAX_TRANSPORT_ATTEMPTS, TRANSPORT_RETRY_BACKOFF_MS};
use crate::error::{AppError, Result};
use crate::models::{CurrencyPair, FetchUnit, PriceRecord};
use crate::services::histdata::{DocumentFetcher, FetchError};
use crate::services::planner::{self, Plan};
use crate::services::price_store::PriceStore;

/// Controller states. `Done` and `Failed` are terminal; both are normal
/// ends of a pair's download ("caught up" vs "no further data served").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    TryYear,
    TryMonth(u32),
    Done,
    Failed,
}

/// Summary of one pair's download run.
#[derive(Debug)]
pub struct PairOutcome {
    pub pair: String,
    pub years_fetched: usize,
    pub months_fetched: usize,
    pub records_appended: usize,
    pub terminal: FetchState,
    /// Set when the pair ended on a configuration or store error rather
    /// than the normal caught-up sentinel.
    pub error: Option<String>,
}

impl PairOutcome {
    fn new(pair: &str) -> Self {
        Self {
            pair: pair.to_string(),
            years_fetched: 0,
            months_fetched: 0,
            records_appended: 0,
            terminal: FetchState::Done,
            error: None,
        }
    }

    fn failed(pair: &str, error: String) -> Self {
        Self {
            terminal: FetchState::Failed,
            error: Some(error),
            ..Self::new(pair)
        }
    }
}

/// Runs the fallback state machine for one pair at a time.
pub struct PairDownloader<'a, F: DocumentFetcher> {
    fetcher: &'a F,
    store: &'a PriceStore,
}

impl<'a, F: DocumentFetcher> PairDownloader<'a, F> {
    pub fn new(fetcher: &'a F, store: &'a PriceStore) -> Self {
        Self { fetcher, store }
    }

    /// Run the state machine for one pair from the given plan.
    pub async fn download_pair(&self, pair: &CurrencyPair, plan: Plan) -> Result<PairOutcome> {
        let mut outcome = PairOutcome::new(&pair.code);
        let mut year = plan.start_year;
        let mut fallback_month = plan.fallback_month;
        let mut state = FetchState::TryYear;

        info!(pair = %pair.code, name = %pair.name, year, "starting download");

        loop {
            state = match state {
                FetchState::TryYear => {
                    let unit = FetchUnit::Year(year);
                    match self.fetch_unit(&pair.code, unit).await {
                        Ok(records) => {
                            outcome.records_appended += self.store.append(&records)?.rows;
                            outcome.years_fetched += 1;
                            year += 1;
                            // the resume month only applies to the planned year
                            fallback_month = 1;
                            FetchState::TryYear
                        }
                        Err(FetchError::NotEligibleForYear(reason)) => {
                            debug!(pair = %pair.code, %unit, reason = %reason, "year not eligible, degrading to months");
                            FetchState::TryMonth(fallback_month)
                        }
                        Err(e) => {
                            info!(pair = %pair.code, %unit, error = %e, "no further year data, stopping pair");
                            FetchState::Failed
                        }
                    }
                }
                FetchState::TryMonth(month) => {
                    let unit = FetchUnit::Month(year, month);
                    match self.fetch_unit(&pair.code, unit).await {
                        Ok(records) => {
                            outcome.records_appended += self.store.append(&records)?.rows;
                            outcome.months_fetched += 1;
                            if month < 12 {
                                FetchState::TryMonth(month + 1)
                            } else {
                                year += 1;
                                fallback_month = 1;
                                FetchState::TryYear
                            }
                        }
                        Err(e) => {
                            info!(pair = %pair.code, %unit, error = %e, "caught up to present, stopping pair");
                            FetchState::Done
                        }
                    }
                }
                terminal => {
                    outcome.terminal = terminal;
                    break;
                }
            };
        }

        info!(
            pair = %pair.code,
            years = outcome.years_fetched,
            months = outcome.months_fetched,
            records = outcome.records_appended,
            state = ?outcome.terminal,
            "pair download finished"
        );
        Ok(outcome)
    }

    /// Fetch one unit, retrying transient transport failures a bounded
    /// number of times before giving up on the unit.
    async fn fetch_unit(
        &self,
        pair: &str,
        unit: FetchUnit,
    ) -> std::result::Result<Vec<PriceRecord>, FetchError> {
        let mut attempt = 1;
        loop {
            match self.fetcher.fetch(pair, unit.year(), unit.month()).await {
                Ok(records) if records.is_empty() => return Err(FetchError::NoData),
                Ok(records) => return Ok(records),
                Err(e) if e.is_transient() && attempt < MAX_TRANSPORT_ATTEMPTS => {
                    warn!(pair, %unit, attempt, error = %e, "transport failure, retrying");
                    sleep(Duration::from_millis(
                        TRANSPORT_RETRY_BACKOFF_MS * attempt as u64,
                    ))
                    .await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Ingest every configured pair, one at a time. Per-pair failures are
/// isolated: a pair that cannot be planned or downloaded never stops the
/// pairs after it.
pub async fn download_all<F: DocumentFetcher>(
    fetcher: &F,
    store: &PriceStore,
    pairs: &[CurrencyPair],
) -> Result<Vec<PairOutcome>> {
    let existing = store.partitions()?;
    let downloader = PairDownloader::new(fetcher, store);
    let mut outcomes = Vec::with_capacity(pairs.len());

    for pair in pairs {
        let outcome = match plan_pair(store, &existing, pair) {
            Ok(plan) => match downloader.download_pair(pair, plan).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(pair = %pair.code, error = %e, "pair download aborted");
                    PairOutcome::failed(&pair.code, e.to_string())
                }
            },
            Err(e) => {
                tracing::error!(pair = %pair.code, error = %e, "cannot plan pair");
                PairOutcome::failed(&pair.code, e.to_string())
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

/// A pair with stored partitions resumes from its watermark; a pair with a
/// partition but no rows is a configuration error, not a fresh download.
fn plan_pair(store: &PriceStore, existing: &[String], pair: &CurrencyPair) -> Result<Plan> {
    if existing.iter().any(|code| code == &pair.code) {
        let watermark = store.watermark(&pair.code)?.ok_or_else(|| {
            AppError::Config(format!(
                "No stored data for configured pair {}, cannot update existing partition",
                pair.code
            ))
        })?;
        Ok(planner::plan(pair, Some(&watermark)))
    } else {
        Ok(planner::plan(pair, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    type StubResponse = std::result::Result<Vec<PriceRecord>, FetchError>;

    /// Scripted Document Fetcher: answers from a closure and records every
    /// request it sees.
    struct StubFetcher {
        calls: Mutex<Vec<(i32, Option<u32>)>>,
        respond: Box<dyn Fn(i32, Option<u32>) -> StubResponse + Send + Sync>,
    }

    impl StubFetcher {
        fn new(respond: impl Fn(i32, Option<u32>) -> StubResponse + Send + Sync + 'static) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        fn calls(&self) -> Vec<(i32, Option<u32>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl DocumentFetcher for StubFetcher {
        async fn fetch(
            &self,
            _pair: &str,
            year: i32,
            month: Option<u32>,
        ) -> std::result::Result<Vec<PriceRecord>, FetchError> {
            self.calls.lock().unwrap().push((year, month));
            (self.respond)(year, month)
        }
    }

    fn bar(year: i32, month: u32) -> Vec<PriceRecord> {
        let time = NaiveDate::from_ymd_opt(year, month, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        vec![PriceRecord::new(
            time,
            1.0,
            1.1,
            0.9,
            1.05,
            "EURUSD".to_string(),
        )]
    }

    fn test_pair() -> CurrencyPair {
        CurrencyPair {
            name: "EUR/USD".to_string(),
            code: "EURUSD".to_string(),
            first_year: 2020,
            first_month: 1,
        }
    }

    #[tokio::test]
    async fn test_month_fallback_stops_at_first_failed_month() {
        // year not eligible whole; months 1-6 exist, month 7 does not
        let stub = StubFetcher::new(|year, month| match month {
            None => Err(FetchError::NotEligibleForYear("partial year".to_string())),
            Some(m) if m <= 6 => Ok(bar(year, m)),
            Some(_) => Err(FetchError::NoData),
        });
        let dir = tempdir().unwrap();
        let store = PriceStore::open(dir.path()).unwrap();
        let downloader = PairDownloader::new(&stub, &store);

        let outcome = downloader
            .download_pair(
                &test_pair(),
                Plan {
                    start_year: 2025,
                    fallback_month: 1,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.months_fetched, 6);
        assert_eq!(outcome.years_fetched, 0);
        assert_eq!(outcome.terminal, FetchState::Done);

        let calls = stub.calls();
        assert_eq!(calls.first(), Some(&(2025, None)));
        // one year attempt plus months 1..=7, and no attempt at the next year
        assert_eq!(calls.len(), 8);
        assert!(!calls.iter().any(|&(year, _)| year == 2026));
    }

    #[tokio::test]
    async fn test_whole_years_never_degrade_to_months() {
        // years through 2022 served whole, then nothing
        let stub = StubFetcher::new(|year, month| match month {
            None if year <= 2022 => Ok(bar(year, 1)),
            _ => Err(FetchError::NoData),
        });
        let dir = tempdir().unwrap();
        let store = PriceStore::open(dir.path()).unwrap();
        let downloader = PairDownloader::new(&stub, &store);

        let outcome = downloader
            .download_pair(
                &test_pair(),
                Plan {
                    start_year: 2020,
                    fallback_month: 1,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.years_fetched, 3);
        assert_eq!(outcome.months_fetched, 0);
        assert_eq!(outcome.terminal, FetchState::Failed);
        assert!(stub.calls().iter().all(|&(_, month)| month.is_none()));
    }

    #[tokio::test]
    async fn test_resume_months_start_at_watermark_month() {
        let stub = StubFetcher::new(|year, month| match month {
            None if year == 2025 => Err(FetchError::NotEligibleForYear("partial".to_string())),
            None => Err(FetchError::NoData),
            Some(_) if year == 2025 => Ok(bar(year, month.unwrap())),
            Some(_) => Err(FetchError::NoData),
        });
        let dir = tempdir().unwrap();
        let store = PriceStore::open(dir.path()).unwrap();
        let downloader = PairDownloader::new(&stub, &store);

        let outcome = downloader
            .download_pair(
                &test_pair(),
                Plan {
                    start_year: 2025,
                    fallback_month: 5,
                },
            )
            .await
            .unwrap();

        // months 5..=12, then the next year's whole-year attempt fails
        assert_eq!(outcome.months_fetched, 8);
        assert_eq!(outcome.terminal, FetchState::Failed);

        let months: Vec<u32> = stub.calls().iter().filter_map(|&(_, m)| m).collect();
        assert_eq!(months.first(), Some(&5));
        assert!(months.iter().all(|&m| m >= 5));
        assert_eq!(stub.calls().last(), Some(&(2026, None)));
    }

    #[tokio::test]
    async fn test_transport_failures_retried_before_giving_up() {
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&attempts);
        let stub = StubFetcher::new(move |year, month| {
            if year == 2020 && month.is_none() {
                let mut count = counter.lock().unwrap();
                *count += 1;
                if *count < 3 {
                    return Err(FetchError::Transport("connection reset".to_string()));
                }
                return Ok(bar(2020, 1));
            }
            Err(FetchError::NoData)
        });
        let dir = tempdir().unwrap();
        let store = PriceStore::open(dir.path()).unwrap();
        let downloader = PairDownloader::new(&stub, &store);

        let outcome = downloader
            .download_pair(
                &test_pair(),
                Plan {
                    start_year: 2020,
                    fallback_month: 1,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.years_fetched, 1);
        let year_calls = stub
            .calls()
            .iter()
            .filter(|&&(year, month)| year == 2020 && month.is_none())
            .count();
        assert_eq!(year_calls, 3);
    }

    #[tokio::test]
    async fn test_transport_exhaustion_is_terminal() {
        let stub = StubFetcher::new(|_, _| Err(FetchError::Transport("down".to_string())));
        let dir = tempdir().unwrap();
        let store = PriceStore::open(dir.path()).unwrap();
        let downloader = PairDownloader::new(&stub, &store);

        let outcome = downloader
            .download_pair(
                &test_pair(),
                Plan {
                    start_year: 2020,
                    fallback_month: 1,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.terminal, FetchState::Failed);
        assert_eq!(outcome.records_appended, 0);
        assert_eq!(stub.calls().len(), MAX_TRANSPORT_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_empty_payload_stops_pair() {
        let stub = StubFetcher::new(|_, _| Ok(Vec::new()));
        let dir = tempdir().unwrap();
        let store = PriceStore::open(dir.path()).unwrap();
        let downloader = PairDownloader::new(&stub, &store);

        let outcome = downloader
            .download_pair(
                &test_pair(),
                Plan {
                    start_year: 2020,
                    fallback_month: 1,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.terminal, FetchState::Failed);
        assert_eq!(outcome.records_appended, 0);
    }

    #[tokio::test]
    async fn test_empty_partition_is_config_error() {
        let dir = tempdir().unwrap();
        let store = PriceStore::open(dir.path()).unwrap();
        // partition directory exists but holds no rows
        std::fs::create_dir_all(dir.path().join("pair=EURUSD").join("year=2020")).unwrap();

        let stub = StubFetcher::new(|_, _| Err(FetchError::NoData));
        let outcomes = download_all(&stub, &store, &[test_pair()]).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].error.as_deref().unwrap_or("").contains("EURUSD"));
        assert_eq!(outcomes[0].terminal, FetchState::Failed);
        // the fetcher was never asked for anything
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_pair_does_not_stop_later_pairs() {
        let dir = tempdir().unwrap();
        let store = PriceStore::open(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("pair=EURUSD").join("year=2020")).unwrap();

        let other = CurrencyPair {
            name: "USD/JPY".to_string(),
            code: "USDJPY".to_string(),
            first_year: 2020,
            first_month: 1,
        };
        let stub = StubFetcher::new(|year, month| match month {
            None if year == 2020 => Ok(bar(year, 1)),
            _ => Err(FetchError::NoData),
        });

        let outcomes = download_all(&stub, &store, &[test_pair(), other]).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].error.is_some());
        assert!(outcomes[1].error.is_none());
        assert_eq!(outcomes[1].years_fetched, 1);
    }

    #[tokio::test]
    async fn test_rerun_refetches_only_last_known_year() {
        // years 2020 and 2021 served whole, nothing after
        let respond = |year: i32, month: Option<u32>| match month {
            None if year <= 2021 => Ok(bar(year, 12)),
            _ => Err(FetchError::NoData),
        };
        let dir = tempdir().unwrap();
        let store = PriceStore::open(dir.path()).unwrap();

        let first = StubFetcher::new(respond);
        download_all(&first, &store, &[test_pair()]).await.unwrap();
        assert_eq!(store.years("EURUSD").unwrap(), vec![2020, 2021]);

        let second = StubFetcher::new(respond);
        download_all(&second, &store, &[test_pair()]).await.unwrap();

        // the resumed run starts at the watermark year, not the beginning
        assert_eq!(second.calls().first(), Some(&(2021, None)));
        assert!(!second.calls().iter().any(|&(year, _)| year == 2020));
        // the overlap produced duplicates for 2021, tolerated until cleaned
        assert_eq!(store.load_partition("EURUSD", 2021).unwrap().len(), 2);
    }
}
