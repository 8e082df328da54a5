//! Document Fetcher for the histdata.com portal.
//!
//! The portal serves 1-minute bar archives behind a form POST guarded by a
//! per-page token. Whole-year archives exist only for fully elapsed years;
//! the current (partial) year is served month by month.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime, Utc};
use reqwest::header::REFERER;
use scraper::{Html, Selector};
use std::io::{Cursor, Read};
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::debug;
use zip::read::ZipArchive;

use crate::constants::{DOWNLOAD_ENDPOINT, HTTP_TIMEOUT_SECS, PORTAL_TIMESTAMP_FORMAT};
use crate::models::PriceRecord;

/// One-minute bars; the only timeframe this downloader requests.
pub const TIME_FRAME: &str = "M1";

/// Fetch failure taxonomy. The controller reacts to the variant, never the text.
#[derive(ThisError, Debug)]
pub enum FetchError {
    /// The portal does not serve this (year, month) combination at this
    /// granularity; the caller should degrade to the other one.
    #[error("not eligible at this granularity: {0}")]
    NotEligibleForYear(String),

    /// The portal answered but had nothing for the unit.
    #[error("no data available")]
    NoData,

    /// The portal was unreachable, answered badly, or withheld the token.
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Transient failures worth retrying before declaring a unit absent.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }
}

/// Download format family offered by the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    GenericAscii,
    MetaTrader,
    NinjaTrader,
    MetaStock,
    Excel,
}

impl Platform {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "ascii" | "generic-ascii" => Ok(Platform::GenericAscii),
            "mt" | "metatrader" => Ok(Platform::MetaTrader),
            "nt" | "ninjatrader" => Ok(Platform::NinjaTrader),
            "ms" | "metastock" => Ok(Platform::MetaStock),
            "xlsx" | "excel" => Ok(Platform::Excel),
            _ => Err(format!(
                "Invalid platform: {}. Valid options: ascii, metatrader, ninjatrader, metastock, excel",
                s
            )),
        }
    }

    /// Form value the portal expects.
    pub fn as_param(&self) -> &'static str {
        match self {
            Platform::GenericAscii => "ASCII",
            Platform::MetaTrader => "MT",
            Platform::NinjaTrader => "NT",
            Platform::MetaStock => "MS",
            Platform::Excel => "XLSX",
        }
    }

    /// Referer prefix for this platform's 1-minute bar quotes.
    pub fn referer_prefix(&self) -> &'static str {
        match self {
            Platform::GenericAscii => {
                "https://www.histdata.com/download-free-forex-historical-data/?/ascii/1-minute-bar-quotes/"
            }
            Platform::MetaTrader => {
                "https://www.histdata.com/download-free-forex-historical-data/?/metatrader/1-minute-bar-quotes/"
            }
            Platform::NinjaTrader => {
                "https://www.histdata.com/download-free-forex-historical-data/?/ninjatrader/1-minute-bar-quotes/"
            }
            Platform::MetaStock => {
                "https://www.histdata.com/download-free-forex-historical-data/?/metastock/1-minute-bar-quotes/"
            }
            Platform::Excel => {
                "https://www.histdata.com/download-free-forex-historical-data/?/excel/1-minute-bar-quotes/"
            }
        }
    }
}

/// Capability of producing a flat record set for one (pair, year[, month])
/// unit. The seam the download controller is tested through.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(
        &self,
        pair: &str,
        year: i32,
        month: Option<u32>,
    ) -> Result<Vec<PriceRecord>, FetchError>;
}

/// HTTP client for the portal.
pub struct HistDataClient {
    client: reqwest::Client,
    platform: Platform,
}

impl HistDataClient {
    pub fn new(platform: Platform) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            )
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, platform })
    }

    fn referer_url(&self, pair: &str, year: i32, month: Option<u32>) -> String {
        match month {
            Some(month) => format!(
                "{}{}/{}/{}",
                self.platform.referer_prefix(),
                pair.to_lowercase(),
                year,
                month
            ),
            None => format!(
                "{}{}/{}",
                self.platform.referer_prefix(),
                pair.to_lowercase(),
                year
            ),
        }
    }
}

#[async_trait]
impl DocumentFetcher for HistDataClient {
    async fn fetch(
        &self,
        pair: &str,
        year: i32,
        month: Option<u32>,
    ) -> Result<Vec<PriceRecord>, FetchError> {
        check_eligibility(year, month, Utc::now().year())?;

        let referer = self.referer_url(pair, year, month);
        debug!(referer = %referer, "requesting portal page");
        let page = self
            .client
            .get(&referer)
            .send()
            .await
            .map_err(|e| FetchError::Transport(format!("portal page request failed: {}", e)))?;
        if !page.status().is_success() {
            return Err(FetchError::Transport(format!(
                "portal page returned status {}",
                page.status()
            )));
        }
        let html = page
            .text()
            .await
            .map_err(|e| FetchError::Transport(format!("portal page unreadable: {}", e)))?;
        let token = extract_token(&html)?;

        let datemonth = match month {
            Some(month) => format!("{}{:02}", year, month),
            None => year.to_string(),
        };
        let form = [
            ("tk", token),
            ("date", year.to_string()),
            ("datemonth", datemonth),
            ("platform", self.platform.as_param().to_string()),
            ("timeframe", TIME_FRAME.to_string()),
            ("fxpair", pair.to_uppercase()),
        ];

        let response = self
            .client
            .post(DOWNLOAD_ENDPOINT)
            .header(REFERER, &referer)
            .form(&form)
            .send()
            .await
            .map_err(|e| FetchError::Transport(format!("archive request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(FetchError::Transport(format!(
                "archive request returned status {}",
                response.status()
            )));
        }

        let payload = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(format!("archive body unreadable: {}", e)))?;
        if payload.is_empty() {
            return Err(FetchError::NoData);
        }

        extract_records(&payload, pair)
    }
}

/// The portal only allows whole-year pulls for fully elapsed years; the
/// current (partial) year must be requested month by month, and past years
/// must not be.
pub fn check_eligibility(
    year: i32,
    month: Option<u32>,
    current_year: i32,
) -> Result<(), FetchError> {
    if year >= current_year && month.is_none() {
        return Err(FetchError::NotEligibleForYear(format!(
            "{} is not a fully elapsed year, request it per month",
            year
        )));
    }
    if year < current_year && month.is_some() {
        return Err(FetchError::NotEligibleForYear(format!(
            "{} is a fully elapsed year, request it whole",
            year
        )));
    }
    Ok(())
}

/// Pull the hidden download token out of the portal page.
pub fn extract_token(html: &str) -> Result<String, FetchError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("input#tk")
        .map_err(|e| FetchError::Transport(format!("bad token selector: {:?}", e)))?;

    document
        .select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            FetchError::Transport(
                "no download token on portal page, check pair/year/month".to_string(),
            )
        })
}

/// Unpack an archive payload and parse the inner CSV into price records.
///
/// Rows look like `20170501 090000;1.08852;1.08867;1.08822;1.08858;0`;
/// the trailing volume column is dropped.
pub fn extract_records(payload: &[u8], pair: &str) -> Result<Vec<PriceRecord>, FetchError> {
    let mut archive = ZipArchive::new(Cursor::new(payload))
        .map_err(|e| FetchError::Transport(format!("invalid archive payload: {}", e)))?;

    let mut csv_text = None;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| FetchError::Transport(format!("unreadable archive entry: {}", e)))?;
        if entry.name().ends_with(".csv") {
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(|e| FetchError::Transport(format!("unreadable archive entry: {}", e)))?;
            csv_text = Some(text);
            break;
        }
    }

    let csv_text = match csv_text {
        Some(text) => text,
        None => return Err(FetchError::NoData),
    };

    let mut records = Vec::new();
    for line in csv_text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        records.push(parse_bar_line(line, pair)?);
    }
    if records.is_empty() {
        return Err(FetchError::NoData);
    }
    Ok(records)
}

fn parse_bar_line(line: &str, pair: &str) -> Result<PriceRecord, FetchError> {
    let parts: Vec<&str> = line.split(';').collect();
    if parts.len() < 5 {
        return Err(FetchError::Transport(format!("malformed bar row: {}", line)));
    }

    let time = NaiveDateTime::parse_from_str(parts[0].trim(), PORTAL_TIMESTAMP_FORMAT)
        .map_err(|e| FetchError::Transport(format!("malformed timestamp '{}': {}", parts[0], e)))?;

    let price = |index: usize| -> Result<f64, FetchError> {
        parts[index]
            .trim()
            .parse()
            .map_err(|e| FetchError::Transport(format!("malformed price '{}': {}", parts[index], e)))
    };

    Ok(PriceRecord::new(
        time,
        price(1)?,
        price(2)?,
        price(3)?,
        price(4)?,
        pair.to_uppercase(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_payload(entry_name: &str, content: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(entry_name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_eligibility_current_year_needs_month() {
        assert!(matches!(
            check_eligibility(2025, None, 2025),
            Err(FetchError::NotEligibleForYear(_))
        ));
        assert!(check_eligibility(2025, Some(7), 2025).is_ok());
    }

    #[test]
    fn test_eligibility_past_year_must_be_whole() {
        assert!(check_eligibility(2016, None, 2025).is_ok());
        assert!(matches!(
            check_eligibility(2016, Some(7), 2025),
            Err(FetchError::NotEligibleForYear(_))
        ));
    }

    #[test]
    fn test_extract_token() {
        let html = r#"<html><body><form>
            <input type="hidden" id="tk" value="abc123token" />
        </form></body></html>"#;
        assert_eq!(extract_token(html).unwrap(), "abc123token");
    }

    #[test]
    fn test_extract_token_missing_is_transport_error() {
        let html = "<html><body><p>maintenance</p></body></html>";
        assert!(matches!(
            extract_token(html),
            Err(FetchError::Transport(_))
        ));
    }

    #[test]
    fn test_extract_records_parses_bars() {
        let payload = zip_payload(
            "DAT_ASCII_EURUSD_M1_2017.csv",
            "20170501 090000;1.08852;1.08867;1.08822;1.08858;0\n\
             20170501 090100;1.08858;1.08860;1.08850;1.08855;0\n",
        );

        let records = extract_records(&payload, "eurusd").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pair, "EURUSD");
        assert_eq!(records[0].year, 2017);
        assert_eq!(records[0].open, 1.08852);
        assert_eq!(records[1].close, 1.08855);
    }

    #[test]
    fn test_extract_records_empty_csv_is_no_data() {
        let payload = zip_payload("DAT_ASCII_EURUSD_M1_2017.csv", "");
        assert!(matches!(
            extract_records(&payload, "eurusd"),
            Err(FetchError::NoData)
        ));
    }

    #[test]
    fn test_extract_records_no_csv_entry_is_no_data() {
        let payload = zip_payload("readme.txt", "nothing here");
        assert!(matches!(
            extract_records(&payload, "eurusd"),
            Err(FetchError::NoData)
        ));
    }

    #[test]
    fn test_extract_records_garbage_payload_is_transport_error() {
        assert!(matches!(
            extract_records(b"not a zip at all", "eurusd"),
            Err(FetchError::Transport(_))
        ));
    }

    #[test]
    fn test_referer_url() {
        let client = HistDataClient::new(Platform::GenericAscii).unwrap();
        assert_eq!(
            client.referer_url("EURUSD", 2016, None),
            "https://www.histdata.com/download-free-forex-historical-data/?/ascii/1-minute-bar-quotes/eurusd/2016"
        );
        assert_eq!(
            client.referer_url("EURUSD", 2017, Some(5)),
            "https://www.histdata.com/download-free-forex-historical-data/?/ascii/1-minute-bar-quotes/eurusd/2017/5"
        );
    }

    #[test]
    fn test_platform_from_str() {
        assert_eq!(Platform::from_str("ascii").unwrap(), Platform::GenericAscii);
        assert_eq!(Platform::from_str("MetaTrader").unwrap(), Platform::MetaTrader);
        assert!(Platform::from_str("carrier-pigeon").is_err());
    }
}
