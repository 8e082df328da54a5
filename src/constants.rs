//! Portal protocol and retry constants.

/// Endpoint the portal serves archive payloads from, after the token
/// round-trip on the referer page.
pub const DOWNLOAD_ENDPOINT: &str = "https://www.histdata.com/get.php";

/// Timestamp layout inside the portal's CSV payloads (e.g. "20170501 090000").
pub const PORTAL_TIMESTAMP_FORMAT: &str = "%Y%m%d %H%M%S";

/// Timestamp layout written into store fragments.
pub const STORE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header row at the top of every store fragment. Pair and year are carried
/// by the partition path, not the rows.
pub const FRAGMENT_HEADER: [&str; 5] = ["time", "open", "high", "low", "close"];

/// Attempts per fetch unit before a transport failure is treated as the
/// unit being genuinely absent.
pub const MAX_TRANSPORT_ATTEMPTS: u32 = 3;

/// Backoff between transport retries, multiplied by the attempt number.
pub const TRANSPORT_RETRY_BACKOFF_MS: u64 = 500;

/// Request timeout for portal calls.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Default pair configuration file, relative to the working directory.
pub const DEFAULT_PAIRS_FILE: &str = "pairs.csv";
