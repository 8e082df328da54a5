pub mod cleaner;
pub mod downloader;
pub mod histdata;
pub mod planner;
pub mod price_store;

pub use cleaner::{clean, CleanReport};
pub use downloader::{download_all, FetchState, PairDownloader, PairOutcome};
pub use histdata::{DocumentFetcher, FetchError, HistDataClient, Platform};
pub use planner::{plan, Plan};
pub use price_store::{PriceStore, Watermark};
