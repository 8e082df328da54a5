use std::path::PathBuf;

use crate::error::Error;
use crate::models::{load_pairs, CurrencyPair};
use crate::services::downloader;
use crate::services::histdata::{HistDataClient, Platform};
use crate::services::price_store::PriceStore;
use crate::utils::get_output_dir;

pub fn run(pairs_file: PathBuf, output: Option<PathBuf>, platform: String) {
    let platform = match Platform::from_str(&platform) {
        Ok(platform) => platform,
        Err(e) => {
            eprintln!("❌ Error parsing platform: {}", e);
            std::process::exit(1);
        }
    };

    let pairs = match load_pairs(&pairs_file) {
        Ok(pairs) => pairs,
        Err(e) => {
            eprintln!("❌ Failed to load pair configuration: {}", e);
            std::process::exit(1);
        }
    };

    let output = output.unwrap_or_else(get_output_dir);
    println!(
        "📥 Pulling {} pair(s) into {}",
        pairs.len(),
        output.display()
    );

    match run_pull(pairs, output, platform) {
        Ok(0) => {
            println!("\n✅ Download run complete");
            println!("💡 Tip: run 'clean' to deduplicate re-fetched periods");
        }
        Ok(failed) => {
            println!("\n✅ Download run complete ({} pair(s) ended with errors)", failed);
            println!("💡 Tip: run 'clean' to deduplicate re-fetched periods");
        }
        Err(e) => {
            eprintln!("\n❌ Download run failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_pull(
    pairs: Vec<CurrencyPair>,
    output: PathBuf,
    platform: Platform,
) -> Result<usize, Error> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Network(format!("Failed to create runtime: {}", e)))?;

    runtime.block_on(async {
        let store = PriceStore::open(&output)?;
        let fetcher =
            HistDataClient::new(platform).map_err(|e| Error::Network(e.to_string()))?;

        let outcomes = downloader::download_all(&fetcher, &store, &pairs).await?;

        let mut failed = 0;
        for outcome in &outcomes {
            match &outcome.error {
                Some(error) => {
                    failed += 1;
                    println!("   ⚠️  {} - {}", outcome.pair, error);
                }
                None => println!(
                    "   {} - {} year(s), {} month(s), {} record(s)",
                    outcome.pair,
                    outcome.years_fetched,
                    outcome.months_fetched,
                    outcome.records_appended
                ),
            }
        }
        Ok(failed)
    })
}
