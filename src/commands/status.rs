use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::services::price_store::PriceStore;
use crate::utils::get_output_dir;

pub fn run(output: Option<PathBuf>) {
    println!("📊 Price Table Status\n");

    let output = output.unwrap_or_else(get_output_dir);
    match show_status(&output) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn show_status(output: &Path) -> Result<(), Error> {
    if !output.exists() {
        println!("⚠️  No price table found at {}. Run 'pull' first.", output.display());
        return Ok(());
    }

    let store = PriceStore::open(output)?;
    let pairs = store.partitions()?;
    if pairs.is_empty() {
        println!("⚠️  Price table at {} is empty. Run 'pull' first.", output.display());
        return Ok(());
    }

    println!("📈 {} pair(s) stored in {}\n", pairs.len(), output.display());

    for pair in &pairs {
        let years = store.years(pair)?;
        let mut rows = 0;
        let mut fragments = 0;
        for &year in &years {
            rows += store.load_partition(pair, year)?.len();
            fragments += store.fragment_count(pair, year)?;
        }

        match store.watermark(pair)? {
            Some(watermark) => println!(
                "🔹 {} - {} year(s), {:>9} row(s), {} fragment(s), last data {}-{:02}",
                pair,
                years.len(),
                rows,
                fragments,
                watermark.year,
                watermark.month
            ),
            None => println!("🔹 {} - partition exists but holds no rows", pair),
        }
    }

    Ok(())
}
