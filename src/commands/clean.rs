use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::services::cleaner::{self, CleanReport};
use crate::services::price_store::PriceStore;
use crate::utils::get_output_dir;

pub fn run(output: Option<PathBuf>) {
    let output = output.unwrap_or_else(get_output_dir);
    println!("🧹 Cleaning price table at {}\n", output.display());

    let report = match run_clean(&output) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("❌ Clean failed: {}", e);
            std::process::exit(1);
        }
    };

    for entry in &report.partitions {
        if let Some(error) = &entry.error {
            println!("   ❌ {} {} - {}", entry.pair, entry.year, error);
        } else if entry.duplicates_remaining > 0 {
            println!(
                "   ❌ {} {} - {} duplicate(s) REMAIN after overwrite",
                entry.pair, entry.year, entry.duplicates_remaining
            );
        } else if entry.duplicates_removed > 0 {
            println!(
                "   {} {} - removed {} duplicate(s), {} row(s) remain",
                entry.pair, entry.year, entry.duplicates_removed, entry.rows_after
            );
        }
    }

    println!("\n📦 Compacted {} partition(s)", report.compactions.len());
    for stats in &report.compactions {
        println!(
            "   {} {} - {} fragment(s) merged into 1 ({} rows)",
            stats.pair, stats.year, stats.fragments_before, stats.rows
        );
    }

    println!(
        "🗑  Vacuum: {} orphaned artifact(s) found",
        report.vacuum_preview.orphans.len()
    );
    for path in &report.vacuum_preview.orphans {
        println!("   would remove {}", path.display());
    }
    if !report.vacuum.orphans.is_empty() {
        println!("   removed {} artifact(s)", report.vacuum.orphans.len());
    }

    let hard_errors = report.hard_errors();
    if hard_errors.is_empty() {
        println!(
            "\n✅ Table is duplicate-free ({} duplicate(s) removed across {} partition(s))",
            report.total_duplicates_removed(),
            report.partitions.len()
        );
    } else {
        eprintln!(
            "\n❌ {} partition(s) still report duplicates or errors",
            hard_errors.len()
        );
        std::process::exit(1);
    }
}

fn run_clean(output: &Path) -> Result<CleanReport, Error> {
    let store = PriceStore::open(output)?;
    cleaner::clean(&store)
}
