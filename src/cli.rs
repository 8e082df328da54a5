use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;
use crate::constants::DEFAULT_PAIRS_FILE;
use crate::logging::{self, LogConfig, LogDestination};

#[derive(Parser)]
#[command(name = "fxhistory")]
#[command(about = "FX historical price data downloader", long_about = None)]
pub struct Cli {
    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Write logs to a file instead of stdout
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Emit structured JSON logs instead of plain text
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download new and updated price data for all configured pairs
    Pull {
        /// Path to the pair configuration CSV
        #[arg(short, long, default_value = DEFAULT_PAIRS_FILE)]
        pairs_file: PathBuf,

        /// Price table root (defaults to $FX_DATA_OUTPUT or ./output)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Portal download format: ascii, metatrader, ninjatrader, metastock, excel
        #[arg(long, default_value = "ascii")]
        platform: String,
    },
    /// Deduplicate, compact and vacuum the price table
    Clean {
        /// Price table root (defaults to $FX_DATA_OUTPUT or ./output)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show stored pairs, row counts and watermarks
    Status {
        /// Price table root (defaults to $FX_DATA_OUTPUT or ./output)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Shift the timestamp column of a portal CSV by whole hours
    ShiftTz {
        /// Input CSV file (';'-separated portal format)
        file: PathBuf,

        /// Signed hour offset, e.g. 13 or -13
        #[arg(allow_hyphen_values = true)]
        offset_hours: i64,
    },
}

pub fn run() {
    let cli = Cli::parse();

    let destination = match cli.log_file {
        Some(path) => LogDestination::File(path),
        None => LogDestination::Stdout,
    };
    let log_config = LogConfig {
        level: cli.log_level,
        destination,
        json: cli.log_json,
    };
    if let Err(e) = logging::init(&log_config) {
        eprintln!("❌ Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    match cli.command {
        Commands::Pull {
            pairs_file,
            output,
            platform,
        } => {
            commands::pull::run(pairs_file, output, platform);
        }
        Commands::Clean { output } => {
            commands::clean::run(output);
        }
        Commands::Status { output } => {
            commands::status::run(output);
        }
        Commands::ShiftTz { file, offset_hours } => {
            commands::shift_tz::run(file, offset_hours);
        }
    }
}
