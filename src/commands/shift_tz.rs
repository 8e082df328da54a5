//! Shift the timestamp column of a portal CSV by a signed hour offset.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::utils::shift_timestamp;

pub fn run(file: PathBuf, offset_hours: i64) {
    println!(
        "🕐 Shifting timestamps in {} by {} hour(s)",
        file.display(),
        offset_hours
    );

    match shift_file(&file, offset_hours) {
        Ok((output, rows)) => {
            println!("✅ Wrote {} shifted row(s) to {}", rows, output.display());
        }
        Err(e) => {
            eprintln!("❌ Conversion failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Rewrite a `;`-separated portal CSV with its first column shifted,
/// into `OUT_<input-name>` beside the input.
pub fn shift_file(input: &Path, offset_hours: i64) -> Result<(PathBuf, usize)> {
    let file_name = input
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", input.display())))?;
    let output = input.with_file_name(format!("OUT_{}", file_name));

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b';')
        .flexible(true)
        .from_path(input)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_path(&output)?;

    let mut rows = 0;
    for record in reader.records() {
        let record = record?;
        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
        if let Some(timestamp) = fields.first_mut() {
            *timestamp = shift_timestamp(timestamp, offset_hours)?;
        }
        writer.write_record(&fields)?;
        rows += 1;
    }
    writer.flush()?;

    Ok((output, rows))
}
