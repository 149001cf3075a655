//! CSV export of the root power log.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use chrono::SecondsFormat;

use crate::sim::aggregator::PowerSample;

/// Column header of the power log export.
const HEADER: [&str; 2] = ["timestamp", "net_power_kw"];

/// Exports the root power log to a CSV file at the given path.
///
/// Writes a header row followed by one row per sample. Produces
/// deterministic output for identical inputs.
///
/// # Arguments
///
/// * `samples` - Root congestion log
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(samples: &[PowerSample], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(samples, buf)
}

/// Writes the power log as CSV to any writer.
///
/// Timestamps are RFC 3339 in UTC with second precision.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(samples: &[PowerSample], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(HEADER)?;
    for s in samples {
        wtr.write_record([
            s.sim_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            format!("{:.4}", s.net_power_kw),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
