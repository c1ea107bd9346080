//! Rendering of the top months report

use crate::{config::ReportLayout, error::PipelineError, rank::RankedMonth};
use csv_async::AsyncWriterBuilder;
use serde::Serialize;
use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};
use tokio::fs::File;

/// Names of the report columns, in order
pub const HEADER: [&str; 4] = ["Year", "Month", "Crime Total", "Ranking"];

/// Field delimiter of the persisted report
pub const DELIMITER: u8 = b'|';

/// Row of the report, with fields padded to their minimal width
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct ReportLine {
    /// Year of the month
    pub year: String,

    /// Month number
    pub month: String,

    /// Number of incidents recorded over the month
    pub crime_total: String,

    /// Rank of the month within its year
    pub ranking: String,
}
//
impl ReportLine {
    /// Fields of the line, in column order
    pub fn fields(&self) -> [&str; 4] {
        [&self.year, &self.month, &self.crime_total, &self.ranking]
    }
}

/// Turn ranked months into report lines
///
/// Fields are left-justified and padded with spaces up to the width set by
/// the layout. Longer values are kept whole.
pub fn format_lines(layout: &ReportLayout, ranked: &[RankedMonth]) -> Vec<ReportLine> {
    ranked
        .iter()
        .map(|ranked| ReportLine {
            year: format!("{:<w$}", ranked.count.year, w = layout.year_width),
            month: format!("{:<w$}", ranked.count.month, w = layout.month_width),
            crime_total: format!("{:<w$}", ranked.count.total, w = layout.total_width),
            ranking: format!("{:<w$}", ranked.rank, w = layout.rank_width),
        })
        .collect()
}

/// Write the report to its destination, replacing any previous report
///
/// The report is first written next to the destination, then moved over it,
/// so an interrupted run does not leave a truncated report behind.
pub async fn write_report(lines: &[ReportLine], destination: &Path) -> Result<(), PipelineError> {
    let staging = staging_path(destination);
    let result = write_staged(lines, destination, &staging).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&staging).await {
            log::debug!("Could not clean up {}: {e}", staging.display());
        }
    }
    result
}

/// Write the report into a staging file, then move it to the destination
async fn write_staged(
    lines: &[ReportLine],
    destination: &Path,
    staging: &Path,
) -> Result<(), PipelineError> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(PipelineError::destination(destination))?;
    }
    let file = File::create(staging)
        .await
        .map_err(PipelineError::destination(destination))?;
    let mut writer = AsyncWriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .create_serializer(file);
    // The header is written by hand so that empty reports still have one
    writer
        .serialize(HEADER)
        .await
        .map_err(PipelineError::destination(destination))?;
    for line in lines {
        writer
            .serialize(line)
            .await
            .map_err(PipelineError::destination(destination))?;
    }
    writer
        .flush()
        .await
        .map_err(PipelineError::destination(destination))?;
    drop(writer);
    tokio::fs::rename(staging, destination)
        .await
        .map_err(PipelineError::destination(destination))?;
    log::info!(
        "Wrote {} report lines to {}",
        lines.len(),
        destination.display()
    );
    Ok(())
}

/// Location where the report is written before being moved into place
fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map_or_else(|| "report".into(), |name| name.to_string_lossy());
    destination.with_file_name(format!(".{name}.partial"))
}

/// Render the first lines of the report as a table for human consumption
pub fn render_preview(lines: &[ReportLine], limit: usize) -> String {
    let shown = &lines[..limit.min(lines.len())];
    let mut widths = HEADER.map(str::len);
    for line in shown {
        for (width, field) in widths.iter_mut().zip(line.fields()) {
            *width = (*width).max(field.chars().count());
        }
    }

    let mut separator = String::from("+");
    for width in widths {
        separator.push_str(&"-".repeat(width));
        separator.push('+');
    }
    separator.push('\n');
    let row = |out: &mut String, fields: [&str; 4]| {
        out.push('|');
        for (field, width) in fields.into_iter().zip(widths) {
            write!(out, "{field:<width$}|").expect("writing to a String cannot fail");
        }
        out.push('\n');
    };

    let mut out = separator.clone();
    row(&mut out, HEADER);
    out.push_str(&separator);
    for line in shown {
        row(&mut out, line.fields());
    }
    out.push_str(&separator);
    if shown.len() < lines.len() {
        writeln!(out, "only showing top {} rows", shown.len())
            .expect("writing to a String cannot fail");
    }
    out
}
