//! Extraction of the calendar month of occurence of incidents
//!
//! Rows whose timestamp is missing or does not match the configured format are
//! dropped from the dataset. This is a data quality filter, not an error: it
//! lowers monthly totals without aborting the run, so the number of dropped
//! rows is tracked and logged.

use crate::{
    config::NormalizeConfig,
    dataset::{Dataset, IncidentRow, SourceId},
    progress::{ProgressConfig, ProgressReport, Work},
    Month, Result, Year,
};
use chrono::{
    format::{Item, ParseErrorKind},
    Datelike, NaiveDate, NaiveDateTime,
};
use rayon::prelude::*;
use std::fmt::{self, Display, Write};

/// Check that a timestamp format can be used to find the year and month
pub fn check_format(format: &str) -> Result<()> {
    anyhow::ensure!(
        !chrono::format::StrftimeItems::new(format).any(|item| matches!(item, Item::Error)),
        "invalid timestamp format {format:?}"
    );
    let reference = NaiveDate::from_ymd_opt(2001, 2, 3)
        .and_then(|date| date.and_hms_opt(16, 5, 6))
        .expect("reference timestamp is valid");
    let mut text = String::new();
    write!(text, "{}", reference.format(format)).map_err(|_| {
        anyhow::format_err!("timestamp format {format:?} cannot be used on local times")
    })?;
    let normalizer = TemporalNormalizer { format };
    anyhow::ensure!(
        normalizer.parse(&text) == Some(YearMonth {
            year: 2001,
            month: 2
        }),
        "timestamp format {format:?} does not identify the year and month"
    );
    Ok(())
}

/// Calendar month
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct YearMonth {
    /// Year of Gregorian calendar
    pub year: Year,

    /// Month of the year, from 1 to 12
    pub month: Month,
}

/// Incident whose month of occurence is known
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NormalizedIncident {
    /// Input that the incident was read from
    pub source: SourceId,

    /// Month when the incident occured
    pub period: YearMonth,
}

/// Reasons why a row is left out of the monthly counts
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DropCause {
    /// The timestamp cell is empty
    MissingTimestamp,

    /// The timestamp does not match the expected format
    UnparseableTimestamp,
}

/// Parser of incident timestamps
#[derive(Clone, Copy, Debug)]
pub struct TemporalNormalizer<'config> {
    /// chrono format string
    format: &'config str,
}
//
impl<'config> TemporalNormalizer<'config> {
    /// Set up a normalizer
    ///
    /// The format should have been validated with [`check_format()`].
    pub fn new(config: &'config NormalizeConfig) -> Self {
        Self {
            format: &config.timestamp_format,
        }
    }

    /// Find the month of occurence of an incident
    pub fn normalize(&self, row: IncidentRow<'_>) -> Result<NormalizedIncident, DropCause> {
        let text = row.timestamp.ok_or(DropCause::MissingTimestamp)?;
        let period = self.parse(text).ok_or(DropCause::UnparseableTimestamp)?;
        Ok(NormalizedIncident {
            source: row.source,
            period,
        })
    }

    /// Normalize all rows of a dataset
    pub fn normalize_dataset(
        &self,
        dataset: &Dataset,
        report: &ProgressReport,
    ) -> NormalizedDataset {
        let progress = report.add(
            "Parsing timestamps",
            ProgressConfig::new(Work::Steps(dataset.blocks().len())),
        );
        let (blocks, stats): (Vec<_>, Vec<_>) = (dataset.blocks().par_iter())
            .map(|block| {
                let mut stats = NormalizeStats::default();
                let incidents = (block.rows())
                    .filter_map(|row| {
                        let result = self.normalize(row);
                        stats.record(row.source, result.as_ref().err().copied());
                        if let Err(cause) = result {
                            log::trace!("Dropped {row:?} because of {cause:?}");
                        }
                        result.ok()
                    })
                    .collect::<Box<[_]>>();
                progress.make_progress(1);
                (incidents, stats)
            })
            .unzip();
        progress.finish();
        let stats = stats
            .into_iter()
            .fold(NormalizeStats::default(), NormalizeStats::merge);
        stats.log();
        NormalizedDataset {
            blocks: blocks.into(),
            stats,
        }
    }

    /// Extract the year and month from a timestamp
    ///
    /// Formats without time of day are accepted, and then the whole text must
    /// be a valid date. Otherwise, the whole text must be a valid date + time.
    ///
    /// chrono accepts numbers of any width with an optional sign and leading
    /// spaces, so the timestamp must also read back as the original text: a
    /// field of the format must have exactly the width that it is printed
    /// with. Letter case does not matter (`am` and `AM` are the same).
    fn parse(&self, text: &str) -> Option<YearMonth> {
        let (date, exact) = match NaiveDateTime::parse_from_str(text, self.format) {
            Ok(datetime) => (
                datetime.date(),
                prints_as(datetime.format(self.format), text),
            ),
            Err(e) if e.kind() == ParseErrorKind::NotEnough => {
                let date = NaiveDate::parse_from_str(text, self.format).ok()?;
                (date, prints_as(date.format(self.format), text))
            }
            Err(_) => return None,
        };
        exact.then(|| YearMonth {
            year: date.year(),
            month: date.month(),
        })
    }
}

/// Truth that something is displayed as `text`, ignoring ASCII case
fn prints_as(value: impl Display, text: &str) -> bool {
    let mut matcher = TextMatcher { rest: text };
    write!(matcher, "{value}").is_ok() && matcher.rest.is_empty()
}

/// [`fmt::Write`] sink that checks output against an expected text
struct TextMatcher<'text> {
    /// Expected text that has not been written yet
    rest: &'text str,
}
//
impl fmt::Write for TextMatcher<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        match self.rest.get(..s.len()) {
            Some(head) if head.eq_ignore_ascii_case(s) => {
                self.rest = &self.rest[s.len()..];
                Ok(())
            }
            _ => Err(fmt::Error),
        }
    }
}

/// Outcome of timestamp normalization for one input
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct SourceStats {
    /// Rows whose month of occurence is known
    pub accepted: usize,

    /// Rows without a timestamp
    pub missing: usize,

    /// Rows with a malformed timestamp
    pub unparseable: usize,
}
//
impl SourceStats {
    /// Total number of rows that were examined
    pub fn rows(&self) -> usize {
        self.accepted + self.missing + self.unparseable
    }

    /// Number of rows that were dropped
    pub fn dropped(&self) -> usize {
        self.missing + self.unparseable
    }
}

/// Outcome of timestamp normalization, per input
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct NormalizeStats(pub [SourceStats; 2]);
//
impl NormalizeStats {
    /// Statistics about one input
    pub fn source(&self, source: SourceId) -> &SourceStats {
        &self.0[source.index()]
    }

    /// Statistics over both inputs
    pub fn total(&self) -> SourceStats {
        let [first, second] = self.0;
        SourceStats {
            accepted: first.accepted + second.accepted,
            missing: first.missing + second.missing,
            unparseable: first.unparseable + second.unparseable,
        }
    }

    /// Record the outcome of normalizing one row
    fn record(&mut self, source: SourceId, dropped: Option<DropCause>) {
        let stats = &mut self.0[source.index()];
        match dropped {
            None => stats.accepted += 1,
            Some(DropCause::MissingTimestamp) => stats.missing += 1,
            Some(DropCause::UnparseableTimestamp) => stats.unparseable += 1,
        }
    }

    /// Merge statistics from disjoint sets of rows
    fn merge(self, other: Self) -> Self {
        let [a1, a2] = self.0;
        let [b1, b2] = other.0;
        let add = |a: SourceStats, b: SourceStats| SourceStats {
            accepted: a.accepted + b.accepted,
            missing: a.missing + b.missing,
            unparseable: a.unparseable + b.unparseable,
        };
        Self([add(a1, b1), add(a2, b2)])
    }

    /// Report on data quality
    fn log(&self) {
        for source in SourceId::ALL {
            let stats = self.source(source);
            log::debug!("Timestamp normalization of the {source}: {stats:?}");
        }
        let total = self.total();
        if total.dropped() > 0 {
            log::warn!(
                "Left {} of {} rows out of the monthly counts ({} without timestamp, {} with a malformed timestamp)",
                total.dropped(),
                total.rows(),
                total.missing,
                total.unparseable,
            );
        } else {
            log::info!("Found the month of occurence of all {} rows", total.rows());
        }
    }
}

/// Incidents whose month of occurence is known
///
/// Keeps the block structure of the source [`Dataset`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NormalizedDataset {
    /// Incidents, block by block
    blocks: Box<[Box<[NormalizedIncident]>]>,

    /// Outcome of normalization
    stats: NormalizeStats,
}
//
impl NormalizedDataset {
    /// Access the incidents in a block-wise fashion
    pub fn blocks(&self) -> &[Box<[NormalizedIncident]>] {
        &self.blocks[..]
    }

    /// Outcome of normalization
    pub fn stats(&self) -> &NormalizeStats {
        &self.stats
    }

    /// Iterate sequentially over all incidents
    #[cfg(test)]
    pub fn incidents(&self) -> impl Iterator<Item = &NormalizedIncident> {
        self.blocks.iter().flat_map(|block| block.iter())
    }

    /// Build from a list of incidents, in blocks of `chunk` incidents
    #[cfg(test)]
    pub fn from_incidents(incidents: &[NormalizedIncident], chunk: usize) -> Self {
        let mut stats = NormalizeStats::default();
        for incident in incidents {
            stats.record(incident.source, None);
        }
        Self {
            blocks: incidents.chunks(chunk).map(Box::from).collect(),
            stats,
        }
    }
}
