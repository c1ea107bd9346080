//! Processing pipeline configuration

use crate::{rank::RankingPolicy, Args};
use std::{num::NonZeroUsize, path::PathBuf, sync::Arc};

/// Final process configuration
///
/// This is the digested form of [`Args`], grouped by pipeline stage. Please
/// refer to [`Args`] to know more about individual fields.
#[allow(missing_docs)]
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Config {
    /// Input datasets, in merge order
    pub sources: [PathBuf; 2],

    /// Destination of the report
    pub output: PathBuf,

    /// Subset of the configuration that affects timestamp parsing
    pub normalize: NormalizeConfig,

    /// Subset of the configuration that affects month ranking
    pub rank: RankConfig,

    /// Subset of the configuration that affects report rendering
    pub layout: ReportLayout,

    // Other fields have the same meaning as in Args
    pub memory_chunk: NonZeroUsize,
    pub threads: Option<NonZeroUsize>,
}
//
impl Config {
    /// Determine process configuration from CLI arguments
    pub(crate) fn new(args: Args) -> Arc<Self> {
        let Args {
            first,
            second,
            output,
            timestamp_column,
            timestamp_format,
            top,
            ranking,
            year_width,
            month_width,
            total_width,
            rank_width,
            preview_rows,
            memory_chunk,
            threads,
            log_to: _,
            quiet: _,
        } = args;
        Arc::new(Self {
            sources: [first, second],
            output,
            normalize: NormalizeConfig {
                timestamp_column,
                timestamp_format,
            },
            rank: RankConfig {
                top,
                policy: ranking,
            },
            layout: ReportLayout {
                year_width,
                month_width,
                total_width,
                rank_width,
                preview_rows,
            },
            memory_chunk,
            threads,
        })
    }
}

/// Where to find the time of occurence of incidents and how to read it
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NormalizeConfig {
    /// Name of the timestamp column (matched case-insensitively)
    pub timestamp_column: Box<str>,

    /// chrono format string of the timestamp column
    pub timestamp_format: Box<str>,
}
//
impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            timestamp_column: "DATE OCC".into(),
            timestamp_format: "%m/%d/%Y %I:%M:%S %p".into(),
        }
    }
}

/// Which months make it to the report
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RankConfig {
    /// Highest rank that is kept in the report
    pub top: NonZeroUsize,

    /// Treatment of months with identical incident counts
    pub policy: RankingPolicy,
}
//
impl Default for RankConfig {
    fn default() -> Self {
        Self {
            top: NonZeroUsize::new(3).expect("3 is not 0"),
            policy: RankingPolicy::Competition,
        }
    }
}

/// Presentation of the report
///
/// Column widths are minimums: values that do not fit are written in full.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ReportLayout {
    pub year_width: usize,
    pub month_width: usize,
    pub total_width: usize,
    pub rank_width: usize,

    /// Max number of rows that are displayed on the console
    pub preview_rows: usize,
}
//
impl Default for ReportLayout {
    fn default() -> Self {
        Self {
            year_width: 4,
            month_width: 5,
            total_width: 11,
            rank_width: 7,
            preview_rows: 60,
        }
    }
}
