//! This program merges two extracts of a police department's crime incident
//! records (typically an archive covering past years and a feed covering the
//! current period) and reports, for every calendar year, the three months with
//! the largest number of recorded incidents.

mod aggregate;
mod config;
mod dataset;
mod error;
mod normalize;
mod output;
mod pipeline;
mod progress;
mod rank;
mod source;

use crate::{
    config::{Config, NormalizeConfig, RankConfig, ReportLayout},
    progress::ProgressReport,
    rank::RankingPolicy,
};
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::{
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
};
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Report the months with the most recorded crime incidents, year by year
///
/// Both inputs must share the same fields. Each of them can be a Parquet file,
/// a CSV/TSV file (optionally gzipped) or a directory of such files.
#[derive(Parser, Debug)]
#[command(version, author)]
struct Args {
    /// First incident dataset, e.g. the 2010-2019 archive
    first: PathBuf,

    /// Second incident dataset, e.g. the 2020-present feed
    second: PathBuf,

    /// Where the `|`-separated report should be written
    ///
    /// Any existing file at this location is replaced.
    #[arg(short, long, default_value = "top_months.csv")]
    output: PathBuf,

    /// Name of the column that holds the time of occurence of incidents
    ///
    /// The column name is matched case-insensitively.
    #[arg(short = 'c', long, default_value_t = NormalizeConfig::default().timestamp_column)]
    timestamp_column: Box<str>,

    /// chrono format of the time of occurence of incidents
    ///
    /// Rows whose time of occurence does not match this format are left out of
    /// the monthly counts.
    #[arg(short = 'f', long, default_value_t = NormalizeConfig::default().timestamp_format)]
    timestamp_format: Box<str>,

    /// Number of top months to report per year
    #[arg(short = 'k', long = "top", default_value_t = RankConfig::default().top)]
    top: NonZeroUsize,

    /// How months with identical incident counts are ranked
    #[arg(short, long, value_enum, default_value_t = RankConfig::default().policy)]
    ranking: RankingPolicy,

    /// Minimal width of the "Year" report column
    #[arg(long, default_value_t = ReportLayout::default().year_width)]
    year_width: usize,

    /// Minimal width of the "Month" report column
    #[arg(long, default_value_t = ReportLayout::default().month_width)]
    month_width: usize,

    /// Minimal width of the "Crime Total" report column
    #[arg(long, default_value_t = ReportLayout::default().total_width)]
    total_width: usize,

    /// Minimal width of the "Ranking" report column
    #[arg(long, default_value_t = ReportLayout::default().rank_width)]
    rank_width: usize,

    /// Max number of report rows that are displayed on stdout
    #[arg(short, long, default_value_t = ReportLayout::default().preview_rows)]
    preview_rows: usize,

    /// In-memory dataset chunk size
    ///
    /// Rows are loaded into memory in blocks of this many rows, which are then
    /// processed in parallel. If it is set too low, the overhead of
    /// parallel tasks will not be amortized. If it is set too high, parallel
    /// load balancing will be less effective.
    #[arg(long, default_value = "65536")]
    memory_chunk: NonZeroUsize,

    /// Number of worker threads for row processing
    ///
    /// Defaults to the number of CPU cores.
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Where log messages go
    #[arg(long, value_enum, default_value_t = LogTarget::Syslog)]
    log_to: LogTarget,

    /// Do not display progress bars
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
}
//
impl Args {
    /// Decode and validate CLI arguments
    pub fn parse_and_check() -> Result<Self> {
        let args = Args::parse();
        args.check()?;
        Ok(args)
    }

    /// Check CLI arguments for basic sanity
    fn check(&self) -> Result<()> {
        anyhow::ensure!(
            !self.timestamp_column.trim().is_empty(),
            "the timestamp column name must not be empty"
        );
        normalize::check_format(&self.timestamp_format)?;
        Ok(())
    }
}

/// Destination of log messages
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum LogTarget {
    /// System log, user facility
    Syslog,

    /// Standard error, filtered by the RUST_LOG environment variable
    Stderr,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Decode CLI arguments
    let args = Args::parse_and_check()?;

    // Set up logging
    setup_logging(args.log_to);

    // Set up progress reporting
    let report = if args.quiet {
        ProgressReport::hidden()
    } else {
        ProgressReport::new()
    };

    // Run the pipeline
    let config = Config::new(args);
    let outcome = pipeline::run(config.clone(), &report).await?;
    log::debug!("Run summary: {:?}", outcome.summary);

    // Display the head of the report
    {
        let stdout = tokio::io::stdout();
        let mut stdout = BufWriter::new(stdout);
        stdout
            .write_all(
                format!(
                    "The {} months with the highest number of recorded crimes, by ascending year and decreasing number of records:\n\n",
                    config.rank.top
                )
                .as_bytes(),
            )
            .await?;
        let preview = output::render_preview(&outcome.lines, config.layout.preview_rows);
        stdout.write_all(preview.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Use anyhow for Result type erasure
pub use anyhow::Result;

/// Year of Gregorian Calendar
pub type Year = i32;

/// Month of Gregorian Calendar, from 1 to 12
pub type Month = u32;

/// Number of incidents recorded over a month
///
/// A month only gets a count once an incident has been seen, so the count is
/// never zero. Counting rows that fit in memory cannot overflow 64 bits.
pub type IncidentCount = NonZeroU64;

/// Rank of a month within its year, starting at 1
pub type Rank = NonZeroUsize;

/// Addition operator for NonZeroU64
pub fn add_nz_u64(x: NonZeroU64, y: NonZeroU64) -> NonZeroU64 {
    x.checked_add(y.get())
        .expect("overflow while adding NonZeroU64s")
}

/// Set up logging
fn setup_logging(target: LogTarget) {
    let level = if cfg!(feature = "log-trace") {
        LevelFilter::Trace
    } else if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if target == LogTarget::Syslog {
        match syslog::init(syslog::Facility::LOG_USER, level, None) {
            Ok(()) => return,
            // No syslog daemon around, typical of containers
            Err(e) => eprintln!("syslog is unavailable ({e}), logging to stderr instead"),
        }
    }
    pretty_env_logger::init();
}

/// Use jemalloc for improved multi-thread performance
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
