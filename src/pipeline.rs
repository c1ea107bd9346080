//! End-to-end processing of one run: load, normalize, count, rank, report

use crate::{
    aggregate,
    config::Config,
    dataset::Dataset,
    normalize::{NormalizeStats, TemporalNormalizer},
    output::{self, ReportLine},
    progress::ProgressReport,
    rank, source, Result,
};
use anyhow::Context;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// Resources that live for the duration of a single run
///
/// Every run sets up its own context and tears it down when it completes, so
/// that consecutive runs in one process do not share any state.
struct RunContext {
    /// Configuration of the run
    config: Arc<Config>,

    /// Worker threads for row processing
    pool: ThreadPool,

    /// Progress reporting
    report: ProgressReport,
}
//
impl RunContext {
    /// Set up the resources of a run
    fn new(config: Arc<Config>, report: &ProgressReport) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|idx| format!("worker-{idx}"));
        if let Some(threads) = config.threads {
            builder = builder.num_threads(threads.get());
        }
        let pool = builder
            .build()
            .context("setting up the worker thread pool")?;
        log::debug!("Processing rows on {} threads", pool.current_num_threads());
        Ok(Self {
            config,
            pool,
            report: report.clone(),
        })
    }

    /// Turn a merged dataset into ranked report lines
    ///
    /// This is CPU-bound work, which runs on the worker threads.
    fn process(&self, dataset: &Dataset) -> (Vec<ReportLine>, RunSummary) {
        self.pool.install(|| {
            let normalizer = TemporalNormalizer::new(&self.config.normalize);
            let incidents = normalizer.normalize_dataset(dataset, &self.report);
            let months = aggregate::count_months(&incidents, &self.report);
            let num_months = months.len();
            let ranked = rank::pick_top_months(&self.config.rank, months);
            let lines = output::format_lines(&self.config.layout, &ranked);
            let summary = RunSummary {
                normalize: *incidents.stats(),
                num_months,
                num_lines: lines.len(),
            };
            (lines, summary)
        })
    }
}

/// Outcome of a successful run
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    /// Lines of the report, which were written to the output
    pub lines: Vec<ReportLine>,

    /// Statistics about the run
    pub summary: RunSummary,
}

/// Statistics about a run
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunSummary {
    /// Outcome of timestamp normalization
    pub normalize: NormalizeStats,

    /// Number of distinct months with at least one incident
    pub num_months: usize,

    /// Number of lines in the report, header excluded
    pub num_lines: usize,
}

/// Produce the top months report for the configured inputs
///
/// On failure, the previous report at the destination (if any) is left
/// untouched.
pub async fn run(config: Arc<Config>, report: &ProgressReport) -> Result<RunOutcome> {
    let context = RunContext::new(config.clone(), report)?;

    // Load both inputs
    let dataset = source::load_and_merge(config.clone(), report).await?;

    // Crunch the rows without blocking the async runtime
    let (context, (lines, summary)) = tokio::task::spawn_blocking(move || {
        let result = context.process(&dataset);
        (context, result)
    })
    .await
    .context("processing incident rows")?;

    // Persist the report
    output::write_report(&lines, &config.output).await?;
    let total = summary.normalize.total();
    log::info!(
        "Ranked {} months from {} usable rows out of {}, reported {} of them",
        summary.num_months,
        total.accepted,
        total.rows(),
        summary.num_lines
    );
    drop(context);
    Ok(RunOutcome { lines, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::SourceId,
        error::PipelineError,
        source::tests::{config, write_csv, write_parquet},
    };
    use std::{
        num::NonZeroUsize,
        path::{Path, PathBuf},
    };

    /// Timestamps of `count` incidents on the 15th of a month
    fn month(year: i32, month: u32, count: usize) -> Vec<String> {
        (0..count)
            .map(|hour| format!("{month:02}/15/{year} {:02}:30:00 AM", hour % 12 + 1))
            .collect()
    }

    fn write(path: &Path, timestamps: &[String]) {
        let timestamps = timestamps.iter().map(String::as_str).collect::<Vec<_>>();
        write_csv(path, &timestamps);
    }

    fn joined(lines: &[ReportLine]) -> Vec<String> {
        lines.iter().map(|line| line.fields().join("|")).collect()
    }

    /// Two sources whose 2020 months have 50, 50, 40 and 10 incidents
    fn sample(dir: &Path) -> (PathBuf, PathBuf) {
        let first = dir.join("archive.csv");
        let second = dir.join("current.csv");
        let mut archive = month(2020, 1, 30);
        archive.extend(month(2020, 2, 50));
        archive.extend(month(2020, 4, 10));
        let mut current = month(2020, 1, 20);
        current.extend(month(2020, 3, 40));
        write(&first, &archive);
        write(&second, &current);
        (first, second)
    }

    #[tokio::test]
    async fn reports_top_months() {
        let dir = tempfile::tempdir().unwrap();
        let (first, second) = sample(dir.path());
        let output = dir.path().join("report.csv");
        let config = Arc::new(config(&first, &second, &output));

        let outcome = run(config, &ProgressReport::hidden()).await.unwrap();
        let expected = [
            "2020|1    |50         |1      ",
            "2020|2    |50         |1      ",
            "2020|3    |40         |3      ",
        ];
        assert_eq!(joined(&outcome.lines), expected);
        assert_eq!(outcome.summary.num_months, 4);
        assert_eq!(outcome.summary.num_lines, 3);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            format!("Year|Month|Crime Total|Ranking\n{}\n", expected.join("\n"))
        );
    }

    #[tokio::test]
    async fn result_does_not_depend_on_parallelism() {
        let dir = tempfile::tempdir().unwrap();
        let (first, second) = sample(dir.path());
        let mut reports = Vec::new();
        for (threads, chunk) in [(1, 1), (4, 3), (2, 1000)] {
            let output = dir.path().join(format!("report-{threads}-{chunk}.csv"));
            let mut config = config(&first, &second, &output);
            config.threads = NonZeroUsize::new(threads);
            config.memory_chunk = NonZeroUsize::new(chunk).unwrap();
            run(Arc::new(config), &ProgressReport::hidden())
                .await
                .unwrap();
            reports.push(std::fs::read_to_string(&output).unwrap());
        }
        assert!(reports.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn malformed_rows_are_left_out() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        write_csv(
            &first,
            &["01/15/2020 08:00:00 AM", "not-a-date", "02/10/2020 09:00:00 PM"],
        );
        write_csv(&second, &["", "02/11/2020 10:00:00 AM"]);
        let output = dir.path().join("report.csv");

        let outcome = run(
            Arc::new(config(&first, &second, &output)),
            &ProgressReport::hidden(),
        )
        .await
        .unwrap();
        assert_eq!(
            joined(&outcome.lines),
            [
                "2020|2    |2          |1      ",
                "2020|1    |1          |2      ",
            ]
        );
        let stats = outcome.summary.normalize;
        assert_eq!(stats.source(SourceId::First).unparseable, 1);
        assert_eq!(stats.source(SourceId::Second).missing, 1);
        assert_eq!(stats.total().accepted, 3);
    }

    #[tokio::test]
    async fn duplicates_across_sources_are_counted_twice() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.parquet");
        let second = dir.path().join("b.parquet");
        write_parquet(&first, &[Some("05/05/2019 05:05:05 PM")]);
        write_parquet(&second, &[Some("05/05/2019 05:05:05 PM")]);
        let output = dir.path().join("report.csv");

        let outcome = run(
            Arc::new(config(&first, &second, &output)),
            &ProgressReport::hidden(),
        )
        .await
        .unwrap();
        assert_eq!(joined(&outcome.lines), ["2019|5    |2          |1      "]);
    }

    #[tokio::test]
    async fn years_come_in_ascending_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        let mut archive = month(2019, 12, 3);
        archive.extend(month(2018, 6, 1));
        write(&first, &archive);
        write(&second, &month(2010, 1, 2));
        let output = dir.path().join("report.csv");

        let outcome = run(
            Arc::new(config(&first, &second, &output)),
            &ProgressReport::hidden(),
        )
        .await
        .unwrap();
        let years = outcome
            .lines
            .iter()
            .map(|line| line.year.as_str())
            .collect::<Vec<_>>();
        assert_eq!(years, ["2010", "2018", "2019"]);
    }

    #[tokio::test]
    async fn failed_runs_leave_the_previous_report_alone() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        write_csv(&first, &["01/15/2020 08:00:00 AM"]);
        std::fs::write(&second, "DR_NO,TIME OCC\n1,0800\n").unwrap();
        let output = dir.path().join("report.csv");
        std::fs::write(&output, "previous").unwrap();

        let error = run(
            Arc::new(config(&first, &second, &output)),
            &ProgressReport::hidden(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<PipelineError>(),
            Some(PipelineError::SchemaMismatch { .. })
        ));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "previous");
    }

    #[tokio::test]
    async fn missing_inputs_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        write_csv(&first, &["01/15/2020 08:00:00 AM"]);
        let output = dir.path().join("report.csv");

        let error = run(
            Arc::new(config(&first, &dir.path().join("nope.csv"), &output)),
            &ProgressReport::hidden(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<PipelineError>(),
            Some(PipelineError::SourceUnavailable { .. })
        ));
        assert!(!output.exists());
    }
}
