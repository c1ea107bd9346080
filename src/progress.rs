//! Progress reporting infrastructure

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::borrow::Cow;

/// CLI progress report of ongoing pipeline stages
///
/// To avoid corrupted terminal output, you should not write anything to stdout
/// or stderr yourself as long as a report is being displayed. Please use logs
/// for debug messages.
#[derive(Clone, Debug, Default)]
pub struct ProgressReport(MultiProgress);
//
impl ProgressReport {
    /// Prepare to report progress on stderr
    pub fn new() -> Self {
        Self::default()
    }

    /// Track progress without displaying anything
    pub fn hidden() -> Self {
        Self(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
    }

    /// Prepare to report on a new operation
    pub fn add(
        &self,
        what: impl Into<Cow<'static, str>>,
        config: ProgressConfig,
    ) -> ProgressTracker {
        let ProgressConfig {
            initial_work,
            show_rate_eta,
        } = config;
        let bar = ProgressBar::new(initial_work.into()).with_prefix(what.into());
        let style_trailer = match (initial_work, show_rate_eta) {
            (Work::Steps(_), false) => "{pos}/{len}",
            (Work::Steps(_), true) => "{pos}/{len} ({per_sec})",
            (Work::Rows(_), false) => "{percent:>2}%",
            (Work::Rows(_), true) => "{percent:>2}% ({human_pos} rows, ~{eta} left)",
            (Work::Bytes(_), false) => "{decimal_bytes}/{decimal_total_bytes}",
            (Work::Bytes(_), true) => {
                "{decimal_bytes}/{decimal_total_bytes} ({decimal_bytes_per_sec})"
            }
        };
        let bar = bar.with_style(
            ProgressStyle::with_template(&format!("{{prefix}} {{wide_bar}} {style_trailer}"))
                .expect("all styles above should be valid indicatif styles"),
        );
        // Nothing to do, nothing to show
        let added = u64::from(initial_work) > 0;
        if added {
            self.0.add(bar.clone());
        }
        ProgressTracker {
            bar,
            report: self.0.clone(),
            added,
        }
    }
}

/// Progress bar configuration
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct ProgressConfig {
    /// Initial length of the progress bar
    initial_work: Work,

    /// Show the completion rate or estimated remaining time, depending on work
    show_rate_eta: bool,
}
//
impl ProgressConfig {
    /// Default configuration, with some initial amount of work
    pub fn new(initial_work: Work) -> Self {
        Self {
            initial_work,
            show_rate_eta: true,
        }
    }

    /// Disable display of the completion rate and remaining time
    pub fn dont_show_rate_eta(self) -> Self {
        Self {
            show_rate_eta: false,
            ..self
        }
    }
}

/// Work whose progression can be tracked
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Work {
    /// Discrete steps (files, blocks...), with a precise count display
    Steps(usize),

    /// Dataset rows, with a percentage-based display
    Rows(u64),

    /// Bytes to be read from storage
    Bytes(u64),
}
//
impl From<Work> for u64 {
    fn from(value: Work) -> Self {
        match value {
            Work::Steps(s) => s as u64,
            Work::Rows(r) => r,
            Work::Bytes(b) => b,
        }
    }
}

/// Mechanism to track progress
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    /// Progress bar for this specific operation
    bar: ProgressBar,

    /// Underlying pipeline report
    report: MultiProgress,

    /// Truth that the progress bar was added to the report
    added: bool,
}
//
impl ProgressTracker {
    /// Show that a certain amount of progress has been made
    ///
    /// Returns truth that the progress bar has reached its maximum value. Work
    /// beyond the announced amount (e.g. a file that grew while being read)
    /// extends the bar instead of overflowing it.
    pub fn make_progress(&self, progress: u64) -> bool {
        self.bar.inc(progress);
        let current = self.bar.position();
        let max = self.bar.length().unwrap_or(0);
        if current > max {
            self.bar.set_length(current);
        }

        // Hide progress bar once done
        let finished = current >= max;
        if finished {
            self.finish();
        }
        finished
    }

    /// Remove the progress bar from the report
    pub fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
            if self.added {
                self.report.remove(&self.bar);
            }
        }
    }
}
