//! Monthly incident counts

use crate::{
    add_nz_u64,
    normalize::{NormalizedDataset, YearMonth},
    progress::{ProgressConfig, ProgressReport, Work},
    IncidentCount, Month, Year,
};
use rayon::prelude::*;
use std::collections::{hash_map, HashMap};

/// Number of incidents recorded over a calendar month
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MonthCount {
    /// Year of the month
    pub year: Year,

    /// Month of the year, from 1 to 12
    pub month: Month,

    /// Number of incidents
    pub total: IncidentCount,
}

/// Count incidents, month by month
///
/// Each block of incidents is counted on its own, and the partial counts are
/// then summed up, so the result does not depend on the block structure.
/// Months are returned in chronological order.
pub fn count_months(incidents: &NormalizedDataset, report: &ProgressReport) -> Vec<MonthCount> {
    let progress = report.add(
        "Counting incidents by month",
        ProgressConfig::new(Work::Steps(incidents.blocks().len())),
    );
    let counts = (incidents.blocks().par_iter())
        // First count incidents on each thread...
        .fold(MonthCounts::new, |mut counts, block| {
            for incident in block.iter() {
                counts.add(incident.period, IncidentCount::MIN);
            }
            progress.make_progress(1);
            counts
        })
        // ...then merge thread results into a global result
        .reduce(MonthCounts::new, MonthCounts::merge);
    progress.finish();

    let mut months = counts.into_vec();
    months.sort_unstable_by_key(|count| (count.year, count.month));
    log::info!(
        "Counted {} incidents over {} distinct months",
        months.iter().map(|count| count.total.get()).sum::<u64>(),
        months.len()
    );
    months
}

/// Accumulator of monthly incident counts
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct MonthCounts(HashMap<YearMonth, IncidentCount>);
//
impl MonthCounts {
    /// Set up an empty accumulator
    fn new() -> Self {
        Self::default()
    }

    /// Record incidents for a month
    fn add(&mut self, period: YearMonth, count: IncidentCount) {
        match self.0.entry(period) {
            hash_map::Entry::Occupied(o) => {
                let total = o.into_mut();
                *total = add_nz_u64(*total, count);
            }
            hash_map::Entry::Vacant(v) => {
                v.insert(count);
            }
        }
    }

    /// Merge counts from a disjoint set of incidents
    fn merge(self, other: Self) -> Self {
        let (mut dst, src) = if self.0.len() >= other.0.len() {
            (self, other)
        } else {
            (other, self)
        };
        for (period, count) in src.0 {
            dst.add(period, count);
        }
        dst
    }

    /// Extract the counts, in no particular order
    fn into_vec(self) -> Vec<MonthCount> {
        self.0
            .into_iter()
            .map(|(YearMonth { year, month }, total)| MonthCount { year, month, total })
            .collect()
    }
}
