//! Selection of the top months of each year

use crate::{aggregate::MonthCount, config::RankConfig, Rank, Year};
use clap::ValueEnum;
use rayon::prelude::*;
use std::{cmp::Reverse, collections::BTreeMap};

/// Ranking of months with identical incident counts
///
/// Within a year, months are ordered by decreasing incident count, and months
/// with identical counts are ordered by increasing month number.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, ValueEnum)]
pub enum RankingPolicy {
    /// Tied months share a rank, and the ranks after a tie are skipped
    ///
    /// Counts [50, 50, 40] get ranks [1, 1, 3].
    Competition,

    /// Tied months share a rank, and no rank is skipped
    ///
    /// Counts [50, 50, 40] get ranks [1, 1, 2].
    Dense,

    /// Every month gets its own rank, ties are broken by month number
    ///
    /// Counts [50, 50, 40] get ranks [1, 2, 3].
    RowNumber,
}

/// Month with its rank within its year
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RankedMonth {
    /// Incident count of the month
    pub count: MonthCount,

    /// Rank of the month within its year
    pub rank: Rank,
}

/// Rank the months of each year and keep the top ones
///
/// The output is sorted by increasing year, then increasing rank, then
/// increasing month number. Every month whose rank is within the configured
/// limit is kept, so with [`RankingPolicy::Competition`] and
/// [`RankingPolicy::Dense`], ties can bring more months than the limit.
pub fn pick_top_months(config: &RankConfig, months: Vec<MonthCount>) -> Vec<RankedMonth> {
    // Group months by year
    let mut years = BTreeMap::<Year, Vec<MonthCount>>::new();
    for month in months {
        years.entry(month.year).or_default().push(month);
    }
    let num_years = years.len();

    // Rank the months of each year independently
    let mut ranked = (years.into_par_iter())
        .flat_map_iter(|(_year, months)| rank_year(config, months))
        .collect::<Vec<_>>();
    ranked.sort_unstable_by_key(|ranked| (ranked.count.year, ranked.rank, ranked.count.month));
    log::info!(
        "Kept {} months with rank <= {} across {num_years} years",
        ranked.len(),
        config.top
    );
    ranked
}

/// Rank the months of a single year and keep the top ones
fn rank_year(config: &RankConfig, mut months: Vec<MonthCount>) -> Vec<RankedMonth> {
    months.sort_unstable_by_key(|month| (Reverse(month.total), month.month));
    let mut ranked = Vec::with_capacity(config.top.get().min(months.len()));
    let mut previous: Option<RankedMonth> = None;
    for (position, count) in (1..).zip(months) {
        let tied = previous.filter(|previous| previous.count.total == count.total);
        let rank = match (config.policy, tied) {
            (RankingPolicy::Competition | RankingPolicy::Dense, Some(tied)) => tied.rank,
            (RankingPolicy::Dense, None) => previous.map_or(Rank::MIN, |previous| {
                previous.rank.checked_add(1).expect("rank overflow")
            }),
            (RankingPolicy::Competition | RankingPolicy::RowNumber, _) => {
                Rank::new(position).expect("positions start at 1")
            }
        };
        // Ranks never decrease in this order, so nothing else can make the cut
        if rank > config.top {
            log::trace!("Dropped {count:?} with rank {rank}");
            break;
        }
        let current = RankedMonth { count, rank };
        ranked.push(current);
        previous = Some(current);
    }
    ranked
}
