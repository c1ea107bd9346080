//! In-memory layout of the merged incident dataset
//!
//! Only the timestamp column of the inputs is kept in memory. Rows are stored
//! in blocks of a configurable size, which are independent from each other
//! and can thus be processed in parallel.

pub mod builder;

use std::fmt;

/// Input dataset that a row comes from
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SourceId {
    /// First input on the command line
    First,

    /// Second input on the command line
    Second,
}
//
impl SourceId {
    /// Both inputs, in merge order
    pub const ALL: [Self; 2] = [Self::First, Self::Second];

    /// Index of this input in per-source arrays
    pub fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }
}
//
impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "first source"),
            Self::Second => write!(f, "second source"),
        }
    }
}

/// Rows from both inputs, concatenated without deduplication
///
/// Rows from the first input come before rows from the second input, and
/// within an input rows keep the order in which they were read.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Dataset(Box<[DatasetBlock]>);
//
impl Dataset {
    /// Concatenate the blocks read from both inputs
    ///
    /// A row that is present in both inputs will be present twice in the
    /// merged dataset.
    pub fn merge(first: Vec<DatasetBlock>, second: Vec<DatasetBlock>) -> Self {
        debug_assert!(first.iter().all(|block| block.source == SourceId::First));
        debug_assert!(second.iter().all(|block| block.source == SourceId::Second));
        let mut blocks = first;
        blocks.extend(second);
        Self(blocks.into())
    }

    /// Access the dataset in a block-wise fashion
    pub fn blocks(&self) -> &[DatasetBlock] {
        &self.0[..]
    }

    /// Iterate sequentially over all rows of the dataset
    #[cfg(test)]
    pub fn rows(&self) -> impl Iterator<Item = IncidentRow<'_>> {
        self.blocks().iter().flat_map(DatasetBlock::rows)
    }

    /// Number of rows from each input
    pub fn rows_per_source(&self) -> [usize; 2] {
        let mut rows = [0; 2];
        for block in self.blocks() {
            rows[block.source().index()] += block.len();
        }
        rows
    }
}

/// Block of rows from a [`Dataset`]
///
/// All rows of a block come from the same input.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DatasetBlock {
    /// Input that these rows were read from
    source: SourceId,

    /// Offsets that mark the end of each row's timestamp in "timestamps"
    timestamp_ends: Box<[usize]>,

    /// Concatenated timestamp text from all rows
    timestamps: Box<str>,

    /// Truth that each row has a timestamp, as opposed to an empty cell
    has_timestamp: Box<[bool]>,
}
//
impl DatasetBlock {
    /// Input that these rows were read from
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Number of rows in this block
    pub fn len(&self) -> usize {
        self.timestamp_ends.len()
    }

    /// Iterate over rows in input order
    pub fn rows(&self) -> impl Iterator<Item = IncidentRow<'_>> {
        let mut last_end = 0;
        (self.timestamp_ends.iter().copied())
            .zip(self.has_timestamp.iter().copied())
            .map(move |(end, has_timestamp)| {
                let timestamp = &self.timestamps[last_end..end];
                last_end = end;
                IncidentRow {
                    source: self.source,
                    timestamp: has_timestamp.then_some(timestamp),
                }
            })
    }
}

/// Row from the dataset
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct IncidentRow<'block> {
    /// Input that the row was read from
    pub source: SourceId,

    /// Raw text of the time of occurence, if the cell was not empty
    pub timestamp: Option<&'block str>,
}
