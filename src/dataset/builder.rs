//! Mechanism for building [`DatasetBlock`]s from rows as they are read

use super::{DatasetBlock, SourceId};
use std::num::NonZeroUsize;

/// Accumulator of rows from one input
///
/// Rows are grouped into blocks of `chunk` rows. Once you're done with the
/// input, call [`finish()`](Self::finish) to get the blocks.
#[derive(Debug)]
pub struct BlockSink {
    /// Max number of rows per block
    chunk: NonZeroUsize,

    /// Block that rows are currently being added to
    current: DatasetBlockBuilder,

    /// Blocks that are full
    full: Vec<DatasetBlock>,
}
//
impl BlockSink {
    /// Set up the accumulator
    pub fn new(source: SourceId, chunk: NonZeroUsize) -> Self {
        Self {
            chunk,
            current: DatasetBlockBuilder::new(source),
            full: Vec::new(),
        }
    }

    /// Record the timestamp cell of a new row
    ///
    /// Empty cells are recorded as missing timestamps.
    pub fn push(&mut self, timestamp: Option<&str>) {
        self.current.push(timestamp.filter(|text| !text.is_empty()));
        if self.current.len() == self.chunk.get() {
            let source = self.current.source;
            let full = std::mem::replace(&mut self.current, DatasetBlockBuilder::new(source));
            self.full.push(full.build());
        }
    }

    /// Number of rows recorded so far
    pub fn len(&self) -> usize {
        self.full.len() * self.chunk.get() + self.current.len()
    }

    /// Export the blocks, in row order
    pub fn finish(mut self) -> Vec<DatasetBlock> {
        if self.current.len() > 0 {
            self.full.push(self.current.build());
        }
        self.full
    }
}

/// Accumulator of rows in the [`DatasetBlock`] layout
///
/// All fields have the same meaning as in [`DatasetBlock`].
#[derive(Debug)]
struct DatasetBlockBuilder {
    source: SourceId,
    timestamp_ends: Vec<usize>,
    timestamps: String,
    has_timestamp: Vec<bool>,
}
//
impl DatasetBlockBuilder {
    /// Start a new block
    fn new(source: SourceId) -> Self {
        Self {
            source,
            timestamp_ends: Vec::new(),
            timestamps: String::new(),
            has_timestamp: Vec::new(),
        }
    }

    /// Add a row to the block
    fn push(&mut self, timestamp: Option<&str>) {
        self.timestamps.push_str(timestamp.unwrap_or_default());
        self.timestamp_ends.push(self.timestamps.len());
        self.has_timestamp.push(timestamp.is_some());
    }

    /// Number of rows in the block
    fn len(&self) -> usize {
        self.timestamp_ends.len()
    }

    /// Build the final dataset block
    fn build(self) -> DatasetBlock {
        DatasetBlock {
            source: self.source,
            timestamp_ends: self.timestamp_ends.into(),
            timestamps: self.timestamps.into(),
            has_timestamp: self.has_timestamp.into(),
        }
    }
}
