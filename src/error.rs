//! Failures that abort a run
//!
//! Rows whose timestamp cannot be parsed are not errors: they are dropped by
//! the [`normalize`](crate::normalize) stage and only show up in its
//! statistics.

use std::{error::Error, path::PathBuf};

/// Boxed underlying cause of a [`PipelineError`]
pub type Cause = Box<dyn Error + Send + Sync + 'static>;

/// Fatal conditions of the crime report pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An input source could not be opened or its schema could not be read
    #[error("input source {} is unavailable", path.display())]
    SourceUnavailable {
        /// File or directory that was being opened
        path: PathBuf,
        /// What went wrong
        #[source]
        source: Cause,
    },

    /// An input source failed while its rows were being read
    #[error("failed to read rows from {}", path.display())]
    SourceRead {
        /// File that was being read
        path: PathBuf,
        /// What went wrong
        #[source]
        source: Cause,
    },

    /// Two inputs cannot be merged because their fields differ
    #[error("schemas of {} and {} are incompatible: {detail}", first.display(), second.display())]
    SchemaMismatch {
        /// Input whose schema serves as the reference
        first: PathBuf,
        /// Input that disagrees with the reference
        second: PathBuf,
        /// First difference that was found
        detail: String,
    },

    /// The timestamp column is not part of an input's schema
    #[error("{} has no {column:?} column", path.display())]
    MissingColumn {
        /// Input that lacks the column
        path: PathBuf,
        /// Name of the column that was looked up
        column: String,
    },

    /// The report could not be written to its destination
    #[error("failed to write the report to {}", path.display())]
    DestinationWriteFailure {
        /// Destination of the report
        path: PathBuf,
        /// What went wrong
        #[source]
        source: Cause,
    },
}
//
impl PipelineError {
    /// Error constructor for use with `map_err` when opening a source
    pub fn unavailable<E: Into<Cause>>(path: impl Into<PathBuf>) -> impl FnOnce(E) -> Self {
        let path = path.into();
        move |e| Self::SourceUnavailable {
            path,
            source: e.into(),
        }
    }

    /// Error constructor for use with `map_err` when reading rows
    pub fn read<E: Into<Cause>>(path: impl Into<PathBuf>) -> impl FnOnce(E) -> Self {
        let path = path.into();
        move |e| Self::SourceRead {
            path,
            source: e.into(),
        }
    }

    /// Error constructor for use with `map_err` when writing the report
    pub fn destination<E: Into<Cause>>(path: impl Into<PathBuf>) -> impl FnOnce(E) -> Self {
        let path = path.into();
        move |e| Self::DestinationWriteFailure {
            path,
            source: e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn messages_name_the_offending_path() {
        let e = PipelineError::unavailable("/data/crime_2010.parquet")(io::Error::new(
            io::ErrorKind::NotFound,
            "no such file",
        ));
        assert_eq!(
            e.to_string(),
            "input source /data/crime_2010.parquet is unavailable"
        );
        assert_eq!(e.source().map(ToString::to_string).as_deref(), Some("no such file"));
    }

    #[test]
    fn schema_mismatch_reports_detail() {
        let e = PipelineError::SchemaMismatch {
            first: "a.csv".into(),
            second: "b.csv".into(),
            detail: "field #2 is named \"AREA\" vs \"AREA NAME\"".into(),
        };
        assert!(e.to_string().ends_with("field #2 is named \"AREA\" vs \"AREA NAME\""));
    }
}
