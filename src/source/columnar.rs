//! Reading of Apache Parquet data files

use super::{track_file, SourceSchema};
use crate::{
    dataset::{builder::BlockSink, DatasetBlock},
    error::PipelineError,
    progress::{ProgressReport, Work},
};
use arrow::{array::AsArray, compute::cast, datatypes::DataType};
use futures::TryStreamExt;
use parquet::arrow::{ParquetRecordBatchStreamBuilder, ProjectionMask};
use std::{path::Path, pin::pin};
use tokio::fs::File;

/// Open a Parquet file and decode its metadata
async fn open(path: &Path) -> Result<ParquetRecordBatchStreamBuilder<File>, PipelineError> {
    let file = File::open(path)
        .await
        .map_err(PipelineError::unavailable(path))?;
    ParquetRecordBatchStreamBuilder::new(file)
        .await
        .map_err(PipelineError::unavailable(path))
}

/// Read the schema of a Parquet file
pub async fn schema(path: &Path) -> Result<SourceSchema, PipelineError> {
    let builder = open(path).await?;
    Ok(SourceSchema::from_arrow(builder.schema()))
}

/// Read the timestamp column of a Parquet file
///
/// Only the timestamp column is decoded. Values of non-text columns are
/// converted to text so that the timestamp format decides what to make of
/// them.
pub async fn read(
    path: &Path,
    column: usize,
    mut sink: BlockSink,
    report: &ProgressReport,
    what: String,
) -> Result<Vec<DatasetBlock>, PipelineError> {
    let builder = open(path).await?;
    let num_rows = builder.metadata().file_metadata().num_rows();
    let progress = track_file(report, what, Work::Rows(num_rows.max(0) as u64));
    let projection = ProjectionMask::roots(builder.parquet_schema(), [column]);
    let batches = builder
        .with_projection(projection)
        .build()
        .map_err(PipelineError::read(path))?;
    let mut batches = pin!(batches);
    while let Some(batch) = batches
        .try_next()
        .await
        .map_err(PipelineError::read(path))?
    {
        let timestamps =
            cast(batch.column(0), &DataType::Utf8).map_err(PipelineError::read(path))?;
        for timestamp in timestamps.as_string::<i32>() {
            sink.push(timestamp);
        }
        progress.make_progress(batch.num_rows() as u64);
    }
    progress.finish();
    Ok(sink.finish())
}
