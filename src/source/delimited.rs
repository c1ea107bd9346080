//! Reading of delimited text data files (CSV, TSV), possibly gzipped

use super::{track_file, SourceSchema};
use crate::{
    dataset::{builder::BlockSink, DatasetBlock},
    error::PipelineError,
    progress::{ProgressReport, Work},
};
use async_compression::tokio::bufread::GzipDecoder;
use csv_async::{AsyncReader, AsyncReaderBuilder};
use futures::TryStreamExt;
use std::{path::Path, pin::pin};
use tokio::{
    fs::File,
    io::{AsyncRead, BufReader},
};
use tokio_util::io::InspectReader;

/// Decoded text of a data file
type TextReader = Box<dyn AsyncRead + Send + Unpin>;

/// Open a delimited file
///
/// `on_read` is called on every block of bytes read from storage, before
/// decompression.
async fn open(
    path: &Path,
    delimiter: u8,
    gzip: bool,
    on_read: impl FnMut(&[u8]) + Send + Unpin + 'static,
) -> Result<AsyncReader<TextReader>, PipelineError> {
    let file = File::open(path)
        .await
        .map_err(PipelineError::unavailable(path))?;
    let bytes = BufReader::new(InspectReader::new(file, on_read));
    let text: TextReader = if gzip {
        let mut decoder = GzipDecoder::new(bytes);
        decoder.multiple_members(true);
        Box::new(decoder)
    } else {
        Box::new(bytes)
    };
    // Rows with missing trailing cells are accepted, these cells are empty
    Ok(AsyncReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .create_reader(text))
}

/// Read the schema of a delimited file from its header row
pub async fn schema(path: &Path, delimiter: u8, gzip: bool) -> Result<SourceSchema, PipelineError> {
    let mut reader = open(path, delimiter, gzip, |_: &[u8]| {}).await?;
    let header = reader
        .headers()
        .await
        .map_err(PipelineError::unavailable(path))?;
    Ok(SourceSchema::from_header(header.iter()))
}

/// Read the timestamp column of a delimited file
pub async fn read(
    path: &Path,
    delimiter: u8,
    gzip: bool,
    column: usize,
    mut sink: BlockSink,
    report: &ProgressReport,
    what: String,
) -> Result<Vec<DatasetBlock>, PipelineError> {
    let size = tokio::fs::metadata(path)
        .await
        .map_err(PipelineError::unavailable(path))?
        .len();
    let progress = track_file(report, what, Work::Bytes(size));
    let reader = {
        let progress = progress.clone();
        open(path, delimiter, gzip, move |bytes: &[u8]| {
            progress.make_progress(bytes.len() as u64);
        })
        .await?
    };
    let mut records = pin!(reader.into_records());
    while let Some(record) = records
        .try_next()
        .await
        .map_err(PipelineError::read(path))?
    {
        sink.push(record.get(column));
    }
    log::trace!("Got {} rows out of {}", sink.len(), path.display());
    progress.finish();
    Ok(sink.finish())
}
