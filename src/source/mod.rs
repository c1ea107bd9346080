//! Loading of the incident datasets from storage
//!
//! Each input is either a single data file or a directory of data files
//! sharing one schema, as produced by partitioned dataset writers. Before any
//! row is read, the schemas of both inputs are checked for compatibility.

mod columnar;
mod delimited;

use crate::{
    config::Config,
    dataset::{builder::BlockSink, Dataset, DatasetBlock, SourceId},
    error::PipelineError,
    progress::{ProgressConfig, ProgressReport, ProgressTracker, Work},
    Result,
};
use anyhow::Context;
use arrow::datatypes::{DataType, Schema};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::task::JoinSet;
use unicase::UniCase;

/// Storage format of a data file
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FileFormat {
    /// Apache Parquet
    Parquet,

    /// Delimited text with a header row
    Delimited {
        /// Field separator
        delimiter: u8,

        /// Truth that the file is gzip-compressed
        gzip: bool,
    },
}
//
impl FileFormat {
    /// Determine the format of a data file from its name
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        let (name, gzip) = match name.strip_suffix(".gz") {
            Some(stripped) => (stripped, true),
            None => (&name[..], false),
        };
        let extension = name.rsplit_once('.')?.1;
        match (extension, gzip) {
            ("parquet" | "parq" | "pq", false) => Some(Self::Parquet),
            ("csv", _) => Some(Self::Delimited {
                delimiter: b',',
                gzip,
            }),
            ("tsv", _) => Some(Self::Delimited {
                delimiter: b'\t',
                gzip,
            }),
            _ => None,
        }
    }
}

/// Data file from an input
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DataFile {
    /// Location of the file
    pub path: PathBuf,

    /// Storage format
    pub format: FileFormat,
}
//
impl DataFile {
    /// Read the schema of this file
    pub async fn schema(&self) -> Result<SourceSchema, PipelineError> {
        match self.format {
            FileFormat::Parquet => columnar::schema(&self.path).await,
            FileFormat::Delimited { delimiter, gzip } => {
                delimited::schema(&self.path, delimiter, gzip).await
            }
        }
    }
}

/// Data files that make up an input
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SourceFiles {
    /// Location of the input, as specified by the user
    pub root: PathBuf,

    /// Data files, in reading order
    pub files: Box<[DataFile]>,
}
//
impl SourceFiles {
    /// Find the data files of an input
    ///
    /// Directories are scanned non-recursively, and files whose name starts
    /// with `_` or `.` are ignored as they conventionally hold metadata.
    pub async fn discover(root: &Path) -> Result<Self, PipelineError> {
        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(PipelineError::unavailable(root))?;

        // A plain file must be in a supported format
        if !metadata.is_dir() {
            let format = FileFormat::detect(root).ok_or_else(|| {
                PipelineError::unavailable(root)("unsupported data file type")
            })?;
            return Ok(Self {
                root: root.into(),
                files: Box::new([DataFile {
                    path: root.into(),
                    format,
                }]),
            });
        }

        // A directory should contain supported files
        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(PipelineError::unavailable(root))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(PipelineError::unavailable(root))?
        {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('_') || name.starts_with('.') {
                log::trace!("Ignoring metadata file {}", path.display());
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .map_err(PipelineError::unavailable(&path))?
                .is_file();
            match FileFormat::detect(&path) {
                Some(format) if is_file => files.push(DataFile { path, format }),
                _ => log::warn!("Ignoring {}, which is not a data file", path.display()),
            }
        }
        if files.is_empty() {
            return Err(PipelineError::unavailable(root)(
                "directory contains no supported data file",
            ));
        }
        files.sort_unstable_by(|a, b| a.path.cmp(&b.path));
        log::debug!("Found {} data file(s) in {}", files.len(), root.display());
        Ok(Self {
            root: root.into(),
            files: files.into(),
        })
    }

    /// Read the schema shared by all files of the input
    pub async fn schema(&self) -> Result<SourceSchema, PipelineError> {
        let (reference, others) = self
            .files
            .split_first()
            .expect("discover() never yields an input without files");
        let schema = reference.schema().await?;
        for file in others {
            let other = file.schema().await?;
            schema
                .check_compatible(&other)
                .map_err(|detail| PipelineError::SchemaMismatch {
                    first: reference.path.clone(),
                    second: file.path.clone(),
                    detail,
                })?;
        }
        log::debug!(
            "All {} file(s) of {} share the same {} fields",
            self.files.len(),
            self.root.display(),
            schema.0.len()
        );
        Ok(schema)
    }
}

/// Type of a field, as far as merging inputs is concerned
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum FieldType {
    /// Text, from a delimited file or a string column
    Text,

    /// Any other column type
    Typed(DataType),
}
//
impl From<&DataType> for FieldType {
    fn from(value: &DataType) -> Self {
        match value {
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => Self::Text,
            other => Self::Typed(other.clone()),
        }
    }
}
//
impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Typed(data_type) => write!(f, "{data_type}"),
        }
    }
}

/// Named and typed field of an input
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SchemaField {
    /// Case-insensitive field name
    pub name: UniCase<Box<str>>,

    /// Field type
    pub field_type: FieldType,
}
//
impl SchemaField {
    /// Field name, with its original case
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered fields of an input
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SourceSchema(Box<[SchemaField]>);
//
impl SourceSchema {
    /// Schema of a delimited file, from its header row
    pub fn from_header<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            names
                .into_iter()
                .map(|name| SchemaField {
                    name: UniCase::new(name.into()),
                    field_type: FieldType::Text,
                })
                .collect(),
        )
    }

    /// Schema of a columnar file
    pub fn from_arrow(schema: &Schema) -> Self {
        Self(
            schema
                .fields()
                .iter()
                .map(|field| SchemaField {
                    name: UniCase::new(field.name().as_str().into()),
                    field_type: field.data_type().into(),
                })
                .collect(),
        )
    }

    /// Position of a field, looked up case-insensitively
    pub fn position(&self, name: &str) -> Option<usize> {
        let name = UniCase::new(name);
        self.0
            .iter()
            .position(|field| UniCase::new(field.name()) == name)
    }

    /// Check that rows from another input can be merged with rows of this one
    ///
    /// Fields are matched by position, and must agree on their name and type.
    /// The first difference is reported in the error.
    pub fn check_compatible(&self, other: &Self) -> Result<(), String> {
        if self.0.len() != other.0.len() {
            return Err(format!(
                "{} fields vs {} fields",
                self.0.len(),
                other.0.len()
            ));
        }
        for (idx, (ours, theirs)) in self.0.iter().zip(other.0.iter()).enumerate() {
            if ours.name != theirs.name {
                return Err(format!(
                    "field #{} is named {:?} vs {:?}",
                    idx + 1,
                    ours.name(),
                    theirs.name()
                ));
            }
            if ours.field_type != theirs.field_type {
                return Err(format!(
                    "field {:?} has type {} vs {}",
                    ours.name(),
                    ours.field_type,
                    theirs.field_type
                ));
            }
        }
        Ok(())
    }
}

/// Check that both inputs can be merged, then load them into memory
pub async fn load_and_merge(config: Arc<Config>, report: &ProgressReport) -> Result<Dataset> {
    // Find the data files and check their schemas before reading any row
    let [first, second] = &config.sources;
    let (first_files, second_files) =
        futures::try_join!(SourceFiles::discover(first), SourceFiles::discover(second))?;
    let (first_schema, second_schema) =
        futures::try_join!(first_files.schema(), second_files.schema())?;
    first_schema
        .check_compatible(&second_schema)
        .map_err(|detail| PipelineError::SchemaMismatch {
            first: first.clone(),
            second: second.clone(),
            detail,
        })?;
    let column_name = &config.normalize.timestamp_column;
    let column = first_schema
        .position(column_name)
        .ok_or_else(|| PipelineError::MissingColumn {
            path: first.clone(),
            column: column_name.to_string(),
        })?;
    log::info!(
        "Merging {} ({} file(s)) with {} ({} file(s)), timestamps from field #{}",
        first.display(),
        first_files.files.len(),
        second.display(),
        second_files.files.len(),
        column + 1
    );

    // Start reading all the files
    let num_files = first_files.files.len() + second_files.files.len();
    let files_done = report.add(
        "Reading input files",
        ProgressConfig::new(Work::Steps(num_files)).dont_show_rate_eta(),
    );
    let mut reads = JoinSet::new();
    for (source, files) in SourceId::ALL.into_iter().zip([&first_files, &second_files]) {
        for (idx, file) in files.files.iter().enumerate() {
            let config = config.clone();
            let file = file.clone();
            let report = report.clone();
            let files_done = files_done.clone();
            reads.spawn(async move {
                let blocks = read_file(&config, source, &file, column, &report).await;
                files_done.make_progress(1);
                blocks.map(|blocks| (source, idx, blocks))
            });
        }
    }

    // Collect blocks as files are read, then put them back in input order
    let mut per_file: [Vec<Option<Vec<DatasetBlock>>>; 2] = [
        vec![None; first_files.files.len()],
        vec![None; second_files.files.len()],
    ];
    while let Some(file_blocks) = reads.join_next().await {
        let (source, idx, blocks) = file_blocks.context("collecting rows from one data file")??;
        per_file[source.index()][idx] = Some(blocks);
    }
    let [first_blocks, second_blocks] = per_file.map(|files| {
        files
            .into_iter()
            .flat_map(|blocks| blocks.expect("every file was read"))
            .collect::<Vec<_>>()
    });
    let dataset = Dataset::merge(first_blocks, second_blocks);
    let [first_rows, second_rows] = dataset.rows_per_source();
    log::info!("Loaded {first_rows} rows from the first source and {second_rows} from the second");
    Ok(dataset)
}

/// Read the timestamp column of a data file
async fn read_file(
    config: &Config,
    source: SourceId,
    file: &DataFile,
    column: usize,
    report: &ProgressReport,
) -> Result<Vec<DatasetBlock>, PipelineError> {
    let sink = BlockSink::new(source, config.memory_chunk);
    let what = format!("Reading {}", file_label(&file.path));
    let blocks = match file.format {
        FileFormat::Parquet => columnar::read(&file.path, column, sink, report, what).await?,
        FileFormat::Delimited { delimiter, gzip } => {
            delimited::read(&file.path, delimiter, gzip, column, sink, report, what).await?
        }
    };
    let rows = blocks.iter().map(DatasetBlock::len).sum::<usize>();
    log::debug!("Read {rows} rows from {} ({source})", file.path.display());
    Ok(blocks)
}

/// Short name of a file for progress bars
fn file_label(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

/// Track reading progress of a file
fn track_file(report: &ProgressReport, what: String, work: Work) -> ProgressTracker {
    report.add(what, ProgressConfig::new(work))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{NormalizeConfig, RankConfig, ReportLayout};
    use arrow::{
        array::{ArrayRef, Int32Array, StringArray},
        record_batch::RecordBatch,
    };
    use parquet::arrow::ArrowWriter;
    use std::num::NonZeroUsize;

    /// Write a CSV file with the usual header
    pub fn write_csv(path: &Path, timestamps: &[&str]) {
        let mut text = String::from("DR_NO,DATE OCC,AREA NAME\n");
        for (idx, timestamp) in timestamps.iter().enumerate() {
            text.push_str(&format!("{idx},{timestamp},Central\n"));
        }
        std::fs::write(path, text).unwrap();
    }

    /// Write a Parquet file with the usual fields
    pub fn write_parquet(path: &Path, timestamps: &[Option<&str>]) {
        let ids = Int32Array::from_iter_values(0..timestamps.len() as i32);
        let dates = StringArray::from(timestamps.to_vec());
        let areas = StringArray::from(vec!["Central"; timestamps.len()]);
        let batch = RecordBatch::try_from_iter([
            ("DR_NO", Arc::new(ids) as ArrayRef),
            ("DATE OCC", Arc::new(dates) as ArrayRef),
            ("AREA NAME", Arc::new(areas) as ArrayRef),
        ])
        .unwrap();
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    /// Configuration that reads from two inputs with small memory chunks
    pub fn config(first: &Path, second: &Path, output: &Path) -> Config {
        Config {
            sources: [first.into(), second.into()],
            output: output.into(),
            normalize: NormalizeConfig::default(),
            rank: RankConfig::default(),
            layout: ReportLayout::default(),
            memory_chunk: NonZeroUsize::new(3).unwrap(),
            threads: None,
        }
    }

    fn timestamps(dataset: &Dataset) -> Vec<(SourceId, Option<String>)> {
        dataset
            .rows()
            .map(|row| (row.source, row.timestamp.map(str::to_owned)))
            .collect()
    }

    #[test]
    fn detects_formats_from_file_names() {
        let detect = |name: &str| FileFormat::detect(Path::new(name));
        assert_eq!(detect("Crime_Data.parquet"), Some(FileFormat::Parquet));
        assert_eq!(detect("part-0001.snappy.PARQUET"), Some(FileFormat::Parquet));
        assert_eq!(
            detect("crimes.csv"),
            Some(FileFormat::Delimited {
                delimiter: b',',
                gzip: false
            })
        );
        assert_eq!(
            detect("crimes.tsv.gz"),
            Some(FileFormat::Delimited {
                delimiter: b'\t',
                gzip: true
            })
        );
        assert_eq!(detect("crimes.parquet.gz"), None);
        assert_eq!(detect("README"), None);
        assert_eq!(detect("notes.txt"), None);
    }

    #[test]
    fn schemas_match_case_insensitively() {
        let a = SourceSchema::from_header(["DR_NO", "DATE OCC"]);
        let b = SourceSchema::from_header(["dr_no", "Date Occ"]);
        assert_eq!(a.check_compatible(&b), Ok(()));
        assert_eq!(a.position("date occ"), Some(1));
        assert_eq!(a.position("TIME OCC"), None);
    }

    #[test]
    fn schema_differences_are_reported() {
        let a = SourceSchema::from_header(["DR_NO", "DATE OCC"]);
        let b = SourceSchema::from_header(["DR_NO", "DATE RPTD"]);
        let c = SourceSchema::from_header(["DR_NO"]);
        assert_eq!(
            a.check_compatible(&b),
            Err("field #2 is named \"DATE OCC\" vs \"DATE RPTD\"".to_owned())
        );
        assert_eq!(a.check_compatible(&c), Err("2 fields vs 1 fields".to_owned()));
    }

    #[test]
    fn string_columns_merge_with_text_fields() {
        let arrow = Schema::new(vec![
            arrow::datatypes::Field::new("DR_NO", DataType::Utf8, true),
            arrow::datatypes::Field::new("DATE OCC", DataType::LargeUtf8, true),
        ]);
        let typed = Schema::new(vec![
            arrow::datatypes::Field::new("DR_NO", DataType::Int64, true),
            arrow::datatypes::Field::new("DATE OCC", DataType::Utf8, true),
        ]);
        let header = SourceSchema::from_header(["DR_NO", "DATE OCC"]);
        assert_eq!(header.check_compatible(&SourceSchema::from_arrow(&arrow)), Ok(()));
        assert_eq!(
            header.check_compatible(&SourceSchema::from_arrow(&typed)),
            Err("field \"DR_NO\" has type text vs Int64".to_owned())
        );
    }

    #[tokio::test]
    async fn directories_are_read_in_file_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let partitioned = dir.path().join("crime_2010_2019");
        std::fs::create_dir(&partitioned).unwrap();
        write_csv(&partitioned.join("part-00001.csv"), &["02/01/2011 10:00:00 AM"]);
        write_csv(&partitioned.join("part-00000.csv"), &["01/01/2010 10:00:00 AM"]);
        std::fs::write(partitioned.join("_SUCCESS"), "").unwrap();
        std::fs::write(partitioned.join(".part-00000.csv.crc"), "").unwrap();
        let single = dir.path().join("crime_2020.csv");
        write_csv(&single, &["03/01/2020 10:00:00 AM"]);

        let config = Arc::new(config(&partitioned, &single, &dir.path().join("out.csv")));
        let dataset = load_and_merge(config, &ProgressReport::hidden()).await.unwrap();
        assert_eq!(
            timestamps(&dataset),
            [
                (SourceId::First, Some("01/01/2010 10:00:00 AM".to_owned())),
                (SourceId::First, Some("02/01/2011 10:00:00 AM".to_owned())),
                (SourceId::Second, Some("03/01/2020 10:00:00 AM".to_owned())),
            ]
        );
    }

    #[tokio::test]
    async fn parquet_and_csv_inputs_can_be_merged() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("old.csv");
        let second = dir.path().join("new.parquet");
        write_csv(&first, &["01/15/2019 08:00:00 AM"]);
        let ids_as_text = Schema::new(vec![
            arrow::datatypes::Field::new("DR_NO", DataType::Utf8, false),
            arrow::datatypes::Field::new("DATE OCC", DataType::Utf8, true),
            arrow::datatypes::Field::new("AREA NAME", DataType::Utf8, false),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(ids_as_text),
            vec![
                Arc::new(StringArray::from(vec!["7", "8"])) as ArrayRef,
                Arc::new(StringArray::from(vec![Some("01/15/2020 08:00:00 AM"), None])),
                Arc::new(StringArray::from(vec!["Central", "Newton"])),
            ],
        )
        .unwrap();
        let mut writer =
            ArrowWriter::try_new(std::fs::File::create(&second).unwrap(), batch.schema(), None)
                .unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let config = Arc::new(config(&first, &second, &dir.path().join("out.csv")));
        let dataset = load_and_merge(config, &ProgressReport::hidden()).await.unwrap();
        assert_eq!(
            timestamps(&dataset),
            [
                (SourceId::First, Some("01/15/2019 08:00:00 AM".to_owned())),
                (SourceId::Second, Some("01/15/2020 08:00:00 AM".to_owned())),
                (SourceId::Second, None),
            ]
        );
    }

    #[tokio::test]
    async fn mismatched_schemas_abort_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        write_csv(&first, &["01/15/2020 08:00:00 AM"]);
        std::fs::write(&second, "DR_NO,DATE RPTD\n1,01/15/2020 08:00:00 AM\n").unwrap();
        let config = Arc::new(config(&first, &second, &dir.path().join("out.csv")));
        let err = load_and_merge(config, &ProgressReport::hidden())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn partitions_with_different_schemas_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let partitioned = dir.path().join("parts");
        std::fs::create_dir(&partitioned).unwrap();
        write_csv(&partitioned.join("part-0.csv"), &["01/15/2020 08:00:00 AM"]);
        std::fs::write(partitioned.join("part-1.csv"), "DATE OCC\n01/15/2020 08:00:00 AM\n")
            .unwrap();
        let files = SourceFiles::discover(&partitioned).await.unwrap();
        assert!(matches!(
            files.schema().await,
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn missing_timestamp_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        write_csv(&first, &[]);
        write_csv(&second, &[]);
        let mut config = config(&first, &second, &dir.path().join("out.csv"));
        config.normalize.timestamp_column = "TIME OCC".into();
        let err = load_and_merge(Arc::new(config), &ProgressReport::hidden())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingColumn { column, .. }) if column == "TIME OCC"
        ));
    }

    #[tokio::test]
    async fn missing_input_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        write_csv(&first, &[]);
        let config = Arc::new(config(
            &first,
            &dir.path().join("nowhere.parquet"),
            &dir.path().join("out.csv"),
        ));
        let err = load_and_merge(config, &ProgressReport::hidden())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SourceUnavailable { path, .. }) if path.ends_with("nowhere.parquet")
        ));
    }

    #[tokio::test]
    async fn empty_directories_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SourceFiles::discover(dir.path()).await,
            Err(PipelineError::SourceUnavailable { .. })
        ));
    }
}
