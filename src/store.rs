use std::fs::{self, File};
use std::io::Write;

use arrow_cast::display::{ArrayFormatter, FormatOptions};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use directories::BaseDirs;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use tempfile::Builder;
use tracing::{debug, info};

use crate::catalog::DatasetTable;
use crate::domain::{ARTIFACT_EXT, CatalogRecord, DatasetId, extract_identifier};
use crate::error::BoosterError;
use crate::ledger::{Ledger, LedgerEntry};

/// Local side of the bridge: the artifact directory, the ledger file and the
/// per-user cache directory.
#[derive(Debug, Clone)]
pub struct Store {
    data_dir: Utf8PathBuf,
    ledger_path: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalArtifact {
    pub file_name: String,
    pub path: Utf8PathBuf,
    pub dataset_identifier: Option<DatasetId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: u64,
}

impl Store {
    pub fn new(data_dir: Utf8PathBuf, ledger_path: Utf8PathBuf) -> Result<Self, BoosterError> {
        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("ods-booster")).ok()
            })
            .ok_or_else(|| {
                BoosterError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            data_dir,
            ledger_path,
            cache_root,
        })
    }

    pub fn new_with_paths(
        data_dir: Utf8PathBuf,
        ledger_path: Utf8PathBuf,
        cache_root: Utf8PathBuf,
    ) -> Self {
        Self {
            data_dir,
            ledger_path,
            cache_root,
        }
    }

    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    pub fn ledger_path(&self) -> &Utf8Path {
        &self.ledger_path
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn catalog_cache_path(&self) -> Utf8PathBuf {
        self.cache_root.join("catalog.json")
    }

    pub fn artifact_path(&self, id: &DatasetId) -> Utf8PathBuf {
        self.data_dir.join(id.artifact_file_name())
    }

    pub fn ensure_data_dir(&self) -> Result<(), BoosterError> {
        fs::create_dir_all(self.data_dir.as_std_path())
            .map_err(|err| BoosterError::Filesystem(err.to_string()))
    }

    /// Parquet files in the data directory, sorted by file name.
    pub fn list_local_artifacts(&self) -> Result<Vec<LocalArtifact>, BoosterError> {
        if !self.data_dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(self.data_dir.as_std_path())
            .map_err(|err| BoosterError::Filesystem(err.to_string()))?;

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| BoosterError::Filesystem(err.to_string()))?;
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            if !path.is_file() || path.extension() != Some(ARTIFACT_EXT) {
                continue;
            }
            let Some(file_name) = path.file_name().map(str::to_string) else {
                continue;
            };
            artifacts.push(LocalArtifact {
                dataset_identifier: extract_identifier(&file_name),
                file_name,
                path,
            });
        }
        artifacts.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(artifacts)
    }

    pub fn find_artifact(&self, id: &DatasetId) -> Result<LocalArtifact, BoosterError> {
        let path = self.artifact_path(id);
        if !path.as_std_path().is_file() {
            return Err(BoosterError::ArtifactNotFound(id.to_string()));
        }
        Ok(LocalArtifact {
            file_name: id.artifact_file_name(),
            path,
            dataset_identifier: Some(id.clone()),
        })
    }

    /// Reads the ledger. A missing file is an empty ledger; an unreadable one
    /// is an error and never replaced by an empty ledger.
    pub fn read_ledger(&self) -> Result<Ledger, BoosterError> {
        let content = match fs::read(self.ledger_path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.ledger_path, "no ledger yet");
                return Ok(Ledger::new());
            }
            Err(err) => {
                return Err(BoosterError::LedgerCorrupt {
                    path: self.ledger_path.clone(),
                    message: err.to_string(),
                });
            }
        };
        Ledger::from_slice(&content, &self.ledger_path)
    }

    pub fn write_ledger(&self, ledger: &Ledger) -> Result<(), BoosterError> {
        write_bytes_atomic(&self.ledger_path, &ledger.to_vec_pretty()?)
    }

    /// Replaces the ledger entry of `id` with a snapshot of `record`.
    pub fn record_download(
        &self,
        id: &DatasetId,
        record: &CatalogRecord,
    ) -> Result<LedgerEntry, BoosterError> {
        let mut ledger = self.read_ledger()?;
        let entry = LedgerEntry::from_download(record, Utc::now());
        ledger.upsert(id.clone(), entry.clone());
        self.write_ledger(&ledger)?;
        debug!(dataset = %id, entries = ledger.len(), "ledger updated");
        Ok(entry)
    }

    /// Writes `table` as the artifact of `id`, replacing any previous file.
    pub fn write_artifact(
        &self,
        id: &DatasetId,
        table: &DatasetTable,
    ) -> Result<Utf8PathBuf, BoosterError> {
        self.ensure_data_dir()?;
        let path = self.artifact_path(id);
        let mut temp = Builder::new()
            .prefix("ods-booster-artifact")
            .tempfile_in(self.data_dir.as_std_path())
            .map_err(|err| BoosterError::Filesystem(err.to_string()))?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer =
            ArrowWriter::try_new(temp.as_file_mut(), table.schema.clone(), Some(props))?;
        for batch in &table.batches {
            writer.write(batch)?;
        }
        writer.close()?;

        temp.persist(path.as_std_path())
            .map_err(|err| BoosterError::Filesystem(err.to_string()))?;
        info!(dataset = %id, %path, rows = table.num_rows(), "artifact written");
        Ok(path)
    }
}

/// Writes `content` to `path` through a temporary file in the same directory,
/// so readers see either the old or the new content.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BoosterError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| BoosterError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".ods-booster")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| BoosterError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| BoosterError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| BoosterError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| BoosterError::Filesystem(err.to_string()))?;
    Ok(())
}

/// First `limit` rows of a parquet file, rendered as text.
pub fn preview_artifact(path: &Utf8Path, limit: usize) -> Result<Preview, BoosterError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| BoosterError::Filesystem(format!("open {path}: {err}")))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let total_rows = builder.metadata().file_metadata().num_rows().max(0) as u64;
    let columns = builder
        .schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect::<Vec<_>>();
    let reader = builder.with_limit(limit).build()?;

    let options = FormatOptions::default().with_null("null");
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|err| BoosterError::Parquet(err.to_string()))?;
        let formatters = batch
            .columns()
            .iter()
            .map(|column| ArrayFormatter::try_new(column.as_ref(), &options))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| BoosterError::Parquet(err.to_string()))?;
        for row in 0..batch.num_rows() {
            rows.push(
                formatters
                    .iter()
                    .map(|formatter| formatter.value(row).to_string())
                    .collect(),
            );
        }
    }

    Ok(Preview {
        columns,
        rows,
        total_rows,
    })
}
