use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::catalog::{CatalogCache, CatalogClient};
use crate::config::ResolvedConfig;
use crate::domain::{CatalogRecord, DatasetId, warehouse_table_name};
use crate::error::BoosterError;
use crate::remote::{ObjectStoreClient, RemoteObject};
use crate::store::{LocalArtifact, Preview, Store, preview_artifact};
use crate::sync::{Annotated, SyncStatus, SyncViewRow, annotate, compute_sync_view};
use crate::warehouse::{QueryResult, WarehouseStore, WarehouseTable, default_table_query};

pub const DEFAULT_PREVIEW_ROWS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub rows: Vec<SyncViewRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub dataset_identifier: DatasetId,
    pub status: SyncStatus,
    pub catalog: Map<String, Value>,
    pub ledger: Option<Map<String, Value>>,
    pub artifact_path: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemOutcome {
    Succeeded,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub dataset_identifier: String,
    pub outcome: ItemOutcome,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Per-item outcome of a download or upload over a selection of datasets.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
    pub summary: BatchSummary,
}

impl BatchResult {
    fn record(&mut self, id: &DatasetId, outcome: ItemOutcome, detail: String) {
        match outcome {
            ItemOutcome::Succeeded => self.summary.succeeded += 1,
            ItemOutcome::Skipped => self.summary.skipped += 1,
            ItemOutcome::Failed => self.summary.failed += 1,
        }
        self.items.push(BatchItem {
            dataset_identifier: id.to_string(),
            outcome,
            detail,
        });
    }
}

#[derive(Debug, Clone)]
pub enum QuerySource {
    Table(String),
    Sql(String),
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn progress(sink: &dyn ProgressSink, message: String, elapsed: Option<Duration>) {
    sink.event(ProgressEvent { message, elapsed });
}

/// Command handlers. Every side effect of the tool happens here, on explicit
/// request; listings and views are recomputed on each call.
pub struct App<C: CatalogClient, O: ObjectStoreClient, W: WarehouseStore> {
    store: Store,
    cache: CatalogCache,
    table_prefix: String,
    max_download_bytes: Option<u64>,
    catalog: C,
    objects: O,
    warehouse: W,
}

impl<C: CatalogClient, O: ObjectStoreClient, W: WarehouseStore> App<C, O, W> {
    pub fn new(
        config: &ResolvedConfig,
        store: Store,
        catalog: C,
        objects: O,
        warehouse: W,
    ) -> Self {
        let cache = CatalogCache::new(store.catalog_cache_path(), config.cache_ttl);
        Self {
            store,
            cache,
            table_prefix: config.table_prefix.clone(),
            max_download_bytes: config.max_download_bytes,
            catalog,
            objects,
            warehouse,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn catalog_listing(
        &self,
        refresh: bool,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<CatalogRecord>, BoosterError> {
        progress(sink, "catalog: loading dataset listing".to_string(), None);
        let start = Instant::now();
        let records = self.cache.get_or_fetch(&self.catalog, refresh)?;
        progress(
            sink,
            format!("catalog: {} datasets", records.len()),
            Some(start.elapsed()),
        );
        Ok(records)
    }

    // Listings stay usable offline; they just lose their annotations.
    fn annotation_listing(&self, sink: &dyn ProgressSink) -> Vec<CatalogRecord> {
        match self.catalog_listing(false, sink) {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "catalog unavailable, listing without metadata");
                Vec::new()
            }
        }
    }

    pub fn status(
        &self,
        refresh: bool,
        only: Option<SyncStatus>,
        sink: &dyn ProgressSink,
    ) -> Result<StatusResult, BoosterError> {
        let ledger = self.store.read_ledger()?;
        let catalog = self.catalog_listing(refresh, sink)?;
        let rows = compute_sync_view(&catalog, &ledger)
            .into_iter()
            .filter(|row| only.is_none_or(|status| row.status() == status))
            .collect();
        Ok(StatusResult { rows })
    }

    pub fn info(
        &self,
        id: &DatasetId,
        refresh: bool,
        sink: &dyn ProgressSink,
    ) -> Result<InfoResult, BoosterError> {
        let ledger = self.store.read_ledger()?;
        let catalog = self.catalog_listing(refresh, sink)?;
        let record = catalog
            .iter()
            .find(|record| &record.dataset_identifier == id)
            .ok_or_else(|| BoosterError::DatasetNotFound(id.to_string()))?;
        let row = compute_sync_view(std::slice::from_ref(record), &ledger)
            .into_iter()
            .next()
            .ok_or_else(|| BoosterError::DatasetNotFound(id.to_string()))?;

        Ok(InfoResult {
            dataset_identifier: id.clone(),
            status: row.status(),
            catalog: record.fields.clone(),
            ledger: ledger.get(id).map(|entry| entry.fields().clone()),
            artifact_path: self.store.find_artifact(id).ok().map(|a| a.path),
        })
    }

    /// Downloads each selected dataset into the local cache and records it in
    /// the ledger. Items fail independently; only a corrupt ledger aborts.
    pub fn download(
        &self,
        ids: &[DatasetId],
        refresh: bool,
        sink: &dyn ProgressSink,
    ) -> Result<BatchResult, BoosterError> {
        self.store.read_ledger()?;
        let catalog = self.catalog_listing(refresh, sink)?;
        let mut result = BatchResult::default();

        for id in ids {
            let Some(record) = catalog.iter().find(|r| &r.dataset_identifier == id) else {
                let err = BoosterError::DatasetNotFound(id.to_string());
                progress(sink, format!("{id}: {err}"), None);
                result.record(id, ItemOutcome::Failed, err.to_string());
                continue;
            };

            if let (Some(limit), Some(size)) = (self.max_download_bytes, record.size_bytes) {
                if size > limit {
                    let detail = format!("{size} bytes exceeds the {limit} byte limit");
                    info!(dataset = %id, size, limit, "download skipped");
                    progress(sink, format!("{id}: skipped, {detail}"), None);
                    result.record(id, ItemOutcome::Skipped, detail);
                    continue;
                }
            }

            progress(sink, format!("{id}: downloading"), None);
            let start = Instant::now();
            match self.download_one(id, record) {
                Ok(path) => {
                    progress(sink, format!("{id}: saved {path}"), Some(start.elapsed()));
                    result.record(id, ItemOutcome::Succeeded, path.to_string());
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(dataset = %id, error = %err, "download failed");
                    progress(sink, format!("{id}: {err}"), Some(start.elapsed()));
                    result.record(id, ItemOutcome::Failed, err.to_string());
                }
            }
        }

        info!(
            succeeded = result.summary.succeeded,
            skipped = result.summary.skipped,
            failed = result.summary.failed,
            "download finished"
        );
        Ok(result)
    }

    fn download_one(
        &self,
        id: &DatasetId,
        record: &CatalogRecord,
    ) -> Result<Utf8PathBuf, BoosterError> {
        let table = self.catalog.fetch_table(id)?;
        let path = self.store.write_artifact(id, &table)?;
        self.store.record_download(id, record)?;
        Ok(path)
    }

    pub fn list_local(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<Annotated<LocalArtifact>>, BoosterError> {
        let artifacts = self.store.list_local_artifacts()?;
        Ok(annotate(artifacts, &self.annotation_listing(sink)))
    }

    pub fn preview_local(&self, id: &DatasetId, limit: usize) -> Result<Preview, BoosterError> {
        let artifact = self.store.find_artifact(id)?;
        preview_artifact(&artifact.path, limit)
    }

    pub fn list_remote(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<Annotated<RemoteObject>>, BoosterError> {
        progress(sink, "object store: listing".to_string(), None);
        let objects = self
            .objects
            .list()?
            .into_iter()
            .map(RemoteObject::from_name)
            .collect();
        Ok(annotate(objects, &self.annotation_listing(sink)))
    }

    pub fn upload_objects(
        &self,
        ids: &[DatasetId],
        sink: &dyn ProgressSink,
    ) -> Result<BatchResult, BoosterError> {
        let mut result = BatchResult::default();
        for id in ids {
            progress(sink, format!("{id}: uploading to object store"), None);
            let start = Instant::now();
            let outcome = self
                .store
                .find_artifact(id)
                .and_then(|artifact| self.objects.upload(&artifact.path));
            match outcome {
                Ok(name) => {
                    progress(sink, format!("{id}: stored as {name}"), Some(start.elapsed()));
                    result.record(id, ItemOutcome::Succeeded, name);
                }
                Err(err) => {
                    warn!(dataset = %id, error = %err, "object upload failed");
                    progress(sink, format!("{id}: {err}"), Some(start.elapsed()));
                    result.record(id, ItemOutcome::Failed, err.to_string());
                }
            }
        }
        Ok(result)
    }

    /// Fetches a remote object into a scratch directory and previews it.
    pub fn show_remote(
        &self,
        object_name: &str,
        limit: usize,
        sink: &dyn ProgressSink,
    ) -> Result<Preview, BoosterError> {
        let scratch = tempfile::Builder::new()
            .prefix("ods-booster-show")
            .tempdir()
            .map_err(|err| BoosterError::Filesystem(err.to_string()))?;
        let file_name = object_name.rsplit('/').next().unwrap_or(object_name);
        let destination = Utf8PathBuf::from_path_buf(scratch.path().join(file_name))
            .map_err(|_| BoosterError::Filesystem("non-utf8 scratch path".to_string()))?;

        progress(sink, format!("object store: fetching {object_name}"), None);
        let start = Instant::now();
        self.objects.download(object_name, &destination)?;
        progress(sink, format!("object store: fetched {object_name}"), Some(start.elapsed()));
        preview_artifact(&destination, limit)
    }

    pub fn list_tables(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<Annotated<WarehouseTable>>, BoosterError> {
        progress(sink, "warehouse: listing tables".to_string(), None);
        let tables = self.warehouse.list_tables()?;
        Ok(annotate(tables, &self.annotation_listing(sink)))
    }

    pub fn upload_warehouse(
        &self,
        ids: &[DatasetId],
        sink: &dyn ProgressSink,
    ) -> Result<BatchResult, BoosterError> {
        let mut result = BatchResult::default();
        for id in ids {
            progress(sink, format!("{id}: loading into warehouse"), None);
            let start = Instant::now();
            let outcome = self.store.find_artifact(id).and_then(|artifact| {
                let table = warehouse_table_name(&self.table_prefix, id)?;
                self.warehouse.stage_and_load(&artifact.path, &table)
            });
            match outcome {
                Ok(report) => {
                    let detail = format!("{}: {} rows", report.table, report.rows_loaded);
                    progress(sink, format!("{id}: {detail}"), Some(start.elapsed()));
                    result.record(id, ItemOutcome::Succeeded, detail);
                }
                Err(err) => {
                    warn!(dataset = %id, error = %err, "warehouse load failed");
                    progress(sink, format!("{id}: {err}"), Some(start.elapsed()));
                    result.record(id, ItemOutcome::Failed, err.to_string());
                }
            }
        }
        Ok(result)
    }

    pub fn query(
        &self,
        source: &QuerySource,
        sink: &dyn ProgressSink,
    ) -> Result<QueryResult, BoosterError> {
        let sql = match source {
            QuerySource::Table(table) => default_table_query(table),
            QuerySource::Sql(sql) => sql.clone(),
        };
        progress(sink, "warehouse: running query".to_string(), None);
        let start = Instant::now();
        let result = self.warehouse.query(&sql)?;
        progress(
            sink,
            format!("warehouse: {} rows", result.row_count),
            Some(start.elapsed()),
        );
        Ok(result)
    }
}
