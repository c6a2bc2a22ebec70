use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use arrow_array::{Array, RecordBatch, StringArray};
use arrow_csv::reader::{Format, ReaderBuilder};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::domain::{CatalogRecord, DatasetId, FIELD_IDENTIFIER};
use crate::error::BoosterError;
use crate::store::write_bytes_atomic;

const CSV_DELIMITER: u8 = b';';
const EXPORT_QUERY: &str = "lang=de&timezone=Europe%2FBerlin&use_labels=false&delimiter=%3B";

/// A dataset export held in memory as Arrow record batches.
#[derive(Debug, Clone)]
pub struct DatasetTable {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl DatasetTable {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }
}

pub trait CatalogClient: Send + Sync {
    fn fetch_table(&self, id: &DatasetId) -> Result<DatasetTable, BoosterError>;
    fn fetch_catalog_metadata(&self) -> Result<Vec<CatalogRecord>, BoosterError>;
}

#[derive(Clone)]
pub struct OdsHttpClient {
    client: Client,
    base_url: String,
    metadata_dataset: DatasetId,
}

impl OdsHttpClient {
    pub fn new(
        base_url: &str,
        metadata_dataset: DatasetId,
        timeout: Duration,
    ) -> Result<Self, BoosterError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ods-booster/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| BoosterError::RemoteFetch(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| BoosterError::RemoteFetch(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            metadata_dataset,
        })
    }

    pub fn export_url(&self, id: &DatasetId) -> String {
        format!(
            "{}/api/explore/v2.1/catalog/datasets/{}/exports/csv?{EXPORT_QUERY}",
            self.base_url,
            id.as_str()
        )
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, BoosterError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(BoosterError::RemoteStatus { status, message })
    }
}

impl OdsHttpClient {
    fn fetch_export(&self, id: &DatasetId) -> Result<Vec<u8>, BoosterError> {
        let url = self.export_url(id);
        debug!(%url, "catalog.request");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| BoosterError::RemoteFetch(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let body = response
            .bytes()
            .map_err(|err| BoosterError::RemoteFetch(err.to_string()))?;
        Ok(body.to_vec())
    }
}

impl CatalogClient for OdsHttpClient {
    fn fetch_table(&self, id: &DatasetId) -> Result<DatasetTable, BoosterError> {
        let start = std::time::Instant::now();
        let table = parse_export(&self.fetch_export(id)?)?;
        info!(
            dataset = %id,
            rows = table.num_rows(),
            latency_ms = start.elapsed().as_millis() as u64,
            "catalog.response"
        );
        Ok(table)
    }

    fn fetch_catalog_metadata(&self) -> Result<Vec<CatalogRecord>, BoosterError> {
        let table = parse_listing(&self.fetch_export(&self.metadata_dataset)?)?;
        debug!(datasets = table.num_rows(), "catalog.listing");
        catalog_records(&table)
    }
}

/// Parses a semicolon-delimited export with a header row.
///
/// Column types are inferred from the whole body, except `dataset_identifier`
/// which is always read as text so identifiers join as strings downstream.
pub fn parse_export(body: &[u8]) -> Result<DatasetTable, BoosterError> {
    read_export(body, |field| field.name() == FIELD_IDENTIFIER)
}

/// Parses the catalog's metadata export with every column read as text, so
/// timestamps and counts reach the ledger exactly as the catalog wrote them.
pub fn parse_listing(body: &[u8]) -> Result<DatasetTable, BoosterError> {
    read_export(body, |_| true)
}

fn read_export(
    body: &[u8],
    as_text: impl Fn(&Field) -> bool,
) -> Result<DatasetTable, BoosterError> {
    let format = Format::default()
        .with_delimiter(CSV_DELIMITER)
        .with_header(true);
    let (inferred, _) = format
        .infer_schema(Cursor::new(body), None)
        .map_err(|err| BoosterError::RemoteFetch(format!("invalid CSV export: {err}")))?;

    let fields = inferred
        .fields()
        .iter()
        .map(|field| {
            if as_text(field.as_ref()) {
                Arc::new(Field::new(field.name(), DataType::Utf8, true))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>();
    let schema = Arc::new(Schema::new(fields));

    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(Cursor::new(body))
        .map_err(|err| BoosterError::RemoteFetch(format!("invalid CSV export: {err}")))?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| BoosterError::RemoteFetch(format!("invalid CSV export: {err}")))?;

    Ok(DatasetTable { schema, batches })
}

/// Turns the catalog's metadata export into records, keeping row order.
pub fn catalog_records(table: &DatasetTable) -> Result<Vec<CatalogRecord>, BoosterError> {
    let mut records = Vec::with_capacity(table.num_rows());
    for batch in &table.batches {
        let mut columns = Vec::with_capacity(batch.num_columns());
        for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
            let text = arrow_cast::cast(column, &DataType::Utf8)
                .map_err(|err| BoosterError::RemoteFetch(err.to_string()))?;
            columns.push((field.name().clone(), text));
        }

        for row in 0..batch.num_rows() {
            let mut fields = Map::new();
            for (name, column) in &columns {
                let values = column
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| {
                        BoosterError::RemoteFetch(format!("column {name} is not text"))
                    })?;
                let value = if values.is_null(row) {
                    Value::Null
                } else {
                    Value::String(values.value(row).to_string())
                };
                fields.insert(name.clone(), value);
            }
            records.push(CatalogRecord::from_fields(fields)?);
        }
    }
    Ok(records)
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedCatalog {
    fetched_at: DateTime<Utc>,
    records: Vec<CatalogRecord>,
}

/// Catalog listing kept on disk for a bounded time.
///
/// The listing is fetched in full, so there is one cache entry for the whole
/// catalog. Anything unreadable in the cache file counts as a miss.
#[derive(Debug, Clone)]
pub struct CatalogCache {
    path: Utf8PathBuf,
    ttl: chrono::Duration,
}

impl CatalogCache {
    pub fn new(path: Utf8PathBuf, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        Self { path, ttl }
    }

    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }

    /// Cached records, if the entry is younger than the validity window at `now`.
    pub fn load_fresh(&self, now: DateTime<Utc>) -> Option<Vec<CatalogRecord>> {
        let content = std::fs::read(self.path.as_std_path()).ok()?;
        let cached: CachedCatalog = match serde_json::from_slice(&content) {
            Ok(cached) => cached,
            Err(err) => {
                warn!(path = %self.path, error = %err, "ignoring unreadable catalog cache");
                return None;
            }
        };
        let age = now.signed_duration_since(cached.fetched_at);
        if age < chrono::Duration::zero() || age >= self.ttl {
            debug!(age_secs = age.num_seconds(), "catalog cache expired");
            return None;
        }
        Some(cached.records)
    }

    pub fn store(&self, records: &[CatalogRecord], now: DateTime<Utc>) -> Result<(), BoosterError> {
        let cached = CachedCatalog {
            fetched_at: now,
            records: records.to_vec(),
        };
        let content =
            serde_json::to_vec(&cached).map_err(|err| BoosterError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&self.path, &content)
    }

    /// Returns the catalog listing, from cache when fresh unless `refresh` is set.
    pub fn get_or_fetch<C: CatalogClient + ?Sized>(
        &self,
        client: &C,
        refresh: bool,
    ) -> Result<Vec<CatalogRecord>, BoosterError> {
        let now = Utc::now();
        if !refresh {
            if let Some(records) = self.load_fresh(now) {
                debug!(records = records.len(), "catalog cache hit");
                return Ok(records);
            }
        }
        let records = client.fetch_catalog_metadata()?;
        if let Err(err) = self.store(&records, now) {
            warn!(path = %self.path, error = %err, "failed to write catalog cache");
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA_CSV: &str = "dataset_identifier;title;modified;size_of_records_in_the_dataset_in_bytes;number_of_records\n\
100057;Metadaten;2024-12-01T10:00:00+01:00;2048;12\n\
100123;Wetter;2024-11-30T08:00:00+01:00;;\n";

    #[test]
    fn identifier_column_is_text() {
        let table = parse_export(METADATA_CSV.as_bytes()).unwrap();
        let field = table.schema.field_with_name(FIELD_IDENTIFIER).unwrap();
        assert_eq!(field.data_type(), &DataType::Utf8);
        assert_eq!(table.num_rows(), 2);
    }

    #[test]
    fn metadata_rows_keep_catalog_order() {
        let table = parse_listing(METADATA_CSV.as_bytes()).unwrap();
        let records = catalog_records(&table).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].dataset_identifier.as_str(), "100057");
        assert_eq!(records[0].number_of_records, Some(12));
        assert_eq!(records[1].dataset_identifier.as_str(), "100123");
        assert_eq!(records[1].size_bytes, None);
        assert_eq!(
            records[1].fields[FIELD_IDENTIFIER],
            Value::String("100123".into())
        );
    }

    #[test]
    fn listing_keeps_timestamps_as_delivered() {
        let table = parse_listing(METADATA_CSV.as_bytes()).unwrap();
        assert!(
            table
                .schema
                .fields()
                .iter()
                .all(|field| field.data_type() == &DataType::Utf8)
        );

        let records = catalog_records(&table).unwrap();
        assert_eq!(
            records[0].modified.as_deref(),
            Some("2024-12-01T10:00:00+01:00")
        );
        assert_eq!(
            records[1].fields["modified"],
            Value::String("2024-11-30T08:00:00+01:00".into())
        );
        assert_eq!(records[0].size_bytes, Some(2048));
    }

    #[test]
    fn export_url_format() {
        let client = OdsHttpClient::new(
            "https://data.bs.ch/",
            "100057".parse().unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        let url = client.export_url(&"100123".parse().unwrap());
        assert_eq!(
            url,
            "https://data.bs.ch/api/explore/v2.1/catalog/datasets/100123/exports/csv?lang=de&timezone=Europe%2FBerlin&use_labels=false&delimiter=%3B"
        );
    }

    #[test]
    fn cache_expires_after_window() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("catalog.json")).unwrap();
        let cache = CatalogCache::new(path, Duration::from_secs(3600));
        let records = catalog_records(&parse_listing(METADATA_CSV.as_bytes()).unwrap()).unwrap();

        let fetched = Utc::now();
        cache.store(&records, fetched).unwrap();

        let fresh = cache.load_fresh(fetched + chrono::Duration::minutes(59));
        assert_eq!(fresh.unwrap(), records);
        assert!(cache.load_fresh(fetched + chrono::Duration::minutes(61)).is_none());
    }

    #[test]
    fn unreadable_cache_is_a_miss() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("catalog.json")).unwrap();
        std::fs::write(path.as_std_path(), b"not json").unwrap();
        let cache = CatalogCache::new(path, Duration::from_secs(3600));
        assert!(cache.load_fresh(Utc::now()).is_none());
    }
}
