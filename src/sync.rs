//! Reconciliation of catalog metadata with local and remote state.
//!
//! Everything here is a pure function of its inputs. Views are recomputed on
//! every command and never persisted.

use std::collections::HashMap;

use clap::ValueEnum;
use serde::Serialize;

use crate::domain::{CatalogRecord, DatasetId};
use crate::ledger::Ledger;
use crate::remote::RemoteObject;
use crate::store::LocalArtifact;
use crate::warehouse::WarehouseTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    NotDownloaded,
    Synchronized,
    Stale,
}

/// Catalog record joined with its ledger entry. `_ods` fields come from the
/// catalog, `_local` fields from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncViewRow {
    pub dataset_identifier: DatasetId,
    pub title: Option<String>,
    pub modified_ods: Option<String>,
    pub modified_local: Option<String>,
    pub size_of_records_in_the_dataset_in_bytes: Option<u64>,
    pub number_of_records_ods: Option<u64>,
    pub number_of_records_local: Option<u64>,
    pub downloaded: bool,
    pub downloaded_at: Option<String>,
}

impl SyncViewRow {
    pub fn is_synchronized(&self) -> bool {
        self.downloaded && self.modified_ods == self.modified_local
    }

    pub fn status(&self) -> SyncStatus {
        if !self.downloaded {
            SyncStatus::NotDownloaded
        } else if self.is_synchronized() {
            SyncStatus::Synchronized
        } else {
            SyncStatus::Stale
        }
    }
}

/// Left join of the catalog with the ledger, in catalog order.
pub fn compute_sync_view(catalog: &[CatalogRecord], ledger: &Ledger) -> Vec<SyncViewRow> {
    catalog
        .iter()
        .map(|record| {
            let entry = ledger.get(&record.dataset_identifier);
            SyncViewRow {
                dataset_identifier: record.dataset_identifier.clone(),
                title: record.title.clone(),
                modified_ods: record.modified.clone(),
                modified_local: entry.and_then(|e| e.modified().map(str::to_string)),
                size_of_records_in_the_dataset_in_bytes: record.size_bytes,
                number_of_records_ods: record.number_of_records,
                number_of_records_local: entry.and_then(|e| e.number_of_records()),
                downloaded: entry.is_some(),
                downloaded_at: entry.and_then(|e| e.downloaded_at().map(str::to_string)),
            }
        })
        .collect()
}

/// Anything that can be matched against the catalog by dataset identifier.
pub trait CatalogKeyed {
    fn join_key(&self) -> Option<&DatasetId>;
}

impl CatalogKeyed for LocalArtifact {
    fn join_key(&self) -> Option<&DatasetId> {
        self.dataset_identifier.as_ref()
    }
}

impl CatalogKeyed for RemoteObject {
    fn join_key(&self) -> Option<&DatasetId> {
        self.dataset_identifier.as_ref()
    }
}

impl CatalogKeyed for WarehouseTable {
    fn join_key(&self) -> Option<&DatasetId> {
        self.dataset_identifier.as_ref()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Annotated<T> {
    #[serde(flatten)]
    pub item: T,
    pub title: Option<String>,
    pub modified: Option<String>,
}

/// Left join of `items` with catalog title and modification time. Items
/// without an identifier, or with one the catalog does not know, keep empty
/// annotations.
pub fn annotate<T: CatalogKeyed>(items: Vec<T>, catalog: &[CatalogRecord]) -> Vec<Annotated<T>> {
    let index = catalog
        .iter()
        .map(|record| (&record.dataset_identifier, record))
        .collect::<HashMap<_, _>>();
    items
        .into_iter()
        .map(|item| {
            let record = item.join_key().and_then(|key| index.get(key).copied());
            Annotated {
                title: record.and_then(|r| r.title.clone()),
                modified: record.and_then(|r| r.modified.clone()),
                item,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use serde_json::{Map, json};

    use super::*;
    use crate::domain::extract_identifier;

    fn record(id: &str, modified: &str, records: u64) -> CatalogRecord {
        CatalogRecord {
            dataset_identifier: id.parse().unwrap(),
            title: Some(format!("title {id}")),
            modified: Some(modified.to_string()),
            size_bytes: Some(10),
            number_of_records: Some(records),
            fields: Map::new(),
        }
    }

    fn ledger_with(id: &str, modified: &str, records: u64) -> Ledger {
        let doc = json!({
            id: { "dataset_identifier": id, "modified": modified, "number_of_records": records }
        });
        Ledger::from_slice(doc.to_string().as_bytes(), Utf8PathBuf::from("log.json").as_path())
            .unwrap()
    }

    #[test]
    fn empty_ledger_leaves_local_fields_absent() {
        let view = compute_sync_view(&[record("1", "T1", 10)], &Ledger::new());
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].modified_local, None);
        assert_eq!(view[0].number_of_records_local, None);
        assert_eq!(view[0].status(), SyncStatus::NotDownloaded);
    }

    #[test]
    fn matching_entry_is_synchronized() {
        let view = compute_sync_view(&[record("1", "T1", 10)], &ledger_with("1", "T1", 10));
        assert!(view[0].is_synchronized());
        assert_eq!(view[0].number_of_records_local, Some(10));
    }

    #[test]
    fn newer_catalog_entry_is_stale() {
        let view = compute_sync_view(&[record("1", "T2", 12)], &ledger_with("1", "T1", 10));
        assert_eq!(view[0].status(), SyncStatus::Stale);
    }

    #[test]
    fn rows_follow_catalog_order() {
        let catalog = vec![record("9", "a", 1), record("2", "b", 1), record("5", "c", 1)];
        let ids = compute_sync_view(&catalog, &Ledger::new())
            .into_iter()
            .map(|row| row.dataset_identifier.to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["9", "2", "5"]);
    }

    #[test]
    fn annotate_skips_unmatched_items() {
        let catalog = vec![record("100057", "T1", 1)];
        let artifacts = ["100057.parquet", "notes.parquet", "100999.parquet"]
            .iter()
            .map(|name| LocalArtifact {
                file_name: name.to_string(),
                path: Utf8PathBuf::from(*name),
                dataset_identifier: extract_identifier(name),
            })
            .collect::<Vec<_>>();
        let rows = annotate(artifacts, &catalog);
        assert_eq!(rows[0].title.as_deref(), Some("title 100057"));
        assert_eq!(rows[1].title, None);
        assert_eq!(rows[2].modified, None);
    }
}
