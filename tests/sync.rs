use camino::Utf8Path;
use serde_json::json;

use ods_booster::domain::CatalogRecord;
use ods_booster::ledger::Ledger;
use ods_booster::remote::RemoteObject;
use ods_booster::sync::{SyncStatus, annotate, compute_sync_view};
use ods_booster::warehouse::WarehouseTable;

fn record(id: &str, modified: &str) -> CatalogRecord {
    let fields = json!({
        "dataset_identifier": id,
        "title": format!("Dataset {id}"),
        "modified": modified,
        "number_of_records": "5"
    });
    CatalogRecord::from_fields(fields.as_object().unwrap().clone()).unwrap()
}

#[test]
fn sync_view_left_joins_ledger() {
    let ledger = Ledger::from_slice(
        br#"{"100002": {"dataset_identifier": "100002", "modified": "2024-01-01", "number_of_records": 4}}"#,
        Utf8Path::new("log.json"),
    )
    .unwrap();
    let catalog = vec![record("100001", "2024-01-01"), record("100002", "2024-03-01")];

    let view = compute_sync_view(&catalog, &ledger);
    assert_eq!(view.len(), 2);
    assert_eq!(view[0].status(), SyncStatus::NotDownloaded);
    assert_eq!(view[1].status(), SyncStatus::Stale);
    assert_eq!(view[1].number_of_records_ods, Some(5));
    assert_eq!(view[1].number_of_records_local, Some(4));
}

#[test]
fn ledger_entries_missing_from_catalog_are_not_listed() {
    let ledger = Ledger::from_slice(
        br#"{"100009": {"dataset_identifier": "100009", "modified": "x"}}"#,
        Utf8Path::new("log.json"),
    )
    .unwrap();
    let view = compute_sync_view(&[record("100001", "2024-01-01")], &ledger);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].dataset_identifier.as_str(), "100001");
}

#[test]
fn annotate_objects_and_tables() {
    let catalog = vec![record("100001", "2024-01-01")];
    let objects = vec![
        RemoteObject::from_name("100001.parquet".to_string()),
        RemoteObject::from_name("readme.txt".to_string()),
    ];
    let rows = annotate(objects, &catalog);
    assert_eq!(rows[0].modified.as_deref(), Some("2024-01-01"));
    assert_eq!(rows[1].title, None);

    let tables = annotate(vec![WarehouseTable::from_name("DS_100001".to_string())], &catalog);
    assert_eq!(tables[0].title.as_deref(), Some("Dataset 100001"));
}

#[test]
fn sync_row_serializes_with_suffixes() {
    let view = compute_sync_view(&[record("100001", "2024-01-01")], &Ledger::new());
    let value = serde_json::to_value(&view[0]).unwrap();
    assert_eq!(value["modified_ods"], json!("2024-01-01"));
    assert_eq!(value["modified_local"], json!(null));
}
