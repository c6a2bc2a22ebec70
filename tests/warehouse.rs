use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ods_booster::catalog::parse_export;
use ods_booster::error::{BoosterError, ErrorClass};
use ods_booster::store::Store;
use ods_booster::warehouse::{ColumnDef, DuckDbWarehouse, WarehouseStore};

fn write_artifact(root: &Utf8PathBuf, id: &str, csv: &str) -> Utf8PathBuf {
    let store = Store::new_with_paths(
        root.join("data"),
        root.join("log.json"),
        root.join("cache"),
    );
    let table = parse_export(csv.as_bytes()).unwrap();
    store.write_artifact(&id.parse().unwrap(), &table).unwrap()
}

fn setup() -> (tempfile::TempDir, Utf8PathBuf, DuckDbWarehouse) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let warehouse = DuckDbWarehouse::open_in_memory(root.join("stage/OGD_STAGE")).unwrap();
    (temp, root, warehouse)
}

#[test]
fn stage_and_load_creates_missing_table() {
    let (_temp, root, warehouse) = setup();
    let path = write_artifact(&root, "100057", "station;value\na;1\nb;2\nc;3\n");

    let report = warehouse.stage_and_load(&path, "DS_100057").unwrap();
    assert!(report.created);
    assert_eq!(report.rows_loaded, 3);

    let columns = warehouse.table_columns("DS_100057").unwrap();
    let names = columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["station", "value"]);

    let tables = warehouse.list_tables().unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].dataset_identifier.as_ref().unwrap().as_str(), "100057");
}

#[test]
fn reload_appends_to_existing_table() {
    let (_temp, root, warehouse) = setup();
    let path = write_artifact(&root, "100057", "station;value\na;1\nb;2\n");

    warehouse.stage_and_load(&path, "DS_100057").unwrap();
    let report = warehouse.stage_and_load(&path, "DS_100057").unwrap();
    assert!(!report.created);

    let result = warehouse.query("SELECT * FROM DS_100057").unwrap();
    assert_eq!(result.row_count, 4);
}

#[test]
fn column_case_is_ignored_on_load() {
    let (_temp, root, warehouse) = setup();
    warehouse
        .create_table_if_absent(
            "DS_100057",
            &[
                ColumnDef {
                    name: "STATION".to_string(),
                    data_type: "VARCHAR".to_string(),
                },
                ColumnDef {
                    name: "VALUE".to_string(),
                    data_type: "BIGINT".to_string(),
                },
            ],
        )
        .unwrap();
    let path = write_artifact(&root, "100057", "station;value\na;1\n");

    let report = warehouse.stage_and_load(&path, "DS_100057").unwrap();
    assert!(!report.created);
    assert_eq!(report.rows_loaded, 1);
}

#[test]
fn new_column_surfaces_a_warehouse_error() {
    let (_temp, root, warehouse) = setup();
    let first = write_artifact(&root, "100057", "station;value\na;1\n");
    warehouse.stage_and_load(&first, "DS_100057").unwrap();

    let second = write_artifact(&root, "100057", "station;value;unit\nb;2;mm\n");
    let err = warehouse.stage_and_load(&second, "DS_100057").unwrap_err();
    assert_eq!(err.class(), ErrorClass::Warehouse);
    assert_matches!(
        err,
        BoosterError::ColumnMismatch { ref columns, .. } if columns == &vec!["unit".to_string()]
    );

    let result = warehouse.query("SELECT * FROM DS_100057").unwrap();
    assert_eq!(result.row_count, 1);
}

#[test]
fn stage_holds_only_the_latest_file() {
    let (_temp, root, warehouse) = setup();
    let first = write_artifact(&root, "100001", "station;value\na;1\n");
    let second = write_artifact(&root, "100002", "station;value\nb;2\nc;3\n");

    warehouse.stage_and_load(&first, "DS_100001").unwrap();
    let report = warehouse.stage_and_load(&second, "DS_100002").unwrap();
    assert_eq!(report.rows_loaded, 2);

    let staged = std::fs::read_dir(warehouse.stage_dir().as_std_path())
        .unwrap()
        .count();
    assert_eq!(staged, 1);
}

#[test]
fn bad_sql_is_a_warehouse_error() {
    let (_temp, _root, warehouse) = setup();
    let err = warehouse.query("SELECT * FROM missing_table").unwrap_err();
    assert_eq!(err.class(), ErrorClass::Warehouse);
}
