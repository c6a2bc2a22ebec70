use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ods_booster::config::ConfigLoader;
use ods_booster::error::BoosterError;

#[test]
fn explicit_config_file_is_read() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("ods-booster.json")).unwrap();
    std::fs::write(
        path.as_std_path(),
        r#"{
            "catalog": {"base_url": "https://data.example.org", "cache_ttl_secs": 60},
            "object_store": {"url": "azure://data"},
            "warehouse": {"database": "db/ogd.duckdb"}
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(&path)).unwrap();
    assert_eq!(resolved.base_url, "https://data.example.org");
    assert_eq!(resolved.cache_ttl.as_secs(), 60);
    assert_eq!(resolved.object_store_url, "azure://data");
    assert_eq!(resolved.warehouse_database, Utf8PathBuf::from("db/ogd.duckdb"));
    assert_eq!(resolved.stage_name, "OGD_STAGE");
}

#[test]
fn missing_explicit_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("absent.json")).unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(BoosterError::ConfigRead(_))
    );
}

#[test]
fn unknown_keys_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("ods-booster.json")).unwrap();
    std::fs::write(path.as_std_path(), r#"{"catalog": {"base": "x"}}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(BoosterError::ConfigParse(_))
    );
}

#[test]
fn invalid_metadata_dataset_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("ods-booster.json")).unwrap();
    std::fs::write(path.as_std_path(), r#"{"catalog": {"metadata_dataset": " "}}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(BoosterError::InvalidIdentifier(_))
    );
}
