use camino::Utf8PathBuf;

use ods_booster::remote::{BlobStore, ObjectStoreClient, StoreLocation};

#[test]
fn file_backend_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = BlobStore::from_url(&format!("file://{}", root.join("container"))).unwrap();
    assert_eq!(
        store.location(),
        &StoreLocation::Local {
            root: root.join("container")
        }
    );

    let local = root.join("100057.parquet");
    std::fs::write(local.as_std_path(), b"first").unwrap();
    assert_eq!(store.upload(&local).unwrap(), "100057.parquet");
    std::fs::write(local.as_std_path(), b"second").unwrap();
    store.upload(&local).unwrap();

    assert_eq!(store.list().unwrap(), vec!["100057.parquet".to_string()]);

    let destination = root.join("downloads/100057.parquet");
    store.download("100057.parquet", &destination).unwrap();
    assert_eq!(std::fs::read(destination.as_std_path()).unwrap(), b"second");
}

#[test]
fn missing_object_is_an_object_store_error() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = BlobStore::from_url(&format!("file://{}", root.join("container"))).unwrap();
    let err = store
        .download("absent.parquet", &root.join("out.parquet"))
        .unwrap_err();
    assert_eq!(err.class(), ods_booster::error::ErrorClass::ObjectStore);
    assert!(!root.join("out.parquet").as_std_path().exists());
}
