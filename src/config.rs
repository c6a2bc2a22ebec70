use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::DatasetId;
use crate::error::BoosterError;

pub const DEFAULT_CONFIG_FILE: &str = "ods-booster.json";
pub const DEFAULT_BASE_URL: &str = "https://data.bs.ch";
pub const DEFAULT_METADATA_DATASET: &str = "100057";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub object_store: ObjectStoreSection,
    #[serde(default)]
    pub warehouse: WarehouseSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub metadata_dataset: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    #[serde(default)]
    pub data_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub ledger_path: Option<Utf8PathBuf>,
    /// Datasets whose catalog size exceeds this many bytes are not downloaded.
    #[serde(default)]
    pub max_download_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectStoreSection {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseSection {
    #[serde(default)]
    pub database: Option<Utf8PathBuf>,
    #[serde(default)]
    pub stage_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub stage_name: Option<String>,
    #[serde(default)]
    pub table_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub metadata_dataset: DatasetId,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub data_dir: Utf8PathBuf,
    pub ledger_path: Utf8PathBuf,
    pub max_download_bytes: Option<u64>,
    pub object_store_url: String,
    pub warehouse_database: Utf8PathBuf,
    pub stage_dir: Utf8PathBuf,
    pub stage_name: String,
    pub table_prefix: String,
}

impl ResolvedConfig {
    /// Directory holding files staged for the next warehouse load.
    pub fn stage_path(&self) -> Utf8PathBuf {
        self.stage_dir.join(&self.stage_name)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `ods-booster.json` in the working directory when no
    /// path is given. Only an explicitly named file has to exist.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<ResolvedConfig, BoosterError> {
        let config_path = path
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_CONFIG_FILE));

        if path.is_none() && !config_path.as_std_path().exists() {
            debug!("no config file, using defaults");
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| BoosterError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| BoosterError::ConfigParse(err.to_string()))?;
        debug!(path = %config_path, "config loaded");

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, BoosterError> {
        let Config {
            catalog,
            storage,
            object_store,
            warehouse,
        } = config;

        let metadata_dataset = catalog
            .metadata_dataset
            .as_deref()
            .unwrap_or(DEFAULT_METADATA_DATASET)
            .parse()?;
        let table_prefix = warehouse.table_prefix.unwrap_or_else(|| "DS_".to_string());
        if table_prefix.contains('"') {
            return Err(BoosterError::ConfigParse(format!(
                "invalid table prefix {table_prefix:?}"
            )));
        }

        Ok(ResolvedConfig {
            base_url: catalog
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            metadata_dataset,
            timeout: Duration::from_secs(catalog.timeout_secs.unwrap_or(60)),
            cache_ttl: Duration::from_secs(catalog.cache_ttl_secs.unwrap_or(3600)),
            data_dir: storage.data_dir.unwrap_or_else(|| "data".into()),
            ledger_path: storage.ledger_path.unwrap_or_else(|| "log.json".into()),
            max_download_bytes: storage.max_download_bytes,
            object_store_url: object_store
                .url
                .unwrap_or_else(|| "file://remote".to_string()),
            warehouse_database: warehouse.database.unwrap_or_else(|| "ogd.duckdb".into()),
            stage_dir: warehouse.stage_dir.unwrap_or_else(|| "stage".into()),
            stage_name: warehouse
                .stage_name
                .unwrap_or_else(|| "OGD_STAGE".to_string()),
            table_prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.base_url, "https://data.bs.ch");
        assert_eq!(resolved.metadata_dataset.as_str(), "100057");
        assert_eq!(resolved.cache_ttl, Duration::from_secs(3600));
        assert_eq!(resolved.ledger_path, Utf8PathBuf::from("log.json"));
        assert_eq!(resolved.stage_path(), Utf8PathBuf::from("stage/OGD_STAGE"));
        assert_eq!(resolved.max_download_bytes, None);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"storage": {"max_download_bytes": 1048576}, "warehouse": {"table_prefix": "OGD_"}}"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.max_download_bytes, Some(1_048_576));
        assert_eq!(resolved.table_prefix, "OGD_");
        assert_eq!(resolved.data_dir, Utf8PathBuf::from("data"));
    }
}
