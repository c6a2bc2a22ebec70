use camino::Utf8PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BoosterError {
    #[error("invalid dataset identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("dataset {0} is not listed in the catalog")]
    DatasetNotFound(String),

    #[error("no local artifact for dataset {0}")]
    ArtifactNotFound(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    RemoteFetch(String),

    #[error("catalog returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("object store operation failed: {0}")]
    ObjectStore(String),

    #[error("warehouse operation failed: {0}")]
    Warehouse(String),

    #[error("schema inference failed: {0}")]
    #[diagnostic(help("ensure the staged file exists and is a readable parquet file"))]
    SchemaInference(String),

    #[error("staged columns {columns:?} have no match in table {table}")]
    ColumnMismatch { table: String, columns: Vec<String> },

    #[error("ledger at {path} is corrupt: {message}")]
    #[diagnostic(help("restore the ledger from a backup or fix it by hand; it is never reset"))]
    LedgerCorrupt { path: Utf8PathBuf, message: String },

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

/// Coarse grouping used for exit codes and batch reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    RemoteFetch,
    ObjectStore,
    Warehouse,
    LedgerCorrupt,
    Local,
}

impl BoosterError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BoosterError::InvalidIdentifier(_)
            | BoosterError::DatasetNotFound(_)
            | BoosterError::ArtifactNotFound(_)
            | BoosterError::ConfigRead(_)
            | BoosterError::ConfigParse(_) => ErrorClass::Input,
            BoosterError::RemoteFetch(_) | BoosterError::RemoteStatus { .. } => {
                ErrorClass::RemoteFetch
            }
            BoosterError::ObjectStore(_) => ErrorClass::ObjectStore,
            BoosterError::Warehouse(_)
            | BoosterError::SchemaInference(_)
            | BoosterError::ColumnMismatch { .. } => ErrorClass::Warehouse,
            BoosterError::LedgerCorrupt { .. } => ErrorClass::LedgerCorrupt,
            BoosterError::Parquet(_) | BoosterError::Filesystem(_) => ErrorClass::Local,
        }
    }

    /// Fatal errors abort a whole batch instead of failing a single item.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::LedgerCorrupt
    }
}

impl From<duckdb::Error> for BoosterError {
    fn from(err: duckdb::Error) -> Self {
        BoosterError::Warehouse(err.to_string())
    }
}

impl From<object_store::Error> for BoosterError {
    fn from(err: object_store::Error) -> Self {
        BoosterError::ObjectStore(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for BoosterError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        BoosterError::Parquet(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ledger_corruption_is_fatal() {
        let corrupt = BoosterError::LedgerCorrupt {
            path: Utf8PathBuf::from("log.json"),
            message: "expected value".to_string(),
        };
        assert!(corrupt.is_fatal());
        assert!(!BoosterError::RemoteFetch("timeout".to_string()).is_fatal());
        assert!(!BoosterError::SchemaInference("empty".to_string()).is_fatal());
    }

    #[test]
    fn schema_and_column_errors_are_warehouse_class() {
        let mismatch = BoosterError::ColumnMismatch {
            table: "DS_1".to_string(),
            columns: vec!["extra".to_string()],
        };
        assert_eq!(mismatch.class(), ErrorClass::Warehouse);
        assert_eq!(
            BoosterError::SchemaInference("no columns".to_string()).class(),
            ErrorClass::Warehouse
        );
    }
}
