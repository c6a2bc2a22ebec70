//! Warehouse side of the bridge.
//!
//! Loading goes through a stage: the local artifact is copied into the stage,
//! the stage schema is inferred, the target table is created on first load,
//! and staged rows are appended by column name. Tables are never altered.

use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use duckdb::Connection;
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::arrow::util::pretty::pretty_format_batches;
use duckdb::params;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{ARTIFACT_EXT, DatasetId, extract_identifier};
use crate::error::BoosterError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarehouseTable {
    pub table_name: String,
    pub dataset_identifier: Option<DatasetId>,
}

impl WarehouseTable {
    pub fn from_name(table_name: String) -> Self {
        Self {
            dataset_identifier: extract_identifier(&table_name),
            table_name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rendered: String,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub created: bool,
    pub rows_loaded: u64,
}

pub trait WarehouseStore: Send {
    fn list_tables(&self) -> Result<Vec<WarehouseTable>, BoosterError>;
    fn table_exists(&self, name: &str) -> Result<bool, BoosterError>;
    fn table_columns(&self, name: &str) -> Result<Vec<ColumnDef>, BoosterError>;
    /// Column layout of the files currently in the stage.
    fn infer_schema(&self) -> Result<Vec<ColumnDef>, BoosterError>;
    /// Returns whether the table was created.
    fn create_table_if_absent(
        &self,
        name: &str,
        schema: &[ColumnDef],
    ) -> Result<bool, BoosterError>;
    fn clear_stage(&self) -> Result<(), BoosterError>;
    fn stage_file(&self, path: &Utf8Path) -> Result<(), BoosterError>;
    /// Appends every staged row to `table`, matching columns by name.
    fn load_stage(&self, table: &str) -> Result<u64, BoosterError>;
    fn query(&self, sql: &str) -> Result<QueryResult, BoosterError>;

    /// Stages `local_path` alone and appends it to `table`, creating the table
    /// from the staged schema when it does not exist yet. Every staged column
    /// must match a table column, ignoring case.
    fn stage_and_load(
        &self,
        local_path: &Utf8Path,
        table: &str,
    ) -> Result<LoadReport, BoosterError> {
        self.clear_stage()?;
        self.stage_file(local_path)?;
        let staged = self.infer_schema()?;

        let created = if self.table_exists(table)? {
            false
        } else {
            self.create_table_if_absent(table, &staged)?
        };

        let known = self
            .table_columns(table)?
            .into_iter()
            .map(|column| column.name.to_lowercase())
            .collect::<HashSet<_>>();
        let unmatched = staged
            .iter()
            .filter(|column| !known.contains(&column.name.to_lowercase()))
            .map(|column| column.name.clone())
            .collect::<Vec<_>>();
        if !unmatched.is_empty() {
            return Err(BoosterError::ColumnMismatch {
                table: table.to_string(),
                columns: unmatched,
            });
        }

        let rows_loaded = self.load_stage(table)?;
        info!(%table, created, rows_loaded, "stage loaded");
        Ok(LoadReport {
            table: table.to_string(),
            created,
            rows_loaded,
        })
    }
}

/// Embedded DuckDB database with a stage directory next to it.
pub struct DuckDbWarehouse {
    conn: Connection,
    stage: Utf8PathBuf,
}

impl DuckDbWarehouse {
    pub fn open(database: &Utf8Path, stage: Utf8PathBuf) -> Result<Self, BoosterError> {
        if let Some(parent) = database.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| BoosterError::Warehouse(format!("{parent}: {err}")))?;
        }
        let conn = Connection::open(database.as_std_path())?;
        debug!(%database, %stage, "warehouse opened");
        Ok(Self { conn, stage })
    }

    pub fn open_in_memory(stage: Utf8PathBuf) -> Result<Self, BoosterError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            stage,
        })
    }

    pub fn stage_dir(&self) -> &Utf8Path {
        &self.stage
    }

    fn staged_files(&self) -> Result<Vec<Utf8PathBuf>, BoosterError> {
        if !self.stage.as_std_path().is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(self.stage.as_std_path())
            .map_err(|err| BoosterError::Warehouse(format!("{}: {err}", self.stage)))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| BoosterError::Warehouse(err.to_string()))?;
            if let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) {
                if path.is_file() && path.extension() == Some(ARTIFACT_EXT) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn stage_glob(&self) -> String {
        sql_literal(self.stage.join(format!("*.{ARTIFACT_EXT}")).as_str())
    }
}

/// Sample query used when only a table is named.
pub fn default_table_query(table: &str) -> String {
    format!("SELECT * FROM {} LIMIT 10", sql_identifier(table))
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sql_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

impl WarehouseStore for DuckDbWarehouse {
    fn list_tables(&self) -> Result<Vec<WarehouseTable>, BoosterError> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'main' ORDER BY table_name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.into_iter().map(WarehouseTable::from_name).collect())
    }

    fn table_exists(&self, name: &str) -> Result<bool, BoosterError> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM information_schema.tables \
             WHERE table_schema = 'main' AND upper(table_name) = upper(?)",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn table_columns(&self, name: &str) -> Result<Vec<ColumnDef>, BoosterError> {
        let mut stmt = self.conn.prepare(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = 'main' AND upper(table_name) = upper(?) \
             ORDER BY ordinal_position",
        )?;
        let columns = stmt
            .query_map(params![name], |row| {
                Ok(ColumnDef {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn infer_schema(&self) -> Result<Vec<ColumnDef>, BoosterError> {
        if self.staged_files()?.is_empty() {
            return Err(BoosterError::SchemaInference(format!(
                "no files staged in {}",
                self.stage
            )));
        }
        let sql = format!("DESCRIBE SELECT * FROM read_parquet({})", self.stage_glob());
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|err| BoosterError::SchemaInference(err.to_string()))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnDef {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                })
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|err| BoosterError::SchemaInference(err.to_string()))?;
        if columns.is_empty() {
            return Err(BoosterError::SchemaInference(format!(
                "staged files in {} have no columns",
                self.stage
            )));
        }
        Ok(columns)
    }

    fn create_table_if_absent(
        &self,
        name: &str,
        schema: &[ColumnDef],
    ) -> Result<bool, BoosterError> {
        if schema.is_empty() {
            return Err(BoosterError::SchemaInference(format!(
                "no columns to create {name}"
            )));
        }
        if self.table_exists(name)? {
            return Ok(false);
        }
        let columns = schema
            .iter()
            .map(|column| format!("{} {}", sql_identifier(&column.name), column.data_type))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({columns})",
            sql_identifier(name)
        );
        self.conn.execute_batch(&sql)?;
        info!(table = %name, columns = schema.len(), "table created");
        Ok(true)
    }

    fn clear_stage(&self) -> Result<(), BoosterError> {
        for path in self.staged_files()? {
            fs::remove_file(path.as_std_path())
                .map_err(|err| BoosterError::Warehouse(format!("{path}: {err}")))?;
        }
        Ok(())
    }

    fn stage_file(&self, path: &Utf8Path) -> Result<(), BoosterError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| BoosterError::Warehouse(format!("{path} has no file name")))?;
        fs::create_dir_all(self.stage.as_std_path())
            .map_err(|err| BoosterError::Warehouse(format!("{}: {err}", self.stage)))?;
        let target = self.stage.join(file_name);
        fs::copy(path.as_std_path(), target.as_std_path())
            .map_err(|err| BoosterError::Warehouse(format!("stage {path}: {err}")))?;
        debug!(%path, %target, "file staged");
        Ok(())
    }

    fn load_stage(&self, table: &str) -> Result<u64, BoosterError> {
        let sql = format!(
            "INSERT INTO {} BY NAME SELECT * FROM read_parquet({})",
            sql_identifier(table),
            self.stage_glob()
        );
        let rows = self.conn.execute(&sql, [])?;
        Ok(rows as u64)
    }

    fn query(&self, sql: &str) -> Result<QueryResult, BoosterError> {
        debug!(%sql, "warehouse.query");
        let mut stmt = self.conn.prepare(sql)?;
        let arrow = stmt.query_arrow([])?;
        let schema = arrow.get_schema();
        let batches = arrow.collect::<Vec<RecordBatch>>();
        let rendered = pretty_format_batches(&batches)
            .map_err(|err| BoosterError::Warehouse(err.to_string()))?
            .to_string();
        Ok(QueryResult {
            columns: schema.fields().iter().map(|f| f.name().clone()).collect(),
            row_count: batches.iter().map(RecordBatch::num_rows).sum(),
            rendered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_identifier_from_name() {
        let table = WarehouseTable::from_name("DS_100057".to_string());
        assert_eq!(table.dataset_identifier.unwrap().as_str(), "100057");
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(sql_identifier("DS_1"), "\"DS_1\"");
        assert_eq!(sql_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(sql_literal("it's"), "'it''s'");
        assert_eq!(
            default_table_query("DS_100057"),
            "SELECT * FROM \"DS_100057\" LIMIT 10"
        );
    }

    #[test]
    fn empty_stage_fails_inference() {
        let temp = tempfile::tempdir().unwrap();
        let stage = Utf8PathBuf::from_path_buf(temp.path().join("stage")).unwrap();
        let warehouse = DuckDbWarehouse::open_in_memory(stage).unwrap();
        assert!(matches!(
            warehouse.infer_schema(),
            Err(BoosterError::SchemaInference(_))
        ));
    }
}
