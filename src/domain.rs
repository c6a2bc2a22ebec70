use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BoosterError;

pub const FIELD_IDENTIFIER: &str = "dataset_identifier";
pub const FIELD_TITLE: &str = "title";
pub const FIELD_MODIFIED: &str = "modified";
pub const FIELD_SIZE_BYTES: &str = "size_of_records_in_the_dataset_in_bytes";
pub const FIELD_RECORDS: &str = "number_of_records";

pub const ARTIFACT_EXT: &str = "parquet";

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("digit pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetId(String);

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the local artifact, which is also the remote object key.
    pub fn artifact_file_name(&self) -> String {
        format!("{}.{ARTIFACT_EXT}", self.0)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = BoosterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && !normalized
                .chars()
                .any(|ch| ch == '/' || ch == '\\' || ch.is_whitespace() || ch.is_control());
        if !is_valid {
            return Err(BoosterError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for DatasetId {
    type Error = BoosterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatasetId> for String {
    fn from(value: DatasetId) -> Self {
        value.0
    }
}

/// Returns the first maximal run of ASCII digits in `name`.
///
/// Works for artifact file names (`100057.parquet`) as well as warehouse
/// table names (`DS_100057`). Names without digits yield `None` and take no
/// part in joins.
pub fn extract_identifier(name: &str) -> Option<DatasetId> {
    DIGIT_RUN
        .find(name)
        .map(|found| DatasetId(found.as_str().to_string()))
}

/// Warehouse table for a dataset: `prefix` followed by the identifier's digits.
pub fn warehouse_table_name(prefix: &str, id: &DatasetId) -> Result<String, BoosterError> {
    let digits = extract_identifier(id.as_str())
        .ok_or_else(|| BoosterError::InvalidIdentifier(id.to_string()))?;
    Ok(format!("{prefix}{digits}"))
}

/// One row of the catalog's metadata listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub dataset_identifier: DatasetId,
    pub title: Option<String>,
    pub modified: Option<String>,
    pub size_bytes: Option<u64>,
    pub number_of_records: Option<u64>,
    /// Every column of the listing for this dataset, as delivered.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl CatalogRecord {
    /// Builds a record from the raw column map of one listing row.
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, BoosterError> {
        let id = text_field(&fields, FIELD_IDENTIFIER).ok_or_else(|| {
            BoosterError::RemoteFetch(format!("catalog row without {FIELD_IDENTIFIER}"))
        })?;
        Ok(Self {
            dataset_identifier: id.parse()?,
            title: text_field(&fields, FIELD_TITLE),
            modified: text_field(&fields, FIELD_MODIFIED),
            size_bytes: count_field(&fields, FIELD_SIZE_BYTES),
            number_of_records: count_field(&fields, FIELD_RECORDS),
            fields,
        })
    }
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(value) if !value.is_empty() => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

// Counts arrive as text and occasionally in float notation ("1234.0").
fn count_field(fields: &Map<String, Value>, key: &str) -> Option<u64> {
    match fields.get(key)? {
        Value::Number(value) => value
            .as_u64()
            .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        Value::String(value) => {
            let value = value.trim();
            value.parse::<u64>().ok().or_else(|| {
                value
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| v as u64)
            })
        }
        _ => None,
    }
}
