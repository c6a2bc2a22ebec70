//! Synchronization ledger: which datasets were downloaded, and in which state.
//!
//! The ledger is a single JSON object keyed by dataset identifier. Values are
//! flat field maps holding the catalog snapshot taken at download time. Entries
//! are kept as raw maps so that a read-modify-write cycle preserves fields this
//! crate does not know about.

use std::collections::BTreeMap;
use std::fmt;

use camino::Utf8Path;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::domain::{CatalogRecord, DatasetId, FIELD_IDENTIFIER, FIELD_MODIFIED, FIELD_RECORDS};
use crate::error::BoosterError;

pub const FIELD_MODIFIED_LOCAL: &str = "modified_local";
pub const FIELD_RECORDS_LOCAL: &str = "number_of_records_local";
pub const FIELD_DOWNLOADED_AT: &str = "downloaded_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerEntry {
    fields: Map<String, Value>,
}

impl LedgerEntry {
    /// Snapshot of a catalog record at the moment its data was downloaded.
    pub fn from_download(record: &CatalogRecord, downloaded_at: DateTime<Utc>) -> Self {
        let mut fields = record.fields.clone();
        let id = Value::String(record.dataset_identifier.to_string());
        let modified = record
            .modified
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null);
        let records = record
            .number_of_records
            .map(Value::from)
            .unwrap_or(Value::Null);

        fields.insert(FIELD_IDENTIFIER.to_string(), id);
        fields.insert(FIELD_MODIFIED.to_string(), modified.clone());
        fields.insert(FIELD_RECORDS.to_string(), records.clone());
        fields.insert(FIELD_MODIFIED_LOCAL.to_string(), modified);
        fields.insert(FIELD_RECORDS_LOCAL.to_string(), records);
        fields.insert(
            FIELD_DOWNLOADED_AT.to_string(),
            Value::String(downloaded_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        Self { fields }
    }

    pub fn dataset_identifier(&self) -> Option<String> {
        match self.fields.get(FIELD_IDENTIFIER)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Catalog modification timestamp captured at download time.
    pub fn modified(&self) -> Option<&str> {
        self.fields.get(FIELD_MODIFIED).and_then(Value::as_str)
    }

    /// Record count captured at download time.
    pub fn number_of_records(&self) -> Option<u64> {
        match self.fields.get(FIELD_RECORDS)? {
            Value::Number(value) => value
                .as_u64()
                .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
            Value::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn downloaded_at(&self) -> Option<&str> {
        self.fields.get(FIELD_DOWNLOADED_AT).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

// Top-level members in document order, duplicates included.
struct RawLedger(Vec<(String, LedgerEntry)>);

impl<'de> Deserialize<'de> for RawLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawVisitor;

        impl<'de> Visitor<'de> for RawVisitor {
            type Value = RawLedger;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object keyed by dataset identifier")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawLedger, A::Error> {
                let mut members = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(member) = map.next_entry::<String, LedgerEntry>()? {
                    members.push(member);
                }
                Ok(RawLedger(members))
            }
        }

        deserializer.deserialize_map(RawVisitor)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    entries: BTreeMap<DatasetId, LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a ledger document read from `source`.
    pub fn from_slice(content: &[u8], source: &Utf8Path) -> Result<Self, BoosterError> {
        let corrupt = |message: String| BoosterError::LedgerCorrupt {
            path: source.to_path_buf(),
            message,
        };

        let RawLedger(members) =
            serde_json::from_slice(content).map_err(|err| corrupt(err.to_string()))?;

        let mut entries = BTreeMap::new();
        for (key, entry) in members {
            let id: DatasetId = key
                .parse()
                .map_err(|_| corrupt(format!("invalid key {key:?}")))?;
            if id.as_str() != key {
                return Err(corrupt(format!("key {key:?} has surrounding whitespace")));
            }
            if entries.contains_key(&id) {
                return Err(corrupt(format!("duplicate key {key:?}")));
            }
            match entry.dataset_identifier() {
                Some(inner) if inner == id.as_str() => {}
                Some(inner) => {
                    return Err(corrupt(format!(
                        "entry {key:?} carries identifier {inner:?}"
                    )));
                }
                None => {
                    return Err(corrupt(format!("entry {key:?} has no {FIELD_IDENTIFIER}")));
                }
            }
            entries.insert(id, entry);
        }
        Ok(Self { entries })
    }

    pub fn to_vec_pretty(&self) -> Result<Vec<u8>, BoosterError> {
        serde_json::to_vec_pretty(&self.entries)
            .map_err(|err| BoosterError::Filesystem(err.to_string()))
    }

    pub fn get(&self, id: &DatasetId) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    /// Sets the entry for `id`, replacing any previous entry wholesale.
    pub fn upsert(&mut self, id: DatasetId, entry: LedgerEntry) -> Option<LedgerEntry> {
        self.entries.insert(id, entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DatasetId, &LedgerEntry)> {
        self.entries.iter()
    }
}
