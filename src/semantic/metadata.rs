//! Side table mapping index rows to catalog entries.
//!
//! Stored as a pretty-printed JSON object keyed by the decimal row number:
//! `{"0": {"id": 1, "text": "...", "name": "bulbasaur"}}`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::semantic::embeddings::EmbeddedEntry;
use crate::storage::write_atomic;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metadata key '{0}' is not a row number")]
    InvalidKey(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: u32,
    pub text: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataTable {
    records: BTreeMap<usize, EntryRecord>,
}

impl MetadataTable {
    /// Row `i` describes `entries[i]`.
    pub fn from_entries(entries: &[EmbeddedEntry]) -> Self {
        let records = entries
            .iter()
            .enumerate()
            .map(|(row, entry)| {
                (
                    row,
                    EntryRecord {
                        id: entry.id,
                        text: entry.text.clone(),
                        name: entry.name.clone(),
                    },
                )
            })
            .collect();

        Self { records }
    }

    pub fn get(&self, row: usize) -> Option<&EntryRecord> {
        self.records.get(&row)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &EntryRecord)> {
        self.records.iter().map(|(row, record)| (*row, record))
    }

    /// Set every record's name from `names`; unknown ids get `null`.
    ///
    /// Returns how many records were named.
    pub fn set_names(&mut self, names: &BTreeMap<u32, String>) -> usize {
        let mut named = 0;
        for record in self.records.values_mut() {
            record.name = names.get(&record.id).cloned();
            if record.name.is_some() {
                named += 1;
            }
        }
        named
    }

    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        write_atomic(path, self.to_json()?.as_bytes())?;
        Ok(())
    }

    fn from_json(bytes: &[u8]) -> Result<Self, MetadataError> {
        let raw: BTreeMap<String, EntryRecord> = serde_json::from_slice(bytes)?;

        let records = raw
            .into_iter()
            .map(|(key, record)| {
                key.parse::<usize>()
                    .map(|row| (row, record))
                    .map_err(|_| MetadataError::InvalidKey(key))
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { records })
    }

    fn to_json(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Rows are written in numeric order, keyed by their decimal string.
impl Serialize for MetadataTable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for (row, record) in &self.records {
            map.serialize_entry(&row.to_string(), record)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, text: &str, name: Option<&str>) -> EmbeddedEntry {
        EmbeddedEntry {
            id,
            text: text.to_string(),
            name: name.map(str::to_string),
            embedding: vec![1.0],
        }
    }

    #[test]
    fn test_from_entries_uses_row_numbers() {
        let table = MetadataTable::from_entries(&[
            entry(4, "A flame burns on its tail.", Some("charmander")),
            entry(7, "It shelters in its shell.", None),
        ]);

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).unwrap().id, 4);
        assert_eq!(table.get(1).unwrap().name, None);
        assert!(table.get(2).is_none());
    }

    #[test]
    fn test_json_shape() {
        let table = MetadataTable::from_entries(&[entry(1, "Une graine étrange.", Some("bulbasaur"))]);
        let json = table.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"0": {"id": 1, "text": "Une graine étrange.", "name": "bulbasaur"}})
        );
        // non-ascii text is written as is
        assert!(json.contains("étrange"));
    }

    #[test]
    fn test_rows_written_in_numeric_order() {
        let entries: Vec<EmbeddedEntry> = (0..12).map(|i| entry(i, "t", None)).collect();
        let json = MetadataTable::from_entries(&entries).to_json().unwrap();

        let pos = |key: &str| json.find(&format!("\"{key}\":")).unwrap();
        assert!(pos("2") < pos("10"));
        assert!(pos("9") < pos("11"));
    }

    #[test]
    fn test_load_without_names() {
        let json = br#"{"0": {"id": 1, "text": "seed"}, "10": {"id": 2, "text": "bud"}, "2": {"id": 3, "text": "flower"}}"#;
        let table = MetadataTable::from_json(json).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(10).unwrap().text, "bud");
        assert_eq!(table.get(0).unwrap().name, None);

        let rows: Vec<usize> = table.iter().map(|(row, _)| row).collect();
        assert_eq!(rows, vec![0, 2, 10]);
    }

    #[test]
    fn test_invalid_key() {
        let json = br#"{"first": {"id": 1, "text": "seed"}}"#;
        assert!(matches!(
            MetadataTable::from_json(json),
            Err(MetadataError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_set_names() {
        let mut table = MetadataTable::from_entries(&[
            entry(1, "seed", None),
            entry(2, "bud", Some("stale")),
            entry(1, "another seed", None),
        ]);
        let names: BTreeMap<u32, String> = [(1, "bulbasaur".to_string())].into_iter().collect();

        assert_eq!(table.set_names(&names), 2);
        assert_eq!(table.get(0).unwrap().name.as_deref(), Some("bulbasaur"));
        assert_eq!(table.get(1).unwrap().name, None);
        assert_eq!(table.get(2).unwrap().name.as_deref(), Some("bulbasaur"));
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.json");

        let table = MetadataTable::from_entries(&[entry(25, "It stores electricity.", Some("pikachu"))]);
        table.save(&path).unwrap();

        assert_eq!(MetadataTable::load(&path).unwrap(), table);
    }
}
