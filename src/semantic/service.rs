//! Query-side search service.
//!
//! Holds the embedder, the loaded index and the metadata table. The index is
//! immutable once loaded, so searches only need `&self`.

use std::path::Path;

use serde::Serialize;

use crate::config::Config;
use crate::semantic::embeddings::{model_id_hash, Embedder, EmbeddingError};
use crate::semantic::index::{FlatL2Index, IndexError};
use crate::semantic::metadata::{MetadataError, MetadataTable};
use crate::semantic::storage::{IndexStorage, IndexStorageError};

/// Errors that can occur during semantic search operations.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("query text must not be empty")]
    EmptyQuery,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] IndexStorageError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("metadata has {metadata} rows but the index has {index}")]
    Inconsistent { index: usize, metadata: usize },
}

/// One matching catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: u32,
    pub text: String,
    pub name: Option<String>,
    pub distance: f32,
}

pub struct SearchService {
    embedder: Box<dyn Embedder>,
    index: FlatL2Index,
    metadata: MetadataTable,
    top_k: usize,
}

impl SearchService {
    pub fn new(
        embedder: Box<dyn Embedder>,
        index: FlatL2Index,
        metadata: MetadataTable,
        top_k: usize,
    ) -> Result<Self, SearchError> {
        if metadata.len() < index.len() {
            return Err(SearchError::Inconsistent {
                index: index.len(),
                metadata: metadata.len(),
            });
        }

        Ok(Self {
            embedder,
            index,
            metadata,
            top_k,
        })
    }

    /// Load the index and metadata files named in `config` from `data_dir`.
    pub fn open(
        config: &Config,
        data_dir: &Path,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self, SearchError> {
        let storage = IndexStorage::new(data_dir.join(&config.build.index_file));
        let index = storage.load(&model_id_hash(embedder.name()))?;
        log::info!(
            "Loaded {} vectors ({} dims) from {}",
            index.len(),
            index.dimensions(),
            storage.path().display()
        );

        let metadata_path = data_dir.join(&config.build.metadata_file);
        let metadata = MetadataTable::load(&metadata_path)?;
        log::info!(
            "Loaded {} metadata records from {}",
            metadata.len(),
            metadata_path.display()
        );

        Self::new(embedder, index, metadata, config.server.top_k)
    }

    pub fn indexed_count(&self) -> usize {
        self.index.len()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Search with the configured top-k.
    pub fn search(&self, text: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.search_with_limit(text, self.top_k)
    }

    /// Embed `text` and return up to `limit` closest entries, closest first.
    pub fn search_with_limit(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        if text.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let query = self.embedder.embed(text)?;
        let neighbors = self.index.search(&query, limit)?;

        let hits = neighbors
            .into_iter()
            .filter_map(|neighbor| match self.metadata.get(neighbor.row) {
                Some(record) => Some(SearchHit {
                    id: record.id,
                    text: record.text.clone(),
                    name: record.name.clone(),
                    distance: neighbor.distance,
                }),
                None => {
                    log::warn!("no metadata for index row {}", neighbor.row);
                    None
                }
            })
            .collect();

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::embeddings::EmbeddedEntry;
    use crate::tests::KeywordEmbedder;

    fn entry(id: u32, text: &str) -> EmbeddedEntry {
        EmbeddedEntry {
            id,
            text: text.to_string(),
            name: Some(format!("species-{id}")),
            embedding: KeywordEmbedder.embed(text).unwrap(),
        }
    }

    fn service(entries: &[EmbeddedEntry], top_k: usize) -> SearchService {
        let mut index = FlatL2Index::new(KeywordEmbedder::DIMENSIONS);
        index
            .add_all(entries.iter().map(|e| e.embedding.as_slice()))
            .unwrap();
        SearchService::new(
            Box::new(KeywordEmbedder),
            index,
            MetadataTable::from_entries(entries),
            top_k,
        )
        .unwrap()
    }

    #[test]
    fn test_search_returns_closest_first() {
        let service = service(
            &[
                entry(4, "a fire lizard with a flame on its tail"),
                entry(7, "a water turtle"),
                entry(25, "an electric mouse"),
            ],
            5,
        );

        let hits = service.search("fire").unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, 4);
        assert_eq!(hits[0].name.as_deref(), Some("species-4"));
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_search_respects_top_k() {
        let entries: Vec<EmbeddedEntry> = (1..=10).map(|i| entry(i, "water")).collect();
        let service = service(&entries, 5);

        assert_eq!(service.search("water").unwrap().len(), 5);
        assert_eq!(service.search_with_limit("water", 2).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_query_is_rejected() {
        let service = service(&[entry(1, "grass")], 5);
        assert!(matches!(service.search("   "), Err(SearchError::EmptyQuery)));
    }

    #[test]
    fn test_metadata_shorter_than_index_is_rejected() {
        let entries = [entry(1, "grass"), entry(2, "fire")];
        let mut index = FlatL2Index::new(KeywordEmbedder::DIMENSIONS);
        index
            .add_all(entries.iter().map(|e| e.embedding.as_slice()))
            .unwrap();

        let result = SearchService::new(
            Box::new(KeywordEmbedder),
            index,
            MetadataTable::from_entries(&entries[..1]),
            5,
        );
        assert!(matches!(
            result,
            Err(SearchError::Inconsistent { index: 2, metadata: 1 })
        ));
    }

    #[test]
    fn test_row_without_metadata_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.json");
        std::fs::write(
            &path,
            r#"{
                "0": {"id": 4, "text": "fire", "name": "charmander"},
                "2": {"id": 25, "text": "electric", "name": "pikachu"},
                "3": {"id": 92, "text": "ghost", "name": "gastly"}
            }"#,
        )
        .unwrap();
        let metadata = MetadataTable::load(&path).unwrap();

        let mut index = FlatL2Index::new(KeywordEmbedder::DIMENSIONS);
        for text in ["fire", "water", "electric"] {
            index.add(&KeywordEmbedder.embed(text).unwrap()).unwrap();
        }

        let service = SearchService::new(Box::new(KeywordEmbedder), index, metadata, 5).unwrap();
        let hits = service.search("water").unwrap();

        let ids: Vec<u32> = hits.iter().map(|hit| hit.id).collect();
        assert_eq!(ids, vec![4, 25]);
    }

    #[test]
    fn test_open_rejects_index_from_other_model() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::default();

        let storage = IndexStorage::new(tmp.path().join(&config.build.index_file));
        storage
            .save(&FlatL2Index::new(KeywordEmbedder::DIMENSIONS), &model_id_hash("other-model"))
            .unwrap();
        MetadataTable::default()
            .save(&tmp.path().join(&config.build.metadata_file))
            .unwrap();

        let result = SearchService::open(&config, tmp.path(), Box::new(KeywordEmbedder));
        assert!(matches!(
            result,
            Err(SearchError::Storage(IndexStorageError::ModelMismatch))
        ));
    }

    #[test]
    fn test_open_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let result = SearchService::open(&Config::default(), tmp.path(), Box::new(KeywordEmbedder));
        assert!(matches!(result, Err(SearchError::Storage(IndexStorageError::Io(_)))));
    }
}
