//! Semantic search over the catalog descriptions.
//!
//! # Architecture
//!
//! - `embeddings`: Embedding providers (OpenAI-compatible API, local fastembed)
//! - `dedup`: Per-species near-duplicate filtering of embeddings
//! - `index`: Flat vector index with exact squared-L2 search
//! - `storage`: Binary file I/O for the index file
//! - `metadata`: JSON side table mapping index rows to catalog entries
//! - `service`: Query-side search service

pub mod dedup;
pub mod embeddings;
mod index;
mod metadata;
mod service;
mod storage;

pub use dedup::remove_similar_embeddings;
pub use embeddings::{
    embed_entries, embedder_from_config, model_id_hash, EmbeddedEntry, Embedder, EmbeddingError,
};
pub use index::{FlatL2Index, IndexError, Neighbor};
pub use metadata::{EntryRecord, MetadataError, MetadataTable};
pub use service::{SearchError, SearchHit, SearchService};
pub use storage::{IndexStorage, IndexStorageError};
