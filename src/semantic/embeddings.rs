//! Embedding providers.
//!
//! - `OpenAiEmbedder`: any OpenAI-compatible `/embeddings` endpoint (default)
//! - `LocalEmbedder`: in-process fastembed model behind the `local-embeddings` feature
//!
//! Both the offline build and the search service go through the `Embedder`
//! trait, so queries are always embedded by the same model as the catalog.

use std::path::Path;
use std::time::Duration;

use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Deserialize;

use crate::config::{Config, EmbeddingProvider};
use crate::species::FlavorEntry;

/// Environment variable holding the API key for the OpenAI provider
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Please set the OPENAI_API_KEY environment variable")]
    MissingApiKey,

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// A text embedding backend.
pub trait Embedder: Send + Sync {
    /// Model name, stamped into the index file.
    fn name(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// A catalog description together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedEntry {
    pub id: u32,
    pub text: String,
    pub name: Option<String>,
    pub embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        api_url: &str,
        api_key: impl Into<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.to_string(),
        })
    }

    /// Build from config, reading the key from `OPENAI_API_KEY`.
    pub fn from_config(config: &Config) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(EmbeddingError::MissingApiKey)?;

        Self::new(
            &config.embedding.api_url,
            api_key,
            &config.embedding.model,
            Duration::from_secs(config.embedding.request_timeout_secs),
        )
    }
}

impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let resp = self
            .client
            .post(format!("{}/embeddings", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<EmbeddingResponse>()?
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::{Embedder, EmbeddingError};
    use fastembed::{InitOptions, TextEmbedding};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Wrapper around fastembed's TextEmbedding model.
    /// Uses a Mutex because fastembed's embed() requires &mut self.
    pub struct LocalEmbedder {
        model: Mutex<TextEmbedding>,
        model_name: String,
    }

    impl LocalEmbedder {
        /// Models are cached in the `models/` subdirectory of `cache_dir`.
        pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
            let model_enum = parse_model_name(model_name)?;

            let models_dir = cache_dir.join("models");
            std::fs::create_dir_all(&models_dir).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
            })?;

            let options = InitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true);

            let model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

            Ok(Self {
                model: Mutex::new(model),
                model_name: model_name.to_string(),
            })
        }
    }

    impl Embedder for LocalEmbedder {
        fn name(&self) -> &str {
            &self.model_name
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut model = self.model.lock().map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
            })?;

            model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
        }
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown local model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
                name
            ))),
        }
    }
}

/// Construct the configured embedding provider.
pub fn embedder_from_config(
    config: &Config,
    data_dir: &Path,
) -> Result<Box<dyn Embedder>, EmbeddingError> {
    match config.embedding.provider {
        EmbeddingProvider::OpenAi => Ok(Box::new(OpenAiEmbedder::from_config(config)?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProvider::Local => Ok(Box::new(LocalEmbedder::new(
            &config.embedding.model,
            data_dir.to_path_buf(),
        )?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProvider::Local => {
            let _ = data_dir;
            Err(EmbeddingError::InitFailed(
                "the local provider needs the `local-embeddings` feature".to_string(),
            ))
        }
    }
}

/// SHA256 of the model name, used to tie an index file to its model.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Embed every entry on `pool`, one request per entry. Output keeps input order.
pub fn embed_entries(
    embedder: &dyn Embedder,
    entries: &[FlavorEntry],
    pool: &rayon::ThreadPool,
    progress: &ProgressBar,
) -> Result<Vec<EmbeddedEntry>, EmbeddingError> {
    pool.install(|| {
        entries
            .par_iter()
            .map(|entry| -> Result<EmbeddedEntry, EmbeddingError> {
                let embedding = embedder.embed(&entry.text)?;
                progress.inc(1);
                Ok(EmbeddedEntry {
                    id: entry.species_id,
                    text: entry.text.clone(),
                    name: Some(entry.name.clone()),
                    embedding,
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::KeywordEmbedder;

    fn entry(id: u32, text: &str) -> FlavorEntry {
        FlavorEntry {
            species_id: id,
            name: format!("species-{id}"),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_model_id_hash_consistency() {
        assert_eq!(
            model_id_hash("text-embedding-3-small"),
            model_id_hash("text-embedding-3-small")
        );
        assert_ne!(
            model_id_hash("text-embedding-3-small"),
            model_id_hash("text-embedding-3-large")
        );
    }

    #[test]
    fn test_embed_entries_keeps_order() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(4)
            .build()
            .unwrap();
        let entries: Vec<FlavorEntry> = (1..=20)
            .map(|i| entry(i, if i % 2 == 0 { "fire" } else { "water" }))
            .collect();

        let embedded =
            embed_entries(&KeywordEmbedder, &entries, &pool, &ProgressBar::hidden()).unwrap();

        assert_eq!(embedded.len(), 20);
        for (i, e) in embedded.iter().enumerate() {
            assert_eq!(e.id, i as u32 + 1);
            assert_eq!(e.text, entries[i].text);
            assert_eq!(e.name.as_deref(), Some(entries[i].name.as_str()));
            assert_eq!(e.embedding, KeywordEmbedder.embed(&e.text).unwrap());
        }
    }

    #[test]
    fn test_embed_entries_propagates_failure() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let entries = vec![entry(1, "fire"), entry(2, "")];

        let result = embed_entries(&KeywordEmbedder, &entries, &pool, &ProgressBar::hidden());
        assert!(matches!(result, Err(EmbeddingError::EmbeddingFailed(_))));
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = Config::default();
        config.embedding.api_url = "http://127.0.0.1:9".to_string();
        if std::env::var(API_KEY_ENV).is_err() {
            assert!(matches!(
                OpenAiEmbedder::from_config(&config),
                Err(EmbeddingError::MissingApiKey)
            ));
        }
    }

    #[test]
    fn test_unreachable_endpoint() {
        let embedder =
            OpenAiEmbedder::new("http://127.0.0.1:9", "key", "m", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            embedder.embed("hello"),
            Err(EmbeddingError::Reqwest(_))
        ));
    }

    #[test]
    #[ignore = "requires OPENAI_API_KEY and network access"]
    fn test_openai_embedding() {
        let embedder = OpenAiEmbedder::from_config(&Config::default()).unwrap();
        let embedding = embedder.embed("A strange seed was planted on its back").unwrap();
        assert_eq!(embedding.len(), 1536);
    }
}
