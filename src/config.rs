use crate::storage::DataDir;
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_SPECIES_API_URL: &str = "https://pokeapi.co/api/v2";
/// Number of species in the national dex at the time the catalog was built
const DEFAULT_SPECIES_COUNT: u32 = 1025;
const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_SPECIES_TIMEOUT_SECS: u64 = 30;

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 60;

/// Default near-duplicate threshold: vectors with cosine similarity >= 0.9 collapse
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.1;
const DEFAULT_INDEX_FILE: &str = "embeddings.idx";
const DEFAULT_METADATA_FILE: &str = "metadata.json";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("config file is not valid utf8")]
    NotUtf8,

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where the catalog descriptions come from
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeciesConfig {
    #[serde(default = "default_species_api_url")]
    pub api_url: String,

    /// Species ids 1..=count are fetched
    #[serde(default = "default_species_count")]
    pub count: u32,

    /// Only flavor texts in this language are kept
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_species_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SpeciesConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_SPECIES_API_URL.to_string(),
            count: DEFAULT_SPECIES_COUNT,
            language: DEFAULT_LANGUAGE.to_string(),
            request_timeout_secs: DEFAULT_SPECIES_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Any OpenAI-compatible `/embeddings` endpoint
    #[default]
    OpenAi,
    /// In-process fastembed model (needs the `local-embeddings` feature)
    Local,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    /// Model name, e.g. "text-embedding-3-small" or "bge-small-en-v1.5"
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_api_url")]
    pub api_url: String,

    #[serde(default = "default_embedding_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_url: DEFAULT_EMBEDDING_API_URL.to_string(),
            request_timeout_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    /// Near-duplicate threshold [0.0, 1.0]
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Worker threads for fetching and embedding: "auto" or a positive integer
    #[serde(default = "default_parallelism")]
    pub parallelism: String,

    #[serde(default = "default_index_file")]
    pub index_file: String,

    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            parallelism: default_parallelism(),
            index_file: DEFAULT_INDEX_FILE.to_string(),
            metadata_file: DEFAULT_METADATA_FILE.to_string(),
        }
    }
}

impl BuildConfig {
    /// Resolve `parallelism` into a thread count.
    pub fn worker_threads(&self) -> usize {
        match self.parallelism.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Overridden by the PORT environment variable
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of results returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            top_k: DEFAULT_TOP_K,
        }
    }
}

fn default_species_api_url() -> String {
    DEFAULT_SPECIES_API_URL.to_string()
}

fn default_species_count() -> u32 {
    DEFAULT_SPECIES_COUNT
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_species_timeout_secs() -> u64 {
    DEFAULT_SPECIES_TIMEOUT_SECS
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_api_url() -> String {
    DEFAULT_EMBEDDING_API_URL.to_string()
}

fn default_embedding_timeout_secs() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_SECS
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_parallelism() -> String {
    "auto".to_string()
}

fn default_index_file() -> String {
    DEFAULT_INDEX_FILE.to_string()
}

fn default_metadata_file() -> String {
    DEFAULT_METADATA_FILE.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub species: SpeciesConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("species.api_url", &self.species.api_url),
            ("embedding.api_url", &self.embedding.api_url),
        ] {
            url::Url::parse(value)
                .map_err(|err| ConfigError::Invalid(format!("{field} '{value}': {err}")))?;
        }

        if self.species.count == 0 {
            return Err(ConfigError::Invalid(
                "species.count must be greater than 0".to_string(),
            ));
        }

        if self.species.request_timeout_secs == 0 || self.embedding.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "embedding.model must not be empty".to_string(),
            ));
        }

        let threshold = self.build.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "build.similarity_threshold must be between 0.0 and 1.0, got {threshold}"
            )));
        }

        // "auto" or positive integer
        if self.build.parallelism != "auto" {
            match self.build.parallelism.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "build.parallelism must be 'auto' or a positive integer, got '{}'",
                        self.build.parallelism
                    )))
                }
            }
        }

        if self.server.top_k == 0 {
            return Err(ConfigError::Invalid(
                "server.top_k must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load `config.yaml` from the data directory, creating it with defaults if missing.
    pub fn load_with(data_dir: &DataDir) -> Result<Self, ConfigError> {
        if !data_dir.exists(CONFIG_FILE) {
            Self::default().save(data_dir)?;
        }

        let config_str =
            String::from_utf8(data_dir.read(CONFIG_FILE)?).map_err(|_| ConfigError::NotUtf8)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save(data_dir)?;
        }

        config.apply_env();

        Ok(config)
    }

    pub fn save(&self, data_dir: &DataDir) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;
        data_dir.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }

    /// Environment overrides that never get written back to config.yaml.
    fn apply_env(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }
}
