//! Client for the species API (pokeapi.co).
//!
//! Each species exposes a list of flavor texts, one per game version and
//! language. Those texts are the catalog descriptions that get embedded.

use std::collections::BTreeMap;
use std::time::Duration;

use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Deserialize;

use crate::config::SpeciesConfig;

#[derive(Debug, thiserror::Error)]
pub enum SpeciesError {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("species {id} request failed with status {status}")]
    Status { id: u32, status: u16 },

    #[error("malformed species payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One species with its cleaned flavor texts in API order.
#[derive(Debug, Clone, PartialEq)]
pub struct Species {
    pub id: u32,
    pub name: String,
    pub flavor_texts: Vec<String>,
}

/// A single description to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct FlavorEntry {
    pub species_id: u32,
    pub name: String,
    pub text: String,
}

#[derive(Deserialize)]
struct SpeciesPayload {
    name: String,
    #[serde(default)]
    flavor_text_entries: Vec<FlavorTextPayload>,
}

#[derive(Deserialize)]
struct FlavorTextPayload {
    flavor_text: String,
    language: NamedResource,
}

#[derive(Deserialize)]
struct NamedResource {
    name: String,
}

/// Anything that can produce a species record by id.
pub trait SpeciesSource: Send + Sync {
    fn fetch_species(&self, id: u32) -> Result<Species, SpeciesError>;
}

pub struct SpeciesClient {
    client: reqwest::blocking::Client,
    api_url: String,
    language: String,
}

impl SpeciesClient {
    pub fn new(config: &SpeciesConfig) -> Result<Self, SpeciesError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
        })
    }
}

impl SpeciesSource for SpeciesClient {
    fn fetch_species(&self, id: u32) -> Result<Species, SpeciesError> {
        let url = format!("{}/pokemon-species/{id}", self.api_url);
        log::debug!("fetching {url}");

        let resp = self.client.get(&url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SpeciesError::Status {
                id,
                status: status.as_u16(),
            });
        }

        let body = resp.bytes()?;
        parse_species(id, &body, &self.language)
    }
}

/// Parse a `pokemon-species` payload, keeping flavor texts in `language`.
pub fn parse_species(id: u32, body: &[u8], language: &str) -> Result<Species, SpeciesError> {
    let payload: SpeciesPayload = serde_json::from_slice(body)?;

    let flavor_texts = payload
        .flavor_text_entries
        .into_iter()
        .filter(|entry| entry.language.name == language)
        .map(|entry| clean_flavor_text(&entry.flavor_text))
        .collect();

    Ok(Species {
        id,
        name: payload.name,
        flavor_texts,
    })
}

/// Flavor texts carry the game's hard line breaks and page feeds.
pub fn clean_flavor_text(raw: &str) -> String {
    raw.replace(['\n', '\u{c}'], " ").trim().to_string()
}

/// Fetch every id on `pool`. Failed ids are logged and skipped; output is in id order.
pub fn fetch_all(
    source: &dyn SpeciesSource,
    ids: &[u32],
    pool: &rayon::ThreadPool,
    progress: &ProgressBar,
) -> Vec<Species> {
    pool.install(|| {
        ids.par_iter()
            .filter_map(|&id| {
                let result = source.fetch_species(id);
                progress.inc(1);
                match result {
                    Ok(species) => Some(species),
                    Err(err) => {
                        log::warn!("Failed to retrieve id: {id} ({err})");
                        None
                    }
                }
            })
            .collect()
    })
}

/// Species names by id. Failed ids are logged and left out.
pub fn fetch_names(
    source: &dyn SpeciesSource,
    ids: &[u32],
    pool: &rayon::ThreadPool,
    progress: &ProgressBar,
) -> BTreeMap<u32, String> {
    fetch_all(source, ids, pool, progress)
        .into_iter()
        .map(|species| (species.id, species.name))
        .collect()
}

pub fn flatten(species: &[Species]) -> Vec<FlavorEntry> {
    species
        .iter()
        .flat_map(|s| {
            s.flavor_texts.iter().map(move |text| FlavorEntry {
                species_id: s.id,
                name: s.name.clone(),
                text: text.clone(),
            })
        })
        .collect()
}
