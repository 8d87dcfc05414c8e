
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::semantic::{Embedder, EmbeddingError};
use crate::species::{Species, SpeciesError, SpeciesSource};

/// Deterministic embedder: one dimension per vocabulary word plus a bias
/// dimension, so texts sharing words land close together.
pub struct KeywordEmbedder;

impl KeywordEmbedder {
    pub const VOCABULARY: [&'static str; 12] = [
        "fire", "flame", "water", "shell", "electric", "mouse", "grass", "seed", "sleep", "song",
        "ghost", "shadow",
    ];
    pub const DIMENSIONS: usize = Self::VOCABULARY.len() + 1;
}

impl Embedder for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword-test-model"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmbeddingFailed("empty input".to_string()));
        }

        let mut vector = vec![0.0; Self::DIMENSIONS];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            if let Some(pos) = Self::VOCABULARY.iter().position(|v| *v == word) {
                vector[pos] += 1.0;
            }
        }
        vector[Self::DIMENSIONS - 1] = 1.0;
        Ok(vector)
    }
}

/// Embedder that counts calls and fails on texts containing "boom".
#[derive(Default)]
pub struct CountingEmbedder {
    pub calls: AtomicUsize,
}

impl Embedder for CountingEmbedder {
    fn name(&self) -> &str {
        KeywordEmbedder.name()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("boom") {
            return Err(EmbeddingError::Api {
                status: 500,
                body: "boom".to_string(),
            });
        }
        KeywordEmbedder.embed(text)
    }
}

/// In-memory species API; ids missing from the map answer 404.
pub struct FakeSpeciesApi {
    pub species: HashMap<u32, Species>,
}

impl FakeSpeciesApi {
    pub fn new(species: impl IntoIterator<Item = (u32, &'static str, Vec<&'static str>)>) -> Self {
        let species = species
            .into_iter()
            .map(|(id, name, texts)| {
                (
                    id,
                    Species {
                        id,
                        name: name.to_string(),
                        flavor_texts: texts.into_iter().map(str::to_string).collect(),
                    },
                )
            })
            .collect();
        Self { species }
    }
}

impl SpeciesSource for FakeSpeciesApi {
    fn fetch_species(&self, id: u32) -> Result<Species, SpeciesError> {
        self.species
            .get(&id)
            .cloned()
            .ok_or(SpeciesError::Status { id, status: 404 })
    }
}

/// A small catalog with the usual game-to-game rewording.
pub fn sample_catalog() -> FakeSpeciesApi {
    FakeSpeciesApi::new([
        (
            1,
            "bulbasaur",
            vec![
                "A strange seed was planted on its back at birth.",
                "A strange SEED was planted on its back at birth!",
                "It can go for days without eating. Grass grows from the seed.",
            ],
        ),
        (
            4,
            "charmander",
            vec![
                "The flame on its tail shows its fire.",
                "The fire on its tail shows its flame.",
            ],
        ),
        (7, "squirtle", vec!["It hides in its shell and sprays water."]),
        (25, "pikachu", vec!["An electric mouse that stores electric power."]),
        (39, "jigglypuff", vec!["Its song puts anyone to sleep."]),
    ])
}
