//! Near-duplicate filtering of catalog embeddings.
//!
//! A species usually has one flavor text per game version and many of them
//! are reworded copies. Within each species, entries are walked newest-first
//! and an entry survives only if it is dissimilar from every entry already kept.

use std::collections::BTreeMap;

use crate::semantic::embeddings::EmbeddedEntry;

/// Added to norms so zero vectors normalise to zero instead of NaN
const NORM_EPSILON: f32 = 1e-10;

/// Rounding slack on cosine similarity. Identical f32 vectors can land a few
/// ulps below 1.0 after normalisation.
const SIMILARITY_TOLERANCE: f32 = 1e-5;

/// Drop entries whose cosine similarity to an already-kept entry of the same
/// id is at least `1 - threshold`, up to `SIMILARITY_TOLERANCE`.
///
/// Kept entries are returned in their original order.
pub fn remove_similar_embeddings(
    entries: Vec<EmbeddedEntry>,
    threshold: f32,
) -> Vec<EmbeddedEntry> {
    if entries.is_empty() {
        return vec![];
    }

    let max_similarity = 1.0 - threshold - SIMILARITY_TOLERANCE;

    let mut grouped: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (idx, entry) in entries.iter().enumerate() {
        grouped.entry(entry.id).or_default().push(idx);
    }

    let mut keep = vec![false; entries.len()];

    for positions in grouped.values() {
        let mut kept: Vec<Vec<f32>> = Vec::with_capacity(positions.len());

        // newest first
        for &idx in positions.iter().rev() {
            let candidate = normalize(&entries[idx].embedding);

            if kept
                .iter()
                .all(|other| dot(&candidate, other) < max_similarity)
            {
                keep[idx] = true;
                kept.push(candidate);
            }
        }
    }

    let total = entries.len();
    let filtered: Vec<EmbeddedEntry> = entries
        .into_iter()
        .zip(keep)
        .filter_map(|(entry, keep)| keep.then_some(entry))
        .collect();

    log::info!(
        "Filtered {} near-duplicate embeddings (per species, keeping newest)",
        total - filtered.len()
    );

    filtered
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt() + NORM_EPSILON;
    v.iter().map(|x| x / norm).collect()
}

/// Cosine similarity of two already-normalised vectors.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
