//! Offline index build.
//!
//! fetch species -> flatten flavor texts -> embed -> drop near-duplicates ->
//! save the index file and the metadata table.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::semantic::{
    embed_entries, model_id_hash, remove_similar_embeddings, EmbeddedEntry, Embedder,
    FlatL2Index, IndexStorage, MetadataTable,
};
use crate::species::{self, SpeciesSource};

/// Counts from one build run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub species: usize,
    pub entries: usize,
    pub kept: usize,
    pub dropped: usize,
}

pub fn worker_pool(config: &Config) -> anyhow::Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.build.worker_threads())
        .thread_name(|idx| format!("dexsearch-worker-{idx}"))
        .build()
        .context("failed to build worker pool")
}

fn progress_bar(len: usize, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message);
    pb
}

/// Run the whole offline pipeline and write the results into `data_dir`.
pub fn build(
    config: &Config,
    data_dir: &Path,
    source: &dyn SpeciesSource,
    embedder: &dyn Embedder,
) -> anyhow::Result<BuildReport> {
    let pool = worker_pool(config)?;
    let ids: Vec<u32> = (1..=config.species.count).collect();

    let progress = progress_bar(ids.len(), "Fetching species");
    let fetched = species::fetch_all(source, &ids, &pool, &progress);
    progress.finish_and_clear();
    log::info!("Fetched {} of {} species", fetched.len(), ids.len());

    let entries = species::flatten(&fetched);

    let progress = progress_bar(entries.len(), "Embedding flavor texts");
    let embedded = embed_entries(embedder, &entries, &pool, &progress)
        .context("failed to embed flavor texts")?;
    progress.finish_and_clear();

    let embedded = remove_similar_embeddings(embedded, config.build.similarity_threshold);

    let report = BuildReport {
        species: fetched.len(),
        entries: entries.len(),
        kept: embedded.len(),
        dropped: entries.len() - embedded.len(),
    };

    save_index_and_metadata(
        &embedded,
        &data_dir.join(&config.build.index_file),
        &data_dir.join(&config.build.metadata_file),
        &model_id_hash(embedder.name()),
    )?;

    Ok(report)
}

/// Write the flat index and its metadata table.
///
/// Both files are staged next to their targets and renamed into place only
/// after both were written.
/// Returns `false` without touching the disk when there is nothing to save.
pub fn save_index_and_metadata(
    entries: &[EmbeddedEntry],
    index_path: &Path,
    metadata_path: &Path,
    model_id: &[u8; 32],
) -> anyhow::Result<bool> {
    let Some(first) = entries.first() else {
        log::warn!("No embeddings to save!");
        return Ok(false);
    };

    let dimensions = first.embedding.len();
    if dimensions == 0 {
        bail!("embedding for species {} is empty", first.id);
    }

    let mut index = FlatL2Index::with_capacity(dimensions, entries.len());
    for entry in entries {
        index
            .add(&entry.embedding)
            .with_context(|| format!("embedding for species {} has the wrong size", entry.id))?;
    }

    let index_staging = staging_path(index_path);
    let metadata_staging = staging_path(metadata_path);

    let staged = (|| -> anyhow::Result<()> {
        IndexStorage::new(index_staging.clone()).save(&index, model_id)?;
        MetadataTable::from_entries(entries).save(&metadata_staging)?;
        Ok(())
    })();
    if let Err(err) = staged {
        let _ = std::fs::remove_file(&index_staging);
        let _ = std::fs::remove_file(&metadata_staging);
        return Err(err);
    }

    if IndexStorage::new(index_path.to_path_buf()).exists() {
        log::info!("Replacing existing index at {}", index_path.display());
    }
    std::fs::rename(&index_staging, index_path)?;
    log::info!("Saved index to {}", index_path.display());

    std::fs::rename(&metadata_staging, metadata_path)?;
    log::info!("Saved metadata to {}", metadata_path.display());

    Ok(true)
}

/// `dir/.name.staging` next to `path`.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".staging");
    path.with_file_name(name)
}

/// Fill in species names for an existing metadata table and write it to `output`.
pub fn annotate_names(
    config: &Config,
    source: &dyn SpeciesSource,
    input: &Path,
    output: &Path,
) -> anyhow::Result<usize> {
    let mut table = MetadataTable::load(input)
        .with_context(|| format!("failed to load {}", input.display()))?;
    if table.is_empty() {
        bail!("{} has no records", input.display());
    }

    let pool = worker_pool(config)?;
    let ids: Vec<u32> = (1..=config.species.count).collect();

    let progress = progress_bar(ids.len(), "Fetching species names");
    let names = species::fetch_names(source, &ids, &pool, &progress);
    progress.finish_and_clear();

    let named = table.set_names(&names);
    table.save(output)?;
    log::info!(
        "Named {named} of {} records, saved to {}",
        table.len(),
        output.display()
    );

    Ok(named)
}
