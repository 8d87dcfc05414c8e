use anyhow::Context;
use clap::Parser;

mod cli;
mod config;
mod pipeline;
mod semantic;
mod species;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use semantic::{embedder_from_config, SearchService};
use species::SpeciesClient;
use storage::DataDir;

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    init_logging();

    let data_dir = DataDir::new(&args.data_dir)
        .with_context(|| format!("cannot use data dir {}", args.data_dir.display()))?;
    let mut config = Config::load_with(&data_dir).context("failed to load config.yaml")?;

    match args.command {
        #[cfg(feature = "markdown-docs")]
        cli::Command::MarkdownDocs {} => {
            clap_markdown::print_help_markdown::<cli::Args>();
            Ok(())
        }

        cli::Command::Build { threshold, count } => {
            if let Some(threshold) = threshold {
                config.build.similarity_threshold = threshold;
            }
            if let Some(count) = count {
                config.species.count = count;
            }
            config.validate()?;

            let source = SpeciesClient::new(&config.species)?;
            let embedder = embedder_from_config(&config, &data_dir.base_dir)?;

            let report = pipeline::build(&config, &data_dir.base_dir, &source, embedder.as_ref())?;
            log::info!(
                "{} species, {} flavor texts, {} kept, {} near-duplicates dropped",
                report.species,
                report.entries,
                report.kept,
                report.dropped
            );
            Ok(())
        }

        cli::Command::Names { input, output } => {
            let input = data_dir.base_dir.join(
                input.unwrap_or_else(|| config.build.metadata_file.clone().into()),
            );
            let output = data_dir.base_dir.join(output);

            let source = SpeciesClient::new(&config.species)?;
            pipeline::annotate_names(&config, &source, &input, &output)?;
            println!("{} has been updated with species names", output.display());
            Ok(())
        }

        cli::Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }

            let embedder = embedder_from_config(&config, &data_dir.base_dir)?;
            let search = SearchService::open(&config, &data_dir.base_dir, embedder)
                .context("failed to open the index, run `dexsearch build` first")?;

            web::start_server(search, &config.server.host, config.server.port)
        }

        cli::Command::Search { text, limit } => {
            let embedder = embedder_from_config(&config, &data_dir.base_dir)?;
            let search = SearchService::open(&config, &data_dir.base_dir, embedder)
                .context("failed to open the index, run `dexsearch build` first")?;

            let hits = search.search_with_limit(&text, limit.unwrap_or(search.top_k()))?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(())
        }
    }
}
