use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.yaml, the index and the metadata table
    #[clap(long, global = true, env = "DEXSEARCH_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate cli docs in markdown format
    #[cfg(feature = "markdown-docs")]
    #[clap(hide = true)]
    MarkdownDocs {},

    /// Fetch every species description, embed it and write the index.
    Build {
        /// Near-duplicate threshold (overrides build.similarity_threshold)
        #[clap(short, long)]
        threshold: Option<f32>,

        /// Only fetch species 1..=count (overrides species.count)
        #[clap(short, long)]
        count: Option<u32>,
    },

    /// Add species names to an existing metadata table.
    Names {
        /// Metadata table to read (defaults to build.metadata_file)
        #[clap(short, long)]
        input: Option<PathBuf>,

        /// Where to write the annotated table
        #[clap(short, long, default_value = "metadata_with_names.json")]
        output: PathBuf,
    },

    /// Start the search service.
    Serve {
        /// Port to listen on (overrides server.port and PORT)
        #[clap(short, long)]
        port: Option<u16>,
    },

    /// Run a single query and print the matches as json.
    Search {
        /// Free-text query
        text: String,

        /// Number of results (defaults to server.top_k)
        #[clap(short, long)]
        limit: Option<usize>,
    },
}
