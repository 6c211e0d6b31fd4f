use clap::{Args as ClapArgs, Parser, Subcommand};

mod handlers;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct CorpusArgs {
    /// Directory scanned recursively for .jpg/.jpeg/.png images
    #[clap(short = 'd', long)]
    pub image_dir: Option<String>,

    /// Embedding model (clip-vit-b-32, nomic-embed-v1.5)
    #[clap(short, long)]
    pub model: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Index the image directory and serve the search API.
    Serve {
        #[command(flatten)]
        corpus: CorpusArgs,

        /// Address to listen on, e.g. 127.0.0.1:8000
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Index the image directory and run a single query.
    Search {
        /// Free-text query
        query: String,

        /// Number of results
        #[clap(short = 'k', long, allow_hyphen_values = true)]
        top_k: Option<i64>,

        #[command(flatten)]
        corpus: CorpusArgs,
    },

    /// Index the image directory and print a summary.
    Index {
        #[command(flatten)]
        corpus: CorpusArgs,
    },
}
