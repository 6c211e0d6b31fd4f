use clap::Parser;
use homedir::my_home;

mod cli;
mod config;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use cli::Command;
use config::Config;

/// Resolve the base directory holding config.yaml and the model cache.
fn base_path() -> anyhow::Result<String> {
    if let Ok(path) = std::env::var("IMGSEARCH_BASE_PATH") {
        return Ok(path);
    }

    let home = my_home()
        .map_err(|e| anyhow::anyhow!("Could not determine home directory: {e:?}"))?
        .ok_or_else(|| anyhow::anyhow!("Home directory path is empty"))?;
    Ok(format!("{}/.local/share/imgsearch", home.to_string_lossy()))
}

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

    let base_path = base_path()?;
    let config = Config::load_with(&base_path)?;

    match args.command {
        Command::Serve { corpus, listen } => cli::handle_serve(config, corpus, listen),
        Command::Search {
            query,
            top_k,
            corpus,
        } => cli::handle_search(config, corpus, query, top_k),
        Command::Index { corpus } => cli::handle_index(config, corpus),
    }
}
