use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::CorpusArgs;
use crate::config::Config;
use crate::semantic::{ClipEmbedder, EngineError, IndexOptions, IndexReport, SemanticEngine};
use crate::web;

/// Apply command line overrides on top of the loaded config.
pub fn apply_overrides(config: &mut Config, corpus: &CorpusArgs) {
    if let Some(image_dir) = &corpus.image_dir {
        config.image_dir = image_dir.clone();
    }
    if let Some(model) = &corpus.model {
        config.model = model.clone();
    }
}

/// Load the model and build the index. Indexing failures are fatal.
pub fn build_engine(config: &Config, show_progress: bool) -> Result<(Arc<SemanticEngine>, IndexReport)> {
    let embedder = ClipEmbedder::new(&config.model, PathBuf::from(config.base_path()))
        .with_context(|| format!("Failed to load embedding model '{}'", config.model))?;

    let options = IndexOptions {
        batch_size: config.batch_size,
        decode_threads: config.decode_threads(),
        show_progress,
    };
    let engine = Arc::new(SemanticEngine::new(Arc::new(embedder), options));

    let report = engine
        .build_index(Path::new(&config.image_dir))
        .with_context(|| format!("Failed to index images in {}", config.image_dir))?;

    Ok((engine, report))
}

pub fn handle_serve(mut config: Config, corpus: CorpusArgs, listen: Option<String>) -> Result<()> {
    apply_overrides(&mut config, &corpus);
    if let Some(listen) = listen {
        config.server.listen_addr = listen;
    }

    let (engine, _report) = build_engine(&config, false)?;
    web::start_daemon(engine, config)
}

pub fn handle_search(
    mut config: Config,
    corpus: CorpusArgs,
    query: String,
    top_k: Option<i64>,
) -> Result<()> {
    apply_overrides(&mut config, &corpus);

    // validate before paying for model load and indexing
    let top_k = validate_search(&config, &query, top_k)?;
    let (engine, _report) = build_engine(&config, true)?;

    let hits = engine.search(&query, top_k)?;
    println!("{}", serde_json::to_string_pretty(&hits)?);
    Ok(())
}

/// Check the query text and resolve `top_k` against the configured range.
fn validate_search(config: &Config, query: &str, top_k: Option<i64>) -> Result<usize, EngineError> {
    if query.trim().is_empty() {
        return Err(EngineError::InvalidQuery("query must not be empty".to_string()));
    }
    config.query.resolve_top_k(top_k)
}

pub fn handle_index(mut config: Config, corpus: CorpusArgs) -> Result<()> {
    apply_overrides(&mut config, &corpus);

    let (_engine, report) = build_engine(&config, true)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
