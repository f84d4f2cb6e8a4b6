//! End-to-end pipeline: config → robots → discovery → scrape → merge →
//! manifest.
//!
//! Every stage is resumable: the topics table short-circuits discovery, the
//! visited table shrinks the scrape set, and the merge step deduplicates
//! whatever shards earlier (possibly interrupted) sessions left behind.

use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::{merge_shards, ChunkArchive, TEMP_DIR};
use crate::config::DatasetConfig;
use crate::discovery::Discovery;
use crate::error::Result;
use crate::http::HttpClient;
use crate::manifest::write_manifest;
use crate::robots::RobotsGate;
use crate::scraper::run_scraper;
use crate::state::StateStore;

/// What a completed run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub dataset: String,
    pub topics: usize,
    pub added_this_run: usize,
    pub skipped_this_run: usize,
    /// `None` when no document has ever been produced for this dataset.
    pub archive_path: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub documents: u64,
    pub characters: u64,
}

/// Run the whole pipeline for one dataset.
pub async fn run(config: DatasetConfig) -> Result<RunSummary> {
    let config = Arc::new(config);
    tracing::info!(
        "starting pipeline for {} ({} engine) -> {}",
        config.base_url,
        config.engine,
        config.name
    );

    let state = StateStore::open(&config)?;
    let http = HttpClient::new()?;
    let gate = Arc::new(RobotsGate::fetch(&config, &http).await?);

    let topics = Discovery::new(&config, &gate, &http).run(&state).await?;
    let topic_count = topics.len();

    let temp_data = config.dataset_dir().join(TEMP_DIR);
    let mut archive = ChunkArchive::open(&temp_data)?;
    let stats = run_scraper(
        Arc::clone(&config),
        Arc::clone(&gate),
        &state,
        &mut archive,
        topics,
    )
    .await?;

    if stats.total_docs == 0 {
        tracing::warn!("no documents produced, skipping merge and manifest");
        return Ok(RunSummary {
            dataset: config.name.clone(),
            topics: topic_count,
            added_this_run: stats.added,
            skipped_this_run: stats.skipped,
            archive_path: None,
            manifest_path: None,
            documents: 0,
            characters: 0,
        });
    }

    let merge = merge_shards(&config.dataset_dir(), &config.name)?;
    let manifest_path = write_manifest(&config, &merge.path, merge.documents, merge.characters)?;

    tracing::info!(
        "pipeline finished: {} document(s), {} characters -> {}",
        merge.documents,
        merge.characters,
        merge.path.display()
    );
    Ok(RunSummary {
        dataset: config.name.clone(),
        topics: topic_count,
        added_this_run: stats.added,
        skipped_this_run: stats.skipped,
        archive_path: Some(merge.path),
        manifest_path: Some(manifest_path),
        documents: merge.documents,
        characters: merge.characters,
    })
}
