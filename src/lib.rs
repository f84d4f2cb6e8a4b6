//! `forum-corpus` harvests every user-visible post from a PHP-style
//! discussion forum (Invision, phpBB, IPBoard, XenForo) into a single
//! compressed JSON-lines corpus plus a JSON manifest.
//!
//! The pipeline runs in three stages: *discovery* enumerates topic URLs
//! from sitemaps or a recursive HTML crawl, the *scraper* walks every page
//! of every topic under a bounded, polite worker pool, and *finalisation*
//! merges the chunked archive into one deduplicated corpus. Progress is
//! checkpointed to tab-separated state tables, so an interrupted run picks
//! up where it stopped.
//!
//! ```no_run
//! use forum_corpus::{DatasetConfig, ForumEngine};
//!
//! # async fn example() -> Result<(), forum_corpus::ScrapeError> {
//! let config = DatasetConfig::builder("https://forum.example.pl")
//!     .engine(ForumEngine::PhpBb)
//!     .workers(2)
//!     .build()?;
//! let summary = forum_corpus::run(config).await?;
//! println!("{} documents harvested", summary.documents);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod extract;
pub mod http;
pub mod manifest;
pub mod pagination;
pub mod pipeline;
pub mod robots;
pub mod scraper;
pub mod selector;
pub mod sitemap;
pub mod state;

pub use archive::{ChunkArchive, DocMeta, Document, MergeSummary, ShardReader, ShardWriter};
pub use config::{ConfigBuilder, DatasetConfig, SelectorOverrides};
pub use engine::{EngineProfile, ForumEngine};
pub use error::{Result, ScrapeError};
pub use manifest::{Manifest, ManifestStats};
pub use pipeline::{run, RunSummary};
pub use robots::RobotsGate;
pub use scraper::ScrapeStats;
pub use state::{StateStore, TopicRecord, VisitRecord};
