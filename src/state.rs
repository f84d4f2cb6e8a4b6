//! On-disk crawl state: the source of truth for resume.
//!
//! Two append-only tab-separated tables live in the dataset directory. The
//! topics table is written once by discovery; the visited table grows by
//! checkpoint appends from the scraping coordinator. Both are re-read
//! tolerantly at start-up — duplicate rows collapse onto the first
//! occurrence and malformed rows are dropped with a warning — so a crash
//! mid-append cannot poison a later run.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::DatasetConfig;
use crate::error::{Result, ScrapeError};

const TOPICS_HEADER: &str = "Topic_URLs\tTopic_Titles";
const VISITED_HEADER: &str = "Topic_URLs\tTopic_Titles\tVisited_flag\tSkip_flag";

/// One discovered topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRecord {
    pub url: String,
    pub title: String,
}

/// One processed URL. `visited && !skipped` means a document was produced;
/// `visited && skipped` means the URL was processed and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitRecord {
    pub url: String,
    pub title: String,
    pub visited: bool,
    pub skipped: bool,
}

/// Handle on the two state tables of one dataset.
pub struct StateStore {
    topics_path: PathBuf,
    visited_path: PathBuf,
}

impl StateStore {
    /// Open (creating the dataset directory if needed).
    pub fn open(config: &DatasetConfig) -> Result<Self> {
        let dir = config.dataset_dir();
        std::fs::create_dir_all(&dir).map_err(|e| ScrapeError::workspace(&dir, e))?;
        Ok(Self {
            topics_path: dir.join(format!("Topics_URLs_-_{}.csv", config.name)),
            visited_path: dir.join(format!("Visited_URLs_-_{}.csv", config.name)),
        })
    }

    pub fn topics_path(&self) -> &Path {
        &self.topics_path
    }

    pub fn visited_path(&self) -> &Path {
        &self.visited_path
    }

    /// Whether a previous run already persisted a topics table.
    pub fn has_topics(&self) -> bool {
        self.topics_path.exists()
    }

    /// Load the topics table, deduplicating on URL.
    pub fn load_topics(&self) -> Result<Vec<TopicRecord>> {
        let mut seen = HashSet::new();
        let mut topics = Vec::new();
        for fields in read_rows(&self.topics_path, 1)? {
            let url = fields[0].clone();
            if !seen.insert(url.clone()) {
                continue;
            }
            let title = fields.get(1).cloned().unwrap_or_default();
            topics.push(TopicRecord { url, title });
        }
        tracing::info!(
            "loaded {} topic(s) from {}",
            topics.len(),
            self.topics_path.display()
        );
        Ok(topics)
    }

    /// Write the whole topics table (header plus rows, insertion order).
    pub fn save_topics(&self, topics: &[TopicRecord]) -> Result<()> {
        let file = File::create(&self.topics_path)
            .map_err(|e| ScrapeError::workspace(&self.topics_path, e))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{TOPICS_HEADER}")?;
        for topic in topics {
            writeln!(out, "{}\t{}", topic.url, sanitise(&topic.title))?;
        }
        out.flush()?;
        tracing::info!(
            "saved {} topic(s) to {}",
            topics.len(),
            self.topics_path.display()
        );
        Ok(())
    }

    /// Load the visited table, deduplicating on URL.
    pub fn load_visited(&self) -> Result<Vec<VisitRecord>> {
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for fields in read_rows(&self.visited_path, 4)? {
            let url = fields[0].clone();
            if !seen.insert(url.clone()) {
                continue;
            }
            let (Some(visited), Some(skipped)) = (parse_flag(&fields[2]), parse_flag(&fields[3]))
            else {
                tracing::warn!("dropping visited row with bad flags for {url}");
                continue;
            };
            rows.push(VisitRecord {
                url,
                title: fields[1].clone(),
                visited,
                skipped,
            });
        }
        Ok(rows)
    }

    /// Append a checkpoint's worth of visit rows, creating the file (and
    /// header) on first use. Rows are never rewritten.
    pub fn append_visited(&self, rows: &[VisitRecord]) -> Result<()> {
        let fresh = !self.visited_path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.visited_path)
            .map_err(|e| ScrapeError::workspace(&self.visited_path, e))?;
        let mut out = BufWriter::new(file);
        if fresh {
            writeln!(out, "{VISITED_HEADER}")?;
        }
        for row in rows {
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                row.url,
                sanitise(&row.title),
                row.visited as u8,
                row.skipped as u8
            )?;
        }
        out.flush()?;
        if !rows.is_empty() {
            tracing::debug!("appended {} visited row(s)", rows.len());
        }
        Ok(())
    }

    /// Make sure the visited table exists with its header, even before the
    /// first checkpoint.
    pub fn ensure_visited(&self) -> Result<()> {
        if !self.visited_path.exists() {
            self.append_visited(&[])?;
        }
        Ok(())
    }
}

/// Read a TSV file's data rows, skipping the header and anything with fewer
/// than `min_fields` columns. A missing file is an empty table.
fn read_rows(path: &Path, min_fields: usize) -> Result<Vec<Vec<String>>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| ScrapeError::workspace(path, e))?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if number == 0 && line.starts_with("Topic_URLs") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<String> = line.split('\t').map(str::to_string).collect();
        if fields.len() < min_fields || fields[0].is_empty() {
            tracing::warn!("dropping malformed row {} of {}", number + 1, path.display());
            continue;
        }
        rows.push(fields);
    }
    Ok(rows)
}

fn parse_flag(field: &str) -> Option<bool> {
    match field.trim() {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Keep titles single-line so rows stay one-per-line.
fn sanitise(title: &str) -> String {
    title.replace(['\t', '\n', '\r'], " ")
}
