//! The chunked corpus archive.
//!
//! Scraped documents are appended to compressed JSON-lines shards inside
//! `temp_scraper_data/`. Every [`ChunkArchive::commit`] seals the open shard
//! into an independently readable `.jsonl.zst` file; the next `add` opens a
//! fresh one. No index is kept — crash recovery relies solely on the visited
//! table, and the merge step deduplicates whatever the shards contain.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};

/// Name of the shard directory inside the dataset workspace.
pub const TEMP_DIR: &str = "temp_scraper_data";
/// Name of the merged-archive directory inside the dataset workspace.
pub const MERGED_DIR: &str = "archive_merged-JSONL_ZST";

const ZSTD_LEVEL: i32 = 3;

/// Metadata carried by every corpus record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocMeta {
    pub url: String,
    pub topic_title: String,
    pub characters: usize,
}

/// One corpus record: the extracted text and its provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub meta: DocMeta,
}

impl Document {
    pub fn new(text: String, url: String, topic_title: String) -> Self {
        let characters = text.chars().count();
        Self {
            text,
            meta: DocMeta {
                url,
                topic_title,
                characters,
            },
        }
    }
}

/// Append-only writer of chunked `.jsonl.zst` shards.
pub struct ChunkArchive {
    dir: PathBuf,
    writer: Option<ShardWriter>,
    next_chunk: usize,
}

impl ChunkArchive {
    /// Open the shard directory, creating it if missing. Numbering continues
    /// after any shards a previous run left behind.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| ScrapeError::workspace(&dir, e))?;
        let next_chunk = shard_paths(&dir)?.len();
        Ok(Self {
            dir,
            writer: None,
            next_chunk,
        })
    }

    /// Append one record to the open shard, opening a new shard if none is.
    pub fn add(&mut self, document: &Document) -> Result<()> {
        if self.writer.is_none() {
            let path = self.dir.join(format!("chunk_{:05}.jsonl.zst", self.next_chunk));
            self.next_chunk += 1;
            self.writer = Some(ShardWriter::create(&path)?);
        }
        // The writer is present by construction just above.
        if let Some(writer) = self.writer.as_mut() {
            writer.write(document)?;
        }
        Ok(())
    }

    /// Seal the open shard. A commit with nothing written is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let (path, records) = writer.finish()?;
            tracing::debug!("sealed shard {} ({records} record(s))", path.display());
        }
        Ok(())
    }
}

/// Writer for a single compressed JSON-lines shard.
pub struct ShardWriter {
    encoder: zstd::stream::write::Encoder<'static, BufWriter<File>>,
    path: PathBuf,
    records: usize,
}

impl ShardWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| ScrapeError::workspace(path, e))?;
        let encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), ZSTD_LEVEL)?;
        Ok(Self {
            encoder,
            path: path.to_path_buf(),
            records: 0,
        })
    }

    pub fn write(&mut self, document: &Document) -> Result<()> {
        serde_json::to_writer(&mut self.encoder, document)?;
        self.encoder.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Flush and close, returning the path and record count.
    pub fn finish(self) -> Result<(PathBuf, usize)> {
        let mut inner = self.encoder.finish()?;
        inner.flush()?;
        Ok((self.path, self.records))
    }
}

/// Streaming reader over one `.jsonl.zst` shard.
pub struct ShardReader {
    lines: std::io::Lines<BufReader<zstd::stream::read::Decoder<'static, BufReader<File>>>>,
}

impl ShardReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ScrapeError::workspace(path, e))?;
        let decoder = zstd::stream::read::Decoder::new(file)?;
        Ok(Self {
            lines: BufReader::new(decoder).lines(),
        })
    }
}

impl Iterator for ShardReader {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    return Some(serde_json::from_str(&line).map_err(ScrapeError::from));
                }
                Err(err) => return Some(Err(ScrapeError::from(err))),
            }
        }
    }
}

/// Outcome of a merge: where the corpus landed and what it holds.
#[derive(Debug)]
pub struct MergeSummary {
    pub path: PathBuf,
    pub documents: u64,
    pub characters: u64,
    pub duplicates: u64,
}

/// Merge every shard in `temp_scraper_data/` into one deduplicated corpus at
/// `archive_merged-JSONL_ZST/<dataset>.jsonl.zst`, replacing any previous
/// merge output.
pub fn merge_shards(dataset_dir: &Path, dataset_name: &str) -> Result<MergeSummary> {
    let temp_data = dataset_dir.join(TEMP_DIR);
    let merged_dir = dataset_dir.join(MERGED_DIR);
    let staging = merged_dir.join("temp");
    std::fs::create_dir_all(&staging).map_err(|e| ScrapeError::workspace(&staging, e))?;

    let staged_path = staging.join(format!("{dataset_name}.jsonl.zst"));
    let mut writer = ShardWriter::create(&staged_path)?;

    let mut seen: IndexSet<String> = IndexSet::new();
    let mut documents: u64 = 0;
    let mut characters: u64 = 0;
    let mut duplicates: u64 = 0;

    for shard in shard_paths(&temp_data)? {
        for document in ShardReader::open(&shard)? {
            let document = document?;
            if !seen.insert(document.meta.url.clone()) {
                duplicates += 1;
                continue;
            }
            writer.write(&document)?;
            documents += 1;
            characters += document.meta.characters as u64;
        }
    }
    let (staged_path, written) = writer.finish()?;
    tracing::info!(
        "merged {documents} document(s), {characters} characters, {duplicates} duplicate(s) dropped"
    );

    // Re-read the merged shard; a count mismatch is logged, not fatal.
    let recounted = ShardReader::open(&staged_path)?.count() as u64;
    if recounted != written as u64 || recounted != documents {
        tracing::error!(
            "merged shard re-count mismatch: wrote {documents}, re-read {recounted}"
        );
    }

    let final_path = merged_dir.join(format!("{dataset_name}.jsonl.zst"));
    if final_path.exists() {
        std::fs::remove_file(&final_path).map_err(|e| ScrapeError::workspace(&final_path, e))?;
    }
    std::fs::rename(&staged_path, &final_path)
        .map_err(|e| ScrapeError::workspace(&final_path, e))?;
    std::fs::remove_dir_all(&staging).map_err(|e| ScrapeError::workspace(&staging, e))?;

    Ok(MergeSummary {
        path: final_path,
        documents,
        characters,
        duplicates,
    })
}

/// All shards in a directory, sorted by file name (creation order, since
/// chunk numbers are zero-padded).
fn shard_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut shards = Vec::new();
    if !dir.exists() {
        return Ok(shards);
    }
    for entry in std::fs::read_dir(dir).map_err(|e| ScrapeError::workspace(dir, e))? {
        let path = entry.map_err(|e| ScrapeError::workspace(dir, e))?.path();
        if path.extension().is_some_and(|ext| ext == "zst") {
            shards.push(path);
        }
    }
    shards.sort();
    Ok(shards)
}
