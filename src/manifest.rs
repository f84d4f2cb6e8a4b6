//! The dataset manifest.
//!
//! A small JSON sidecar written next to the merged corpus. Only document and
//! character counts are known at scrape time; the linguistic statistics are
//! zeroed placeholders filled in by downstream post-processing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::DatasetConfig;
use crate::error::{Result, ScrapeError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub project: String,
    pub name: String,
    pub description: String,
    pub license: String,
    pub category: String,
    pub language: String,
    pub file_size: u64,
    pub sources: Vec<SourceEntry>,
    pub stats: ManifestStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub url: String,
    pub license: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestStats {
    pub documents: u64,
    pub characters: u64,
    pub sentences: u64,
    pub words: u64,
    pub nouns: u64,
    pub verbs: u64,
    pub punctuations: u64,
    pub symbols: u64,
    pub stopwords: u64,
    pub oovs: u64,
}

impl Manifest {
    pub fn build(config: &DatasetConfig, file_size: u64, documents: u64, characters: u64) -> Self {
        Self {
            project: "SpeakLeash".into(),
            name: config.name.clone(),
            description: config.description.clone(),
            license: config.license.clone(),
            category: config.category.clone(),
            language: "pl".into(),
            file_size,
            sources: vec![SourceEntry {
                name: config.name.clone(),
                url: config.base_url.to_string(),
                license: config.license.clone(),
            }],
            stats: ManifestStats {
                documents,
                characters,
                ..Default::default()
            },
        }
    }
}

/// Write `<dataset>.manifest` next to the merged archive. Returns its path.
pub fn write_manifest(
    config: &DatasetConfig,
    merged_path: &Path,
    documents: u64,
    characters: u64,
) -> Result<PathBuf> {
    // Byte size of the corpus on disk; the character sum stands in when the
    // file cannot be inspected.
    let file_size = std::fs::metadata(merged_path)
        .map(|m| m.len())
        .unwrap_or(characters);

    let manifest = Manifest::build(config, file_size, documents, characters);
    let path = merged_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{}.manifest", config.name));

    let json = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(&path, json).map_err(|e| ScrapeError::workspace(&path, e))?;
    tracing::info!("manifest written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ForumEngine;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> DatasetConfig {
        DatasetConfig::builder("https://forum.example.pl")
            .engine(ForumEngine::PhpBb)
            .workspace_root(dir.path())
            .build()
            .unwrap()
    }

    #[test]
    fn manifest_schema_matches_wire_format() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::build(&config(&dir), 1234, 2, 99);
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&manifest).unwrap()).unwrap();

        assert_eq!(value["project"], "SpeakLeash");
        assert_eq!(value["name"], "forum_forum_example_pl_corpus");
        assert_eq!(value["language"], "pl");
        assert_eq!(value["file_size"], 1234);
        assert_eq!(value["sources"][0]["url"], "https://forum.example.pl/");
        assert_eq!(value["stats"]["documents"], 2);
        assert_eq!(value["stats"]["characters"], 99);
        for zeroed in [
            "sentences",
            "words",
            "nouns",
            "verbs",
            "punctuations",
            "symbols",
            "stopwords",
            "oovs",
        ] {
            assert_eq!(value["stats"][zeroed], 0, "{zeroed} should be zero");
        }
    }

    #[test]
    fn writes_next_to_archive_with_real_size() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let archive = dir.path().join("corpus.jsonl.zst");
        std::fs::write(&archive, b"0123456789").unwrap();

        let path = write_manifest(&config, &archive, 2, 99).unwrap();
        assert_eq!(path, dir.path().join(format!("{}.manifest", config.name)));

        let manifest: Manifest =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(manifest.file_size, 10);
        assert_eq!(manifest.stats.documents, 2);
    }

    #[test]
    fn missing_archive_falls_back_to_character_sum() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let path = write_manifest(&config, &dir.path().join("gone.jsonl.zst"), 3, 4321).unwrap();
        let manifest: Manifest =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(manifest.file_size, 4321);
    }
}
