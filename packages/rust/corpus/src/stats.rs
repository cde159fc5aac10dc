//! Corpus statistics.
//!
//! Word/character counts per document, computed for the full corpus and for
//! the subset surviving the keyword filter, persisted as JSON maps so
//! partial scans can be merged across runs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use qaforge_shared::{QaForgeError, Result};

use crate::filter::KeywordFilter;
use crate::source::walk_documents;

/// File name of the full-corpus statistics map.
pub const FULL_STATISTICS_FILE: &str = "full_statistics.json";
/// File name of the filtered-subset statistics map.
pub const FILTERED_STATISTICS_FILE: &str = "filtered_statistics.json";

/// Counts for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocStats {
    pub n_words: u64,
    pub n_chars: u64,
}

impl DocStats {
    /// Count words (whitespace-separated) and characters of `text`.
    pub fn of(text: &str) -> Self {
        Self {
            n_words: text.split_whitespace().count() as u64,
            n_chars: text.chars().count() as u64,
        }
    }
}

/// Per-document statistics maps for a corpus scan, keyed by file name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusStatistics {
    pub full: BTreeMap<String, DocStats>,
    pub filtered: BTreeMap<String, DocStats>,
}

/// Aggregated totals over a statistics map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub n_docs: u64,
    pub n_words: u64,
    pub n_chars: u64,
}

impl CorpusStatistics {
    /// Scan every document under `root`, counting all of them and separately
    /// those matching `filter`.
    pub fn collect(root: &Path, filter: &KeywordFilter) -> Result<Self> {
        let mut stats = Self::default();

        for doc in walk_documents(root)? {
            let text = match doc.read_text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(name = %doc.name, error = %e, "skipping unreadable document");
                    continue;
                }
            };

            let doc_stats = DocStats::of(&text);
            if filter.matches(&text) {
                stats.filtered.insert(doc.name.clone(), doc_stats);
            }
            stats.full.insert(doc.name, doc_stats);
        }

        info!(
            full = stats.full.len(),
            filtered = stats.filtered.len(),
            "corpus scan complete"
        );
        Ok(stats)
    }

    /// Write both maps under `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| QaForgeError::io(dir, e))?;

        for (file, map) in [
            (FULL_STATISTICS_FILE, &self.full),
            (FILTERED_STATISTICS_FILE, &self.filtered),
        ] {
            let path = dir.join(file);
            let json = serde_json::to_string_pretty(map)
                .map_err(|e| QaForgeError::Storage(e.to_string()))?;
            std::fs::write(&path, json).map_err(|e| QaForgeError::io(&path, e))?;
        }
        Ok(())
    }

    /// Load both maps from `dir`; missing files yield empty maps so scans of
    /// different subfolders can be merged.
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            full: load_map(&dir.join(FULL_STATISTICS_FILE))?,
            filtered: load_map(&dir.join(FILTERED_STATISTICS_FILE))?,
        })
    }

    /// Merge another scan into this one (later entries win per file name).
    pub fn merge(&mut self, other: CorpusStatistics) {
        self.full.extend(other.full);
        self.filtered.extend(other.filtered);
    }

    /// Totals over the full map.
    pub fn summarize_full(&self) -> StatsSummary {
        summarize(&self.full)
    }

    /// Totals over the filtered map.
    pub fn summarize_filtered(&self) -> StatsSummary {
        summarize(&self.filtered)
    }
}

fn summarize(map: &BTreeMap<String, DocStats>) -> StatsSummary {
    let mut summary = StatsSummary {
        n_docs: map.len() as u64,
        ..Default::default()
    };
    for stats in map.values() {
        summary.n_words += stats.n_words;
        summary.n_chars += stats.n_chars;
    }
    summary
}

fn load_map(path: &Path) -> Result<BTreeMap<String, DocStats>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| QaForgeError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| QaForgeError::Storage(e.to_string()))
}
