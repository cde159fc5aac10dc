//! Corpus enumeration, relevance filtering, and text splitting.
//!
//! This crate provides:
//! - [`KeywordFilter`] — word-boundary keyword matcher deciding relevance
//! - [`TextSplitter`] — overlap-aware recursive chunker for oversized texts
//! - [`source`] — stable, ordered enumeration of the document corpus
//! - [`stats`] — per-document word/char statistics, full vs filtered

pub mod filter;
pub mod source;
pub mod splitter;
pub mod stats;

pub use filter::{KeywordFilter, MARINE_KEYWORDS};
pub use source::{DocumentEntry, document_stem, walk_documents};
pub use splitter::TextSplitter;
pub use stats::{CorpusStatistics, DocStats, StatsSummary};
