//! Keyword relevance filter.
//!
//! Decides whether a document (or chunk) is relevant to the target domain.
//! Built once from an ordered pattern set and compiled into a single
//! case-insensitive, word-boundary alternation; safe to share across tasks.

use regex::{Regex, RegexBuilder};

use qaforge_shared::{QaForgeError, Result};

/// Default pattern set for Brazilian marine/coastal legislation.
///
/// Stem patterns use a `\w+` wildcard suffix; the rest are literal words or
/// multi-word phrases. "mar" stays literal-only: a stem would match noise
/// like "março" or "Marina".
pub const MARINE_KEYWORDS: &[&str] = &[
    r"ocean\w+",
    r"marítim\w+",
    r"marinh\w+",
    r"costeir\w+",
    r"praia\w+",
    r"ilh\w+",
    r"pesc\w+",
    r"pesqueir\w+",
    r"estuar\w+",
    r"aquat\w+",
    r"aquát\w+",
    r"litor\w+",
    r"petrolífer\w+",
    r"petróle\w+",
    r"portuári\w+",
    "baía",
    "arquipélago",
    "mar",
    "costa",
    "margem continental",
    "economia azul",
    "amazônia azul",
    "zona econômica exclusiva",
    "zee",
    "pré-sal",
    "plataforma continental",
    "águas jurisdicionais",
    "navio",
    "barco",
    "embarcação",
    "porto",
    "canoa",
    "balsa",
];

/// Compiled keyword matcher. Read-only after construction.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    regex: Regex,
}

impl KeywordFilter {
    /// Compile a filter from an ordered set of patterns.
    pub fn new(patterns: &[&str]) -> Result<Self> {
        if patterns.is_empty() {
            return Err(QaForgeError::validation("empty keyword pattern set"));
        }

        let alternation = format!(r"\b(?:{})\b", patterns.join("|"));
        let regex = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()
            .map_err(|e| QaForgeError::validation(format!("invalid keyword pattern: {e}")))?;

        Ok(Self { regex })
    }

    /// Filter with the default marine/coastal pattern set.
    pub fn marine() -> Self {
        // The constant set is known-valid.
        Self::new(MARINE_KEYWORDS).expect("default keyword set compiles")
    }

    /// Whether `text` contains at least one keyword on a word boundary.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}
