//! Overlap-aware recursive text splitter.
//!
//! Splits oversized documents on a separator hierarchy (paragraph, line,
//! sentence, word) before falling back to fixed character windows. Lengths
//! are measured in characters, matching the corpus tooling this replaces.

use qaforge_shared::{QaForgeError, Result};

/// Separator hierarchy, coarsest first. The empty string is the char-window
/// fallback for text with no usable separator.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// Recursive character splitter with configurable chunk size and overlap.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// Create a splitter. `chunk_overlap` must be strictly smaller than
    /// `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(QaForgeError::validation("chunk_size must be positive"));
        }
        if chunk_overlap >= chunk_size {
            return Err(QaForgeError::validation(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Split `text` into chunks of at most `chunk_size` characters, with up
    /// to `chunk_overlap` characters carried between consecutive chunks.
    /// Deterministic; never returns empty chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, SEPARATORS)
            .into_iter()
            .map(|chunk| chunk.trim().to_string())
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let Some((sep, rest)) = separators.split_first() else {
            return self.split_by_chars(text);
        };

        if sep.is_empty() {
            return self.split_by_chars(text);
        }
        if !text.contains(sep) {
            return self.split_recursive(text, rest);
        }

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();

        for piece in text.split(sep) {
            if char_len(piece) <= self.chunk_size {
                pending.push(piece.to_string());
            } else {
                // Flush what fits, then recurse into the oversized piece
                // with the finer separators.
                if !pending.is_empty() {
                    chunks.extend(self.merge_pieces(std::mem::take(&mut pending), sep));
                }
                chunks.extend(self.split_recursive(piece, rest));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge_pieces(pending, sep));
        }

        chunks
    }

    /// Greedily merge small pieces into chunks, keeping a tail of pieces
    /// totalling at most `chunk_overlap` characters as the seed of the next
    /// chunk.
    fn merge_pieces(&self, pieces: Vec<String>, sep: &str) -> Vec<String> {
        let sep_len = char_len(sep);
        let mut chunks = Vec::new();
        let mut window: Vec<String> = Vec::new();

        for piece in pieces {
            let piece_len = char_len(&piece);
            let window_len = joined_len(&window, sep_len);

            let gap = if window.is_empty() { 0 } else { sep_len };
            if window_len + gap + piece_len > self.chunk_size && !window.is_empty() {
                chunks.push(window.join(sep));

                // Drop from the front until the retained tail fits the
                // overlap budget and leaves room for the incoming piece.
                while !window.is_empty()
                    && (joined_len(&window, sep_len) > self.chunk_overlap
                        || joined_len(&window, sep_len) + sep_len + piece_len > self.chunk_size)
                {
                    window.remove(0);
                }
            }
            window.push(piece);
        }

        if !window.is_empty() {
            let chunk = window.join(sep);
            if !chunk.trim().is_empty() {
                chunks.push(chunk);
            }
        }

        chunks
    }

    /// Last-resort fixed-window split for text with no usable separator.
    fn split_by_chars(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();

        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn joined_len(pieces: &[String], sep_len: usize) -> usize {
    if pieces.is_empty() {
        return 0;
    }
    let content: usize = pieces.iter().map(|p| char_len(p)).sum();
    content + sep_len * (pieces.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_through() {
        let splitter = TextSplitter::new(100, 20).unwrap();
        let chunks = splitter.split("um texto curto");
        assert_eq!(chunks, vec!["um texto curto".to_string()]);
    }

    #[test]
    fn chunks_respect_size_bound() {
        let splitter = TextSplitter::new(50, 10).unwrap();
        let text = "frase um. frase dois. frase três. frase quatro. frase cinco. frase seis. \
                    frase sete. frase oito."
            .repeat(3);
        for chunk in splitter.split(&text) {
            assert!(
                chunk.chars().count() <= 50,
                "chunk too long: {} chars",
                chunk.chars().count()
            );
        }
    }

    #[test]
    fn paragraphs_kept_whole_when_they_fit() {
        let splitter = TextSplitter::new(40, 5).unwrap();
        let text = "parágrafo número um\n\nparágrafo número dois\n\nparágrafo número três";
        let chunks = splitter.split(text);
        assert!(chunks.iter().any(|c| c.contains("parágrafo número um")));
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
    }

    #[test]
    fn char_window_fallback_carries_overlap() {
        let splitter = TextSplitter::new(10, 4).unwrap();
        let text: String = ('a'..='z').cycle().take(30).collect();
        let chunks = splitter.split(&text);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 4).collect();
            assert!(pair[1].starts_with(&tail), "missing overlap: {pair:?}");
        }
    }

    #[test]
    fn no_empty_chunks() {
        let splitter = TextSplitter::new(20, 5).unwrap();
        let text = "a\n\n\n\nb\n\n\n\nc ".repeat(20);
        assert!(splitter.split(&text).iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn deterministic_output() {
        let splitter = TextSplitter::new(30, 8).unwrap();
        let text = "O CONSELHO NACIONAL DO MEIO AMBIENTE, no uso das competências que lhe são \
                    conferidas pela lei, decide homologar os pareceres.";
        assert_eq!(splitter.split(text), splitter.split(text));
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        assert!(TextSplitter::new(100, 100).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
    }

    #[test]
    fn multibyte_text_never_panics() {
        let splitter = TextSplitter::new(12, 3).unwrap();
        let text = "ação proteção legislação navegação São João ilhéu baía".repeat(4);
        for chunk in splitter.split(&text) {
            assert!(chunk.chars().count() <= 12);
        }
    }
}
