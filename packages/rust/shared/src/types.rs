//! Core domain types for the qaforge pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ContextUnit
// ---------------------------------------------------------------------------

/// The payload carried by a [`ContextUnit`].
///
/// Raw-document runs carry a chunk of source text; refinement runs carry a
/// previously generated QA row to be expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A chunk of raw document text.
    Document { text: String },
    /// A prior QA row (prompt, question, answer) to refine.
    QaRow {
        prompt: String,
        question: String,
        answer: String,
    },
}

/// One indivisible unit of work flowing from the feeder to a worker.
///
/// `index` is monotonic in source order and drives checkpoint resume;
/// several units may share an index when a document was split into chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextUnit {
    /// Source-order index of the originating document or row.
    pub index: u64,
    /// File or row name of the originating source.
    pub source_name: String,
    /// The text or QA row to process.
    pub payload: Payload,
}

// ---------------------------------------------------------------------------
// Session round-trip types
// ---------------------------------------------------------------------------

/// Unstructured output captured from one completed session round-trip.
///
/// `json_fragments` holds any code-block contents the backend could isolate
/// from the rendered response; `text` is the full visible reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub text: String,
    pub json_fragments: Vec<String>,
}

/// A single question/answer pair extracted from a session response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// Normalized shape of a parsed session response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Structured or fallback extraction produced one or more pairs.
    StructuredList(Vec<QaPair>),
    /// The response held text but no extractable pairs.
    FreeText(String),
    /// The response was empty or unusable.
    Empty,
}

impl ResponseBody {
    /// The extracted pairs, empty for `FreeText` and `Empty`.
    pub fn pairs(&self) -> &[QaPair] {
        match self {
            Self::StructuredList(pairs) => pairs,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// ResultRecord
// ---------------------------------------------------------------------------

/// One persisted row of the output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Source-order index of the originating document.
    pub file_index: u64,
    /// Name of the originating document or row.
    pub file_name: String,
    /// The rendered prompt submitted for this row.
    pub prompt: String,
    /// Extracted question.
    pub question: String,
    /// Extracted answer.
    pub answer: String,
    /// Refinement flavor only: the expanded question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_question: Option<String>,
    /// Refinement flavor only: the expanded long answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_long_answer: Option<String>,
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Durable high-water mark enabling resume without reprocessing.
///
/// `last_file_index` never decreases across saves; out-of-order worker
/// completions must not regress it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Name of the last fully flushed source entry.
    pub last_file_name: String,
    /// Index of the last fully flushed source entry.
    pub last_file_index: u64,
    /// Running count of documents that survived the keyword filter.
    pub count_filtered_texts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_displayable() {
        let id = RunId::new();
        assert_eq!(id.to_string().len(), 36);
    }

    #[test]
    fn checkpoint_serialization_keys() {
        let checkpoint = Checkpoint {
            last_file_name: "decreto_123.txt".into(),
            last_file_index: 42,
            count_filtered_texts: 7,
        };

        let json = serde_json::to_string(&checkpoint).expect("serialize");
        assert!(json.contains("\"last_file_name\""));
        assert!(json.contains("\"last_file_index\":42"));
        assert!(json.contains("\"count_filtered_texts\":7"));

        let parsed: Checkpoint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, checkpoint);
    }

    #[test]
    fn result_record_omits_refinement_columns_when_absent() {
        let record = ResultRecord {
            file_index: 1,
            file_name: "lei.txt".into(),
            prompt: "p".into(),
            question: "q".into(),
            answer: "a".into(),
            new_question: None,
            new_long_answer: None,
        };

        let json = serde_json::to_string(&record).expect("serialize");
        assert!(!json.contains("new_question"));
        assert!(!json.contains("new_long_answer"));
    }

    #[test]
    fn response_body_pairs_accessor() {
        let body = ResponseBody::StructuredList(vec![QaPair {
            question: "q".into(),
            answer: "a".into(),
        }]);
        assert_eq!(body.pairs().len(), 1);
        assert!(ResponseBody::Empty.pairs().is_empty());
        assert!(ResponseBody::FreeText("text".into()).pairs().is_empty());
    }
}
