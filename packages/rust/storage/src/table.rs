//! Persisted result table.
//!
//! The table lives in memory as an ordered record list and is flushed to a
//! CSV file as a whole (overwrite, not append) every N accepted records. A
//! crash between flushes therefore loses at most N−1 records of table state;
//! the checkpoint only advances for indexes included in an attempted flush.
//!
//! CSV quoting follows RFC 4180 — answers routinely carry commas, quotes,
//! and newlines.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use qaforge_shared::{QaForgeError, Result, ResultRecord};

/// Column layout of the output CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFlavor {
    /// `file_index, file_name, prompt, question, answer`
    Generation,
    /// Generation columns plus `new_questions, new_long_answers`
    Refinement,
}

impl TableFlavor {
    fn header(&self) -> &'static [&'static str] {
        match self {
            Self::Generation => &["file_index", "file_name", "prompt", "question", "answer"],
            Self::Refinement => &[
                "file_index",
                "file_name",
                "prompt",
                "question",
                "answer",
                "new_questions",
                "new_long_answers",
            ],
        }
    }
}

/// In-memory result table with periodic whole-file CSV flushes.
#[derive(Debug)]
pub struct ResultTable {
    path: PathBuf,
    flavor: TableFlavor,
    flush_every: usize,
    records: Vec<ResultRecord>,
    seen: HashSet<String>,
    accepted_since_flush: usize,
}

impl ResultTable {
    /// Open the table at `path`, loading any previous run's rows so resume
    /// keeps deduplicating against them.
    pub fn open(path: impl Into<PathBuf>, flavor: TableFlavor, flush_every: usize) -> Result<Self> {
        let path = path.into();
        let mut table = Self {
            path,
            flavor,
            flush_every: flush_every.max(1),
            records: Vec::new(),
            seen: HashSet::new(),
            accepted_since_flush: 0,
        };

        if table.path.exists() {
            let content = std::fs::read_to_string(&table.path)
                .map_err(|e| QaForgeError::io(&table.path, e))?;
            table.load_rows(&content);
            debug!(
                path = %table.path.display(),
                rows = table.records.len(),
                "loaded existing result table"
            );
        }

        Ok(table)
    }

    /// Number of rows currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The rows in append order.
    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    /// Append one record unless its (question, answer) pair is already
    /// present for the same source row. Returns whether it was accepted.
    pub fn append(&mut self, record: ResultRecord) -> bool {
        let key = dedup_key(&record);
        if !self.seen.insert(key) {
            return false;
        }
        self.records.push(record);
        self.accepted_since_flush += 1;
        true
    }

    /// Whether the flush cadence has been reached.
    pub fn should_flush(&self) -> bool {
        self.accepted_since_flush >= self.flush_every
    }

    /// Rewrite the whole CSV file. Resets the cadence counter only on
    /// success so a failed write is retried at the next opportunity.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QaForgeError::io(parent, e))?;
        }

        let mut out = String::new();
        write_row(
            &mut out,
            self.flavor.header().iter().map(|s| s.to_string()),
        );
        for record in &self.records {
            write_row(&mut out, self.row_of(record));
        }

        std::fs::write(&self.path, out).map_err(|e| QaForgeError::io(&self.path, e))?;
        self.accepted_since_flush = 0;
        debug!(path = %self.path.display(), rows = self.records.len(), "result table flushed");
        Ok(())
    }

    fn row_of(&self, record: &ResultRecord) -> impl Iterator<Item = String> {
        let mut fields = vec![
            record.file_index.to_string(),
            record.file_name.clone(),
            record.prompt.clone(),
            record.question.clone(),
            record.answer.clone(),
        ];
        if self.flavor == TableFlavor::Refinement {
            fields.push(record.new_question.clone().unwrap_or_default());
            fields.push(record.new_long_answer.clone().unwrap_or_default());
        }
        fields.into_iter()
    }

    fn load_rows(&mut self, content: &str) {
        let mut rows = parse_csv(content).into_iter();
        let Some(header) = rows.next() else {
            return;
        };

        let col = |name: &str| header.iter().position(|h| h == name);
        let (Some(i_index), Some(i_name), Some(i_prompt), Some(i_question), Some(i_answer)) = (
            col("file_index"),
            col("file_name"),
            col("prompt"),
            col("question"),
            col("answer"),
        ) else {
            warn!(path = %self.path.display(), "result table header unrecognized, starting fresh");
            return;
        };
        let i_new_q = col("new_questions");
        let i_new_a = col("new_long_answers");

        for row in rows {
            let Some(file_index) = row.get(i_index).and_then(|v| v.parse().ok()) else {
                warn!("skipping result row with bad file_index");
                continue;
            };
            let field = |i: usize| row.get(i).cloned().unwrap_or_default();
            let optional = |i: Option<usize>| {
                i.and_then(|i| row.get(i))
                    .filter(|v| !v.is_empty())
                    .cloned()
            };

            let record = ResultRecord {
                file_index,
                file_name: field(i_name),
                prompt: field(i_prompt),
                question: field(i_question),
                answer: field(i_answer),
                new_question: optional(i_new_q),
                new_long_answer: optional(i_new_a),
            };
            self.seen.insert(dedup_key(&record));
            self.records.push(record);
        }
    }
}

/// Dedup key over (source row, question, answer).
fn dedup_key(record: &ResultRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.file_index.to_le_bytes());
    hasher.update([0x1f]);
    hasher.update(record.question.as_bytes());
    hasher.update([0x1f]);
    hasher.update(record.answer.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// CSV primitives
// ---------------------------------------------------------------------------

fn write_row(out: &mut String, fields: impl Iterator<Item = String>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        write_field(out, &field);
    }
    out.push('\n');
}

fn write_field(out: &mut String, field: &str) {
    if field.contains(['"', ',', '\n', '\r']) {
        out.push('"');
        for c in field.chars() {
            if c == '"' {
                out.push('"');
            }
            out.push(c);
        }
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Quote-aware CSV parser; fields may span lines when quoted.
fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
        } else {
            match c {
                '"' if field.is_empty() => in_quotes = true,
                ',' => row.push(std::mem::take(&mut field)),
                '\r' => {}
                '\n' => {
                    row.push(std::mem::take(&mut field));
                    if !(row.len() == 1 && row[0].is_empty()) {
                        rows.push(std::mem::take(&mut row));
                    } else {
                        row.clear();
                    }
                }
                _ => field.push(c),
            }
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_csv(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("qaforge-table-{tag}-{}", Uuid::now_v7()))
            .join("conama_4000_context.csv")
    }

    fn record(index: u64, question: &str, answer: &str) -> ResultRecord {
        ResultRecord {
            file_index: index,
            file_name: format!("doc_{index}.txt"),
            prompt: "prompt".into(),
            question: question.into(),
            answer: answer.into(),
            new_question: None,
            new_long_answer: None,
        }
    }

    #[test]
    fn append_deduplicates_per_source_row() {
        let mut table = ResultTable::open(temp_csv("dedup"), TableFlavor::Generation, 10).unwrap();

        assert!(table.append(record(1, "Q", "A")));
        assert!(!table.append(record(1, "Q", "A")));
        // Same pair for a different source row is a distinct record.
        assert!(table.append(record(2, "Q", "A")));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn csv_roundtrip_with_hostile_fields() {
        let path = temp_csv("roundtrip");
        let mut table = ResultTable::open(&path, TableFlavor::Generation, 1).unwrap();

        let nasty_answer = "linha um,\ncom \"aspas\" e vírgulas, e\r\nmais linhas";
        table.append(record(0, "Pergunta, com vírgula?", nasty_answer));
        table.flush().unwrap();

        let reloaded = ResultTable::open(&path, TableFlavor::Generation, 1).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.records()[0].question, "Pergunta, com vírgula?");
        assert_eq!(reloaded.records()[0].answer, nasty_answer);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn reload_preserves_dedup_index() {
        let path = temp_csv("resume");
        let mut table = ResultTable::open(&path, TableFlavor::Generation, 1).unwrap();
        table.append(record(3, "Q3", "A3"));
        table.flush().unwrap();

        let mut resumed = ResultTable::open(&path, TableFlavor::Generation, 1).unwrap();
        // The reprocessed unit from the crash window is absorbed silently.
        assert!(!resumed.append(record(3, "Q3", "A3")));
        assert!(resumed.append(record(4, "Q4", "A4")));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn flush_cadence() {
        let mut table =
            ResultTable::open(temp_csv("cadence"), TableFlavor::Generation, 3).unwrap();

        table.append(record(0, "Q0", "A0"));
        table.append(record(1, "Q1", "A1"));
        assert!(!table.should_flush());
        table.append(record(2, "Q2", "A2"));
        assert!(table.should_flush());

        table.flush().unwrap();
        assert!(!table.should_flush());

        let _ = std::fs::remove_dir_all(table.path.parent().unwrap());
    }

    #[test]
    fn refinement_flavor_writes_extra_columns() {
        let path = temp_csv("refinement");
        let mut table = ResultTable::open(&path, TableFlavor::Refinement, 1).unwrap();

        let mut rec = record(0, "Q", "A");
        rec.new_question = Some("Q melhorada".into());
        rec.new_long_answer = Some("A bem mais longa".into());
        table.append(rec);
        table.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(
            "file_index,file_name,prompt,question,answer,new_questions,new_long_answers"
        ));

        let reloaded = ResultTable::open(&path, TableFlavor::Refinement, 1).unwrap();
        assert_eq!(
            reloaded.records()[0].new_question.as_deref(),
            Some("Q melhorada")
        );

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn open_missing_file_is_empty() {
        let table = ResultTable::open(temp_csv("fresh"), TableFlavor::Generation, 10).unwrap();
        assert!(table.is_empty());
    }
}
