//! Context feeders.
//!
//! A feeder walks an ordered source, skips everything at or below the resume
//! index, and enqueues one [`ContextUnit`] per surviving chunk or row. It
//! has no side effects beyond enqueuing and bumping the shared
//! filtered-texts counter, and it never aborts the pipeline: per-entry
//! failures are logged and skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use qaforge_corpus::{DocumentEntry, KeywordFilter, TextSplitter};
use qaforge_shared::{ContextUnit, Payload, ResultRecord};

use crate::queue::ContextQueue;

/// Log feeder progress every this many entries read.
const PROGRESS_LOG_EVERY: u64 = 1000;

/// Shared inputs of both feeder flavors.
pub struct FeederContext {
    /// Destination work queue.
    pub queue: Arc<ContextQueue<ContextUnit>>,
    /// Entries with `index <= resume_index` are skipped.
    pub resume_index: Option<u64>,
    /// Shared count of entries that survived filtering, carried into the
    /// checkpoint.
    pub filtered_count: Arc<AtomicU64>,
}

impl FeederContext {
    fn skip(&self, index: u64) -> bool {
        self.resume_index.is_some_and(|resume| index <= resume)
    }
}

/// Raw-document flavor: filter whole documents, split the survivors, filter
/// each chunk again, and enqueue one unit per surviving chunk.
pub async fn feed_documents(
    ctx: FeederContext,
    documents: Vec<DocumentEntry>,
    filter: Arc<KeywordFilter>,
    splitter: TextSplitter,
    min_text_length: usize,
) {
    let mut total_read: u64 = 0;

    for doc in documents {
        if ctx.skip(doc.index) {
            continue;
        }
        // Monitoring starts with the first entry actually considered, not
        // at task spawn: consumers must not count idle cycles while the
        // feeder is still seeking past the resume point.
        ctx.queue.enable_monitoring();

        let text = match doc.read_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(name = %doc.name, error = %e, "skipping unreadable document");
                continue;
            }
        };

        if total_read % PROGRESS_LOG_EVERY == 0 {
            info!(total_read, "feeder progress");
        }
        total_read += 1;

        if text.chars().count() < min_text_length || !filter.matches(&text) {
            continue;
        }

        let mut enqueued = 0usize;
        for chunk in splitter.split(&text) {
            if chunk.chars().count() < min_text_length || !filter.matches(&chunk) {
                continue;
            }
            ctx.queue
                .push(ContextUnit {
                    index: doc.index,
                    source_name: doc.name.clone(),
                    payload: Payload::Document { text: chunk },
                })
                .await;
            enqueued += 1;
        }

        if enqueued > 0 {
            ctx.filtered_count.fetch_add(1, Ordering::SeqCst);
            debug!(name = %doc.name, chunks = enqueued, "document enqueued");
        }
    }

    info!("document feeder finished");
}

/// QA-refinement flavor: enqueue prior result rows unfiltered.
pub async fn feed_qa_rows(ctx: FeederContext, rows: Vec<ResultRecord>) {
    for (position, row) in rows.into_iter().enumerate() {
        let index = position as u64;
        if ctx.skip(index) {
            continue;
        }
        ctx.queue.enable_monitoring();

        if position as u64 % PROGRESS_LOG_EVERY == 0 {
            info!(position, "feeder progress");
        }

        ctx.queue
            .push(ContextUnit {
                index,
                source_name: row.file_name,
                payload: Payload::QaRow {
                    prompt: row.prompt,
                    question: row.question,
                    answer: row.answer,
                },
            })
            .await;
        ctx.filtered_count.fetch_add(1, Ordering::SeqCst);
    }

    info!("qa-row feeder finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use uuid::Uuid;

    fn temp_corpus(files: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qaforge-feeder-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        for (name, content) in files {
            std::fs::write(dir.join(name), content).unwrap();
        }
        dir
    }

    fn context(queue: &Arc<ContextQueue<ContextUnit>>, resume: Option<u64>) -> FeederContext {
        FeederContext {
            queue: Arc::clone(queue),
            resume_index: resume,
            filtered_count: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn drain(queue: &ContextQueue<ContextUnit>) -> Vec<ContextUnit> {
        let mut units = Vec::new();
        while let Some(unit) = queue.pop_timeout(Duration::from_millis(10)).await {
            units.push(unit);
        }
        units
    }

    #[tokio::test]
    async fn filters_and_enqueues_relevant_documents() {
        let root = temp_corpus(&[
            ("a.txt", &"a pesca na costa brasileira é regulada. ".repeat(3)),
            ("b.txt", &"imposto de renda, tabela de março. ".repeat(3)),
        ]);
        let docs = qaforge_corpus::walk_documents(&root).unwrap();

        let queue = Arc::new(ContextQueue::unbounded());
        let ctx = context(&queue, None);
        let filtered = Arc::clone(&ctx.filtered_count);

        feed_documents(
            ctx,
            docs,
            Arc::new(KeywordFilter::marine()),
            TextSplitter::new(4000, 100).unwrap(),
            50,
        )
        .await;

        let units = drain(&queue).await;
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].source_name, "a.txt");
        assert_eq!(units[0].index, 0);
        assert_eq!(filtered.load(Ordering::SeqCst), 1);
        assert!(queue.is_monitoring());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn resume_skips_indexes_at_or_below_checkpoint() {
        let relevant = "a pesca na costa brasileira segue regulada por lei. ".repeat(2);
        let root = temp_corpus(&[
            ("a.txt", relevant.as_str()),
            ("b.txt", relevant.as_str()),
            ("c.txt", relevant.as_str()),
        ]);
        let docs = qaforge_corpus::walk_documents(&root).unwrap();

        let queue = Arc::new(ContextQueue::unbounded());
        feed_documents(
            context(&queue, Some(1)),
            docs,
            Arc::new(KeywordFilter::marine()),
            TextSplitter::new(4000, 100).unwrap(),
            50,
        )
        .await;

        let units = drain(&queue).await;
        assert!(!units.is_empty());
        assert!(units.iter().all(|u| u.index > 1));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn oversized_documents_are_chunked() {
        let sentence = "A atividade pesqueira na zona costeira exige licença ambiental. ";
        let root = temp_corpus(&[("big.txt", &sentence.repeat(40))]);
        let docs = qaforge_corpus::walk_documents(&root).unwrap();

        let queue = Arc::new(ContextQueue::unbounded());
        feed_documents(
            context(&queue, None),
            docs,
            Arc::new(KeywordFilter::marine()),
            TextSplitter::new(500, 100).unwrap(),
            50,
        )
        .await;

        let units = drain(&queue).await;
        assert!(units.len() > 1, "expected multiple chunks");
        // All chunks share the source document's index.
        assert!(units.iter().all(|u| u.index == 0));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn qa_rows_enqueue_unfiltered() {
        let rows = vec![
            ResultRecord {
                file_index: 10,
                file_name: "lei.txt".into(),
                prompt: "contexto".into(),
                question: "Q0".into(),
                answer: "A0".into(),
                new_question: None,
                new_long_answer: None,
            },
            ResultRecord {
                file_index: 11,
                file_name: "decreto.txt".into(),
                prompt: "contexto".into(),
                question: "Q1".into(),
                answer: "A1".into(),
                new_question: None,
                new_long_answer: None,
            },
        ];

        let queue = Arc::new(ContextQueue::unbounded());
        let ctx = context(&queue, Some(0));
        let filtered = Arc::clone(&ctx.filtered_count);
        feed_qa_rows(ctx, rows).await;

        let units = drain(&queue).await;
        // Row position, not the original file_index, is the resume index.
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].index, 1);
        assert!(matches!(units[0].payload, Payload::QaRow { .. }));
        assert_eq!(filtered.load(Ordering::SeqCst), 1);
    }
}
