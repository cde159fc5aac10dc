//! Result aggregator.
//!
//! Runs on the pipeline's own task and is the single writer of the result
//! table and the checkpoint. Drains worker outputs while the feeder or any
//! worker is alive, deduplicates in encounter order, flushes the table on
//! cadence, and advances the checkpoint only after a successful flush — so
//! a crash can cost duplicate reattempts, never flushed data.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use qaforge_shared::{Checkpoint, ContextUnit, Payload, ResultRecord};
use qaforge_storage::{CheckpointStore, ResultTable, TableFlavor};

use crate::pipeline::ProgressReporter;
use crate::queue::ContextQueue;
use crate::worker::WorkerOutput;

/// Counters reported when the drive loop ends.
#[derive(Debug, Clone, Default)]
pub struct DriveOutcome {
    /// Rows accepted into the table (after dedup).
    pub rows_appended: u64,
    /// Bundles that produced no usable pairs.
    pub units_skipped: u64,
    /// Bundles processed in total.
    pub bundles: u64,
}

/// Liveness inputs for the drive loop's termination condition.
pub struct DriveContext {
    pub queue: Arc<ContextQueue<ContextUnit>>,
    pub feeder_done: Arc<AtomicBool>,
    pub worker_flags: Vec<Arc<AtomicBool>>,
    pub filtered_count: Arc<AtomicU64>,
    /// How long one receive attempt waits before rechecking liveness.
    pub recv_timeout: Duration,
}

impl DriveContext {
    async fn work_remains(&self) -> bool {
        let workers_alive = self
            .worker_flags
            .iter()
            .any(|flag| flag.load(Ordering::SeqCst));
        // Queued units only count while a worker is alive to take them;
        // leftovers after every session retired can never complete.
        !self.feeder_done.load(Ordering::SeqCst)
            || (workers_alive && !self.queue.is_empty().await)
            || workers_alive
    }
}

/// Drain worker outputs into the table until all work is done, then perform
/// the final flush and checkpoint.
pub async fn drive(
    mut rx: mpsc::UnboundedReceiver<WorkerOutput>,
    ctx: DriveContext,
    table: &mut ResultTable,
    flavor: TableFlavor,
    checkpoints: &CheckpointStore,
    progress: &dyn ProgressReporter,
) -> DriveOutcome {
    let mut outcome = DriveOutcome::default();
    // Highest source index appended since the last successful flush; the
    // checkpoint trails flushes, never appends.
    let mut cursor: Option<(u64, String)> = None;

    while ctx.work_remains().await {
        match tokio::time::timeout(ctx.recv_timeout, rx.recv()).await {
            Ok(Some(output)) => {
                handle_bundle(output, table, flavor, &mut outcome, &mut cursor, progress);
                maybe_flush(table, checkpoints, &ctx, &mut cursor, false);
            }
            Ok(None) => break,
            Err(_) => {
                debug!("output queue idle, rechecking liveness");
            }
        }
    }

    // Workers may exit between the liveness check and their last send; the
    // channel still holds those outputs.
    while let Ok(output) = rx.try_recv() {
        handle_bundle(output, table, flavor, &mut outcome, &mut cursor, progress);
        maybe_flush(table, checkpoints, &ctx, &mut cursor, false);
    }

    maybe_flush(table, checkpoints, &ctx, &mut cursor, true);
    info!(
        bundles = outcome.bundles,
        rows_appended = outcome.rows_appended,
        units_skipped = outcome.units_skipped,
        "aggregation complete"
    );
    outcome
}

fn handle_bundle(
    output: WorkerOutput,
    table: &mut ResultTable,
    flavor: TableFlavor,
    outcome: &mut DriveOutcome,
    cursor: &mut Option<(u64, String)>,
    progress: &dyn ProgressReporter,
) {
    outcome.bundles += 1;
    let pairs = output.body.pairs();

    if pairs.is_empty() {
        debug!(source = %output.unit.source_name, "skipping bundle without QA pairs");
        outcome.units_skipped += 1;
        return;
    }

    // First occurrence wins within a bundle; the table guards across
    // bundles and runs.
    let mut seen_in_bundle = HashSet::new();
    let mut appended = 0u64;

    for pair in pairs {
        if !seen_in_bundle.insert((pair.question.clone(), pair.answer.clone())) {
            continue;
        }
        let record = build_record(&output, flavor, &pair.question, &pair.answer);
        if table.append(record) {
            appended += 1;
        }
    }

    outcome.rows_appended += appended;
    if appended > 0 {
        let advance = match cursor {
            Some((index, _)) => output.unit.index >= *index,
            None => true,
        };
        if advance {
            *cursor = Some((output.unit.index, output.unit.source_name.clone()));
        }
    }

    progress.unit_done(&output.unit.source_name, appended as usize, table.len());
}

fn build_record(
    output: &WorkerOutput,
    flavor: TableFlavor,
    question: &str,
    answer: &str,
) -> ResultRecord {
    match (flavor, &output.unit.payload) {
        (TableFlavor::Refinement, Payload::QaRow {
            prompt,
            question: original_question,
            answer: original_answer,
        }) => ResultRecord {
            file_index: output.unit.index,
            file_name: output.unit.source_name.clone(),
            prompt: prompt.clone(),
            question: original_question.clone(),
            answer: original_answer.clone(),
            new_question: Some(question.to_string()),
            new_long_answer: Some(answer.to_string()),
        },
        _ => ResultRecord {
            file_index: output.unit.index,
            file_name: output.unit.source_name.clone(),
            prompt: output.prompt.clone(),
            question: question.to_string(),
            answer: answer.to_string(),
            new_question: None,
            new_long_answer: None,
        },
    }
}

/// Flush on cadence (or unconditionally at shutdown) and advance the
/// checkpoint for the indexes the flush covered. Flush failures are logged
/// and retried at the next cadence; in-memory state is never rolled back.
fn maybe_flush(
    table: &mut ResultTable,
    checkpoints: &CheckpointStore,
    ctx: &DriveContext,
    cursor: &mut Option<(u64, String)>,
    force: bool,
) {
    if !force && !table.should_flush() {
        return;
    }
    if table.is_empty() {
        return;
    }

    if let Err(e) = table.flush() {
        warn!(error = %e, "result table flush failed, will retry");
        return;
    }

    if let Some((index, name)) = cursor.take() {
        let checkpoint = Checkpoint {
            last_file_name: name,
            last_file_index: index,
            count_filtered_texts: ctx.filtered_count.load(Ordering::SeqCst),
        };
        if let Err(e) = checkpoints.save(&checkpoint) {
            warn!(error = %e, "checkpoint save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use qaforge_shared::{QaPair, ResponseBody};
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qaforge-agg-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn output(index: u64, pairs: &[(&str, &str)]) -> WorkerOutput {
        WorkerOutput {
            unit: ContextUnit {
                index,
                source_name: format!("doc_{index}.txt"),
                payload: Payload::Document {
                    text: "contexto".into(),
                },
            },
            prompt: format!("prompt {index}"),
            body: if pairs.is_empty() {
                ResponseBody::Empty
            } else {
                ResponseBody::StructuredList(
                    pairs
                        .iter()
                        .map(|(q, a)| QaPair {
                            question: q.to_string(),
                            answer: a.to_string(),
                        })
                        .collect(),
                )
            },
        }
    }

    fn drained_context() -> DriveContext {
        DriveContext {
            queue: Arc::new(ContextQueue::unbounded()),
            feeder_done: Arc::new(AtomicBool::new(true)),
            worker_flags: vec![],
            filtered_count: Arc::new(AtomicU64::new(3)),
            recv_timeout: Duration::from_millis(10),
        }
    }

    async fn run_drive(
        outputs: Vec<WorkerOutput>,
        flush_every: usize,
    ) -> (DriveOutcome, ResultTable, CheckpointStore, PathBuf) {
        let dir = temp_dir();
        let mut table = ResultTable::open(
            dir.join("out.csv"),
            TableFlavor::Generation,
            flush_every,
        )
        .unwrap();
        let checkpoints = CheckpointStore::new(dir.join("checkpoint.json"));

        let (tx, rx) = mpsc::unbounded_channel();
        for output in outputs {
            tx.send(output).unwrap();
        }
        drop(tx);

        let outcome = drive(
            rx,
            drained_context(),
            &mut table,
            TableFlavor::Generation,
            &checkpoints,
            &SilentProgress,
        )
        .await;

        (outcome, table, checkpoints, dir)
    }

    #[tokio::test]
    async fn bundles_append_and_final_flush_checkpoints() {
        let (outcome, table, checkpoints, dir) = run_drive(
            vec![
                output(0, &[("Q0", "A0"), ("Q0b", "A0b")]),
                output(1, &[("Q1", "A1")]),
            ],
            100,
        )
        .await;

        assert_eq!(outcome.bundles, 2);
        assert_eq!(outcome.rows_appended, 3);
        assert_eq!(table.len(), 3);

        // Cadence of 100 never fired mid-run; the final flush wrote both
        // the table and the checkpoint.
        let checkpoint = checkpoints.load().unwrap().unwrap();
        assert_eq!(checkpoint.last_file_index, 1);
        assert_eq!(checkpoint.last_file_name, "doc_1.txt");
        assert_eq!(checkpoint.count_filtered_texts, 3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn duplicate_pairs_within_bundle_collapse() {
        let (outcome, table, _, dir) = run_drive(
            vec![output(0, &[("Q", "A"), ("Q", "A"), ("Q2", "A2")])],
            100,
        )
        .await;

        assert_eq!(outcome.rows_appended, 2);
        assert_eq!(table.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_bundles_are_skipped() {
        let (outcome, table, checkpoints, dir) =
            run_drive(vec![output(0, &[]), output(1, &[("Q", "A")])], 100).await;

        assert_eq!(outcome.units_skipped, 1);
        assert_eq!(outcome.rows_appended, 1);
        assert_eq!(table.len(), 1);
        // The skipped unit must not advance the checkpoint past flushed rows.
        assert_eq!(checkpoints.load().unwrap().unwrap().last_file_index, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn out_of_order_completions_keep_checkpoint_monotonic() {
        let (_, _, checkpoints, dir) = run_drive(
            vec![
                output(5, &[("Q5", "A5")]),
                output(2, &[("Q2", "A2")]),
                output(7, &[("Q7", "A7")]),
                output(3, &[("Q3", "A3")]),
            ],
            1,
        )
        .await;

        // flush_every=1 checkpoints after every bundle; the slow units at
        // 2 and 3 must not rewind the cursor past 5.
        assert_eq!(checkpoints.load().unwrap().unwrap().last_file_index, 7);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn checkpoint_waits_for_flush_cadence() {
        let dir = temp_dir();
        let mut table =
            ResultTable::open(dir.join("out.csv"), TableFlavor::Generation, 3).unwrap();
        let checkpoints = CheckpointStore::new(dir.join("checkpoint.json"));

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(output(0, &[("Q0", "A0")])).unwrap();
        tx.send(output(1, &[("Q1", "A1")])).unwrap();
        drop(tx);

        let outcome = drive(
            rx,
            drained_context(),
            &mut table,
            TableFlavor::Generation,
            &checkpoints,
            &SilentProgress,
        )
        .await;

        assert_eq!(outcome.rows_appended, 2);
        // Cadence of 3 never fired mid-run, but shutdown forced the flush
        // and the checkpoint covers everything flushed.
        assert_eq!(checkpoints.load().unwrap().unwrap().last_file_index, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn refinement_rows_carry_original_pair() {
        let dir = temp_dir();
        let mut table =
            ResultTable::open(dir.join("out.csv"), TableFlavor::Refinement, 100).unwrap();
        let checkpoints = CheckpointStore::new(dir.join("checkpoint.json"));

        let refinement_output = WorkerOutput {
            unit: ContextUnit {
                index: 4,
                source_name: "lei.txt".into(),
                payload: Payload::QaRow {
                    prompt: "contexto da lei".into(),
                    question: "Q original".into(),
                    answer: "A original".into(),
                },
            },
            prompt: "prompt renderizado".into(),
            body: ResponseBody::StructuredList(vec![QaPair {
                question: "Q refinada".into(),
                answer: "A longa e detalhada".into(),
            }]),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(refinement_output).unwrap();
        drop(tx);

        drive(
            rx,
            drained_context(),
            &mut table,
            TableFlavor::Refinement,
            &checkpoints,
            &SilentProgress,
        )
        .await;

        let record = &table.records()[0];
        assert_eq!(record.question, "Q original");
        assert_eq!(record.answer, "A original");
        assert_eq!(record.prompt, "contexto da lei");
        assert_eq!(record.new_question.as_deref(), Some("Q refinada"));
        assert_eq!(record.new_long_answer.as_deref(), Some("A longa e detalhada"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
