//! End-to-end pipeline: corpus → feeder → work queue → workers → aggregator
//! → table + checkpoint.
//!
//! One feeder task, one task per worker (each owning one exclusive session),
//! the aggregator on the calling task. The only shared mutable state is the
//! two queues and the atomic liveness/progress counters; the table and
//! checkpoint are touched by the aggregator alone.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use qaforge_corpus::{KeywordFilter, TextSplitter, walk_documents};
use qaforge_session::SessionBackend;
use qaforge_session::prompt::PromptTemplate;
use qaforge_shared::{PipelineConfig, QaForgeError, Result, RunId};
use qaforge_storage::{CheckpointStore, ResultTable, TableFlavor};

use crate::aggregator::{self, DriveContext};
use crate::feeder::{self, FeederContext};
use crate::queue::ContextQueue;
use crate::worker::{Worker, WorkerConfig};

/// How long one aggregator receive attempt waits before rechecking liveness.
const AGGREGATOR_RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each processed unit reaches the table.
    fn unit_done(&self, source_name: &str, appended: usize, total_rows: usize);
    /// Called when the pipeline completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn unit_done(&self, _source_name: &str, _appended: usize, _total_rows: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Rows accepted into the table this run (after dedup).
    pub rows_appended: u64,
    /// Bundles that produced no usable pairs.
    pub units_skipped: u64,
    /// Bundles processed in total.
    pub bundles: u64,
    /// Total rows now in the table, including prior runs.
    pub table_rows: usize,
    /// Cumulative filtered-document count carried in the checkpoint.
    pub filtered_texts: u64,
    /// Workers that retired their session before the queue drained.
    pub workers_retired: usize,
    /// Total elapsed time.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Pipeline flavors
// ---------------------------------------------------------------------------

/// Run the raw-document generation pipeline over the corpus at `corpus_root`.
#[instrument(skip_all, fields(category = %config.category, workers = sessions.len()))]
pub async fn run_generation(
    config: &PipelineConfig,
    corpus_root: &Path,
    filter: KeywordFilter,
    sessions: Vec<Box<dyn SessionBackend>>,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap)?;

    progress.phase("Enumerating corpus");
    let documents = walk_documents(corpus_root)?;
    info!(documents = documents.len(), "corpus enumerated");

    let min_text_length = config.min_text_length;
    let filter = Arc::new(filter);
    run_pipeline(
        config,
        sessions,
        TableFlavor::Generation,
        PromptTemplate::Generation,
        progress,
        move |ctx| feeder::feed_documents(ctx, documents, filter, splitter, min_text_length),
    )
    .await
}

/// Run the QA-refinement pipeline over the rows of a prior result table.
#[instrument(skip_all, fields(category = %config.category, workers = sessions.len()))]
pub async fn run_refinement(
    config: &PipelineConfig,
    input_csv: &Path,
    sessions: Vec<Box<dyn SessionBackend>>,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    progress.phase("Loading input rows");
    if !input_csv.exists() {
        return Err(QaForgeError::validation(format!(
            "input table not found: {}",
            input_csv.display()
        )));
    }
    let input = ResultTable::open(input_csv, TableFlavor::Generation, usize::MAX)?;
    let rows: Vec<_> = input.records().to_vec();
    info!(rows = rows.len(), "input rows loaded");

    run_pipeline(
        config,
        sessions,
        TableFlavor::Refinement,
        PromptTemplate::Refinement,
        progress,
        move |ctx| feeder::feed_qa_rows(ctx, rows),
    )
    .await
}

// ---------------------------------------------------------------------------
// Shared orchestration
// ---------------------------------------------------------------------------

async fn run_pipeline<F, Fut>(
    config: &PipelineConfig,
    sessions: Vec<Box<dyn SessionBackend>>,
    flavor: TableFlavor,
    template: PromptTemplate,
    progress: &dyn ProgressReporter,
    feed: F,
) -> Result<RunSummary>
where
    F: FnOnce(FeederContext) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let start = Instant::now();
    if sessions.is_empty() {
        return Err(QaForgeError::validation("at least one session is required"));
    }

    let run_id = RunId::new();
    info!(%run_id, category = %config.category, "starting pipeline run");

    progress.phase("Loading checkpoint");
    let checkpoints = CheckpointStore::new(config.checkpoint_path());
    let resume = checkpoints.load()?;
    let resume_index = resume.as_ref().map(|c| c.last_file_index);
    let filtered_count = Arc::new(AtomicU64::new(
        resume.map(|c| c.count_filtered_texts).unwrap_or(0),
    ));
    if let Some(index) = resume_index {
        info!(resume_index = index, "resuming from checkpoint");
    }

    progress.phase("Loading result table");
    let mut table = ResultTable::open(config.csv_path(), flavor, config.flush_every)?;
    info!(rows = table.len(), "result table loaded");

    let queue = Arc::new(ContextQueue::unbounded());
    let feeder_done = Arc::new(AtomicBool::new(false));

    let feeder_handle = tokio::spawn({
        let ctx = FeederContext {
            queue: Arc::clone(&queue),
            resume_index,
            filtered_count: Arc::clone(&filtered_count),
        };
        let queue = Arc::clone(&queue);
        let feeder_done = Arc::clone(&feeder_done);
        async move {
            // The inner task isolates feeder panics: a dead feeder must
            // still arm the idle protocol, or workers would poll forever.
            if let Err(e) = tokio::spawn(feed(ctx)).await {
                warn!(error = %e, "feeder crashed");
            }
            queue.enable_monitoring();
            feeder_done.store(true, Ordering::SeqCst);
        }
    });

    progress.phase("Starting workers");
    let (tx, rx) = mpsc::unbounded_channel();
    let mut worker_handles = Vec::new();
    let mut worker_flags = Vec::new();

    for (id, session) in sessions.into_iter().enumerate() {
        let flag = Arc::new(AtomicBool::new(true));
        worker_flags.push(Arc::clone(&flag));

        let worker = Worker::new(
            worker_config(config, id, template),
            session,
            Arc::clone(&queue),
            tx.clone(),
            flag,
        );
        worker_handles.push(tokio::spawn(worker.run()));
    }
    drop(tx);

    progress.phase("Processing");
    let outcome = aggregator::drive(
        rx,
        DriveContext {
            queue: Arc::clone(&queue),
            feeder_done: Arc::clone(&feeder_done),
            worker_flags,
            filtered_count: Arc::clone(&filtered_count),
            recv_timeout: AGGREGATOR_RECV_TIMEOUT.min(config.idle_poll_interval * 5),
        },
        &mut table,
        flavor,
        &checkpoints,
        progress,
    )
    .await;

    if let Err(e) = feeder_handle.await {
        warn!(error = %e, "feeder task failed");
    }
    let mut workers_retired = 0;
    for handle in worker_handles {
        match handle.await {
            Ok(stats) if stats.retired => workers_retired += 1,
            Ok(_) => {}
            Err(e) => warn!(error = %e, "worker task failed"),
        }
    }

    let summary = RunSummary {
        rows_appended: outcome.rows_appended,
        units_skipped: outcome.units_skipped,
        bundles: outcome.bundles,
        table_rows: table.len(),
        filtered_texts: filtered_count.load(Ordering::SeqCst),
        workers_retired,
        elapsed: start.elapsed(),
    };

    progress.done(&summary);
    info!(
        rows_appended = summary.rows_appended,
        table_rows = summary.table_rows,
        units_skipped = summary.units_skipped,
        workers_retired = summary.workers_retired,
        elapsed_ms = summary.elapsed.as_millis(),
        "pipeline run complete"
    );

    Ok(summary)
}

fn worker_config(config: &PipelineConfig, id: usize, template: PromptTemplate) -> WorkerConfig {
    WorkerConfig {
        id,
        template,
        pop_timeout: config.idle_poll_interval,
        idle_poll_interval: config.idle_poll_interval,
        max_idle_polls: config.max_idle_polls,
        response_poll_interval: config.response_poll_interval,
        max_response_polls: config.max_response_polls,
        refresh_every: config.refresh_every,
        pacing: config.pacing,
    }
}
