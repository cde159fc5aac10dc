//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use qaforge_core::{ProgressReporter, RunSummary, run_generation, run_refinement};
use qaforge_corpus::{CorpusStatistics, KeywordFilter};
use qaforge_session::{BridgeConfig, BridgeSession, SessionBackend, SessionConfig};
use qaforge_shared::{
    AppConfig, PipelineConfig, QaForgeError, init_config, load_config, load_config_from,
    validate_session_cookies,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// qaforge — synthesize QA training pairs from a document corpus.
#[derive(Parser)]
#[command(
    name = "qaforge",
    version,
    about = "Generate and refine question/answer training pairs from legislation documents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate QA pairs from the raw documents under a corpus directory.
    Generate {
        /// Corpus root directory holding `*.txt` documents.
        corpus: String,

        /// Category name partitioning checkpoint/CSV files (defaults to the
        /// corpus directory name).
        #[arg(short, long)]
        category: Option<String>,

        /// Number of worker sessions (overrides config).
        #[arg(short, long)]
        workers: Option<usize>,

        /// Maximum chunk length in characters (overrides config).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Keyword pattern file, one pattern per line (defaults to the
        /// built-in marine/coastal set).
        #[arg(long)]
        keywords: Option<String>,

        /// Config file path (defaults to ~/.qaforge/qaforge.toml).
        #[arg(long)]
        config: Option<String>,
    },

    /// Refine the rows of a previously generated result table.
    Refine {
        /// Input CSV produced by `generate`.
        input: String,

        /// Category name partitioning checkpoint/CSV files.
        #[arg(short, long)]
        category: String,

        /// Number of worker sessions (overrides config).
        #[arg(short, long)]
        workers: Option<usize>,

        /// Config file path (defaults to ~/.qaforge/qaforge.toml).
        #[arg(long)]
        config: Option<String>,
    },

    /// Compute word/character statistics over a corpus directory.
    Stats {
        /// Corpus root directory.
        corpus: String,

        /// Directory for the statistics JSON files.
        #[arg(short, long, default_value = "statistics")]
        out: String,
    },

    /// Create a default config file at ~/.qaforge/qaforge.toml.
    InitConfig,
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the global tracing subscriber from CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::EnvFilter;

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("qaforge={default_level}")));

    match cli.log_format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command routing
// ---------------------------------------------------------------------------

/// Execute the parsed CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Generate {
            corpus,
            category,
            workers,
            chunk_size,
            keywords,
            config,
        } => {
            let app = load_app_config(config.as_deref())?;
            let corpus = PathBuf::from(corpus);
            let category = category
                .or_else(|| {
                    corpus
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .ok_or_else(|| eyre!("could not derive a category from the corpus path"))?;

            let mut pipeline = PipelineConfig::from_app_config(&app, category);
            if let Some(chunk_size) = chunk_size {
                pipeline.chunk_size = chunk_size;
            }
            let num_workers = workers.unwrap_or(pipeline.num_workers);

            let filter = match keywords {
                Some(path) => load_keyword_file(Path::new(&path))?,
                None => KeywordFilter::marine(),
            };

            validate_session_cookies(&app)?;
            let sessions = spawn_sessions(&app, num_workers).await?;

            let progress = IndicatifProgress::new();
            let summary =
                run_generation(&pipeline, &corpus, filter, sessions, &progress).await?;
            print_summary(&summary, &pipeline);
            Ok(())
        }

        Command::Refine {
            input,
            category,
            workers,
            config,
        } => {
            let app = load_app_config(config.as_deref())?;
            let pipeline = PipelineConfig::from_app_config(&app, category);
            let num_workers = workers.unwrap_or(pipeline.num_workers);

            validate_session_cookies(&app)?;
            let sessions = spawn_sessions(&app, num_workers).await?;

            let progress = IndicatifProgress::new();
            let summary =
                run_refinement(&pipeline, Path::new(&input), sessions, &progress).await?;
            print_summary(&summary, &pipeline);
            Ok(())
        }

        Command::Stats { corpus, out } => {
            let filter = KeywordFilter::marine();
            let stats = CorpusStatistics::collect(Path::new(&corpus), &filter)?;

            let out = PathBuf::from(out);
            stats.save(&out)?;

            let full = stats.summarize_full();
            let filtered = stats.summarize_filtered();
            println!(
                "Full corpus:     {} documents, {} words, {} characters",
                full.n_docs, full.n_words, full.n_chars
            );
            println!(
                "Filtered subset: {} documents, {} words, {} characters",
                filtered.n_docs, filtered.n_words, filtered.n_chars
            );
            println!("Statistics written to {}", out.display());
            Ok(())
        }

        Command::InitConfig => {
            let path = init_config()?;
            println!("Config file created at {}", path.display());
            Ok(())
        }
    }
}

fn load_app_config(path: Option<&str>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(Path::new(path))?,
        None => load_config()?,
    })
}

/// Read a keyword pattern file: one pattern per line, `#` comments allowed.
fn load_keyword_file(path: &Path) -> Result<KeywordFilter> {
    let content =
        std::fs::read_to_string(path).map_err(|e| QaForgeError::io(path, e))?;
    let patterns: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    Ok(KeywordFilter::new(&patterns)?)
}

/// Spawn one bridge session per worker.
async fn spawn_sessions(
    app: &AppConfig,
    num_workers: usize,
) -> Result<Vec<Box<dyn SessionBackend>>> {
    let bridge = BridgeConfig {
        cmd: app.bridge.cmd.clone(),
        script: app.bridge.script.clone(),
        working_dir: PathBuf::from(&app.bridge.working_dir),
    };

    let mut sessions: Vec<Box<dyn SessionBackend>> = Vec::new();
    for worker_id in 0..num_workers.max(1) {
        let session_config = SessionConfig::resolve(&app.session, worker_id);
        let session = BridgeSession::spawn(&bridge, &session_config, worker_id)
            .await
            .map_err(|e| eyre!("worker {worker_id}: {e}"))?;
        sessions.push(Box::new(session));
    }

    info!(sessions = sessions.len(), "sessions ready");
    Ok(sessions)
}

fn print_summary(summary: &RunSummary, pipeline: &PipelineConfig) {
    println!(
        "Appended {} rows ({} total) in {:.1?}; {} bundles, {} skipped, {} workers retired.",
        summary.rows_appended,
        summary.table_rows,
        summary.elapsed,
        summary.bundles,
        summary.units_skipped,
        summary.workers_retired,
    );
    println!("CSV: {}", pipeline.csv_path().display());
    println!("Checkpoint: {}", pipeline.checkpoint_path().display());
}

// ---------------------------------------------------------------------------
// Progress bar adapter
// ---------------------------------------------------------------------------

/// Adapts the pipeline's [`ProgressReporter`] to an indicatif spinner.
struct IndicatifProgress {
    bar: ProgressBar,
}

impl IndicatifProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {pos} units | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { bar }
    }
}

impl ProgressReporter for IndicatifProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn unit_done(&self, source_name: &str, appended: usize, total_rows: usize) {
        self.bar.inc(1);
        self.bar
            .set_message(format!("{source_name}: +{appended} ({total_rows} rows)"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}
