//! Application configuration for qaforge.
//!
//! User config lives at `~/.qaforge/qaforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QaForgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "qaforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".qaforge";

// ---------------------------------------------------------------------------
// Config structs (matching qaforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Pipeline tuning knobs.
    #[serde(default)]
    pub pipeline: PipelineTuningConfig,

    /// External session settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// Bridge subprocess settings.
    #[serde(default)]
    pub bridge: BridgeSettings,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding checkpoint files.
    #[serde(default = "default_checkpoints_dir")]
    pub checkpoints_dir: String,

    /// Directory holding output CSV tables.
    #[serde(default = "default_csv_dir")]
    pub csv_dir: String,

    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Minimum text length for a document or chunk to be considered.
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,

    /// Number of worker sessions to run.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            checkpoints_dir: default_checkpoints_dir(),
            csv_dir: default_csv_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_text_length: default_min_text_length(),
            num_workers: default_num_workers(),
        }
    }
}

fn default_checkpoints_dir() -> String {
    "checkpoints".into()
}
fn default_csv_dir() -> String {
    "csv".into()
}
fn default_chunk_size() -> usize {
    4000
}
fn default_chunk_overlap() -> usize {
    1000
}
fn default_min_text_length() -> usize {
    50
}
fn default_num_workers() -> usize {
    2
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTuningConfig {
    /// Flush the result table to disk every N accepted records.
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,

    /// Consecutive idle polls before a worker exits once monitoring is on.
    #[serde(default = "default_max_idle_polls")]
    pub max_idle_polls: u32,

    /// Interval between idle polls, in milliseconds.
    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,

    /// Interval between session response polls, in milliseconds.
    #[serde(default = "default_response_poll_interval_ms")]
    pub response_poll_interval_ms: u64,

    /// Maximum session response polls before the unit is dropped.
    #[serde(default = "default_max_response_polls")]
    pub max_response_polls: u32,

    /// Proactively reset a session every N successful responses.
    #[serde(default = "default_refresh_every")]
    pub refresh_every: u32,

    /// Inter-request pacing bounds, in seconds.
    #[serde(default = "default_pacing_min_secs")]
    pub pacing_min_secs: u64,
    #[serde(default = "default_pacing_max_secs")]
    pub pacing_max_secs: u64,
}

impl Default for PipelineTuningConfig {
    fn default() -> Self {
        Self {
            flush_every: default_flush_every(),
            max_idle_polls: default_max_idle_polls(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
            response_poll_interval_ms: default_response_poll_interval_ms(),
            max_response_polls: default_max_response_polls(),
            refresh_every: default_refresh_every(),
            pacing_min_secs: default_pacing_min_secs(),
            pacing_max_secs: default_pacing_max_secs(),
        }
    }
}

fn default_flush_every() -> usize {
    10
}
fn default_max_idle_polls() -> u32 {
    10
}
fn default_idle_poll_interval_ms() -> u64 {
    1000
}
fn default_response_poll_interval_ms() -> u64 {
    1000
}
fn default_max_response_polls() -> u32 {
    60
}
fn default_refresh_every() -> u32 {
    5
}
fn default_pacing_min_secs() -> u64 {
    1
}
fn default_pacing_max_secs() -> u64 {
    5
}

/// `[session]` section.
///
/// Cookie values are never stored in the config file; only the names of the
/// environment variables holding them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Base URL of the external chat endpoint.
    #[serde(default = "default_session_url")]
    pub base_url: String,

    /// Env var names whose values are forwarded as session cookies.
    #[serde(default = "default_cookie_env_vars")]
    pub cookie_env_vars: Vec<String>,

    /// Env var name prefix for per-worker browser profile directories
    /// (`<prefix>0`, `<prefix>1`, ...).
    #[serde(default = "default_profile_dir_env_prefix")]
    pub profile_dir_env_prefix: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            base_url: default_session_url(),
            cookie_env_vars: default_cookie_env_vars(),
            profile_dir_env_prefix: default_profile_dir_env_prefix(),
        }
    }
}

fn default_session_url() -> String {
    "https://gemini.google.com".into()
}
fn default_cookie_env_vars() -> Vec<String> {
    vec![
        "COOKIE__Secure-1PSID".into(),
        "COOKIE__Secure-1PSIDTS".into(),
        "COOKIE__Secure-1PSIDCC".into(),
    ]
}
fn default_profile_dir_env_prefix() -> String {
    "CHROME_USER_DATA_DIR".into()
}

/// `[bridge]` section — how to launch the browser-driving subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Command to run (e.g., "python3").
    #[serde(default = "default_bridge_cmd")]
    pub cmd: String,

    /// Bridge script path passed as the first argument.
    #[serde(default = "default_bridge_script")]
    pub script: String,

    /// Working directory for the bridge subprocess.
    #[serde(default = "default_bridge_working_dir")]
    pub working_dir: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            cmd: default_bridge_cmd(),
            script: default_bridge_script(),
            working_dir: default_bridge_working_dir(),
        }
    }
}

fn default_bridge_cmd() -> String {
    "python3".into()
}
fn default_bridge_script() -> String {
    "bridge/selenium_bridge.py".into()
}
fn default_bridge_working_dir() -> String {
    ".".into()
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Logical category of this run (derived from the corpus folder name);
    /// partitions checkpoint and CSV files.
    pub category: String,
    /// Directory holding checkpoint files.
    pub checkpoints_dir: PathBuf,
    /// Directory holding output CSV tables.
    pub csv_dir: PathBuf,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Minimum text length for a document or chunk to be considered.
    pub min_text_length: usize,
    /// Number of worker sessions to run.
    pub num_workers: usize,
    /// Flush the result table every N accepted records.
    pub flush_every: usize,
    /// Consecutive idle polls before a worker exits once monitoring is on.
    pub max_idle_polls: u32,
    /// Interval between idle polls.
    pub idle_poll_interval: Duration,
    /// Interval between session response polls.
    pub response_poll_interval: Duration,
    /// Maximum session response polls before the unit is dropped.
    pub max_response_polls: u32,
    /// Proactively reset a session every N successful responses.
    pub refresh_every: u32,
    /// Inter-request pacing bounds.
    pub pacing: (Duration, Duration),
}

impl PipelineConfig {
    /// Build a runtime config for `category` from an [`AppConfig`].
    pub fn from_app_config(config: &AppConfig, category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            checkpoints_dir: PathBuf::from(&config.defaults.checkpoints_dir),
            csv_dir: PathBuf::from(&config.defaults.csv_dir),
            chunk_size: config.defaults.chunk_size,
            chunk_overlap: config.defaults.chunk_overlap,
            min_text_length: config.defaults.min_text_length,
            num_workers: config.defaults.num_workers,
            flush_every: config.pipeline.flush_every,
            max_idle_polls: config.pipeline.max_idle_polls,
            idle_poll_interval: Duration::from_millis(config.pipeline.idle_poll_interval_ms),
            response_poll_interval: Duration::from_millis(
                config.pipeline.response_poll_interval_ms,
            ),
            max_response_polls: config.pipeline.max_response_polls,
            refresh_every: config.pipeline.refresh_every,
            pacing: (
                Duration::from_secs(config.pipeline.pacing_min_secs),
                Duration::from_secs(config.pipeline.pacing_max_secs),
            ),
        }
    }

    /// Checkpoint file path for this run's category and chunk size.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoints_dir.join(format!(
            "{}_{}_context_checkpoint.json",
            self.category, self.chunk_size
        ))
    }

    /// Output CSV path for this run's category and chunk size.
    pub fn csv_path(&self) -> PathBuf {
        self.csv_dir
            .join(format!("{}_{}_context.csv", self.category, self.chunk_size))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.qaforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| QaForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.qaforge/qaforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| QaForgeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| QaForgeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| QaForgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| QaForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| QaForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that every configured cookie env var is set and non-empty.
pub fn validate_session_cookies(config: &AppConfig) -> Result<()> {
    for var_name in &config.session.cookie_env_vars {
        match std::env::var(var_name) {
            Ok(val) if !val.is_empty() => {}
            _ => {
                return Err(QaForgeError::config(format!(
                    "session cookie not found. Set the {var_name} environment variable."
                )));
            }
        }
    }
    Ok(())
}
