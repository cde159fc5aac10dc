//! External session contract.
//!
//! A session is one interactive conversational endpoint (in production, a
//! browser-driven chat UI). Workers depend only on this contract; concrete
//! backends live outside this workspace and are injected at pipeline start.

use std::path::PathBuf;

use async_trait::async_trait;

use qaforge_shared::config::SessionSettings;
use qaforge_shared::{QaForgeError, RawResponse};

/// Errors surfaced by a session backend, classified for retry policy.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Timeout, stale element, UI drift — the unit may be retried or dropped.
    #[error("transient session failure: {0}")]
    Transient(String),

    /// Explicit rate-limit or quota signal — reset the session and retry.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Unrecoverable failure (hard quota, dead browser) — retire the session.
    #[error("fatal session failure: {0}")]
    Fatal(String),
}

impl From<SessionError> for QaForgeError {
    fn from(e: SessionError) -> Self {
        QaForgeError::Session(e.to_string())
    }
}

/// Result of one completion poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The session's visible output has not changed yet.
    Pending,
    /// The round-trip finished; the captured response is attached.
    Complete(RawResponse),
}

/// Everything a backend needs to open its endpoint.
///
/// Credential values are resolved from the environment by the caller that
/// constructs backends; nothing here is global state.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Base URL of the chat endpoint.
    pub base_url: String,
    /// Resolved cookie (name, value) pairs.
    pub cookies: Vec<(String, String)>,
    /// Browser profile directory for this worker, if any.
    pub profile_dir: Option<PathBuf>,
    /// Whether to run the browser headless.
    pub headless: bool,
}

impl SessionConfig {
    /// Resolve a per-worker config from the app settings, reading cookie
    /// values and the worker's profile dir from the environment. Unset
    /// cookie vars are skipped; backends decide whether that is fatal.
    pub fn resolve(settings: &SessionSettings, worker_id: usize) -> Self {
        let cookies = settings
            .cookie_env_vars
            .iter()
            .filter_map(|var| {
                let name = var.strip_prefix("COOKIE").unwrap_or(var).to_string();
                std::env::var(var).ok().map(|value| (name, value))
            })
            .collect();

        let profile_dir = std::env::var(format!(
            "{}{worker_id}",
            settings.profile_dir_env_prefix
        ))
        .ok()
        .map(PathBuf::from);

        Self {
            base_url: settings.base_url.clone(),
            cookies,
            profile_dir,
            headless: true,
        }
    }
}

/// One exclusive interactive session. Implementations need not be `Sync`:
/// each worker owns its backend and is the only caller.
#[async_trait]
pub trait SessionBackend: Send {
    /// Submit a rendered prompt. Returns once the submission was accepted by
    /// the endpoint, not once a response exists.
    async fn submit(&mut self, prompt: &str) -> Result<(), SessionError>;

    /// Check whether the response to the last submission is complete.
    async fn poll(&mut self) -> Result<PollOutcome, SessionError>;

    /// Refresh or reinitialize the endpoint (page reload, new conversation).
    async fn reset(&mut self) -> Result<(), SessionError>;
}
