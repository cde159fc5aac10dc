//! Bridge session backend.
//!
//! Drives one external bridge subprocess (the script that actually owns the
//! browser) over a JSON-lines stdin/stdout protocol. The subprocess is the
//! boundary of this workspace: everything DOM-shaped lives on the other
//! side, and this backend only translates the wire protocol into the
//! [`SessionBackend`] contract.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use qaforge_shared::RawResponse;

use crate::backend::{PollOutcome, SessionBackend, SessionConfig, SessionError};

// ---------------------------------------------------------------------------
// Protocol types (mirroring the bridge script's schemas)
// ---------------------------------------------------------------------------

/// Request message sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Submit { prompt: &'a str },
    Poll,
    Reset,
}

/// Response message received from the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeResponse {
    Ready,
    Ack,
    Pending,
    Complete {
        text: String,
        #[serde(default)]
        json_fragments: Vec<String>,
    },
    Error {
        kind: BridgeErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BridgeErrorKind {
    Transient,
    RateLimited,
    Fatal,
}

impl BridgeErrorKind {
    fn into_error(self, message: String) -> SessionError {
        match self {
            Self::Transient => SessionError::Transient(message),
            Self::RateLimited => SessionError::RateLimited(message),
            Self::Fatal => SessionError::Fatal(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge configuration
// ---------------------------------------------------------------------------

/// How to launch the bridge subprocess.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Command to run (e.g., "python3").
    pub cmd: String,
    /// Script path passed as the first argument.
    pub script: String,
    /// Working directory for the subprocess.
    pub working_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// BridgeSession
// ---------------------------------------------------------------------------

/// Handle to one spawned bridge subprocess.
pub struct BridgeSession {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    worker_id: usize,
}

impl BridgeSession {
    /// Spawn the bridge and wait for its `ready` message. Session
    /// credentials travel as environment variables so they never appear on
    /// the command line.
    pub async fn spawn(
        bridge: &BridgeConfig,
        session: &SessionConfig,
        worker_id: usize,
    ) -> Result<Self, SessionError> {
        info!(cmd = %bridge.cmd, script = %bridge.script, worker_id, "spawning session bridge");

        let mut command = Command::new(&bridge.cmd);
        command
            .arg(&bridge.script)
            .current_dir(&bridge.working_dir)
            .env("QAFORGE_SESSION_URL", &session.base_url)
            .env("QAFORGE_SESSION_HEADLESS", if session.headless { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()); // Bridge logs go to parent stderr

        for (name, value) in &session.cookies {
            command.env(format!("QAFORGE_COOKIE_{name}"), value);
        }
        if let Some(profile_dir) = &session.profile_dir {
            command.env("QAFORGE_PROFILE_DIR", profile_dir);
        }

        let mut child = command.spawn().map_err(|e| {
            SessionError::Fatal(format!(
                "failed to spawn bridge: {e}. Is `{}` installed?",
                bridge.cmd
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Fatal("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Fatal("failed to capture bridge stdout".into()))?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            worker_id,
        };

        match handle.read_response().await? {
            BridgeResponse::Ready => {
                info!(worker_id, "bridge is ready");
                Ok(handle)
            }
            other => Err(SessionError::Fatal(format!(
                "expected ready message, got: {other:?}"
            ))),
        }
    }

    async fn send_request(&mut self, request: &BridgeRequest<'_>) -> Result<(), SessionError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| SessionError::Fatal(format!("request encoding failed: {e}")))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SessionError::Fatal(format!("bridge write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| SessionError::Fatal(format!("bridge flush failed: {e}")))
    }

    async fn read_response(&mut self) -> Result<BridgeResponse, SessionError> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| SessionError::Fatal(format!("bridge read failed: {e}")))?;
        if read == 0 {
            return Err(SessionError::Fatal("bridge closed its stdout".into()));
        }

        serde_json::from_str(line.trim()).map_err(|e| {
            SessionError::Transient(format!("invalid bridge message: {e} (got: {line})"))
        })
    }

    async fn expect_ack(&mut self) -> Result<(), SessionError> {
        match self.read_response().await? {
            BridgeResponse::Ack => Ok(()),
            BridgeResponse::Error { kind, message } => Err(kind.into_error(message)),
            other => Err(SessionError::Transient(format!(
                "expected ack, got: {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl SessionBackend for BridgeSession {
    async fn submit(&mut self, prompt: &str) -> Result<(), SessionError> {
        debug!(worker_id = self.worker_id, chars = prompt.len(), "submitting prompt");
        self.send_request(&BridgeRequest::Submit { prompt }).await?;
        self.expect_ack().await
    }

    async fn poll(&mut self) -> Result<PollOutcome, SessionError> {
        self.send_request(&BridgeRequest::Poll).await?;
        match self.read_response().await? {
            BridgeResponse::Pending => Ok(PollOutcome::Pending),
            BridgeResponse::Complete {
                text,
                json_fragments,
            } => Ok(PollOutcome::Complete(RawResponse {
                text,
                json_fragments,
            })),
            BridgeResponse::Error { kind, message } => Err(kind.into_error(message)),
            other => Err(SessionError::Transient(format!(
                "unexpected poll reply: {other:?}"
            ))),
        }
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        debug!(worker_id = self.worker_id, "resetting bridge session");
        self.send_request(&BridgeRequest::Reset).await?;
        self.expect_ack().await
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        // Best effort: the bridge may already be gone.
        if let Err(e) = self.child.start_kill() {
            warn!(worker_id = self.worker_id, error = %e, "failed to kill bridge");
        }
    }
}
