//! Scripted in-memory session backend for tests.
//!
//! Each `submit` consumes the next script step; `poll` then plays it out.
//! Clones share state so tests can keep a probe handle after handing the
//! session to a worker.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use qaforge_session::{PollOutcome, SessionBackend, SessionError};
use qaforge_shared::RawResponse;

/// What the session does with one submission.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Complete on the first poll with this reply text.
    Reply(String),
    /// Stay pending for `polls` polls, then complete with the text.
    DelayedReply { polls: u32, text: String },
    /// Stay pending forever (exhausts the worker's poll budget).
    NeverCompletes,
    /// Fail the submission with a transient error.
    Transient,
    /// Fail the submission with a rate-limit signal.
    RateLimited,
    /// Fail the submission fatally.
    Fatal,
}

impl ScriptStep {
    pub fn reply(text: &str) -> Self {
        Self::Reply(text.to_string())
    }
}

#[derive(Debug)]
struct ScriptState {
    steps: VecDeque<ScriptStep>,
    current: Option<ScriptStep>,
    pending_left: u32,
    resets: u32,
    submissions: u32,
}

/// Shared-state scripted backend.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSession {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                steps: steps.into(),
                current: None,
                pending_left: 0,
                resets: 0,
                submissions: 0,
            })),
        }
    }

    /// How many times `reset` was called.
    pub fn reset_count(&self) -> u32 {
        self.state.lock().expect("script state lock").resets
    }

    /// How many submissions were accepted.
    pub fn submission_count(&self) -> u32 {
        self.state.lock().expect("script state lock").submissions
    }
}

#[async_trait]
impl SessionBackend for ScriptedSession {
    async fn submit(&mut self, _prompt: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().expect("script state lock");
        let Some(step) = state.steps.pop_front() else {
            return Err(SessionError::Fatal("script exhausted".into()));
        };

        match step {
            ScriptStep::Transient => Err(SessionError::Transient("scripted".into())),
            ScriptStep::RateLimited => Err(SessionError::RateLimited("scripted".into())),
            ScriptStep::Fatal => Err(SessionError::Fatal("scripted".into())),
            step => {
                if let ScriptStep::DelayedReply { polls, .. } = &step {
                    state.pending_left = *polls;
                } else {
                    state.pending_left = 0;
                }
                state.current = Some(step);
                state.submissions += 1;
                Ok(())
            }
        }
    }

    async fn poll(&mut self) -> Result<PollOutcome, SessionError> {
        let mut state = self.state.lock().expect("script state lock");
        match state.current.clone() {
            None => Err(SessionError::Transient("poll without submission".into())),
            Some(ScriptStep::NeverCompletes) => Ok(PollOutcome::Pending),
            Some(ScriptStep::Reply(text)) => {
                state.current = None;
                Ok(PollOutcome::Complete(RawResponse {
                    text,
                    json_fragments: vec![],
                }))
            }
            Some(ScriptStep::DelayedReply { text, .. }) => {
                if state.pending_left > 0 {
                    state.pending_left -= 1;
                    return Ok(PollOutcome::Pending);
                }
                state.current = None;
                Ok(PollOutcome::Complete(RawResponse {
                    text,
                    json_fragments: vec![],
                }))
            }
            Some(_) => Err(SessionError::Transient("unexpected script step".into())),
        }
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        let mut state = self.state.lock().expect("script state lock");
        state.resets += 1;
        state.current = None;
        Ok(())
    }
}
