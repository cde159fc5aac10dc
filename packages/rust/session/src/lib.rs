//! Session contract, prompt rendering, and response parsing.
//!
//! This crate provides:
//! - [`SessionBackend`] — the submit/poll/reset contract workers drive
//! - [`BridgeSession`] — subprocess-backed implementation of the contract
//! - [`PromptTemplate`] — instruction templates rendered per context unit
//! - [`parser`] — two-stage extraction of QA pairs from noisy replies

pub mod backend;
pub mod bridge;
pub mod parser;
pub mod prompt;

pub use backend::{PollOutcome, SessionBackend, SessionConfig, SessionError};
pub use bridge::{BridgeConfig, BridgeSession};
pub use parser::{parse, parse_response};
pub use prompt::{PromptEnvelope, PromptTemplate};
