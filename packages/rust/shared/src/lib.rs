//! Shared types, error model, and configuration for qaforge.
//!
//! This crate is the foundation depended on by all other qaforge crates.
//! It provides:
//! - [`QaForgeError`] — the unified error type
//! - Domain types ([`ContextUnit`], [`QaPair`], [`ResultRecord`], [`Checkpoint`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BridgeSettings, DefaultsConfig, PipelineConfig, PipelineTuningConfig,
    SessionSettings, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_session_cookies,
};
pub use error::{QaForgeError, Result};
pub use types::{
    Checkpoint, ContextUnit, Payload, QaPair, RawResponse, ResponseBody, ResultRecord, RunId,
};
