//! Configuration Module
//!
//! Handles configuration loading, validation, and `${ENV}` interpolation.

mod types;

pub use types::*;

use std::path::PathBuf;

/// Data directory for ai-counsel: `~/.ai-counsel/`
///
/// Falls back to a relative directory when no home directory exists
/// (containers, stripped-down CI environments).
pub fn counsel_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".ai-counsel"))
        .unwrap_or_else(|| PathBuf::from(".ai-counsel"))
}
