//! Error types and load result structures for the rule loader and cache.

use std::path::PathBuf;

use crate::compiler::CompilationError;

/// Errors that can occur during rule loading and management.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Compilation(#[from] CompilationError),

    /// A newer version of the rule is already active.
    #[error("rule '{id}' version {version} is superseded by active version {current}")]
    Superseded { id: String, version: u32, current: u32 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;

/// Outcome of loading a single rule file.
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

/// Status of a single file load attempt.
#[derive(Debug)]
pub enum LoadStatus {
    /// Rule compiled and is active (or was already active at this version).
    Loaded { rule_id: String, version: u32 },
    /// File was skipped (dotfile, non-YAML).
    Skipped { reason: String },
    /// Parse, compilation or version error.
    Failed { error: String },
}

impl LoadResult {
    pub fn is_loaded(&self) -> bool {
        matches!(self.status, LoadStatus::Loaded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, LoadStatus::Failed { .. })
    }
}
