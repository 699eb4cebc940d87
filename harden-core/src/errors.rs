//! errors.rs - Error types for the harden-core library.
//!
//! Every failure the orchestration engine can surface falls into one of three
//! categories: configuration problems detected before any module runs,
//! execution failures of a remediation module, and resource failures while
//! creating directories or opening log files. The binary maps all of them to a
//! diagnostic and a nonzero exit status.
//!
//! License: MIT OR APACHE 2.0

use std::path::PathBuf;
use thiserror::Error;

/// Broad category of a [`HardenError`], used by the CLI to phrase diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Execution,
    Resource,
}

/// All error types produced by `harden-core`.
///
/// `#[non_exhaustive]` lets new failure modes be added without breaking
/// downstream matches.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HardenError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tool '{name}' could not be located (expected at {expected}). Update the tool catalog with the correct location of the executable.")]
    ToolNotFound { name: String, expected: PathBuf },

    #[error("Module '{module}' failed: {reason}")]
    Execution { module: String, reason: String },

    #[error("Unable to access required resource {path}: {source}")]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML document: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("An unexpected I/O error occurred: {0}")]
    Io(#[from] std::io::Error),
}

impl HardenError {
    pub fn config(msg: impl Into<String>) -> Self {
        HardenError::Configuration(msg.into())
    }

    pub fn execution(module: impl Into<String>, reason: impl Into<String>) -> Self {
        HardenError::Execution {
            module: module.into(),
            reason: reason.into(),
        }
    }

    pub fn resource(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HardenError::Resource {
            path: path.into(),
            source,
        }
    }

    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HardenError::Configuration(_) | HardenError::ToolNotFound { .. } | HardenError::Yaml(_) => {
                ErrorKind::Configuration
            }
            HardenError::Execution { .. } => ErrorKind::Execution,
            HardenError::Resource { .. } | HardenError::Io(_) => ErrorKind::Resource,
        }
    }
}

/// Result alias used across the library.
pub type HardenResult<T> = Result<T, HardenError>;
