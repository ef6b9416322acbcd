use thiserror::Error;

use crate::validate::ValidationIssue;

/// Coarse error taxonomy surfaced to external consumers.
///
/// Parse, embedding, and per-file IO problems are usually *accumulated* into
/// the run report instead of being raised; the variants exist here for the
/// cases where a consumer asks for a single file and wants the failure back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Io,
    Parse,
    Validation,
    Embedding,
    Store,
    Cancelled,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Io => "io",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Embedding => "embedding",
            ErrorCategory::Store => "store",
            ErrorCategory::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum CieError {
    #[error("configuration error: {summary}")]
    Config {
        summary: String,
        detail: String,
        remediation: String,
    },

    #[error("io error: {summary}")]
    Io {
        summary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("validation failed with {} issue(s)", issues.len())]
    Validation { issues: Vec<ValidationIssue> },

    #[error("embedding provider error: {detail}")]
    Embedding { detail: String },

    #[error("store error: {summary}")]
    Store { summary: String, detail: String },

    #[error("run cancelled")]
    Cancelled,
}

impl CieError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CieError::Config { .. } => ErrorCategory::Config,
            CieError::Io { .. } => ErrorCategory::Io,
            CieError::Parse { .. } => ErrorCategory::Parse,
            CieError::Validation { .. } => ErrorCategory::Validation,
            CieError::Embedding { .. } => ErrorCategory::Embedding,
            CieError::Store { .. } => ErrorCategory::Store,
            CieError::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Operator-facing hint for fatal errors. `None` when there is nothing
    /// actionable beyond the message itself.
    pub fn remediation(&self) -> Option<&str> {
        match self {
            CieError::Config { remediation, .. } => Some(remediation.as_str()),
            CieError::Validation { .. } => {
                Some("re-run with force_reindex to rebuild from a clean store")
            }
            CieError::Store { .. } => {
                Some("check that the data directory is writable and not shared with a concurrent run")
            }
            _ => None,
        }
    }

    pub fn config(summary: impl Into<String>, detail: impl Into<String>, remediation: impl Into<String>) -> Self {
        CieError::Config {
            summary: summary.into(),
            detail: detail.into(),
            remediation: remediation.into(),
        }
    }

    pub fn io(summary: impl Into<String>, source: std::io::Error) -> Self {
        CieError::Io {
            summary: summary.into(),
            source,
        }
    }

    pub fn store(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        CieError::Store {
            summary: summary.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CieError>;
