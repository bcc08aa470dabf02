use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validator::RefactoringResult;

/// Which side of a refactoring an operation was working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Before,
    After,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Before => "before",
            Side::After => "after",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum RefactorLensError {
    #[error("Failed to parse CI configuration: {0}")]
    Parse(String),

    #[error("No GitLab CI configuration file found in {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("GitLab API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("GitLab API error after {retries} retries (status {status})")]
    ApiErrorAfterRetries { status: u16, retries: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {}s waiting for {what}", .waited.as_secs())]
    Timeout { what: String, waited: Duration },

    #[error("Canceled while waiting for {0}")]
    Canceled(String),

    #[error("Deployment failed: {0}")]
    Deployment(String),

    #[error("{phase} failed for {side} configuration: {source}")]
    Phase {
        phase: &'static str,
        side: Side,
        #[source]
        source: Box<RefactorLensError>,
    },

    #[error("Pipeline comparison failed: {source}")]
    Incomplete {
        partial: Box<RefactoringResult>,
        #[source]
        source: Box<RefactorLensError>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RefactorLensError {
    /// Wraps an error with the phase and side it happened in.
    pub fn in_phase(self, phase: &'static str, side: Side) -> Self {
        RefactorLensError::Phase {
            phase,
            side,
            source: Box::new(self),
        }
    }

    /// The structural findings computed before a pipeline comparison failed, if any.
    pub fn partial_result(&self) -> Option<&RefactoringResult> {
        match self {
            RefactorLensError::Incomplete { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// True when the error (or the error it wraps) is a polling timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            RefactorLensError::Timeout { .. } => true,
            RefactorLensError::Phase { source, .. }
            | RefactorLensError::Incomplete { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RefactorLensError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_error_names_phase_and_side() {
        let err = RefactorLensError::NotFound("project 7".to_string()).in_phase("upload", Side::After);
        let message = err.to_string();
        assert!(message.contains("upload"), "got: {message}");
        assert!(message.contains("after"), "got: {message}");
        assert!(message.contains("project 7"), "got: {message}");
    }

    #[test]
    fn timeout_is_detected_through_wrappers() {
        let err = RefactorLensError::Timeout {
            what: "pipeline 3".to_string(),
            waited: Duration::from_secs(600),
        }
        .in_phase("wait", Side::Before);

        assert!(err.is_timeout());
        assert!(!RefactorLensError::Canceled("pipeline 3".to_string()).is_timeout());
    }

    #[test]
    fn partial_result_only_on_incomplete() {
        let err = RefactorLensError::Config("bad".to_string());
        assert!(err.partial_result().is_none());
    }
}
