//! Checks whether a GitLab CI refactoring preserves pipeline behavior.
//!
//! Two configuration trees are diffed structurally, tagged with the refactoring
//! patterns they match, and compared by execution: either estimated with a simple
//! cost model or observed by running both as pipelines on a GitLab instance.

pub mod auth;
pub mod cancel;
pub mod config;
pub mod differ;
pub mod error;
pub mod execution;
pub mod gitlab;
pub mod output;
pub mod pipeline;
pub mod validator;

pub use cancel::CancelToken;
pub use error::{RefactorLensError, Result, Side};
pub use validator::{RefactoringResult, RefactoringValidator, ValidatorSettings};
