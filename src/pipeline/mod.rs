//! Resolved GitLab CI configuration trees.

pub mod fields;
pub mod loader;
pub mod types;

pub use fields::{Extends, NeedEntry, NeedRef, Needs, Parallel};
pub use loader::{find_ci_file, ConfigLoader, YamlDirectoryLoader, CI_FILE_NAMES};
pub use types::{is_template_job, JobConfig, PipelineConfig, Variables, DEFAULT_STAGE};
