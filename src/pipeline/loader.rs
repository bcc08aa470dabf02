use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_yaml::{Mapping, Value};

use super::types::{is_template_job, JobConfig, PipelineConfig};
use crate::error::{RefactorLensError, Result};

/// Candidate names for the main CI file, in lookup order.
pub const CI_FILE_NAMES: &[&str] = &[
    ".gitlab-ci.yml",
    ".gitlab-ci.yaml",
    "gitlab-ci.yml",
    "gitlab-ci.yaml",
];

/// Top-level keys that are global keywords rather than job names.
const RESERVED_KEYWORDS: &[&str] = &[
    "stages",
    "variables",
    "include",
    "default",
    "workflow",
    "image",
    "services",
    "cache",
    "before_script",
    "after_script",
    "artifacts",
];

/// Deprecated global keywords equivalent to the same key under `default:`.
const LEGACY_DEFAULT_KEYWORDS: &[&str] = &[
    "image",
    "services",
    "cache",
    "before_script",
    "after_script",
    "artifacts",
];

/// A top-level mapping containing any of these keys is a job definition.
const JOB_KEYWORDS: &[&str] = &[
    "script",
    "stage",
    "image",
    "before_script",
    "after_script",
    "needs",
    "dependencies",
    "services",
    "environment",
    "only",
    "except",
    "rules",
    "when",
    "artifacts",
    "cache",
    "variables",
    "tags",
    "allow_failure",
    "retry",
    "coverage",
    "timeout",
    "parallel",
    "extends",
    "trigger",
];

/// Produces a resolved configuration tree from a source location.
pub trait ConfigLoader: Send + Sync {
    fn load(&self, source: &Path) -> Result<PipelineConfig>;
}

/// Loads the main CI file of a directory (or a CI file given directly).
///
/// Anchors, aliases and `<<` merge keys are applied. `include` declarations are
/// kept as raw values and not resolved. Deprecated global `image`, `cache` and
/// similar keywords are folded into `default`.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlDirectoryLoader;

impl ConfigLoader for YamlDirectoryLoader {
    fn load(&self, source: &Path) -> Result<PipelineConfig> {
        let path = if source.is_file() {
            source.to_path_buf()
        } else {
            find_ci_file(source)?
        };

        debug!("Reading CI configuration from {}", path.display());
        let text = fs::read_to_string(&path)?;

        let config = PipelineConfig::from_yaml_str(&text).map_err(|e| match e {
            RefactorLensError::Parse(message) => {
                RefactorLensError::Parse(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;

        info!(
            "Loaded {} ({} jobs, {} stages)",
            path.display(),
            config.jobs.len(),
            config.stages.len()
        );
        Ok(config)
    }
}

/// Finds the main CI file inside `dir`.
///
/// # Errors
///
/// Returns `ConfigNotFound` when none of the [`CI_FILE_NAMES`] exist.
pub fn find_ci_file(dir: &Path) -> Result<PathBuf> {
    CI_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| RefactorLensError::ConfigNotFound(dir.to_path_buf()))
}

impl PipelineConfig {
    /// Parses a GitLab CI document into a configuration tree.
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed YAML, a non-mapping document, or an executable
    /// job whose fields have the wrong shape. Malformed hidden templates are skipped.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let mut root: Value =
            serde_yaml::from_str(source).map_err(|e| RefactorLensError::Parse(e.to_string()))?;
        root.apply_merge()
            .map_err(|e| RefactorLensError::Parse(format!("resolving merge keys: {e}")))?;

        let mapping = match root {
            Value::Mapping(mapping) => mapping,
            Value::Null => return Ok(PipelineConfig::default()),
            _ => {
                return Err(RefactorLensError::Parse(
                    "top-level document must be a mapping".to_string(),
                ))
            }
        };

        let mut config = PipelineConfig::default();
        let mut default_block: Option<Mapping> = None;
        let mut legacy_defaults = Mapping::new();

        for (key, value) in mapping {
            let Some(key) = key.as_str().map(str::to_owned) else {
                continue;
            };

            match key.as_str() {
                "stages" => config.stages = string_list(&value),
                "variables" => {
                    if let Value::Mapping(vars) = value {
                        config.variables = string_keyed(vars);
                    }
                }
                "include" => config.include = include_list(value),
                "default" => match value {
                    Value::Mapping(block) => default_block = Some(block),
                    Value::Null => default_block = Some(Mapping::new()),
                    _ => {
                        return Err(RefactorLensError::Parse(
                            "default: expected a mapping".to_string(),
                        ))
                    }
                },
                _ if LEGACY_DEFAULT_KEYWORDS.contains(&key.as_str()) => {
                    legacy_defaults.insert(Value::String(key), value);
                }
                _ if RESERVED_KEYWORDS.contains(&key.as_str()) => {}
                _ if is_job_definition(&value) => match serde_yaml::from_value(value) {
                    Ok(job) => {
                        config.jobs.insert(key, job);
                    }
                    Err(e) if is_template_job(&key) => {
                        warn!("Skipping template '{key}' with unsupported shape: {e}");
                    }
                    Err(e) => {
                        return Err(RefactorLensError::Parse(format!("job '{key}': {e}")));
                    }
                },
                _ => debug!("Ignoring top-level key '{key}'"),
            }
        }

        if default_block.is_some() || !legacy_defaults.is_empty() {
            let mut block = default_block.unwrap_or_default();
            for (key, value) in legacy_defaults {
                if !block.contains_key(&key) {
                    block.insert(key, value);
                }
            }
            let default: JobConfig = serde_yaml::from_value(Value::Mapping(block))
                .map_err(|e| RefactorLensError::Parse(format!("default: {e}")))?;
            config.default = Some(default);
        }

        Ok(config)
    }
}

fn is_job_definition(value: &Value) -> bool {
    match value {
        Value::Mapping(fields) => fields
            .keys()
            .filter_map(Value::as_str)
            .any(|field| JOB_KEYWORDS.contains(&field)),
        _ => false,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_sequence()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn string_keyed(mapping: Mapping) -> indexmap::IndexMap<String, Value> {
    mapping
        .into_iter()
        .filter_map(|(key, value)| key.as_str().map(|k| (k.to_owned(), value)))
        .collect()
}

fn include_list(value: Value) -> Vec<Value> {
    match value {
        Value::Sequence(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}
