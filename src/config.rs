use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::execution::{CostModel, Thresholds};
use crate::gitlab::WaitOptions;
use crate::validator::{LiveSettings, ValidatorSettings};

const CANDIDATES: [&str; 4] = [
    "refactor-lens.toml",
    "refactor-lens.json",
    "refactor-lens.yaml",
    "refactor-lens.yml",
];

/// Configuration file structure for refactor-lens.
///
/// Loaded from an explicit path, the working directory, or the user config
/// directory. Every section and key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub gitlab: GitLabConfig,

    /// Live pipeline testing
    #[serde(default)]
    pub live: LiveConfig,

    #[serde(default)]
    pub thresholds: Thresholds,

    /// Duration estimates for simulated pipelines
    #[serde(default)]
    pub cost_model: CostModel,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitLabConfig {
    /// GitLab instance base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// GitLab personal access token
    pub token: Option<String>,

    /// Branch pipelines are triggered on
    #[serde(default = "default_reference_branch")]
    pub reference_branch: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retries for rate-limited, failed or unreachable requests
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LiveConfig {
    /// Run both configurations as real pipelines
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_pipeline_timeout_secs")]
    pub pipeline_timeout_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds disposable projects are kept for inspection
    #[serde(default = "default_cleanup_delay_secs")]
    pub cleanup_delay_secs: u64,

    #[serde(default = "default_project_prefix")]
    pub project_prefix: String,
}

/// Where live pipelines run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A GitLab instance reached over its REST API
    #[default]
    Api,
    /// The in-memory simulation
    Simulation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            reference_branch: default_reference_branch(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: Backend::default(),
            pipeline_timeout_secs: default_pipeline_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            cleanup_delay_secs: default_cleanup_delay_secs(),
            project_prefix: default_project_prefix(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_reference_branch() -> String {
    "main".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_pipeline_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_cleanup_delay_secs() -> u64 {
    300
}

fn default_project_prefix() -> String {
    "refactor-lens".to_string()
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./refactor-lens.toml, .json, .yaml, .yml
    /// 3. `<config dir>/refactor-lens/config.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let user_config = dirs::config_dir().map(|dir| dir.join("refactor-lens").join("config.toml"));
        let found = CANDIDATES
            .iter()
            .map(PathBuf::from)
            .chain(user_config)
            .find(|path| path.exists());

        match found {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml" | "yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn validator_settings(&self) -> ValidatorSettings {
        ValidatorSettings {
            cost_model: self.cost_model.clone(),
            thresholds: self.thresholds.clone(),
            live: LiveSettings {
                base_url: self.gitlab.base_url.clone(),
                reference_branch: self.gitlab.reference_branch.clone(),
                project_prefix: self.live.project_prefix.clone(),
                wait: WaitOptions {
                    timeout: Duration::from_secs(self.live.pipeline_timeout_secs),
                    poll_interval: Duration::from_secs(self.live.poll_interval_secs),
                },
                cleanup_delay: Duration::from_secs(self.live.cleanup_delay_secs),
            },
        }
    }
}
