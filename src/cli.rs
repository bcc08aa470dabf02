use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use refactor_lens::auth::Token;
use refactor_lens::cancel::CancelToken;
use refactor_lens::config::{Backend, Config};
use refactor_lens::execution::Simulator;
use refactor_lens::gitlab::{ControlPlane, GitLabApiClient, SimulatedControlPlane};
use refactor_lens::output::{self, PhaseProgress};
use refactor_lens::validator::{Deployer, ExistingInstance, RefactoringValidator};

#[derive(Parser)]
#[command(name = "refactor-lens")]
#[command(author, version, about = "Validates GitLab CI refactorings", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    /// Configuration file (defaults to ./refactor-lens.toml and friends)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two CI configurations
    Compare {
        /// Directory (or CI file) before the refactoring
        #[arg(short, long)]
        before: PathBuf,

        /// Directory (or CI file) after the refactoring
        #[arg(short, long)]
        after: PathBuf,

        /// Run both configurations as pipelines on a GitLab instance
        #[arg(long)]
        full_test: bool,

        /// Run live pipelines against the in-memory simulation instead of GitLab
        #[arg(long)]
        simulate: bool,

        /// Exit without waiting for the disposable test projects to be deleted
        #[arg(long)]
        keep_projects: bool,

        #[arg(short = 'u', long)]
        gitlab_url: Option<String>,

        #[arg(short, long, env = "GITLAB_TOKEN")]
        token: Option<String>,
    },
    /// Compare two pipelines that already ran
    Pipelines {
        #[arg(short = 'P', long)]
        project: u64,

        /// Pipeline id before the refactoring
        #[arg(short, long)]
        before: u64,

        /// Pipeline id after the refactoring
        #[arg(short, long)]
        after: u64,

        #[arg(short = 'u', long)]
        gitlab_url: Option<String>,

        #[arg(short, long, env = "GITLAB_TOKEN")]
        token: Option<String>,
    },
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let mut config = Config::load(self.config.as_deref())?;

        match &self.command {
            Commands::Compare {
                before,
                after,
                full_test,
                simulate,
                keep_projects,
                gitlab_url,
                token,
            } => {
                apply_connection_overrides(&mut config, gitlab_url.as_deref(), token.as_deref());
                let live = *full_test || *simulate || config.live.enabled;
                let simulated = *simulate || config.live.backend == Backend::Simulation;

                if !live {
                    let validator = RefactoringValidator::new(config.validator_settings());
                    return self.execute_compare(&config, &validator, before, after, false).await;
                }

                let deployer = ExistingInstance::new(config.gitlab.base_url.clone());
                if simulated {
                    let control_plane = Arc::new(SimulatedControlPlane::new(Simulator::new(
                        config.cost_model.clone(),
                    )));
                    let validator =
                        RefactoringValidator::with_full_testing(config.validator_settings(), control_plane, deployer);
                    self.execute_compare(&config, &validator, before, after, false).await
                } else {
                    let control_plane = Arc::new(api_client(&config)?);
                    let validator =
                        RefactoringValidator::with_full_testing(config.validator_settings(), control_plane, deployer);
                    self.execute_compare(&config, &validator, before, after, !*keep_projects)
                        .await
                }
            }
            Commands::Pipelines {
                project,
                before,
                after,
                gitlab_url,
                token,
            } => {
                apply_connection_overrides(&mut config, gitlab_url.as_deref(), token.as_deref());
                info!("Comparing pipelines {before} and {after} of project {project}");

                let control_plane = Arc::new(api_client(&config)?);
                let deployer = ExistingInstance::new(config.gitlab.base_url.clone());
                let validator =
                    RefactoringValidator::with_full_testing(config.validator_settings(), control_plane, deployer);

                let progress = PhaseProgress::start(1, 1, "Fetching pipelines");
                match validator.compare_pipelines(*project, *before, *after).await {
                    Ok(comparison) => {
                        progress.finish();
                        eprintln!("{}", output::pipeline_delta(&comparison));
                        self.write_output(&config, &comparison)
                    }
                    Err(e) => {
                        progress.fail();
                        Err(e.into())
                    }
                }
            }
        }
    }

    async fn execute_compare<C: ControlPlane + 'static, D: Deployer>(
        &self,
        config: &Config,
        validator: &RefactoringValidator<C, D>,
        before: &Path,
        after: &Path,
        wait_for_cleanup: bool,
    ) -> Result<()> {
        info!(
            "Comparing {} with {} (full testing: {})",
            before.display(),
            after.display(),
            validator.full_testing_enabled()
        );

        let cancel = CancelToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });
        }

        PhaseProgress::header();
        let description = if validator.full_testing_enabled() {
            "Comparing configurations and running pipelines"
        } else {
            "Comparing configurations"
        };
        let progress = PhaseProgress::start(1, 1, description);

        let outcome = match validator.compare_configurations(before, after, &cancel).await {
            Ok(result) => {
                progress.finish();
                output::print_verdict(&result);
                self.write_output(config, &result)
            }
            Err(e) => {
                progress.fail();
                let written = match e.partial_result() {
                    Some(partial) => {
                        output::print_verdict(partial);
                        self.write_output(config, partial)
                    }
                    None => Ok(()),
                };
                written.and(Err::<(), _>(e).context("Comparison failed"))
            }
        };

        if wait_for_cleanup {
            info!(
                "Waiting up to {}s before deleting test projects (--keep-projects skips this)",
                config.live.cleanup_delay_secs
            );
            tokio::select! {
                () = validator.finish_cleanup() => info!("Test projects deleted"),
                () = cancel.cancelled() => warn!("Cleanup interrupted, test projects were left in place"),
            }
        }

        outcome
    }

    fn write_output(&self, config: &Config, value: &impl Serialize) -> Result<()> {
        let json_output = if self.pretty || config.output.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, json_output)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;
            info!("Result written to: {}", output_path.display());
        } else {
            println!("{json_output}");
        }

        Ok(())
    }
}

fn apply_connection_overrides(config: &mut Config, gitlab_url: Option<&str>, token: Option<&str>) {
    if let Some(url) = gitlab_url {
        config.gitlab.base_url = url.to_string();
    }
    if let Some(token) = token {
        config.gitlab.token = Some(token.to_string());
    }
}

fn api_client(config: &Config) -> Result<GitLabApiClient> {
    let token = config.gitlab.token.as_deref().map(Token::from);
    let client = GitLabApiClient::with_timeout(
        &config.gitlab.base_url,
        token,
        Duration::from_secs(config.gitlab.request_timeout_secs),
    )?
    .with_retries(
        config.gitlab.max_retries,
        Duration::from_secs(config.gitlab.retry_delay_secs),
    )
    .with_branch(config.gitlab.reference_branch.clone());
    Ok(client)
}
