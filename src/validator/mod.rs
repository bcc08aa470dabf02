//! Refactoring validation: structural diff, issue delta and execution comparison
//! of a before/after configuration pair, optionally backed by live pipeline runs.

pub mod analyzer;
pub mod behavioral;
pub mod cleanup;
pub mod deployer;
pub mod live;

pub use analyzer::{IssueAnalyzer, NullAnalyzer, StructureAnalyzer};
pub use behavioral::{BehavioralValidationResult, PipelineExecutionComparison};
pub use cleanup::CleanupQueue;
pub use deployer::{Deployer, DeploymentStatus, ExistingInstance};
pub use live::{LiveRunner, LiveSettings, SideRun};

use log::{info, warn};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::differ::{self, DiffResult};
use crate::error::{RefactorLensError, Result, Side};
use crate::execution::{CostModel, ExecutionComparator, PipelineComparison, PipelineExecution, Simulator, Thresholds};
use crate::gitlab::{ControlPlane, GitLabApiClient};
use crate::pipeline::{ConfigLoader, PipelineConfig, YamlDirectoryLoader};

/// Everything learned about a before/after configuration pair.
#[derive(Debug, Clone, Serialize)]
pub struct RefactoringResult {
    pub actual_changes: DiffResult,
    /// Issues in the before configuration minus issues in the after configuration
    pub analysis_improvement: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_comparison: Option<PipelineComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavioral_validation: Option<BehavioralValidationResult>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidatorSettings {
    pub cost_model: CostModel,
    pub thresholds: Thresholds,
    pub live: LiveSettings,
}

struct LiveBackend<C, D> {
    runner: LiveRunner<C>,
    deployer: D,
    /// Set when this validator brought the instance up and so owns its teardown
    deployed: AtomicBool,
}

/// Orchestrates the comparison of two configurations.
///
/// By default execution is estimated with the [`Simulator`]. With full testing
/// enabled both configurations run on a live instance instead, and the result
/// also carries a behavioral equivalence verdict.
pub struct RefactoringValidator<C = GitLabApiClient, D = ExistingInstance> {
    loader: Box<dyn ConfigLoader>,
    analyzer: Box<dyn IssueAnalyzer>,
    simulator: Simulator,
    comparator: ExecutionComparator,
    thresholds: Thresholds,
    live: Option<LiveBackend<C, D>>,
}

impl RefactoringValidator {
    /// A validator that only uses static simulation.
    pub fn new(settings: ValidatorSettings) -> Self {
        Self::build(settings, None)
    }
}

impl<C: ControlPlane + 'static, D: Deployer> RefactoringValidator<C, D> {
    /// A validator that runs both configurations on the instance behind `control_plane`.
    pub fn with_full_testing(settings: ValidatorSettings, control_plane: Arc<C>, deployer: D) -> Self {
        let runner = LiveRunner::new(control_plane, settings.live.clone());
        Self::build(
            settings,
            Some(LiveBackend {
                runner,
                deployer,
                deployed: AtomicBool::new(false),
            }),
        )
    }

    fn build(settings: ValidatorSettings, live: Option<LiveBackend<C, D>>) -> Self {
        Self {
            loader: Box::new(YamlDirectoryLoader),
            analyzer: Box::new(StructureAnalyzer),
            simulator: Simulator::new(settings.cost_model),
            comparator: ExecutionComparator::new(settings.thresholds.clone()),
            thresholds: settings.thresholds,
            live,
        }
    }

    pub fn with_loader(mut self, loader: Box<dyn ConfigLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Box<dyn IssueAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn full_testing_enabled(&self) -> bool {
        self.live.is_some()
    }

    /// Diff, issue delta and simulated execution comparison of two parsed trees.
    pub fn compare_trees(&self, before: &PipelineConfig, after: &PipelineConfig) -> RefactoringResult {
        let mut result = self.structural(before, after);
        result.pipeline_comparison = Some(self.simulated_comparison(before, after));
        result
    }

    /// Loads both sources and compares them.
    ///
    /// # Errors
    ///
    /// * `Phase` with phase `parse` when either side cannot be loaded
    /// * `Incomplete` when the live execution comparison fails; it carries the
    ///   diff and issue delta computed so far, and the behavioral verdict if
    ///   both runs got far enough to produce one
    pub async fn compare_configurations(
        &self,
        before_source: &Path,
        after_source: &Path,
        cancel: &CancelToken,
    ) -> Result<RefactoringResult> {
        info!("Parsing configurations");
        let before = self
            .loader
            .load(before_source)
            .map_err(|e| e.in_phase("parse", Side::Before))?;
        let after = self
            .loader
            .load(after_source)
            .map_err(|e| e.in_phase("parse", Side::After))?;

        let Some(live) = &self.live else {
            info!("Using static simulation for pipeline comparison");
            return Ok(self.compare_trees(&before, &after));
        };

        let mut result = self.structural(&before, &after);
        info!("Using live pipelines for pipeline comparison");

        match self
            .run_live(live, before_source, after_source, &before, &after, cancel, &mut result)
            .await
        {
            Ok(comparison) => {
                result.pipeline_comparison = Some(comparison);
                Ok(result)
            }
            Err(e) => Err(RefactorLensError::Incomplete {
                partial: Box::new(result),
                source: Box::new(e),
            }),
        }
    }

    /// Compares two pipelines that already ran in `project_id`.
    ///
    /// # Errors
    ///
    /// Returns `Config` when full testing is not enabled, otherwise any control
    /// plane error wrapped in `Phase`.
    pub async fn compare_pipelines(
        &self,
        project_id: u64,
        before_pipeline: u64,
        after_pipeline: u64,
    ) -> Result<PipelineComparison> {
        let live = self
            .live
            .as_ref()
            .ok_or_else(|| RefactorLensError::Config("comparing pipelines requires a GitLab connection".to_string()))?;
        let control_plane = live.runner.control_plane();

        let fetch = |pipeline_id: u64, side: Side| async move {
            fetch_execution(control_plane, project_id, pipeline_id)
                .await
                .map_err(|e| e.in_phase("fetch pipeline", side))
        };

        let (before, after) = futures::try_join!(
            fetch(before_pipeline, Side::Before),
            fetch(after_pipeline, Side::After)
        )?;
        Ok(self.comparator.compare(&before, &after))
    }

    /// Waits until every scheduled project deletion has run, then destroys the
    /// instance if this validator deployed it.
    pub async fn finish_cleanup(&self) {
        let Some(live) = &self.live else {
            return;
        };
        live.runner.cleanup().drain().await;

        if live.deployed.swap(false, Ordering::SeqCst) {
            info!("Destroying GitLab instance");
            if let Err(e) = live.deployer.destroy().await {
                warn!("Failed to destroy GitLab instance: {e}");
            }
        }
    }

    fn structural(&self, before: &PipelineConfig, after: &PipelineConfig) -> RefactoringResult {
        info!("Diffing configurations");
        let actual_changes = differ::analyze(before, after);

        let before_issues = self.analyzer.count_issues(before);
        let after_issues = self.analyzer.count_issues(after);
        #[allow(clippy::cast_possible_wrap)]
        let analysis_improvement = before_issues as i64 - after_issues as i64;

        RefactoringResult {
            actual_changes,
            analysis_improvement,
            pipeline_comparison: None,
            behavioral_validation: None,
        }
    }

    fn simulated_comparison(&self, before: &PipelineConfig, after: &PipelineConfig) -> PipelineComparison {
        info!("Simulating pipelines");
        let old = self.simulator.simulate(before);
        let new = self.simulator.simulate(after);
        self.comparator.compare(&old, &new)
    }

    /// Runs both sides on the live instance. The behavioral verdict is written into
    /// `result` as soon as both runs have finished, even if they did not succeed.
    #[allow(clippy::too_many_arguments)]
    async fn run_live(
        &self,
        live: &LiveBackend<C, D>,
        before_source: &Path,
        after_source: &Path,
        before: &PipelineConfig,
        after: &PipelineConfig,
        cancel: &CancelToken,
        result: &mut RefactoringResult,
    ) -> Result<PipelineComparison> {
        ensure_instance(live).await?;

        let (before_run, after_run) = futures::future::join(
            live.runner.run_side(before_source, Side::Before, cancel),
            live.runner.run_side(after_source, Side::After, cancel),
        )
        .await;

        result.behavioral_validation = Some(BehavioralValidationResult::from_runs(
            before_run.as_ref().map_err(ToString::to_string).and_then(SideRun::outcome),
            after_run.as_ref().map_err(ToString::to_string).and_then(SideRun::outcome),
            self.thresholds.timing_change_ratio,
        ));

        let (before_run, after_run) = (before_run?, after_run?);
        Ok(self
            .comparator
            .compare(&before_run.execution(before), &after_run.execution(after)))
    }
}

async fn fetch_execution<C: ControlPlane>(
    control_plane: &C,
    project_id: u64,
    pipeline_id: u64,
) -> Result<PipelineExecution> {
    let pipeline = control_plane.get_pipeline(project_id, pipeline_id).await?;
    let jobs = control_plane.get_pipeline_jobs(project_id, pipeline_id).await?;
    Ok(pipeline.to_execution(&jobs))
}

/// Makes sure the instance is up and answering API requests.
async fn ensure_instance<C: ControlPlane + 'static, D: Deployer>(live: &LiveBackend<C, D>) -> Result<()> {
    let status = live
        .deployer
        .status()
        .await
        .map_err(|e| RefactorLensError::Deployment(format!("failed to check instance status: {e}")))?;

    if !status.is_running {
        info!("Deploying GitLab instance at {}", status.url);
        live.deployer
            .deploy()
            .await
            .map_err(|e| RefactorLensError::Deployment(format!("failed to deploy instance: {e}")))?;
        live.deployed.store(true, Ordering::SeqCst);
    }

    live.runner
        .control_plane()
        .health_check()
        .await
        .map_err(|e| RefactorLensError::Deployment(format!("instance at {} is not reachable: {e}", status.url)))
}
