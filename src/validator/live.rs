use indexmap::IndexMap;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::cleanup::CleanupQueue;
use crate::cancel::CancelToken;
use crate::error::{RefactorLensError, Result, Side};
use crate::execution::PipelineExecution;
use crate::gitlab::{links, wait_for_pipeline, ControlPlane, Job, Pipeline, Project, WaitOptions, CI_FILE};
use crate::pipeline::{find_ci_file, PipelineConfig};

/// How live runs are set up on the instance.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    /// Web URL of the instance, used for links in log output
    pub base_url: String,
    /// Branch files are committed to and pipelines run on
    pub reference_branch: String,
    /// Disposable projects are named `<prefix>-test-<side>`
    pub project_prefix: String,
    pub wait: WaitOptions,
    /// Grace period before a disposable project is deleted
    pub cleanup_delay: Duration,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            reference_branch: "main".to_string(),
            project_prefix: "refactor-lens".to_string(),
            wait: WaitOptions::default(),
            cleanup_delay: Duration::from_secs(300),
        }
    }
}

/// One finished pipeline run of one side.
#[derive(Debug, Clone)]
pub struct SideRun {
    pub project: Project,
    pub pipeline: Pipeline,
    pub jobs: Vec<Job>,
}

impl SideRun {
    pub fn succeeded(&self) -> bool {
        self.pipeline.succeeded()
    }

    /// Job name to duration in seconds, in the order GitLab listed the jobs.
    pub fn timings(&self) -> IndexMap<String, f64> {
        self.jobs
            .iter()
            .map(|job| (job.name.clone(), job.duration.unwrap_or_default()))
            .collect()
    }

    /// Execution timeline of the run, with dependency declarations taken from the
    /// configuration since the jobs API does not report them.
    pub fn execution(&self, config: &PipelineConfig) -> PipelineExecution {
        let mut execution = self.pipeline.to_execution(&self.jobs);
        for job in &mut execution.jobs {
            if let Some(declared) = config.jobs.get(&job.name) {
                job.dependencies = declared.dependency_names().to_vec();
                job.needs = declared.need_names();
            }
        }
        execution
    }

    /// `Ok(timings)` when the pipeline succeeded, otherwise a description of the failure.
    pub fn outcome(&self) -> std::result::Result<IndexMap<String, f64>, String> {
        if self.succeeded() {
            Ok(self.timings())
        } else {
            Err(format!(
                "pipeline {} finished with status {}",
                self.pipeline.id, self.pipeline.status
            ))
        }
    }
}

/// Drives one configuration through a disposable project on a live instance.
pub struct LiveRunner<C> {
    control_plane: Arc<C>,
    settings: LiveSettings,
    cleanup: CleanupQueue<C>,
}

impl<C: ControlPlane + 'static> LiveRunner<C> {
    pub fn new(control_plane: Arc<C>, settings: LiveSettings) -> Self {
        let cleanup = CleanupQueue::new(Arc::clone(&control_plane), settings.cleanup_delay);
        Self {
            control_plane,
            settings,
            cleanup,
        }
    }

    pub fn control_plane(&self) -> &C {
        &self.control_plane
    }

    pub fn cleanup(&self) -> &CleanupQueue<C> {
        &self.cleanup
    }

    /// Creates (or reuses) the side's project, uploads the CI file and auxiliary
    /// files under `source`, runs a pipeline on the reference branch and waits for it.
    ///
    /// The project is scheduled for delayed deletion as soon as it exists.
    ///
    /// # Errors
    ///
    /// Every failure is wrapped in `Phase` naming the step and `side`.
    pub async fn run_side(&self, source: &Path, side: Side, cancel: &CancelToken) -> Result<SideRun> {
        let project = self
            .create_or_get_project(side)
            .await
            .map_err(|e| e.in_phase("project setup", side))?;
        self.cleanup.schedule(project.id);

        self.upload(project.id, source, side)
            .await
            .map_err(|e| e.in_phase("upload", side))?;

        let triggered = self
            .control_plane
            .trigger_pipeline(project.id, &self.settings.reference_branch)
            .await
            .map_err(|e| e.in_phase("trigger", side))?;
        info!(
            "{side}: pipeline {} started at {}",
            triggered.id,
            links::pipeline_url(&self.settings.base_url, project_path(&project), triggered.id)
        );

        let pipeline = wait_for_pipeline(
            self.control_plane.as_ref(),
            project.id,
            triggered.id,
            &self.settings.wait,
            cancel,
        )
        .await
        .map_err(|e| e.in_phase("wait", side))?;

        let jobs = self
            .control_plane
            .get_pipeline_jobs(project.id, pipeline.id)
            .await
            .map_err(|e| e.in_phase("fetch jobs", side))?;
        info!(
            "{side}: pipeline {} finished with status {} ({} jobs)",
            pipeline.id,
            pipeline.status,
            jobs.len()
        );

        Ok(SideRun {
            project,
            pipeline,
            jobs,
        })
    }

    async fn create_or_get_project(&self, side: Side) -> Result<Project> {
        let name = format!("{}-test-{side}", self.settings.project_prefix);
        match self.control_plane.create_project(&name).await {
            Ok(project) => Ok(project),
            Err(create_err) => {
                debug!("Creating project {name} failed ({create_err}), looking up existing project");
                self.control_plane
                    .get_project(&name)
                    .await
                    .map_err(|_| create_err)
            }
        }
    }

    async fn upload(&self, project_id: u64, source: &Path, side: Side) -> Result<()> {
        let (main_file, root) = if source.is_dir() {
            (find_ci_file(source)?, Some(source))
        } else {
            (source.to_path_buf(), None)
        };

        let content = tokio::fs::read_to_string(&main_file).await?;
        self.control_plane
            .create_or_update_file(project_id, CI_FILE, &content, &format!("Add CI config for {side} test"))
            .await?;

        let Some(root) = root else {
            return Ok(());
        };

        for (relative, path) in auxiliary_files(root, &main_file)? {
            let bytes = tokio::fs::read(&path).await?;
            let Ok(content) = String::from_utf8(bytes) else {
                warn!("Skipping non-UTF-8 file {}", path.display());
                continue;
            };
            debug!("{side}: uploading {relative}");
            self.control_plane
                .create_or_update_file(project_id, &relative, &content, &format!("Add {relative}"))
                .await?;
        }
        Ok(())
    }
}

fn project_path(project: &Project) -> &str {
    project.path_with_namespace.as_deref().unwrap_or(&project.path)
}

/// Files under `root` to upload next to the main CI file, as `/`-separated paths
/// relative to `root`, sorted. Hidden files and directories and `main_file` itself
/// are skipped.
pub fn auxiliary_files(root: &Path, main_file: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    collect_files(root, root, main_file, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files(root: &Path, dir: &Path, main_file: &Path, files: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, main_file, files)?;
            continue;
        }
        if path == main_file {
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .map_err(|e| RefactorLensError::Config(format!("{}: {e}", path.display())))?
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, path));
    }
    Ok(())
}
