use indexmap::IndexMap;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::control_plane::ControlPlane;
use super::types::{Job, Pipeline, Project};
use crate::error::{RefactorLensError, Result};
use crate::execution::Simulator;
use crate::pipeline::PipelineConfig;

/// File the simulated instance reads the pipeline definition from.
pub const CI_FILE: &str = ".gitlab-ci.yml";

const NAMESPACE: &str = "root";
const DEFAULT_RUNNING_POLLS: u32 = 2;

/// Deterministic in-memory stand-in for a GitLab instance.
///
/// Projects and files live in memory. Triggering a pipeline parses the project's
/// `.gitlab-ci.yml` and runs the [`Simulator`] over it; the pipeline then reports
/// `running` for a fixed number of polls before settling on `success`, or on
/// `failed` when the file is missing or does not parse. Ids are assigned in
/// increasing order starting from 1.
pub struct SimulatedControlPlane {
    simulator: Simulator,
    running_polls: u32,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    last_id: u64,
    projects: IndexMap<u64, SimulatedProject>,
    pipelines: HashMap<u64, SimulatedPipeline>,
    deleted: Vec<u64>,
}

struct SimulatedProject {
    project: Project,
    files: IndexMap<String, String>,
}

struct SimulatedPipeline {
    project_id: u64,
    outcome: Pipeline,
    jobs: Vec<Job>,
    polls_remaining: u32,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn project_mut(&mut self, project_id: u64) -> Result<&mut SimulatedProject> {
        self.projects
            .get_mut(&project_id)
            .ok_or_else(|| RefactorLensError::NotFound(format!("project {project_id}")))
    }

    fn pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<&SimulatedPipeline> {
        self.pipelines
            .get(&pipeline_id)
            .filter(|pipeline| pipeline.project_id == project_id)
            .ok_or_else(|| RefactorLensError::NotFound(format!("pipeline {pipeline_id}")))
    }
}

impl SimulatedPipeline {
    fn finished(&self) -> bool {
        self.polls_remaining == 0
    }

    fn snapshot(&self) -> Pipeline {
        if self.finished() {
            self.outcome.clone()
        } else {
            Pipeline {
                status: "running".to_string(),
                duration: None,
                ..self.outcome.clone()
            }
        }
    }

    fn job_snapshot(&self, job: &Job) -> Job {
        if self.finished() {
            job.clone()
        } else {
            Job {
                status: "running".to_string(),
                duration: None,
                ..job.clone()
            }
        }
    }
}

impl Default for SimulatedControlPlane {
    fn default() -> Self {
        Self::new(Simulator::default())
    }
}

impl SimulatedControlPlane {
    pub fn new(simulator: Simulator) -> Self {
        Self {
            simulator,
            running_polls: DEFAULT_RUNNING_POLLS,
            state: Mutex::new(State::default()),
        }
    }

    /// Number of `get_pipeline` calls that report `running` before the final status.
    pub fn with_running_polls(mut self, polls: u32) -> Self {
        self.running_polls = polls;
        self
    }

    /// Ids of projects deleted so far, in deletion order.
    pub fn deleted_projects(&self) -> Vec<u64> {
        self.lock().deleted.clone()
    }

    /// Content of a file previously written to a project.
    pub fn file(&self, project_id: u64, file_path: &str) -> Option<String> {
        self.lock()
            .projects
            .get(&project_id)
            .and_then(|project| project.files.get(file_path).cloned())
    }

    /// Paths of all files written to a project, in write order.
    pub fn file_paths(&self, project_id: u64) -> Vec<String> {
        self.lock()
            .projects
            .get(&project_id)
            .map(|project| project.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the simulator over the project's CI file, producing the final pipeline
    /// status and its jobs.
    fn run(&self, state: &mut State, project_id: u64, pipeline_id: u64, ref_: &str) -> Result<(Pipeline, Vec<Job>)> {
        let source = state.project_mut(project_id)?.files.get(CI_FILE).cloned();

        let config = match source {
            Some(source) => PipelineConfig::from_yaml_str(&source).map_err(|e| e.to_string()),
            None => Err(format!("{CI_FILE} not found")),
        };

        let pipeline = |status: &str, duration| Pipeline {
            id: pipeline_id,
            status: status.to_string(),
            ref_: ref_.to_string(),
            sha: None,
            web_url: None,
            duration,
            queued_duration: Some(0.0),
            created_at: None,
        };

        let config = match config {
            Ok(config) => config,
            Err(reason) => {
                warn!("Simulated pipeline {pipeline_id} failed: {reason}");
                return Ok((pipeline("failed", Some(0.0)), Vec::new()));
            }
        };

        let execution = self.simulator.simulate(&config);
        let jobs = execution
            .jobs
            .iter()
            .map(|job| Job {
                id: state.next_id(),
                name: job.name.clone(),
                stage: job.stage.clone(),
                status: "success".to_string(),
                duration: Some(job.duration),
                queued_duration: Some(job.queued_duration),
                web_url: None,
            })
            .collect();

        Ok((pipeline("success", Some(execution.duration)), jobs))
    }
}

impl ControlPlane for SimulatedControlPlane {
    async fn create_project(&self, name: &str) -> Result<Project> {
        let mut state = self.lock();
        let full_path = format!("{NAMESPACE}/{name}");

        let taken = state
            .projects
            .values()
            .any(|p| p.project.path_with_namespace.as_deref() == Some(full_path.as_str()));
        if taken {
            return Err(RefactorLensError::ApiError {
                status: 400,
                message: format!("path '{name}' has already been taken"),
            });
        }

        let project = Project {
            id: state.next_id(),
            name: name.to_string(),
            path: name.to_string(),
            path_with_namespace: Some(full_path),
            default_branch: Some("main".to_string()),
            web_url: None,
        };
        debug!("Simulated project {} created as {}", project.name, project.id);

        state.projects.insert(
            project.id,
            SimulatedProject {
                project: project.clone(),
                files: IndexMap::new(),
            },
        );
        Ok(project)
    }

    async fn get_project(&self, path: &str) -> Result<Project> {
        self.lock()
            .projects
            .values()
            .map(|p| &p.project)
            .find(|p| p.path_with_namespace.as_deref() == Some(path) || p.path == path)
            .cloned()
            .ok_or_else(|| RefactorLensError::NotFound(format!("project {path}")))
    }

    async fn delete_project(&self, project_id: u64) -> Result<()> {
        let mut state = self.lock();
        if state.projects.shift_remove(&project_id).is_none() {
            return Err(RefactorLensError::NotFound(format!("project {project_id}")));
        }
        state.pipelines.retain(|_, pipeline| pipeline.project_id != project_id);
        state.deleted.push(project_id);
        Ok(())
    }

    async fn create_or_update_file(
        &self,
        project_id: u64,
        file_path: &str,
        content: &str,
        _commit_message: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state
            .project_mut(project_id)?
            .files
            .insert(file_path.to_string(), content.to_string());
        Ok(())
    }

    async fn trigger_pipeline(&self, project_id: u64, ref_: &str) -> Result<Pipeline> {
        let mut state = self.lock();
        state.project_mut(project_id)?;

        let pipeline_id = state.next_id();
        let (outcome, jobs) = self.run(&mut state, project_id, pipeline_id, ref_)?;
        debug!(
            "Simulated pipeline {pipeline_id} will finish as {} with {} jobs",
            outcome.status,
            jobs.len()
        );

        let created = Pipeline {
            status: "created".to_string(),
            duration: None,
            ..outcome.clone()
        };

        state.pipelines.insert(
            pipeline_id,
            SimulatedPipeline {
                project_id,
                outcome,
                jobs,
                polls_remaining: self.running_polls,
            },
        );
        Ok(created)
    }

    async fn get_pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<Pipeline> {
        let mut state = self.lock();
        state.pipeline(project_id, pipeline_id)?;

        let pipeline = state
            .pipelines
            .get_mut(&pipeline_id)
            .ok_or_else(|| RefactorLensError::NotFound(format!("pipeline {pipeline_id}")))?;
        let snapshot = pipeline.snapshot();
        pipeline.polls_remaining = pipeline.polls_remaining.saturating_sub(1);
        Ok(snapshot)
    }

    async fn get_pipeline_jobs(&self, project_id: u64, pipeline_id: u64) -> Result<Vec<Job>> {
        let state = self.lock();
        let pipeline = state.pipeline(project_id, pipeline_id)?;
        Ok(pipeline.jobs.iter().map(|job| pipeline.job_snapshot(job)).collect())
    }

    async fn get_job(&self, project_id: u64, job_id: u64) -> Result<Job> {
        let state = self.lock();
        state
            .pipelines
            .values()
            .filter(|pipeline| pipeline.project_id == project_id)
            .find_map(|pipeline| {
                pipeline
                    .jobs
                    .iter()
                    .find(|job| job.id == job_id)
                    .map(|job| pipeline.job_snapshot(job))
            })
            .ok_or_else(|| RefactorLensError::NotFound(format!("job {job_id}")))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
