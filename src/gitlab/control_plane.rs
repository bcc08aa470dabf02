use std::future::Future;

use super::types::{Job, Pipeline, Project};
use crate::error::Result;

/// Operations the live validation path needs from a GitLab instance.
///
/// Implemented by the REST client and by the in-memory simulation backend.
pub trait ControlPlane: Send + Sync {
    /// Creates a project with the given name (also used as its path).
    fn create_project(&self, name: &str) -> impl Future<Output = Result<Project>> + Send;

    /// Looks a project up by its full path (e.g., "group/project").
    fn get_project(&self, path: &str) -> impl Future<Output = Result<Project>> + Send;

    fn delete_project(&self, project_id: u64) -> impl Future<Output = Result<()>> + Send;

    /// Writes `content` to `file_path` on the default branch, creating the file if needed.
    fn create_or_update_file(
        &self,
        project_id: u64,
        file_path: &str,
        content: &str,
        commit_message: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Starts a pipeline on `ref_`.
    fn trigger_pipeline(&self, project_id: u64, ref_: &str) -> impl Future<Output = Result<Pipeline>> + Send;

    fn get_pipeline(&self, project_id: u64, pipeline_id: u64) -> impl Future<Output = Result<Pipeline>> + Send;

    fn get_pipeline_jobs(&self, project_id: u64, pipeline_id: u64)
        -> impl Future<Output = Result<Vec<Job>>> + Send;

    fn get_job(&self, project_id: u64, job_id: u64) -> impl Future<Output = Result<Job>> + Send;

    /// Succeeds when the instance answers API requests.
    fn health_check(&self) -> impl Future<Output = Result<()>> + Send;
}
