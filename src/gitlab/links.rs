/// Builds the web URL of a project.
///
/// # Arguments
///
/// * `base_url` - GitLab instance base URL (e.g., <https://gitlab.com>)
/// * `project_path` - Full project path (e.g., "root/app-test-before")
pub fn project_url(base_url: &str, project_path: &str) -> String {
    format!("{}/{project_path}", base_url.trim_end_matches('/'))
}

/// Builds the web URL of a pipeline.
///
/// # Returns
///
/// Clickable URL to the pipeline (e.g., <https://gitlab.com/group/project/-/pipelines/123>)
pub fn pipeline_url(base_url: &str, project_path: &str, pipeline_id: u64) -> String {
    format!("{}/-/pipelines/{pipeline_id}", project_url(base_url, project_path))
}

/// Builds the web URL of a job.
///
/// # Returns
///
/// Clickable URL to the job (e.g., <https://gitlab.com/group/project/-/jobs/456>)
pub fn job_url(base_url: &str, project_path: &str, job_id: u64) -> String {
    format!("{}/-/jobs/{job_id}", project_url(base_url, project_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_url_trims_trailing_slash() {
        assert_eq!(project_url("http://localhost:8080/", "root/app"), "http://localhost:8080/root/app");
    }

    #[test]
    fn test_pipeline_url() {
        let url = pipeline_url("https://gitlab.com", "group/project", 123_456);
        assert_eq!(url, "https://gitlab.com/group/project/-/pipelines/123456");
    }

    #[test]
    fn test_job_url() {
        let url = job_url("https://gitlab.com", "group/project", 789_012);
        assert_eq!(url, "https://gitlab.com/group/project/-/jobs/789012");
    }
}
