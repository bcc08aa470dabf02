use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::{JobExecution, PipelineExecution};

/// Pipeline and job statuses after which GitLab no longer changes them.
pub const TERMINAL_STATUSES: [&str; 5] = ["success", "failed", "canceled", "skipped", "manual"];

pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// A GitLab project as returned by `/projects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub path_with_namespace: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// A pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: u64,
    /// Current status (e.g., "running", "success", "failed")
    pub status: String,
    /// Git reference the pipeline runs on
    #[serde(rename = "ref")]
    pub ref_: String,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    /// Total duration in seconds, set once the pipeline finished
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub queued_duration: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    pub fn is_finished(&self) -> bool {
        is_terminal_status(&self.status)
    }

    pub fn succeeded(&self) -> bool {
        self.status == "success"
    }

    /// Builds the execution timeline for this pipeline from its jobs.
    pub fn to_execution(&self, jobs: &[Job]) -> PipelineExecution {
        PipelineExecution {
            id: Some(self.id),
            status: self.status.clone(),
            ref_: self.ref_.clone(),
            jobs: jobs.iter().map(Job::to_execution).collect(),
            variables: Default::default(),
            duration: self.duration.unwrap_or_default(),
            queued_duration: self.queued_duration.unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

/// A job within a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub name: String,
    pub stage: String,
    pub status: String,
    /// Execution time in seconds; null while the job has not run
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub queued_duration: Option<f64>,
    #[serde(default)]
    pub web_url: Option<String>,
}

impl Job {
    pub fn is_finished(&self) -> bool {
        is_terminal_status(&self.status)
    }

    /// The REST job payload carries no dependency information, so both lists stay empty.
    pub fn to_execution(&self) -> JobExecution {
        JobExecution {
            id: Some(self.id),
            name: self.name.clone(),
            stage: self.stage.clone(),
            status: self.status.clone(),
            duration: self.duration.unwrap_or_default(),
            queued_duration: self.queued_duration.unwrap_or_default(),
            dependencies: Vec::new(),
            needs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        for status in ["success", "failed", "canceled", "skipped", "manual"] {
            assert!(is_terminal_status(status), "{status} should be terminal");
        }
        for status in ["created", "pending", "running", "waiting_for_resource"] {
            assert!(!is_terminal_status(status), "{status} should not be terminal");
        }
    }

    #[test]
    fn pipeline_deserializes_with_missing_optionals() {
        let pipeline: Pipeline =
            serde_json::from_str(r#"{"id": 12, "status": "running", "ref": "main"}"#).unwrap();

        assert_eq!(pipeline.ref_, "main");
        assert!(pipeline.duration.is_none());
        assert!(!pipeline.is_finished());
    }

    #[test]
    fn job_without_duration_maps_to_zero() {
        let job: Job = serde_json::from_str(
            r#"{"id": 3, "name": "build", "stage": "build", "status": "skipped", "duration": null}"#,
        )
        .unwrap();

        let execution = job.to_execution();
        assert_eq!(execution.id, Some(3));
        assert!(execution.duration.abs() < f64::EPSILON);
    }

    #[test]
    fn pipeline_to_execution_keeps_job_order() {
        let pipeline = Pipeline {
            id: 9,
            status: "success".to_string(),
            ref_: "main".to_string(),
            sha: None,
            web_url: None,
            duration: Some(120.0),
            queued_duration: Some(4.0),
            created_at: None,
        };
        let jobs = vec![
            Job {
                id: 1,
                name: "build".to_string(),
                stage: "build".to_string(),
                status: "success".to_string(),
                duration: Some(60.0),
                queued_duration: Some(1.0),
                web_url: None,
            },
            Job {
                id: 2,
                name: "test".to_string(),
                stage: "test".to_string(),
                status: "success".to_string(),
                duration: Some(55.5),
                queued_duration: None,
                web_url: None,
            },
        ];

        let execution = pipeline.to_execution(&jobs);
        assert_eq!(execution.id, Some(9));
        assert_eq!(execution.job_names().collect::<Vec<_>>(), vec!["build", "test"]);
        assert!((execution.duration - 120.0).abs() < f64::EPSILON);
        assert!((execution.jobs[1].duration - 55.5).abs() < f64::EPSILON);
    }
}
