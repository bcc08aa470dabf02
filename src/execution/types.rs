use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One job's projected or observed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    /// Job id on the CI service; absent for simulated runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    pub stage: String,
    /// Final status (e.g., "success", "failed", "simulated")
    pub status: String,
    /// Execution time in seconds
    pub duration: f64,
    /// Time spent waiting for a runner, in seconds
    pub queued_duration: f64,
    pub dependencies: Vec<String>,
    pub needs: Vec<String>,
}

/// A stage-ordered collection of job runs for one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecution {
    /// Pipeline id on the CI service; absent for simulated runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub status: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub jobs: Vec<JobExecution>,
    pub variables: IndexMap<String, String>,
    /// Wall-clock pipeline duration in seconds
    pub duration: f64,
    pub queued_duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl PipelineExecution {
    pub fn job(&self, name: &str) -> Option<&JobExecution> {
        self.jobs.iter().find(|job| job.name == name)
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(|job| job.name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareStatus {
    Identical,
    Improved,
    Degraded,
    Added,
    Removed,
    Restructured,
}

impl CompareStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareStatus::Identical => "identical",
            CompareStatus::Improved => "improved",
            CompareStatus::Degraded => "degraded",
            CompareStatus::Added => "added",
            CompareStatus::Removed => "removed",
            CompareStatus::Restructured => "restructured",
        }
    }
}

/// One job name matched across two executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobComparison {
    pub job_name: String,
    pub old_job: Option<JobExecution>,
    pub new_job: Option<JobExecution>,
    pub status: CompareStatus,
    /// New minus old duration in seconds
    pub duration_change: f64,
    pub queue_time_change: f64,
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total_jobs: usize,
    pub added_jobs: usize,
    pub removed_jobs: usize,
    pub improved_jobs: usize,
    pub degraded_jobs: usize,
    pub identical_jobs: usize,
    pub restructured_jobs: usize,
    /// True iff the summed duration change is negative
    pub overall_improvement: bool,
    pub total_time_change: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub pipeline_duration_change: f64,
    pub average_job_duration_change: f64,
    /// Change in the largest per-stage job count
    pub parallelism_change: i64,
    /// Average queue time old minus new; positive means jobs start sooner
    pub startup_time_reduction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineComparison {
    pub old_execution: PipelineExecution,
    pub new_execution: PipelineExecution,
    pub job_comparisons: Vec<JobComparison>,
    pub summary: ComparisonSummary,
    pub performance: PerformanceMetrics,
}

impl PipelineComparison {
    pub fn job(&self, name: &str) -> Option<&JobComparison> {
        self.job_comparisons.iter().find(|c| c.job_name == name)
    }
}
