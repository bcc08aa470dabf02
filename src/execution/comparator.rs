use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use super::types::{
    CompareStatus, ComparisonSummary, JobComparison, JobExecution, PerformanceMetrics, PipelineComparison,
    PipelineExecution,
};
use crate::differ::compare::same_set;

/// Policy thresholds for classifying timing changes. Both comparisons are strict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Thresholds {
    /// Seconds a matched job must speed up or slow down by to count as improved/degraded
    #[serde(default = "default_duration_delta")]
    pub duration_delta: f64,
    /// Relative duration change above which a live job counts as modified
    #[serde(default = "default_timing_change_ratio")]
    pub timing_change_ratio: f64,
}

fn default_duration_delta() -> f64 {
    5.0
}

fn default_timing_change_ratio() -> f64 {
    0.10
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            duration_delta: default_duration_delta(),
            timing_change_ratio: default_timing_change_ratio(),
        }
    }
}

/// Matches jobs by name across two executions and aggregates pipeline-level metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionComparator {
    thresholds: Thresholds,
}

impl ExecutionComparator {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Compares two executions.
    ///
    /// Job comparisons are ordered by the old execution's job order followed by jobs
    /// only present in the new execution.
    pub fn compare(&self, old: &PipelineExecution, new: &PipelineExecution) -> PipelineComparison {
        let new_by_name: HashMap<&str, &JobExecution> =
            new.jobs.iter().map(|job| (job.name.as_str(), job)).collect();
        let old_by_name: HashMap<&str, &JobExecution> =
            old.jobs.iter().map(|job| (job.name.as_str(), job)).collect();

        let mut job_comparisons: Vec<JobComparison> = old
            .jobs
            .iter()
            .map(|old_job| self.compare_job(&old_job.name, Some(old_job), new_by_name.get(old_job.name.as_str()).copied()))
            .collect();
        job_comparisons.extend(
            new.jobs
                .iter()
                .filter(|job| !old_by_name.contains_key(job.name.as_str()))
                .map(|new_job| self.compare_job(&new_job.name, None, Some(new_job))),
        );

        let summary = summarize(&job_comparisons);
        debug!(
            "Compared {} jobs: {} added, {} removed, {} improved, {} degraded",
            summary.total_jobs, summary.added_jobs, summary.removed_jobs, summary.improved_jobs, summary.degraded_jobs
        );

        PipelineComparison {
            performance: performance_metrics(old, new),
            old_execution: old.clone(),
            new_execution: new.clone(),
            job_comparisons,
            summary,
        }
    }

    fn compare_job(&self, name: &str, old: Option<&JobExecution>, new: Option<&JobExecution>) -> JobComparison {
        let mut comparison = JobComparison {
            job_name: name.to_string(),
            old_job: old.cloned(),
            new_job: new.cloned(),
            status: CompareStatus::Identical,
            duration_change: 0.0,
            queue_time_change: 0.0,
            changes: Vec::new(),
        };

        match (old, new) {
            (None, Some(new)) => {
                comparison.status = CompareStatus::Added;
                comparison.duration_change = new.duration;
                comparison.changes.push("Job added to pipeline".to_string());
            }
            (Some(old), None) => {
                comparison.status = CompareStatus::Removed;
                comparison.duration_change = -old.duration;
                comparison.changes.push("Job removed from pipeline".to_string());
            }
            (Some(old), Some(new)) => {
                comparison.duration_change = new.duration - old.duration;
                comparison.queue_time_change = new.queued_duration - old.queued_duration;

                if old.stage != new.stage {
                    comparison
                        .changes
                        .push(format!("Stage changed from {} to {}", old.stage, new.stage));
                }
                if !same_set(&old.dependencies, &new.dependencies) {
                    comparison.changes.push("Dependencies changed".to_string());
                }
                if !same_set(&old.needs, &new.needs) {
                    comparison.changes.push("Needs relationships changed".to_string());
                }

                let delta = self.thresholds.duration_delta;
                comparison.status = if comparison.changes.is_empty() && comparison.duration_change == 0.0 {
                    CompareStatus::Identical
                } else if comparison.duration_change < -delta {
                    CompareStatus::Improved
                } else if comparison.duration_change > delta {
                    CompareStatus::Degraded
                } else {
                    CompareStatus::Restructured
                };
            }
            (None, None) => {}
        }

        comparison
    }
}

fn summarize(comparisons: &[JobComparison]) -> ComparisonSummary {
    let mut summary = ComparisonSummary {
        total_jobs: comparisons.len(),
        ..ComparisonSummary::default()
    };

    for comparison in comparisons {
        match comparison.status {
            CompareStatus::Added => summary.added_jobs += 1,
            CompareStatus::Removed => summary.removed_jobs += 1,
            CompareStatus::Improved => summary.improved_jobs += 1,
            CompareStatus::Degraded => summary.degraded_jobs += 1,
            CompareStatus::Identical => summary.identical_jobs += 1,
            CompareStatus::Restructured => summary.restructured_jobs += 1,
        }
        summary.total_time_change += comparison.duration_change;
    }

    summary.overall_improvement = summary.total_time_change < 0.0;
    summary
}

fn performance_metrics(old: &PipelineExecution, new: &PipelineExecution) -> PerformanceMetrics {
    PerformanceMetrics {
        pipeline_duration_change: new.duration - old.duration,
        average_job_duration_change: average(&new.jobs, |job| job.duration) - average(&old.jobs, |job| job.duration),
        parallelism_change: max_jobs_per_stage(&new.jobs) - max_jobs_per_stage(&old.jobs),
        startup_time_reduction: average(&old.jobs, |job| job.queued_duration)
            - average(&new.jobs, |job| job.queued_duration),
    }
}

#[allow(clippy::cast_precision_loss)]
fn average(jobs: &[JobExecution], value: impl Fn(&JobExecution) -> f64) -> f64 {
    if jobs.is_empty() {
        return 0.0;
    }
    jobs.iter().map(value).sum::<f64>() / jobs.len() as f64
}

#[allow(clippy::cast_possible_wrap)]
fn max_jobs_per_stage(jobs: &[JobExecution]) -> i64 {
    let mut per_stage: HashMap<&str, i64> = HashMap::new();
    for job in jobs {
        *per_stage.entry(job.stage.as_str()).or_default() += 1;
    }
    per_stage.values().copied().max().unwrap_or(0)
}
