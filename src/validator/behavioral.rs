use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Observed job sets and timings of the two live pipeline runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecutionComparison {
    pub before_jobs_executed: Vec<String>,
    pub after_jobs_executed: Vec<String>,
    pub jobs_added: Vec<String>,
    pub jobs_removed: Vec<String>,
    /// Jobs present on both sides whose duration changed by more than the timing ratio
    pub jobs_modified: Vec<String>,
    /// Per-job duration in seconds
    pub execution_times_before: IndexMap<String, f64>,
    pub execution_times_after: IndexMap<String, f64>,
}

impl PipelineExecutionComparison {
    /// Compares two runs by job name and duration.
    ///
    /// A job is modified when `|after - before| / before > timing_change_ratio`.
    /// A job that took zero seconds before is modified when it takes any time after.
    pub fn from_timings(
        before: IndexMap<String, f64>,
        after: IndexMap<String, f64>,
        timing_change_ratio: f64,
    ) -> Self {
        let jobs_added = after
            .keys()
            .filter(|name| !before.contains_key(*name))
            .cloned()
            .collect();
        let jobs_removed = before
            .keys()
            .filter(|name| !after.contains_key(*name))
            .cloned()
            .collect();
        let jobs_modified = before
            .iter()
            .filter_map(|(name, &old)| after.get(name).map(|&new| (name, old, new)))
            .filter(|&(_, old, new)| timing_changed(old, new, timing_change_ratio))
            .map(|(name, _, _)| name.clone())
            .collect();

        Self {
            before_jobs_executed: before.keys().cloned().collect(),
            after_jobs_executed: after.keys().cloned().collect(),
            jobs_added,
            jobs_removed,
            jobs_modified,
            execution_times_before: before,
            execution_times_after: after,
        }
    }

    /// Same set of jobs ran on both sides. Timing-only changes are tolerated.
    pub fn is_equivalent(&self) -> bool {
        self.jobs_added.is_empty() && self.jobs_removed.is_empty()
    }
}

fn timing_changed(before: f64, after: f64, ratio: f64) -> bool {
    if before == 0.0 {
        return after > 0.0;
    }
    ((after - before).abs() / before) > ratio
}

/// Verdict of running both configurations on a live instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehavioralValidationResult {
    pub before_execution_passed: bool,
    pub after_execution_passed: bool,
    pub behavior_equivalent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_comparison: Option<PipelineExecutionComparison>,
    pub validation_errors: Vec<String>,
}

impl BehavioralValidationResult {
    /// Builds the verdict from the two run outcomes.
    ///
    /// Job sets are only compared when both runs succeeded; otherwise the
    /// configurations are reported as not equivalent.
    pub fn from_runs(
        before: std::result::Result<IndexMap<String, f64>, String>,
        after: std::result::Result<IndexMap<String, f64>, String>,
        timing_change_ratio: f64,
    ) -> Self {
        let mut result = Self::default();

        let before = match before {
            Ok(timings) => {
                result.before_execution_passed = true;
                Some(timings)
            }
            Err(error) => {
                result.validation_errors.push(format!("before configuration: {error}"));
                None
            }
        };
        let after = match after {
            Ok(timings) => {
                result.after_execution_passed = true;
                Some(timings)
            }
            Err(error) => {
                result.validation_errors.push(format!("after configuration: {error}"));
                None
            }
        };

        if let (Some(before), Some(after)) = (before, after) {
            let comparison = PipelineExecutionComparison::from_timings(before, after, timing_change_ratio);
            result.behavior_equivalent = comparison.is_equivalent();
            result.execution_comparison = Some(comparison);
        }

        result
    }
}
