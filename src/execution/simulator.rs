use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use super::types::{JobExecution, PipelineExecution};
use crate::pipeline::{JobConfig, PipelineConfig};

/// Stage order assigned to jobs whose stage is not declared.
const UNKNOWN_STAGE_ORDER: usize = 999;

/// Linear cost model for estimating job durations, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CostModel {
    #[serde(default = "default_base")]
    pub base: f64,
    #[serde(default = "default_per_line")]
    pub per_script_line: f64,
    #[serde(default = "default_per_line")]
    pub per_before_script_line: f64,
    #[serde(default = "default_services_overhead")]
    pub services_overhead: f64,
    /// Subtracted for jobs that extend a template
    #[serde(default = "default_template_bonus")]
    pub template_bonus: f64,
    #[serde(default = "default_minimum")]
    pub minimum: f64,
}

fn default_base() -> f64 {
    30.0
}

fn default_per_line() -> f64 {
    2.0
}

fn default_services_overhead() -> f64 {
    15.0
}

fn default_template_bonus() -> f64 {
    3.0
}

fn default_minimum() -> f64 {
    10.0
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            base: default_base(),
            per_script_line: default_per_line(),
            per_before_script_line: default_per_line(),
            services_overhead: default_services_overhead(),
            template_bonus: default_template_bonus(),
            minimum: default_minimum(),
        }
    }
}

/// Converts a configuration tree into an estimated execution timeline.
///
/// This is a directional estimate for comparing two configurations, not a scheduler.
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    cost: CostModel,
}

impl Simulator {
    pub fn new(cost: CostModel) -> Self {
        Self { cost }
    }

    /// Estimates one pipeline run.
    ///
    /// Template jobs are skipped. Jobs are stably ordered by the index of their stage
    /// in the declared stage list, undeclared stages last. The pipeline duration is
    /// the sum over stages of the longest job in each stage.
    pub fn simulate(&self, config: &PipelineConfig) -> PipelineExecution {
        let mut jobs: Vec<JobExecution> = config
            .executable_jobs()
            .map(|(name, job)| JobExecution {
                id: None,
                name: name.clone(),
                stage: job.effective_stage().to_string(),
                status: "simulated".to_string(),
                duration: self.estimate_duration(job, config),
                queued_duration: 0.0,
                dependencies: job.dependency_names().to_vec(),
                needs: job.need_names(),
            })
            .collect();

        jobs.sort_by_key(|job| stage_order(&job.stage, &config.stages));

        let duration = stage_serial_duration(&jobs);
        debug!("Simulated {} jobs, estimated pipeline duration {duration}s", jobs.len());

        PipelineExecution {
            id: None,
            status: "simulated".to_string(),
            ref_: "main".to_string(),
            jobs,
            variables: stringify_variables(&config.variables),
            duration,
            queued_duration: 0.0,
            created_at: None,
        }
    }

    /// `base + per-line × script + per-line × effective before_script (+ services)`,
    /// less the template bonus, floored at the minimum.
    ///
    /// Effective before_script lines are the job's own plus those of its direct
    /// `extends` parents.
    pub fn estimate_duration(&self, job: &JobConfig, config: &PipelineConfig) -> f64 {
        let parents = job.extends_names();

        let inherited_before: usize = parents
            .iter()
            .filter_map(|parent| config.jobs.get(parent))
            .map(|parent| parent.before_script.len())
            .sum();
        let before_lines = job.before_script.len() + inherited_before;

        #[allow(clippy::cast_precision_loss)]
        let mut duration = self.cost.base
            + self.cost.per_script_line * job.script.len() as f64
            + self.cost.per_before_script_line * before_lines as f64;

        if !job.services.is_empty() {
            duration += self.cost.services_overhead;
        }
        if !parents.is_empty() {
            duration -= self.cost.template_bonus;
        }

        duration.max(self.cost.minimum)
    }
}

fn stage_order(stage: &str, stages: &[String]) -> usize {
    stages
        .iter()
        .position(|s| s == stage)
        .unwrap_or(UNKNOWN_STAGE_ORDER)
}

fn stage_serial_duration(jobs: &[JobExecution]) -> f64 {
    let mut longest: IndexMap<&str, f64> = IndexMap::new();
    for job in jobs {
        let entry = longest.entry(job.stage.as_str()).or_insert(0.0);
        *entry = entry.max(job.duration);
    }
    longest.values().sum()
}

fn stringify_variables(variables: &IndexMap<String, Value>) -> IndexMap<String, String> {
    variables
        .iter()
        .map(|(name, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                Value::Mapping(m) => m
                    .get("value")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| serde_yaml::to_string(value).unwrap_or_default().trim().to_string()),
                other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
            };
            (name.clone(), text)
        })
        .collect()
}
