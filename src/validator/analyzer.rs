use indexmap::IndexMap;
use serde::Serialize;

use crate::pipeline::PipelineConfig;

/// Counts maintainability issues in a configuration.
///
/// The validator reports `issues(before) - issues(after)` as the analysis improvement.
pub trait IssueAnalyzer: Send + Sync {
    fn count_issues(&self, config: &PipelineConfig) -> usize;
}

/// Reports no issues; the analysis improvement is always zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAnalyzer;

impl IssueAnalyzer for NullAnalyzer {
    fn count_issues(&self, _config: &PipelineConfig) -> usize {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

/// Structural checks over stages, job references and duplicated setup.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureAnalyzer;

impl StructureAnalyzer {
    pub fn analyze(&self, config: &PipelineConfig) -> Vec<Issue> {
        let mut issues = Vec::new();
        check_stages_defined(config, &mut issues);
        check_undefined_stages(config, &mut issues);
        check_dangling_references(config, &mut issues);
        check_duplicated_before_scripts(config, &mut issues);
        check_duplicated_images(config, &mut issues);
        issues
    }
}

impl IssueAnalyzer for StructureAnalyzer {
    fn count_issues(&self, config: &PipelineConfig) -> usize {
        self.analyze(config).len()
    }
}

fn check_stages_defined(config: &PipelineConfig, issues: &mut Vec<Issue>) {
    if config.stages.is_empty() && config.executable_jobs().next().is_some() {
        issues.push(Issue {
            path: "stages".to_string(),
            message: "No stages defined - using implicit stages".to_string(),
        });
    }
}

fn check_undefined_stages(config: &PipelineConfig, issues: &mut Vec<Issue>) {
    if config.stages.is_empty() {
        return;
    }
    for (name, job) in config.executable_jobs() {
        if let Some(stage) = &job.stage {
            if config.stage_index(stage).is_none() {
                issues.push(Issue {
                    path: format!("jobs.{name}.stage"),
                    message: format!("Job references undefined stage: {stage}"),
                });
            }
        }
    }
}

fn check_dangling_references(config: &PipelineConfig, issues: &mut Vec<Issue>) {
    for (name, job) in config.executable_jobs() {
        for (field, targets) in [("needs", job.need_names()), ("dependencies", job.dependency_names().to_vec())] {
            for target in targets.iter().filter(|target| !config.jobs.contains_key(*target)) {
                issues.push(Issue {
                    path: format!("jobs.{name}.{field}"),
                    message: format!("Job references unknown job: {target}"),
                });
            }
        }
    }
}

fn check_duplicated_before_scripts(config: &PipelineConfig, issues: &mut Vec<Issue>) {
    let mut groups: IndexMap<&[String], Vec<&str>> = IndexMap::new();
    for (name, job) in config.executable_jobs() {
        if !job.before_script.is_empty() {
            groups.entry(job.before_script.as_slice()).or_default().push(name.as_str());
        }
    }

    for jobs in groups.values().filter(|jobs| jobs.len() > 1) {
        issues.push(Issue {
            path: "jobs.*.before_script".to_string(),
            message: format!("Duplicate before_script blocks in jobs: {}", jobs.join(", ")),
        });
    }
}

fn check_duplicated_images(config: &PipelineConfig, issues: &mut Vec<Issue>) {
    let mut groups: IndexMap<&str, usize> = IndexMap::new();
    for (_, job) in config.executable_jobs() {
        if let Some(image) = &job.image {
            *groups.entry(image.as_str()).or_default() += 1;
        }
    }

    for (image, count) in groups.into_iter().filter(|(_, count)| *count > 1) {
        issues.push(Issue {
            path: "jobs.*.image".to_string(),
            message: format!("Image {image} repeated in {count} jobs"),
        });
    }
}
