use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use super::fields::{image_name, one_or_many, Extends, Needs, Parallel};

/// Variables keyed by name. Values stay as raw YAML so that strings, numbers
/// and the `{value:, description:}` form all compare structurally.
pub type Variables = IndexMap<String, Value>;

/// Stage GitLab assigns to jobs that do not declare one.
pub const DEFAULT_STAGE: &str = "test";

/// Jobs whose name starts with `.` are hidden templates and never run.
pub fn is_template_job(name: &str) -> bool {
    name.starts_with('.')
}

/// A resolved GitLab CI configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Declared stage order
    #[serde(default)]
    pub stages: Vec<String>,
    /// Global variables
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: Variables,
    /// Raw include declarations, kept for comparison only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<Value>,
    /// The `default:` job template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JobConfig>,
    /// Jobs and hidden templates in definition order
    #[serde(default)]
    pub jobs: IndexMap<String, JobConfig>,
}

/// A job definition (also used for the `default:` block).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub before_script: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub after_script: Vec<String>,
    #[serde(default, deserialize_with = "image_name", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs: Option<Needs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<Extends>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<Parallel>,
}

impl JobConfig {
    pub fn extends_names(&self) -> Vec<String> {
        self.extends.as_ref().map(Extends::names).unwrap_or_default()
    }

    pub fn need_names(&self) -> Vec<String> {
        self.needs.as_ref().map(Needs::job_names).unwrap_or_default()
    }

    /// The declared stage, or [`DEFAULT_STAGE`] when none is declared.
    pub fn effective_stage(&self) -> &str {
        self.stage.as_deref().unwrap_or(DEFAULT_STAGE)
    }

    pub fn dependency_names(&self) -> &[String] {
        self.dependencies.as_deref().unwrap_or_default()
    }

    pub fn uses_extends(&self) -> bool {
        !self.extends_names().is_empty()
    }

    pub fn parallel_instances(&self) -> u32 {
        self.parallel.as_ref().map_or(1, Parallel::instances)
    }
}

impl PipelineConfig {
    pub fn template_jobs(&self) -> impl Iterator<Item = (&String, &JobConfig)> {
        self.jobs.iter().filter(|(name, _)| is_template_job(name))
    }

    pub fn executable_jobs(&self) -> impl Iterator<Item = (&String, &JobConfig)> {
        self.jobs.iter().filter(|(name, _)| !is_template_job(name))
    }

    /// True when the configuration defines hidden templates or any job uses `extends`.
    pub fn uses_templates(&self) -> bool {
        self.jobs
            .iter()
            .any(|(name, job)| is_template_job(name) || job.uses_extends())
    }

    /// Materializes the job → dependency adjacency for every executable job.
    ///
    /// A job's adjacency is its `dependencies` followed by its `needs` names. A job
    /// declaring neither inherits the declarations of its `extends` parents, so a
    /// template can change effective dependencies without touching the job itself.
    pub fn dependency_graph(&self) -> IndexMap<String, Vec<String>> {
        self.executable_jobs()
            .map(|(name, job)| {
                let mut visited = HashSet::new();
                (name.clone(), self.effective_dependencies(name, job, &mut visited))
            })
            .collect()
    }

    fn effective_dependencies<'a>(
        &'a self,
        name: &'a str,
        job: &'a JobConfig,
        visited: &mut HashSet<&'a str>,
    ) -> Vec<String> {
        if !visited.insert(name) {
            return Vec::new();
        }

        if job.dependencies.is_some() || job.needs.is_some() {
            let mut deps = job.dependency_names().to_vec();
            deps.extend(job.need_names());
            return deps;
        }

        let mut inherited = Vec::new();
        for parent in job.extends.iter().flat_map(Extends::names) {
            if let Some((parent_name, parent_job)) = self.jobs.get_key_value(parent.as_str()) {
                for dep in self.effective_dependencies(parent_name, parent_job, visited) {
                    if !inherited.contains(&dep) {
                        inherited.push(dep);
                    }
                }
            }
        }
        inherited
    }

    /// Index of a stage in the declared order, if declared.
    pub fn stage_index(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_deps(deps: &[&str]) -> JobConfig {
        JobConfig {
            dependencies: Some(deps.iter().map(ToString::to_string).collect()),
            ..JobConfig::default()
        }
    }

    #[test]
    fn template_detection_uses_dot_prefix() {
        assert!(is_template_job(".base"));
        assert!(!is_template_job("build"));
    }

    #[cfg(test)]
    mod dependency_graph {
        use super::*;

        #[test]
        fn combines_dependencies_and_needs() {
            let mut config = PipelineConfig::default();
            let mut job = job_with_deps(&["build"]);
            job.needs = Some(Needs::Single("lint".to_string()));
            config.jobs.insert("test".to_string(), job);

            let graph = config.dependency_graph();
            assert_eq!(graph["test"], vec!["build", "lint"]);
        }

        #[test]
        fn skips_templates() {
            let mut config = PipelineConfig::default();
            config.jobs.insert(".base".to_string(), job_with_deps(&["build"]));
            config.jobs.insert("build".to_string(), JobConfig::default());

            let graph = config.dependency_graph();
            assert!(!graph.contains_key(".base"));
            assert_eq!(graph["build"], Vec::<String>::new());
        }

        #[test]
        fn inherits_from_extends_when_job_declares_nothing() {
            let mut config = PipelineConfig::default();
            config.jobs.insert(".deploy-base".to_string(), job_with_deps(&["package"]));
            config.jobs.insert(
                "deploy".to_string(),
                JobConfig {
                    extends: Some(Extends::Single(".deploy-base".to_string())),
                    ..JobConfig::default()
                },
            );

            assert_eq!(config.dependency_graph()["deploy"], vec!["package"]);
        }

        #[test]
        fn own_declaration_overrides_parent() {
            let mut config = PipelineConfig::default();
            config.jobs.insert(".deploy-base".to_string(), job_with_deps(&["package"]));
            let mut job = job_with_deps(&[]);
            job.extends = Some(Extends::Single(".deploy-base".to_string()));
            config.jobs.insert("deploy".to_string(), job);

            assert!(config.dependency_graph()["deploy"].is_empty());
        }

        #[test]
        fn extends_cycles_terminate() {
            let mut config = PipelineConfig::default();
            config.jobs.insert(
                ".a".to_string(),
                JobConfig {
                    extends: Some(Extends::Single(".b".to_string())),
                    ..JobConfig::default()
                },
            );
            config.jobs.insert(
                ".b".to_string(),
                JobConfig {
                    extends: Some(Extends::Single(".a".to_string())),
                    ..JobConfig::default()
                },
            );
            config.jobs.insert(
                "job".to_string(),
                JobConfig {
                    extends: Some(Extends::Single(".a".to_string())),
                    ..JobConfig::default()
                },
            );

            assert!(config.dependency_graph()["job"].is_empty());
        }
    }

    #[test]
    fn uses_templates_detects_extends_without_hidden_jobs() {
        let mut config = PipelineConfig::default();
        assert!(!config.uses_templates());

        config.jobs.insert(
            "build".to_string(),
            JobConfig {
                extends: Some(Extends::Many(vec![".shared".to_string()])),
                ..JobConfig::default()
            },
        );
        assert!(config.uses_templates());
    }
}
