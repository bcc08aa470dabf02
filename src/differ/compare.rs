use indexmap::IndexMap;
use log::debug;
use serde::Serialize;
use serde_yaml::Value;

use super::types::{ConfigDiff, DiffKind, DiffResult};
use crate::pipeline::{JobConfig, PipelineConfig, Variables};

/// Structurally compares two configuration trees.
///
/// Never fails: absent collections compare as empty. Record order follows map
/// insertion order (before-side keys first) and callers should match records by
/// `(path, kind)` rather than position.
pub fn compare(before: &PipelineConfig, after: &PipelineConfig) -> DiffResult {
    let mut diff = Buckets::default();

    diff.compare_stages(&before.stages, &after.stages);
    diff.compare_variables("variables", &before.variables, &after.variables);
    diff.compare_jobs(&before.jobs, &after.jobs);
    diff.compare_dependency_graphs(&before.dependency_graph(), &after.dependency_graph());
    diff.compare_default(before.default.as_ref(), after.default.as_ref());
    diff.compare_include(&before.include, &after.include);

    debug!(
        "Diff: {} semantic, {} dependency, {} performance records",
        diff.semantic.len(),
        diff.dependencies.len(),
        diff.performance.len()
    );

    DiffResult::from_buckets(diff.semantic, diff.dependencies, diff.performance)
}

/// Order-insensitive comparison that still counts repeated lines.
pub(crate) fn same_set(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

pub(crate) fn to_value<T: Serialize>(value: &T) -> Option<Value> {
    serde_yaml::to_value(value).ok()
}

#[derive(Default)]
struct Buckets {
    semantic: Vec<ConfigDiff>,
    dependencies: Vec<ConfigDiff>,
    performance: Vec<ConfigDiff>,
}

/// Where a job-level record lands.
enum Bucket {
    Semantic,
    Dependencies,
    Performance,
}

impl Buckets {
    fn push(&mut self, bucket: Bucket, diff: ConfigDiff) {
        match bucket {
            Bucket::Semantic => self.semantic.push(diff),
            Bucket::Dependencies => self.dependencies.push(diff),
            Bucket::Performance => self.performance.push(diff),
        }
    }

    fn compare_stages(&mut self, before: &[String], after: &[String]) {
        if before != after {
            self.semantic.push(
                ConfigDiff::new(
                    DiffKind::Modified,
                    "stages",
                    format!("Stages changed from [{}] to [{}]", before.join(", "), after.join(", ")),
                )
                .values(to_value(&before), to_value(&after)),
            );
        }
    }

    fn compare_variables(&mut self, prefix: &str, before: &Variables, after: &Variables) {
        for (name, old) in before {
            let path = format!("{prefix}.{name}");
            match after.get(name) {
                None => self.semantic.push(
                    ConfigDiff::new(DiffKind::Removed, path, format!("Variable removed: {name}"))
                        .values(Some(old.clone()), None),
                ),
                Some(new) if new != old => self.semantic.push(
                    ConfigDiff::new(DiffKind::Modified, path, format!("Variable changed: {name}"))
                        .values(Some(old.clone()), Some(new.clone())),
                ),
                Some(_) => {}
            }
        }

        for (name, new) in after.iter().filter(|(name, _)| !before.contains_key(*name)) {
            self.semantic.push(
                ConfigDiff::new(DiffKind::Added, format!("{prefix}.{name}"), format!("Variable added: {name}"))
                    .values(None, Some(new.clone())),
            );
        }
    }

    fn compare_jobs(&mut self, before: &IndexMap<String, JobConfig>, after: &IndexMap<String, JobConfig>) {
        for (name, old) in before {
            match after.get(name) {
                Some(new) => self.compare_job(name, old, new),
                None => self.semantic.push(
                    ConfigDiff::new(DiffKind::Removed, format!("jobs.{name}"), format!("Job removed: {name}"))
                        .values(to_value(old), None),
                ),
            }
        }

        for (name, new) in after.iter().filter(|(name, _)| !before.contains_key(*name)) {
            self.semantic.push(
                ConfigDiff::new(DiffKind::Added, format!("jobs.{name}"), format!("Job added: {name}"))
                    .values(None, to_value(new)),
            );
        }
    }

    fn compare_job(&mut self, name: &str, old: &JobConfig, new: &JobConfig) {
        let field = |field: &str| format!("jobs.{name}.{field}");

        if old.effective_stage() != new.effective_stage() {
            self.semantic.push(
                ConfigDiff::new(
                    DiffKind::Modified,
                    field("stage"),
                    format!(
                        "Job '{name}' moved from stage {} to {}",
                        old.stage.as_deref().unwrap_or("(default)"),
                        new.stage.as_deref().unwrap_or("(default)")
                    ),
                )
                .values(to_value(&old.stage), to_value(&new.stage)),
            );
        }

        for (key, old_lines, new_lines) in [
            ("script", &old.script, &new.script),
            ("before_script", &old.before_script, &new.before_script),
            ("after_script", &old.after_script, &new.after_script),
        ] {
            if !same_set(old_lines, new_lines) {
                self.semantic.push(
                    ConfigDiff::new(DiffKind::Modified, field(key), format!("Job '{name}' {key} changed"))
                        .values(to_value(old_lines), to_value(new_lines)),
                );
            }
        }

        if old.image != new.image {
            self.performance.push(
                ConfigDiff::new(
                    DiffKind::Modified,
                    field("image"),
                    format!(
                        "Job '{name}' image changed from {} to {}",
                        old.image.as_deref().unwrap_or("(default)"),
                        new.image.as_deref().unwrap_or("(default)")
                    ),
                )
                .values(to_value(&old.image), to_value(&new.image)),
            );
        }

        self.compare_field(name, "services", &old.services, &new.services, Bucket::Performance, true);

        if !same_set(old.dependency_names(), new.dependency_names()) {
            self.dependencies.push(
                ConfigDiff::new(
                    DiffKind::Modified,
                    field("dependencies"),
                    format!("Job '{name}' dependencies changed"),
                )
                .values(to_value(&old.dependencies), to_value(&new.dependencies)),
            );
        }

        self.compare_field(name, "needs", &old.needs, &new.needs, Bucket::Dependencies, true);
        self.compare_field(name, "cache", &old.cache, &new.cache, Bucket::Performance, false);
        self.compare_field(name, "artifacts", &old.artifacts, &new.artifacts, Bucket::Performance, true);
        self.compare_field(name, "rules", &old.rules, &new.rules, Bucket::Semantic, true);

        self.compare_variables(&field("variables"), &old.variables, &new.variables);
    }

    /// Deep-equality comparison of one job field.
    fn compare_field<T: PartialEq + Serialize>(
        &mut self,
        job: &str,
        key: &str,
        old: &T,
        new: &T,
        bucket: Bucket,
        behavioral: bool,
    ) {
        if old != new {
            self.push(
                bucket,
                ConfigDiff::new(
                    DiffKind::Modified,
                    format!("jobs.{job}.{key}"),
                    format!("Job '{job}' {key} changed"),
                )
                .values(to_value(old), to_value(new))
                .behavioral(behavioral),
            );
        }
    }

    fn compare_dependency_graphs(
        &mut self,
        before: &IndexMap<String, Vec<String>>,
        after: &IndexMap<String, Vec<String>>,
    ) {
        let names = before
            .keys()
            .chain(after.keys().filter(|name| !before.contains_key(*name)));

        for name in names {
            let old = before.get(name).map(Vec::as_slice).unwrap_or_default();
            let new = after.get(name).map(Vec::as_slice).unwrap_or_default();
            if same_set(old, new) {
                continue;
            }

            let kind = if old.is_empty() {
                DiffKind::Added
            } else if new.is_empty() {
                DiffKind::Removed
            } else {
                DiffKind::Modified
            };

            self.dependencies.push(
                ConfigDiff::new(
                    kind,
                    format!("dependency_graph.{name}"),
                    format!(
                        "Effective dependencies of '{name}' changed from [{}] to [{}]",
                        old.join(", "),
                        new.join(", ")
                    ),
                )
                .values(to_value(&old), to_value(&new)),
            );
        }
    }

    fn compare_default(&mut self, before: Option<&JobConfig>, after: Option<&JobConfig>) {
        let (kind, description) = match (before, after) {
            (None, None) => return,
            (Some(old), Some(new)) if old == new => return,
            (None, Some(_)) => (DiffKind::Added, "Default job configuration added"),
            (Some(_), None) => (DiffKind::Removed, "Default job configuration removed"),
            (Some(_), Some(_)) => (DiffKind::Modified, "Default job configuration changed"),
        };

        self.semantic.push(
            ConfigDiff::new(kind, "default", description)
                .values(before.and_then(to_value), after.and_then(to_value)),
        );
    }

    fn compare_include(&mut self, before: &[Value], after: &[Value]) {
        if before == after {
            return;
        }

        let kind = if before.is_empty() {
            DiffKind::Added
        } else if after.is_empty() {
            DiffKind::Removed
        } else {
            DiffKind::Modified
        };

        self.semantic.push(
            ConfigDiff::new(kind, "include", "Include declarations changed")
                .values(to_value(&before), to_value(&after)),
        );
    }
}
