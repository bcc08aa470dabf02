//! Heuristic classifiers for known-good refactoring patterns.
//!
//! Every detector runs unconditionally and may contribute any number of
//! improvement records and tags. Detectors overlap: one refactor commonly
//! satisfies several of them.

use indexmap::IndexMap;

use super::compare::{same_set, to_value};
use super::types::{ConfigDiff, DiffKind, PatternReport};
use crate::pipeline::{is_template_job, JobConfig, PipelineConfig};

/// Package-manager install invocations that benefit from a shared cache.
const SETUP_COMMANDS: &[&str] = &[
    "npm ci",
    "yarn install",
    "pip install",
    "bundle install",
    "composer install",
];

/// Variable-name fragments that suggest a version or environment matrix.
const MATRIX_INDICATORS: &[&str] = &["VERSION", "NODE_VERSION", "PYTHON_VERSION", "ENV", "VARIANT"];

/// Runs every pattern detector over a before/after pair.
pub fn detect_patterns(before: &PipelineConfig, after: &PipelineConfig) -> PatternReport {
    let mut report = PatternReport::default();

    detect_default_consolidation(before, after, &mut report);
    detect_template_extraction(before, after, &mut report);
    detect_variable_optimization(before, after, &mut report);
    detect_dependency_optimization(before, after, &mut report);
    detect_cache_optimization(before, after, &mut report);
    detect_matrix_patterns(after, &mut report);
    detect_duplication_removal(before, after, &mut report);

    report
}

fn detect_default_consolidation(before: &PipelineConfig, after: &PipelineConfig, report: &mut PatternReport) {
    let Some(new_default) = after.default.as_ref() else {
        return;
    };
    if before
        .default
        .as_ref()
        .is_some_and(|old_default| !has_significant_default_changes(old_default, new_default))
    {
        return;
    }

    let consolidated = after
        .jobs
        .iter()
        .filter(|(name, new_job)| {
            before
                .jobs
                .get(*name)
                .is_some_and(|old_job| moved_into_default(old_job, new_job, new_default))
        })
        .count();

    if consolidated >= 2 {
        report.record(
            ConfigDiff::new(
                DiffKind::Added,
                "default",
                format!("Consolidated duplicate configuration from {consolidated} jobs to default block"),
            )
            .values(None, to_value(new_default)),
        );
        report.tag(&["consolidation", "duplication"]);
    }
}

fn has_significant_default_changes(old: &JobConfig, new: &JobConfig) -> bool {
    old.image != new.image
        || !same_set(&old.before_script, &new.before_script)
        || old.variables != new.variables
        || old.cache != new.cache
}

/// True when the job lost at least one field whose value now lives in `default`.
fn moved_into_default(old: &JobConfig, new: &JobConfig, default: &JobConfig) -> bool {
    let before_script_moved = !old.before_script.is_empty()
        && new.before_script.is_empty()
        && same_set(&old.before_script, &default.before_script);

    let image_moved = old.image.is_some() && new.image.is_none() && old.image == default.image;

    let variable_moved = old.variables.iter().any(|(name, value)| {
        !new.variables.contains_key(name) && default.variables.get(name) == Some(value)
    });

    before_script_moved || image_moved || variable_moved
}

fn detect_template_extraction(before: &PipelineConfig, after: &PipelineConfig, report: &mut PatternReport) {
    let mut extends_usage = 0;

    for (name, job) in &after.jobs {
        let parents = job.extends_names();
        if parents.is_empty() {
            continue;
        }
        extends_usage += 1;

        if before.jobs.get(name).is_some_and(|old| !old.uses_extends()) {
            report.record(
                ConfigDiff::new(
                    DiffKind::Added,
                    format!("jobs.{name}.extends"),
                    format!("Job '{name}' now uses template inheritance"),
                )
                .values(None, to_value(&parents)),
            );
        }
    }

    if extends_usage > 0 || after.template_jobs().next().is_some() {
        report.tag(&["templates", "extends"]);
    }
}

fn detect_variable_optimization(before: &PipelineConfig, after: &PipelineConfig, report: &mut PatternReport) {
    let mut optimizations = 0;

    for (name, value) in after
        .variables
        .iter()
        .filter(|(name, _)| !before.variables.contains_key(*name))
    {
        let jobs_with_value = before
            .jobs
            .values()
            .filter(|job| job.variables.get(name) == Some(value))
            .count();

        if jobs_with_value >= 2 {
            report.record(
                ConfigDiff::new(
                    DiffKind::Added,
                    format!("variables.{name}"),
                    format!("Variable '{name}' promoted from {jobs_with_value} jobs to global scope"),
                )
                .values(None, Some(value.clone())),
            );
            optimizations += 1;
        }
    }

    let old_jobs_with_vars = before.jobs.values().filter(|job| !job.variables.is_empty()).count();
    let templates_with_vars = after
        .template_jobs()
        .filter(|(_, job)| !job.variables.is_empty())
        .count();
    let new_jobs_with_vars = after
        .executable_jobs()
        .filter(|(_, job)| !job.variables.is_empty())
        .count();

    if old_jobs_with_vars > new_jobs_with_vars && templates_with_vars > 0 {
        report.record(ConfigDiff::new(
            DiffKind::Modified,
            "jobs.*.variables",
            format!(
                "Consolidated variables from {old_jobs_with_vars} jobs into {templates_with_vars} reusable templates"
            ),
        ));
        optimizations += 1;
    }

    if optimizations == 0 && !after.variables.is_empty() && after.uses_templates() {
        report.record(ConfigDiff::new(
            DiffKind::Modified,
            "templates.variables",
            "Optimized variable usage through template inheritance and global scope",
        ));
        optimizations += 1;
    }

    if optimizations > 0 {
        report.tag(&["variables", "consolidation"]);
    }
}

fn detect_dependency_optimization(before: &PipelineConfig, after: &PipelineConfig, report: &mut PatternReport) {
    let mut optimizations = 0;

    for (name, new_job) in &after.jobs {
        let Some(old_job) = before.jobs.get(name) else {
            continue;
        };

        if !old_job.dependency_names().is_empty() && new_job.dependency_names().is_empty() && new_job.needs.is_some() {
            report.record(
                ConfigDiff::new(
                    DiffKind::Modified,
                    format!("jobs.{name}.needs"),
                    format!("Job '{name}' converted from dependencies to needs for better parallelization"),
                )
                .values(to_value(&old_job.dependencies), to_value(&new_job.needs)),
            );
            optimizations += 1;
        }

        let old_count = old_job.dependency_names().len();
        let new_count = new_job.dependency_names().len();
        if old_count > new_count {
            report.record(
                ConfigDiff::new(
                    DiffKind::Modified,
                    format!("jobs.{name}.dependencies"),
                    format!("Job '{name}' simplified dependencies from {old_count} to {new_count}"),
                )
                .values(to_value(&old_job.dependencies), to_value(&new_job.dependencies)),
            );
            optimizations += 1;
        }
    }

    let old_needs = before.jobs.values().filter(|job| job.needs.is_some()).count();
    let new_needs = after.jobs.values().filter(|job| job.needs.is_some()).count();
    if new_needs > old_needs {
        report.record(ConfigDiff::new(
            DiffKind::Modified,
            "jobs.*.needs",
            format!(
                "Improved dependency management with needs usage: {new_needs} jobs now use needs vs {old_needs} previously"
            ),
        ));
        optimizations += 1;
    }

    if optimizations == 0 {
        let templates = after.template_jobs().count();
        let extending = after.executable_jobs().filter(|(_, job)| job.uses_extends()).count();
        if templates > 0 && extending >= 2 {
            report.record(ConfigDiff::new(
                DiffKind::Modified,
                "jobs.dependencies.organization",
                format!(
                    "Improved dependency organization through template structure ({templates} templates, {extending} jobs)"
                ),
            ));
            optimizations += 1;
        }
    }

    if optimizations > 0 {
        report.tag(&["needs", "dependencies"]);
    }
}

fn detect_cache_optimization(before: &PipelineConfig, after: &PipelineConfig, report: &mut PatternReport) {
    let mut optimizations = 0;

    let had_default_cache = before.default.as_ref().is_some_and(|d| d.cache.is_some());
    if let Some(cache) = after.default.as_ref().and_then(|d| d.cache.as_ref()) {
        if !had_default_cache {
            report.record(
                ConfigDiff::new(
                    DiffKind::Added,
                    "default.cache",
                    "Added global cache configuration to improve build performance",
                )
                .values(None, Some(cache.clone())),
            );
            optimizations += 1;
        }
    }

    let old_jobs_with_cache = before.jobs.values().filter(|job| job.cache.is_some()).count();
    let new_jobs_with_cache = after.executable_jobs().filter(|(_, job)| job.cache.is_some()).count();
    let templates_with_cache = after.template_jobs().filter(|(_, job)| job.cache.is_some()).count();

    if old_jobs_with_cache > new_jobs_with_cache && templates_with_cache > 0 {
        report.record(ConfigDiff::new(
            DiffKind::Modified,
            "jobs.*.cache",
            format!(
                "Consolidated cache configuration from {old_jobs_with_cache} jobs into {templates_with_cache} reusable templates"
            ),
        ));
        optimizations += 1;
    }

    let setup_in_before_scripts = after
        .jobs
        .values()
        .chain(after.default.as_ref())
        .any(|job| contains_setup_command(&job.before_script));
    if setup_in_before_scripts && after.uses_templates() {
        report.record(ConfigDiff::new(
            DiffKind::Added,
            "templates.setup",
            "Consolidated dependency installation to templates for better caching efficiency",
        ));
        optimizations += 1;
    }

    if optimizations > 0 {
        report.tag(&["cache", "optimization"]);
    }
}

fn contains_setup_command(lines: &[String]) -> bool {
    let text = lines.join(" ");
    SETUP_COMMANDS.iter().any(|command| text.contains(command))
}

fn detect_matrix_patterns(after: &PipelineConfig, report: &mut PatternReport) {
    let mut optimizations = 0;

    let mut signatures: IndexMap<(&str, String), Vec<&str>> = IndexMap::new();
    for (name, job) in after.executable_jobs() {
        let stage = job.effective_stage();
        signatures
            .entry((stage, job.script.join("|")))
            .or_default()
            .push(name.as_str());
    }

    for jobs in signatures.values().filter(|jobs| jobs.len() >= 2) {
        report.record(ConfigDiff::new(
            DiffKind::Modified,
            format!("jobs.{}", jobs.join(",")),
            format!("Jobs [{}] could be optimized using matrix strategy", jobs.join(", ")),
        ));
        optimizations += 1;
    }

    for (name, job) in &after.jobs {
        if job.parallel_instances() > 1 || has_matrix_like_variables(job) {
            report.record(ConfigDiff::new(
                DiffKind::Added,
                format!("jobs.{name}.matrix"),
                format!("Job '{name}' uses matrix strategy for efficient parallel execution"),
            ));
            optimizations += 1;
        }
    }

    if optimizations > 0 {
        report.tag(&["matrix", "parallel", "optimization"]);
    }
}

fn has_matrix_like_variables(job: &JobConfig) -> bool {
    job.variables.keys().any(|name| {
        let name = name.to_uppercase();
        MATRIX_INDICATORS.iter().any(|indicator| name.contains(indicator))
    })
}

fn detect_duplication_removal(before: &PipelineConfig, after: &PipelineConfig, report: &mut PatternReport) {
    let count = |config: &PipelineConfig| {
        let templates = config.jobs.keys().filter(|name| is_template_job(name)).count();
        (config.jobs.len() - templates, templates)
    };
    let (old_jobs, old_templates) = count(before);
    let (new_jobs, new_templates) = count(after);

    if new_jobs < old_jobs && new_templates > old_templates {
        report.record(ConfigDiff::new(
            DiffKind::Modified,
            "jobs",
            format!("Consolidated {old_jobs} jobs into {new_jobs} jobs with {new_templates} reusable templates"),
        ));
        report.tag(&["consolidation", "duplication", "templates"]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> PipelineConfig {
        PipelineConfig::from_yaml_str(yaml).unwrap()
    }

    fn tags(report: &PatternReport) -> Vec<&str> {
        report.tags.iter().map(String::as_str).collect()
    }

    fn has_path(report: &PatternReport, path: &str) -> bool {
        report.improvements.iter().any(|diff| diff.path == path)
    }

    #[cfg(test)]
    mod default_consolidation {
        use super::*;

        const BEFORE: &str = "build:\n  image: node:16\n  before_script: [npm ci]\n  script: b\n\
                              test:\n  image: node:16\n  before_script: [npm ci]\n  script: t\n\
                              lint:\n  image: node:16\n  before_script: [npm ci]\n  script: l\n";

        #[test]
        fn two_jobs_moved_into_default() {
            let before = parse(BEFORE);
            let after = parse(
                "default:\n  image: node:16\n  before_script: [npm ci]\n\
                 build:\n  script: b\ntest:\n  script: t\nlint:\n  image: node:16\n  before_script: [npm ci]\n  script: l\n",
            );

            let report = detect_patterns(&before, &after);
            assert!(has_path(&report, "default"), "improvements: {:?}", report.improvements);
            assert!(report.tags.contains("consolidation"));
            assert!(report.tags.contains("duplication"));
        }

        #[test]
        fn single_job_is_not_enough() {
            let before = parse(BEFORE);
            let after = parse(
                "default:\n  image: node:16\n\
                 build:\n  script: b\n  before_script: [npm ci]\n\
                 test:\n  image: node:16\n  before_script: [npm ci]\n  script: t\n\
                 lint:\n  image: node:16\n  before_script: [npm ci]\n  script: l\n",
            );

            let report = detect_patterns(&before, &after);
            assert!(!has_path(&report, "default"));
        }

        #[test]
        fn more_evidence_never_removes_tags() {
            let before = parse(BEFORE);
            let two = parse(
                "default:\n  image: node:16\n\
                 build:\n  before_script: [npm ci]\n  script: b\n\
                 test:\n  before_script: [npm ci]\n  script: t\n\
                 lint:\n  image: node:16\n  before_script: [npm ci]\n  script: l\n",
            );
            let three = parse(
                "default:\n  image: node:16\n\
                 build:\n  before_script: [npm ci]\n  script: b\n\
                 test:\n  before_script: [npm ci]\n  script: t\n\
                 lint:\n  before_script: [npm ci]\n  script: l\n",
            );

            let with_two = detect_patterns(&before, &two);
            let with_three = detect_patterns(&before, &three);
            assert!(with_two.tags.contains("consolidation"));
            assert!(
                with_two.tags.is_subset(&with_three.tags),
                "{:?} should be contained in {:?}",
                with_two.tags,
                with_three.tags
            );
        }

        #[test]
        fn lost_field_must_match_default() {
            let before = parse(BEFORE);
            let after = parse(
                "default:\n  image: node:20\n\
                 build:\n  before_script: [npm ci]\n  script: b\n\
                 test:\n  before_script: [npm ci]\n  script: t\n\
                 lint:\n  before_script: [npm ci]\n  script: l\n",
            );

            assert!(!has_path(&detect_patterns(&before, &after), "default"));
        }
    }

    #[cfg(test)]
    mod template_extraction {
        use super::*;

        #[test]
        fn job_starting_to_extend_is_recorded() {
            let before = parse("build:\n  image: docker:24\n  script: b\n");
            let after = parse(".docker:\n  image: docker:24\nbuild:\n  extends: .docker\n  script: b\n");

            let report = detect_patterns(&before, &after);
            assert!(has_path(&report, "jobs.build.extends"));
            assert!(report.tags.contains("templates"));
            assert!(report.tags.contains("extends"));
        }

        #[test]
        fn templates_alone_tag_without_records() {
            let config = parse(".base:\n  image: a\nbuild:\n  script: b\n");
            let report = detect_patterns(&config, &config);

            assert!(!has_path(&report, "jobs.build.extends"));
            assert!(report.tags.contains("templates"));
        }
    }

    #[cfg(test)]
    mod variable_optimization {
        use super::*;

        #[test]
        fn promotion_from_two_jobs() {
            let before = parse(
                "build:\n  script: b\n  variables: {REGISTRY: r.io}\ntest:\n  script: t\n  variables: {REGISTRY: r.io}\n",
            );
            let after = parse("variables:\n  REGISTRY: r.io\nbuild:\n  script: b\ntest:\n  script: t\n");

            let report = detect_patterns(&before, &after);
            assert!(has_path(&report, "variables.REGISTRY"));
            assert!(report.tags.contains("variables"));
        }

        #[test]
        fn differing_values_are_not_promoted() {
            let before = parse(
                "build:\n  script: b\n  variables: {REGISTRY: a.io}\ntest:\n  script: t\n  variables: {REGISTRY: b.io}\n",
            );
            let after = parse("variables:\n  REGISTRY: a.io\nbuild:\n  script: b\ntest:\n  script: t\n");

            assert!(!has_path(&detect_patterns(&before, &after), "variables.REGISTRY"));
        }

        #[test]
        fn globals_with_templates_fall_back_to_optimized_usage() {
            let config = parse("variables: {A: '1'}\n.base:\n  image: a\nbuild:\n  extends: .base\n  script: b\n");
            let report = detect_patterns(&config, &config);

            assert!(has_path(&report, "templates.variables"));
        }
    }

    #[cfg(test)]
    mod dependency_optimization {
        use super::*;

        #[test]
        fn dependencies_to_needs() {
            let before = parse("build:\n  script: b\ntest:\n  script: t\n  dependencies: [build]\n");
            let after = parse("build:\n  script: b\ntest:\n  script: t\n  needs: [build]\n");

            let report = detect_patterns(&before, &after);
            assert!(has_path(&report, "jobs.test.needs"));
            assert!(has_path(&report, "jobs.test.dependencies"));
            assert!(has_path(&report, "jobs.*.needs"));
            assert!(report.tags.contains("needs"));
            assert!(report.tags.contains("dependencies"));
        }

        #[test]
        fn template_organization_fallback() {
            let config = parse(
                ".base:\n  image: a\nbuild:\n  extends: .base\n  script: b\ntest:\n  extends: .base\n  script: t\n",
            );
            let report = detect_patterns(&config, &config);

            assert!(has_path(&report, "jobs.dependencies.organization"));
        }

        #[test]
        fn nothing_to_report() {
            let config = parse("build:\n  script: b\n");
            let report = detect_patterns(&config, &config);
            assert!(!report.tags.contains("needs"));
        }
    }

    #[cfg(test)]
    mod cache_optimization {
        use super::*;

        #[test]
        fn default_cache_added() {
            let before = parse("build:\n  script: b\n");
            let after = parse("cache:\n  paths: [node_modules]\nbuild:\n  script: b\n");

            let report = detect_patterns(&before, &after);
            assert!(has_path(&report, "default.cache"));
            assert!(report.tags.contains("cache"));
        }

        #[test]
        fn cache_moved_into_template() {
            let before = parse(
                "build:\n  script: b\n  cache: {key: npm}\ntest:\n  script: t\n  cache: {key: npm}\n",
            );
            let after = parse(
                ".npm:\n  cache: {key: npm}\nbuild:\n  extends: .npm\n  script: b\ntest:\n  extends: .npm\n  script: t\n",
            );

            assert!(has_path(&detect_patterns(&before, &after), "jobs.*.cache"));
        }

        #[test]
        fn setup_commands_need_templates() {
            let plain = parse("build:\n  before_script: [pip install -r req.txt]\n  script: b\n");
            assert!(!has_path(&detect_patterns(&plain, &plain), "templates.setup"));

            let templated = parse(".py:\n  before_script: [pip install -r req.txt]\nbuild:\n  extends: .py\n  script: b\n");
            assert!(has_path(&detect_patterns(&templated, &templated), "templates.setup"));
        }
    }

    #[cfg(test)]
    mod matrix_patterns {
        use super::*;

        #[test]
        fn identical_stage_and_script_suggest_matrix() {
            let config = parse(
                "test-a:\n  stage: test\n  script: [make test]\ntest-b:\n  stage: test\n  script: [make test]\n",
            );
            let report = detect_patterns(&config, &config);

            assert!(has_path(&report, "jobs.test-a,test-b"));
            assert_eq!(tags(&report), vec!["matrix", "optimization", "parallel"]);
        }

        #[test]
        fn parallel_and_version_variables() {
            let config = parse(
                "shard:\n  script: t\n  parallel: 3\nnode:\n  script: n\n  variables: {node_version: '20'}\n",
            );
            let report = detect_patterns(&config, &config);

            assert!(has_path(&report, "jobs.shard.matrix"));
            assert!(has_path(&report, "jobs.node.matrix"), "indicator match is case-insensitive");
        }

        #[test]
        fn parallel_matrix_counts_instances() {
            let config = parse("test:\n  script: t\n  parallel:\n    matrix:\n      - RUBY: ['3.2', '3.3']\n");
            assert!(has_path(&detect_patterns(&config, &config), "jobs.test.matrix"));
        }

        #[test]
        fn oversized_matrix_is_still_tagged() {
            let values = (0..100).map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
            let entry = ["A", "B", "C", "D", "E"]
                .iter()
                .map(|key| format!("{key}: [{values}]"))
                .collect::<Vec<_>>()
                .join(", ");
            let config = parse(&format!("test:\n  script: t\n  parallel:\n    matrix:\n      - {{{entry}}}\n"));

            let report = detect_patterns(&config, &config);
            assert!(has_path(&report, "jobs.test.matrix"), "instance count saturates instead of overflowing");
        }
    }

    #[cfg(test)]
    mod duplication_removal {
        use super::*;

        #[test]
        fn fewer_jobs_and_more_templates() {
            let before = parse("unit:\n  script: u\nintegration:\n  script: i\nlint:\n  script: l\n");
            let after = parse(".test:\n  image: a\nunit:\n  extends: .test\n  script: u\nlint:\n  script: l\n");

            let report = detect_patterns(&before, &after);
            assert!(has_path(&report, "jobs"));
            assert!(report.tags.contains("duplication"));
        }

        #[test]
        fn existing_templates_do_not_count() {
            let before = parse(".test:\n  image: a\nunit:\n  script: u\nlint:\n  script: l\n");
            let after = parse(".test:\n  image: a\nunit:\n  script: u\n");

            assert!(!has_path(&detect_patterns(&before, &after), "jobs"));
        }
    }

    #[test]
    fn every_improvement_is_non_behavioral() {
        let before = parse("build:\n  script: b\n  dependencies: [x]\n");
        let after = parse("cache: {key: a}\n.base:\n  image: a\nbuild:\n  extends: .base\n  script: b\n  needs: [x]\n");

        let report = detect_patterns(&before, &after);
        assert!(!report.improvements.is_empty());
        assert!(report.improvements.iter().all(|diff| !diff.behavioral));
    }
}
