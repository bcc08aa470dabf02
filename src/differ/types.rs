use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
    Modified,
    Renamed,
}

/// One recorded change between two configuration trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDiff {
    #[serde(rename = "type")]
    pub kind: DiffKind,
    /// Dotted locator into the configuration tree, e.g. `jobs.test.image`
    pub path: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    /// Whether this change can alter pipeline outcome
    pub behavioral: bool,
}

impl ConfigDiff {
    pub fn new(kind: DiffKind, path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            description: description.into(),
            old_value: None,
            new_value: None,
            behavioral: true,
        }
    }

    pub fn values(mut self, old: Option<Value>, new: Option<Value>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub fn behavioral(mut self, behavioral: bool) -> Self {
        self.behavioral = behavioral;
        self
    }
}

/// Categorized change records for one before/after comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub semantic: Vec<ConfigDiff>,
    pub dependencies: Vec<ConfigDiff>,
    pub performance: Vec<ConfigDiff>,
    pub improvements: Vec<ConfigDiff>,
    pub has_changes: bool,
    pub summary: String,
    pub improvement_tags: BTreeSet<String>,
}

/// Improvement records and tags produced by pattern detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternReport {
    pub improvements: Vec<ConfigDiff>,
    pub tags: BTreeSet<String>,
}

impl PatternReport {
    pub(crate) fn record(&mut self, diff: ConfigDiff) {
        self.improvements.push(diff.behavioral(false));
    }

    pub(crate) fn tag(&mut self, tags: &[&str]) {
        self.tags.extend(tags.iter().map(|t| (*t).to_string()));
    }
}

impl DiffResult {
    pub(crate) fn from_buckets(
        semantic: Vec<ConfigDiff>,
        dependencies: Vec<ConfigDiff>,
        performance: Vec<ConfigDiff>,
    ) -> Self {
        let mut result = DiffResult {
            has_changes: !(semantic.is_empty() && dependencies.is_empty() && performance.is_empty()),
            semantic,
            dependencies,
            performance,
            ..DiffResult::default()
        };
        result.summary = result.summarize();
        result
    }

    /// Merges detected improvements into this result and regenerates the summary.
    ///
    /// Improvements never affect `has_changes`.
    pub fn with_improvements(mut self, report: PatternReport) -> Self {
        self.improvements.extend(report.improvements);
        self.improvement_tags.extend(report.tags);
        self.summary = self.summarize();
        self
    }

    pub fn total_changes(&self) -> usize {
        self.semantic.len() + self.dependencies.len() + self.performance.len() + self.improvements.len()
    }

    /// Records across the three change buckets flagged as behavior-altering.
    pub fn behavioral_changes(&self) -> impl Iterator<Item = &ConfigDiff> {
        self.semantic
            .iter()
            .chain(&self.dependencies)
            .chain(&self.performance)
            .filter(|diff| diff.behavioral)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.improvement_tags.contains(tag)
    }

    fn summarize(&self) -> String {
        if !self.has_changes {
            return "No semantic differences found".to_string();
        }

        let mut parts = Vec::new();
        if !self.semantic.is_empty() {
            parts.push("semantic changes");
        }
        if !self.dependencies.is_empty() {
            parts.push("dependency changes");
        }
        if !self.performance.is_empty() {
            parts.push("performance-related changes");
        }
        if !self.improvements.is_empty() {
            parts.push("improvements detected");
        }

        let mut summary = format!("{} ({} total changes)", parts.join(", "), self.total_changes());
        if !self.improvement_tags.is_empty() {
            let tags: Vec<&str> = self.improvement_tags.iter().map(String::as_str).collect();
            summary.push_str(&format!(" [improvements: {}]", tags.join(", ")));
        }
        summary
    }
}
