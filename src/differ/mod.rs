//! Structural comparison of two configuration trees and refactoring-pattern tagging.

pub mod compare;
pub mod patterns;
pub mod types;

pub use compare::compare;
pub use patterns::detect_patterns;
pub use types::{ConfigDiff, DiffKind, DiffResult, PatternReport};

use crate::pipeline::PipelineConfig;

/// Diffs two configurations and merges the detected improvement patterns into the result.
pub fn analyze(before: &PipelineConfig, after: &PipelineConfig) -> DiffResult {
    compare(before, after).with_improvements(detect_patterns(before, after))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_combines_diff_and_patterns() {
        let before = PipelineConfig::from_yaml_str(
            "build:\n  image: node:16\n  script: b\ntest:\n  image: node:16\n  script: t\n",
        )
        .unwrap();
        let after = PipelineConfig::from_yaml_str(
            "default:\n  image: node:16\nbuild:\n  script: b\ntest:\n  script: t\n",
        )
        .unwrap();

        let result = analyze(&before, &after);

        assert!(result.has_changes);
        assert_eq!(result.performance.len(), 2, "both jobs lost their image");
        assert!(result.has_tag("consolidation"));
        assert!(
            result.summary.ends_with("[improvements: consolidation, duplication]"),
            "got: {}",
            result.summary
        );
    }
}
