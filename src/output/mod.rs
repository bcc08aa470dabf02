mod progress;
mod styling;

pub use progress::PhaseProgress;

use crate::execution::PipelineComparison;
use crate::validator::RefactoringResult;
use styling::{banner, failed, highlight, muted, passed};

/// Prints the refactor-lens banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        banner("🔍 refactor-lens"),
        muted(env!("CARGO_PKG_VERSION")),
        muted("GitLab CI refactoring validator")
    );
}

/// One-line summary of a comparison, e.g.
/// `4 changes (2 behavioral) · issues -2 · pipeline 6.0s faster · behavior equivalent`.
pub fn verdict_line(result: &RefactoringResult) -> String {
    let changes = &result.actual_changes;
    let behavioral = changes.behavioral_changes().count();

    let mut parts = vec![if changes.has_changes {
        format!("{} changes ({behavioral} behavioral)", changes.total_changes())
    } else {
        passed("no changes").to_string()
    }];

    parts.push(format!("issues {:+}", -result.analysis_improvement));

    if let Some(comparison) = &result.pipeline_comparison {
        parts.push(pipeline_delta(comparison));
    }

    parts.push(match &result.behavioral_validation {
        Some(validation) if validation.behavior_equivalent => passed("behavior equivalent").to_string(),
        Some(_) => failed("behavior differs").to_string(),
        None => muted("behavior not tested").to_string(),
    });

    let mut line = parts.join(" · ");
    if !changes.improvement_tags.is_empty() {
        let tags: Vec<String> = changes
            .improvement_tags
            .iter()
            .map(|tag| highlight(tag).to_string())
            .collect();
        line.push_str(&format!(" [{}]", tags.join(", ")));
    }
    line
}

/// Pipeline duration change in words.
pub fn pipeline_delta(comparison: &PipelineComparison) -> String {
    let change = comparison.performance.pipeline_duration_change;
    if change < 0.0 {
        passed(format!("pipeline {:.1}s faster", -change)).to_string()
    } else if change > 0.0 {
        failed(format!("pipeline {change:.1}s slower")).to_string()
    } else {
        "pipeline duration unchanged".to_string()
    }
}

pub fn print_verdict(result: &RefactoringResult) {
    eprintln!("{}", verdict_line(result));
}
