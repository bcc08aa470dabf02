//! Execution timelines: estimation from configuration and before/after comparison.

pub mod comparator;
pub mod simulator;
pub mod types;

pub use comparator::{ExecutionComparator, Thresholds};
pub use simulator::{CostModel, Simulator};
pub use types::{
    CompareStatus, ComparisonSummary, JobComparison, JobExecution, PerformanceMetrics, PipelineComparison,
    PipelineExecution,
};
