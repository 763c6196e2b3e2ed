//! Evaluation side of the pipeline: declarative test cases (human,
//! LLM-judged, agent/tool-usage), retrieval metrics and run reports.

pub mod agent;
pub mod cases;
pub mod driver;
pub mod judge;
pub mod metrics;
pub mod report;

pub use driver::{EvalSummary, EvaluationDriver};
