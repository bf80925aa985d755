//! Wiring for the `attest` binary: evaluation handler and run report.

pub mod handler;
pub mod report;

pub use handler::EvaluationHandler;
pub use report::{DeadLetterSummary, RunReport};
