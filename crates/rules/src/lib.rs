//! Declarative compliance rules: YAML schema, compiler, compiled-rule cache,
//! and the evaluation engine.
//!
//! This crate provides:
//! - YAML rule documents and the attribute catalog they are typed against
//! - A pure compiler producing annotated predicate trees
//! - Three-valued evaluation (pass / fail / indeterminate), single and batch
//! - A copy-on-write rule cache keyed by `(id, version)`
//! - A filesystem loader with hot-reload via `notify`

pub mod cache;
pub mod compiler;
pub mod evaluator;
pub mod loader;
pub mod schema;

pub use cache::{InstallOutcome, RuleCache, RuleSet};
pub use compiler::{compile, CompilationError, CompiledRule};
pub use evaluator::{evaluate, evaluate_at, evaluate_batch};
pub use loader::{LoadResult, LoadStatus, RuleError, RuleLoader};
pub use schema::{AttributeCatalog, ConditionNode, RuleDefinition, TargetSelector};
