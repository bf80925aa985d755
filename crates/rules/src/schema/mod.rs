//! Rule document schema types with serde deserialization.
//!
//! Defines the authoring-side type hierarchy:
//! - `RuleDefinition`: a versioned compliance rule document
//! - `ConditionNode`: the nested boolean/comparison tree, untagged so leaves
//!   and groups read naturally in YAML
//! - `TargetSelector`: which resources/sources a rule applies to
//! - `AttributeCatalog`: declared types of evidence attribute paths
//!
//! Nothing here is validated beyond shape; the compiler owns semantics.

mod catalog;
mod condition;
mod definition;
mod target;

pub use catalog::*;
pub use condition::*;
pub use definition::*;
pub use target::*;

#[cfg(test)]
mod tests;
