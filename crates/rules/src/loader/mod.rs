//! Filesystem rule loader with hot-reload via `notify` watcher.
//!
//! Every YAML file under the rules directory is compiled into the shared
//! [`RuleCache`](crate::cache::RuleCache). Changes are picked up by the
//! watcher; deleting a file evicts its rule.

mod core;
mod error;
mod watcher;

#[cfg(test)]
mod tests;

pub use self::core::RuleLoader;
pub use self::error::{LoadResult, LoadStatus, Result, RuleError};
