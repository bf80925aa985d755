//! Declared attribute types for evidence paths.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use attest_core::ValueType;

/// Maps attribute paths to their declared types.
///
/// A rule may only read paths declared here; anything else is unresolvable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AttributeCatalog {
    #[serde(default)]
    pub attributes: BTreeMap<String, ValueType>,
}

impl AttributeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style declaration.
    pub fn with(mut self, path: impl Into<String>, ty: ValueType) -> Self {
        self.declare(path, ty);
        self
    }

    pub fn declare(&mut self, path: impl Into<String>, ty: ValueType) {
        self.attributes.insert(path.into(), ty);
    }

    pub fn get(&self, path: &str) -> Option<ValueType> {
        self.attributes.get(path).copied()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.attributes.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn load(path: &Path) -> crate::loader::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&contents)?)
    }
}
