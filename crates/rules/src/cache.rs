//! Compiled-rule cache keyed by `(rule id, version)`.
//!
//! Readers take an `Arc<RuleSet>` snapshot and keep it as long as they like.
//! Installs compile outside the lock and swap in a new snapshot, so in-flight
//! readers never observe a partially updated set.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::compiler::{compile, CompiledRule};
use crate::loader::{Result, RuleError};
use crate::schema::{AttributeCatalog, RuleDefinition};

/// Active compiled rules, latest version per id.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: BTreeMap<String, Arc<CompiledRule>>,
}

impl RuleSet {
    pub fn get(&self, id: &str) -> Option<&Arc<CompiledRule>> {
        self.rules.get(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledRule>> {
        self.rules.values()
    }

    /// Rules whose dependency set contains `path`.
    pub fn reading<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Arc<CompiledRule>> + 'a {
        self.rules.values().filter(move |r| r.reads(path))
    }
}

/// Outcome of [`RuleCache::install`].
#[derive(Debug, Clone, PartialEq)]
pub enum InstallOutcome {
    /// First version of this rule id.
    Added(Arc<CompiledRule>),
    /// Replaced an older version.
    Upgraded { previous: u32, rule: Arc<CompiledRule> },
    /// Same version already active; the cached artifact is returned untouched.
    Unchanged(Arc<CompiledRule>),
}

impl InstallOutcome {
    pub fn rule(&self) -> &Arc<CompiledRule> {
        match self {
            InstallOutcome::Added(rule)
            | InstallOutcome::Upgraded { rule, .. }
            | InstallOutcome::Unchanged(rule) => rule,
        }
    }
}

/// Read-mostly, copy-on-write store of compiled rules.
pub struct RuleCache {
    catalog: Arc<AttributeCatalog>,
    current: RwLock<Arc<RuleSet>>,
}

impl RuleCache {
    pub fn new(catalog: AttributeCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            current: RwLock::new(Arc::new(RuleSet::default())),
        }
    }

    pub fn catalog(&self) -> &AttributeCatalog {
        &self.catalog
    }

    /// Current snapshot. Cheap; later installs do not affect it.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read().expect("rule cache lock poisoned"))
    }

    pub fn get(&self, id: &str) -> Option<Arc<CompiledRule>> {
        self.snapshot().get(id).cloned()
    }

    /// Active rules that read `path`, for change-impact analysis.
    pub fn rules_reading(&self, path: &str) -> Vec<Arc<CompiledRule>> {
        self.snapshot().reading(path).cloned().collect()
    }

    /// Compile and activate `definition`.
    ///
    /// Re-installing the active version is a no-op. A version lower than the
    /// active one is rejected with [`RuleError::Superseded`].
    pub fn install(&self, definition: &RuleDefinition) -> Result<InstallOutcome> {
        if let Some(active) = self.get(&definition.id) {
            if let Some(outcome) = check_version(&active, definition)? {
                return Ok(outcome);
            }
        }

        let compiled = Arc::new(compile(definition, &self.catalog)?);

        let mut guard = self.current.write().expect("rule cache lock poisoned");
        // Another writer may have installed while we compiled.
        let previous = match guard.get(&definition.id) {
            Some(active) => {
                if let Some(outcome) = check_version(active, definition)? {
                    return Ok(outcome);
                }
                Some(active.version)
            }
            None => None,
        };

        let mut next = RuleSet::clone(&guard);
        next.rules.insert(definition.id.clone(), Arc::clone(&compiled));
        *guard = Arc::new(next);
        drop(guard);

        info!(
            rule_id = %definition.id,
            version = definition.version,
            dependencies = compiled.dependencies.len(),
            "installed compiled rule"
        );

        Ok(match previous {
            Some(previous) => InstallOutcome::Upgraded {
                previous,
                rule: compiled,
            },
            None => InstallOutcome::Added(compiled),
        })
    }

    /// Deactivate a rule. Returns the removed artifact, if any.
    pub fn remove(&self, id: &str) -> Option<Arc<CompiledRule>> {
        let mut guard = self.current.write().expect("rule cache lock poisoned");
        guard.get(id)?;
        let mut next = RuleSet::clone(&guard);
        let removed = next.rules.remove(id);
        *guard = Arc::new(next);
        info!(rule_id = %id, "removed compiled rule");
        removed
    }
}

/// `Some` when the install can be answered without compiling.
fn check_version(
    active: &Arc<CompiledRule>,
    definition: &RuleDefinition,
) -> Result<Option<InstallOutcome>> {
    if definition.version == active.version {
        debug!(rule_id = %definition.id, version = definition.version, "rule version already active");
        return Ok(Some(InstallOutcome::Unchanged(Arc::clone(active))));
    }
    if definition.version < active.version {
        return Err(RuleError::Superseded {
            id: definition.id.clone(),
            version: definition.version,
            current: active.version,
        });
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{Severity, ValueType};
    use crate::schema::ConditionNode;

    fn cache() -> RuleCache {
        RuleCache::new(
            AttributeCatalog::new()
                .with("encryption.enabled", ValueType::Boolean)
                .with("public", ValueType::Boolean),
        )
    }

    fn def(id: &str, version: u32, attr: &str) -> RuleDefinition {
        RuleDefinition::new(
            id,
            version,
            ConditionNode::predicate(attr, "equals", Some(serde_yaml::Value::Bool(true))),
            Severity::High,
        )
    }

    #[test]
    fn install_then_reinstall_is_noop() {
        let cache = cache();
        let first = cache.install(&def("r1", 1, "public")).unwrap();
        assert!(matches!(first, InstallOutcome::Added(_)));

        let again = cache.install(&def("r1", 1, "public")).unwrap();
        match again {
            InstallOutcome::Unchanged(rule) => assert!(Arc::ptr_eq(&rule, first.rule())),
            other => panic!("expected unchanged, got {other:?}"),
        }
    }

    #[test]
    fn version_bump_replaces_and_old_snapshot_is_untouched() {
        let cache = cache();
        cache.install(&def("r1", 1, "public")).unwrap();
        let before = cache.snapshot();

        let outcome = cache.install(&def("r1", 2, "encryption.enabled")).unwrap();
        assert!(matches!(outcome, InstallOutcome::Upgraded { previous: 1, .. }));

        assert_eq!(before.get("r1").unwrap().version, 1);
        assert_eq!(cache.get("r1").unwrap().version, 2);
    }

    #[test]
    fn lower_version_is_superseded() {
        let cache = cache();
        cache.install(&def("r1", 3, "public")).unwrap();
        let err = cache.install(&def("r1", 2, "public")).unwrap_err();
        assert!(matches!(
            err,
            RuleError::Superseded { version: 2, current: 3, .. }
        ));
    }

    #[test]
    fn compilation_error_leaves_cache_unchanged() {
        let cache = cache();
        cache.install(&def("r1", 1, "public")).unwrap();
        let err = cache.install(&def("r1", 2, "publik")).unwrap_err();
        assert!(matches!(err, RuleError::Compilation(_)));
        assert_eq!(cache.get("r1").unwrap().version, 1);
    }

    #[test]
    fn change_impact_lookup() {
        let cache = cache();
        cache.install(&def("a", 1, "public")).unwrap();
        cache.install(&def("b", 1, "encryption.enabled")).unwrap();
        cache.install(&def("c", 1, "public")).unwrap();

        let ids: Vec<String> = cache
            .rules_reading("public")
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);

        assert!(cache.remove("a").is_some());
        assert!(cache.remove("a").is_none());
        assert_eq!(cache.snapshot().len(), 2);
    }
}
