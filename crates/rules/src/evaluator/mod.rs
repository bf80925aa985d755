//! Rule evaluation engine: runs compiled plans against evidence records.
//!
//! Evaluation is a pure function of `(CompiledRule, EvidenceRecord)`; only
//! `evaluated_at` on the resulting [`Finding`] depends on the clock.
//!
//! Missing or malformed evidence produces an `indeterminate` finding with a
//! reason. It never aborts a batch.

mod logic;

use std::borrow::Borrow;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use attest_core::{EvidenceRecord, Finding, FindingStatus};

use crate::compiler::CompiledRule;
use crate::schema::TargetSelector;

pub use logic::{Reason, Truth};

/// Evaluate one rule against one record, stamped with the current time.
pub fn evaluate(rule: &CompiledRule, evidence: &EvidenceRecord) -> Finding {
    evaluate_at(rule, evidence, Utc::now())
}

/// Evaluate with an explicit `evaluated_at`.
pub fn evaluate_at(rule: &CompiledRule, evidence: &EvidenceRecord, at: DateTime<Utc>) -> Finding {
    let truth = decide(rule, evidence);
    let (status, reason) = match truth {
        Truth::True => (FindingStatus::Pass, None),
        Truth::False => (FindingStatus::Fail, None),
        Truth::Unknown(reason) => (FindingStatus::Indeterminate, Some(reason.to_string())),
    };

    Finding {
        rule_id: rule.id.clone(),
        rule_version: rule.version,
        resource_id: evidence.resource_id.clone(),
        evidence_version: evidence.version,
        status,
        severity: rule.severity,
        evaluated_at: at,
        reason,
        remediation_hint: rule.remediation_hint.clone(),
    }
}

/// Raw three-valued outcome of a rule against a record.
pub fn decide(rule: &CompiledRule, evidence: &EvidenceRecord) -> Truth {
    logic::eval_node(&rule.root, &evidence.attributes)
}

/// Evaluate every rule against every record its target selector matches.
///
/// Evidence is grouped once per distinct selector, preserving input order, so
/// each `(rule, record)` pair is evaluated at most once. Duplicate rules
/// (same id and version) and duplicate versioned records are skipped. Output
/// is ordered by rule, then by evidence input order.
pub fn evaluate_batch<R>(rules: &[R], evidence: &[EvidenceRecord]) -> Vec<Finding>
where
    R: Borrow<CompiledRule> + Sync,
{
    let at = Utc::now();
    let evidence = distinct_evidence(evidence);
    let groups = group_by_target(rules, &evidence);

    let mut seen_rules = HashSet::new();
    let work: Vec<(&CompiledRule, &[usize])> = rules
        .iter()
        .map(Borrow::borrow)
        .filter(|rule: &&CompiledRule| seen_rules.insert((rule.id.as_str(), rule.version)))
        .filter_map(|rule| {
            groups
                .iter()
                .find(|(selector, _)| *selector == &rule.target)
                .map(|(_, idx)| (rule, idx.as_slice()))
        })
        .collect();

    work.par_iter()
        .map(|(rule, indices)| {
            indices
                .iter()
                .map(|&i| evaluate_at(rule, evidence[i], at))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

/// Drop repeated `(resource_id, version)` pairs. Unversioned records are kept.
fn distinct_evidence(evidence: &[EvidenceRecord]) -> Vec<&EvidenceRecord> {
    let mut seen = HashSet::new();
    evidence
        .iter()
        .filter(|r| r.version == 0 || seen.insert((r.resource_id.as_str(), r.version)))
        .collect()
}

/// Indices of matching evidence per distinct selector, in first-seen rule order.
fn group_by_target<'a, R: Borrow<CompiledRule>>(
    rules: &'a [R],
    evidence: &[&EvidenceRecord],
) -> Vec<(&'a TargetSelector, Vec<usize>)> {
    let mut groups: Vec<(&TargetSelector, Vec<usize>)> = Vec::new();
    for rule in rules {
        let target = &rule.borrow().target;
        if groups.iter().any(|(s, _)| *s == target) {
            continue;
        }
        let matching = evidence
            .iter()
            .enumerate()
            .filter(|(_, record)| target.matches(record))
            .map(|(i, _)| i)
            .collect();
        groups.push((target, matching));
    }
    groups
}

#[cfg(test)]
mod tests;
