//! Executable evaluation plan produced by the compiler.

use std::collections::BTreeSet;
use std::fmt;

use attest_core::{AttributeValue, Severity, ValueType};

use crate::schema::TargetSelector;

/// Validated, immutable form of a [`RuleDefinition`](crate::schema::RuleDefinition).
///
/// Structurally equal for identical input definitions and catalogs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub id: String,
    pub version: u32,
    pub title: Option<String>,
    pub target: TargetSelector,
    pub severity: Severity,
    pub remediation_hint: Option<String>,
    pub root: PlanNode,
    /// Every attribute path reachable in the condition tree.
    pub dependencies: BTreeSet<String>,
}

impl CompiledRule {
    /// Paths whose absence decides the whole rule as indeterminate.
    pub fn required(&self) -> &BTreeSet<String> {
        &self.root.required
    }

    /// Whether any evidence could make this rule indeterminate.
    pub fn can_be_indeterminate(&self) -> bool {
        self.root.may_be_indeterminate
    }

    pub fn reads(&self, path: &str) -> bool {
        self.dependencies.contains(path)
    }

    pub fn key(&self) -> (&str, u32) {
        (&self.id, self.version)
    }
}

/// A node of the predicate tree with its short-circuit annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub kind: NodeKind,
    /// Attribute paths read anywhere in this subtree.
    pub reads: BTreeSet<String>,
    /// Paths that, when absent, force this subtree to indeterminate no matter
    /// what the remaining evidence says.
    pub required: BTreeSet<String>,
    pub may_be_indeterminate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    And(Vec<PlanNode>),
    Or(Vec<PlanNode>),
    Not(Box<PlanNode>),
    Leaf(Leaf),
}

impl PlanNode {
    pub(crate) fn leaf(leaf: Leaf) -> Self {
        let reads = BTreeSet::from([leaf.path.clone()]);
        let existence = matches!(leaf.test, LeafTest::Present | LeafTest::Absent);
        let required = if existence { BTreeSet::new() } else { reads.clone() };
        Self {
            kind: NodeKind::Leaf(leaf),
            reads,
            required,
            may_be_indeterminate: !existence,
        }
    }

    pub(crate) fn and(children: Vec<PlanNode>) -> Self {
        let (reads, required, may) = combine(&children);
        Self {
            kind: NodeKind::And(children),
            reads,
            required,
            may_be_indeterminate: may,
        }
    }

    pub(crate) fn or(children: Vec<PlanNode>) -> Self {
        let (reads, required, may) = combine(&children);
        Self {
            kind: NodeKind::Or(children),
            reads,
            required,
            may_be_indeterminate: may,
        }
    }

    pub(crate) fn not(child: PlanNode) -> Self {
        Self {
            reads: child.reads.clone(),
            required: child.required.clone(),
            may_be_indeterminate: child.may_be_indeterminate,
            kind: NodeKind::Not(Box::new(child)),
        }
    }
}

/// A path is required by a connective only if every child requires it:
/// otherwise a sibling may still decide the outcome.
fn combine(children: &[PlanNode]) -> (BTreeSet<String>, BTreeSet<String>, bool) {
    let mut reads = BTreeSet::new();
    let mut required: Option<BTreeSet<String>> = None;
    let mut may = false;

    for child in children {
        reads.extend(child.reads.iter().cloned());
        required = Some(match required {
            None => child.required.clone(),
            Some(acc) => acc.intersection(&child.required).cloned().collect(),
        });
        may |= child.may_be_indeterminate;
    }

    (reads, required.unwrap_or_default(), may)
}

/// Leaf comparison against a single attribute path.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub path: String,
    /// Declared type of the attribute, from the catalog.
    pub expected: ValueType,
    pub test: LeafTest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeafTest {
    Compare { op: CompareOp, literal: AttributeValue },
    InSet(BTreeSet<String>),
    Contains(String),
    Matches(Pattern),
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn is_ordering(self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    pub fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ord == Equal,
            CompareOp::Ne => ord != Equal,
            CompareOp::Gt => ord == Greater,
            CompareOp::Ge => ord != Less,
            CompareOp::Lt => ord == Less,
            CompareOp::Le => ord != Greater,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        };
        f.write_str(s)
    }
}

/// Regular expression compared by source text.
#[derive(Debug, Clone)]
pub struct Pattern(regex::Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        regex::Regex::new(source).map(Pattern)
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.0.is_match(haystack)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Canonical leaf operators accepted in rule documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Compare(CompareOp),
    In,
    Contains,
    Matches,
    Present,
    Absent,
}

impl Operator {
    /// Spellings accepted in rule documents, aliases included.
    pub const NAMES: &'static [&'static str] = &[
        "equals",
        "not_equals",
        "greater_than",
        "greater_or_equal",
        "less_than",
        "less_or_equal",
        "in",
        "contains",
        "matches",
        "present",
        "absent",
        "eq",
        "ne",
        "gt",
        "gte",
        "lt",
        "lte",
    ];

    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "equals" | "eq" => Operator::Compare(CompareOp::Eq),
            "not_equals" | "ne" => Operator::Compare(CompareOp::Ne),
            "greater_than" | "gt" => Operator::Compare(CompareOp::Gt),
            "greater_or_equal" | "gte" => Operator::Compare(CompareOp::Ge),
            "less_than" | "lt" => Operator::Compare(CompareOp::Lt),
            "less_or_equal" | "lte" => Operator::Compare(CompareOp::Le),
            "in" => Operator::In,
            "contains" => Operator::Contains,
            "matches" => Operator::Matches,
            "present" => Operator::Present,
            "absent" => Operator::Absent,
            _ => return None,
        };
        Some(op)
    }

    pub fn takes_value(self) -> bool {
        !matches!(self, Operator::Present | Operator::Absent)
    }
}
