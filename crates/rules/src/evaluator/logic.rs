//! Three-valued predicate tree walk.

use std::cmp::Ordering;
use std::fmt;

use attest_core::{AttributeValue, Attributes, ValueType};

use crate::compiler::{CompareOp, Leaf, LeafTest, NodeKind, PlanNode};

/// Why a subtree could not be decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    Missing(String),
    Malformed {
        path: String,
        expected: ValueType,
        found: ValueType,
    },
    /// Values of the right type that still have no ordering (NaN).
    Incomparable(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Missing(path) => write!(f, "missing attribute '{path}'"),
            Reason::Malformed { path, expected, found } => {
                write!(f, "malformed attribute '{path}': expected {expected}, found {found}")
            }
            Reason::Incomparable(path) => write!(f, "attribute '{path}' is not comparable"),
        }
    }
}

/// Kleene truth value; `Unknown` carries the first reason encountered.
#[derive(Debug, Clone, PartialEq)]
pub enum Truth {
    True,
    False,
    Unknown(Reason),
}

impl Truth {
    fn from_bool(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    fn not(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            unknown => unknown,
        }
    }
}

pub(crate) fn eval_node(node: &PlanNode, attrs: &Attributes) -> Truth {
    // Decided without walking children when a required path is absent.
    if let Some(missing) = node.required.iter().find(|p| !attrs.contains_key(p.as_str())) {
        return Truth::Unknown(Reason::Missing(missing.clone()));
    }

    match &node.kind {
        NodeKind::And(children) => {
            let mut unknown = None;
            for child in children {
                match eval_node(child, attrs) {
                    Truth::False => return Truth::False,
                    Truth::Unknown(r) => {
                        unknown.get_or_insert(r);
                    }
                    Truth::True => {}
                }
            }
            unknown.map_or(Truth::True, Truth::Unknown)
        }
        NodeKind::Or(children) => {
            let mut unknown = None;
            for child in children {
                match eval_node(child, attrs) {
                    Truth::True => return Truth::True,
                    Truth::Unknown(r) => {
                        unknown.get_or_insert(r);
                    }
                    Truth::False => {}
                }
            }
            unknown.map_or(Truth::False, Truth::Unknown)
        }
        NodeKind::Not(child) => eval_node(child, attrs).not(),
        NodeKind::Leaf(leaf) => eval_leaf(leaf, attrs),
    }
}

fn eval_leaf(leaf: &Leaf, attrs: &Attributes) -> Truth {
    let malformed = |value: &AttributeValue| {
        Truth::Unknown(Reason::Malformed {
            path: leaf.path.clone(),
            expected: leaf.expected,
            found: value.value_type(),
        })
    };

    match (&leaf.test, attrs.get(&leaf.path)) {
        (LeafTest::Present, value) => Truth::from_bool(value.is_some()),
        (LeafTest::Absent, value) => Truth::from_bool(value.is_none()),
        (_, None) => Truth::Unknown(Reason::Missing(leaf.path.clone())),
        (LeafTest::Compare { op, literal }, Some(value)) => match compare(value, literal) {
            Some(Some(ord)) => Truth::from_bool(op.holds(ord)),
            Some(None) => Truth::Unknown(Reason::Incomparable(leaf.path.clone())),
            None => malformed(value),
        },
        (LeafTest::InSet(set), Some(AttributeValue::String(s))) => Truth::from_bool(set.contains(s)),
        (LeafTest::Contains(item), Some(AttributeValue::Set(items))) => {
            Truth::from_bool(items.contains(item))
        }
        (LeafTest::Matches(pattern), Some(AttributeValue::String(s))) => {
            Truth::from_bool(pattern.is_match(s))
        }
        (_, Some(value)) => malformed(value),
    }
}

/// Compare evidence against a compiled literal.
///
/// `None` when the evidence has the wrong type; `Some(None)` when both sides are
/// well typed but unordered. Integer evidence is accepted for float literals.
/// Floats compare exactly.
fn compare(value: &AttributeValue, literal: &AttributeValue) -> Option<Option<Ordering>> {
    use AttributeValue as V;

    let ord = match (value, literal) {
        (V::Integer(a), V::Integer(b)) => Some(a.cmp(b)),
        (V::Float(a), V::Float(b)) => a.partial_cmp(b),
        (V::Integer(a), V::Float(b)) => cmp_integer_float(*a, *b),
        (V::String(a), V::String(b)) => Some(a.cmp(b)),
        (V::Timestamp(a), V::Timestamp(b)) => Some(a.cmp(b)),
        (V::Boolean(a), V::Boolean(b)) => Some(a.cmp(b)),
        // Sets only support equality; any inequality reads as "not equal".
        (V::Set(a), V::Set(b)) => Some(if a == b { Ordering::Equal } else { Ordering::Less }),
        _ => return None,
    };
    Some(ord)
}

/// Order an integer against a float without rounding the integer.
fn cmp_integer_float(a: i64, b: f64) -> Option<Ordering> {
    // 2^63, the first float above every i64.
    const I64_END: f64 = 9_223_372_036_854_775_808.0;

    if b.is_nan() {
        return None;
    }
    if b >= I64_END {
        return Some(Ordering::Less);
    }
    if b < -I64_END {
        return Some(Ordering::Greater);
    }
    let whole = b.trunc();
    // In range and integral, so the cast is exact.
    match a.cmp(&(whole as i64)) {
        Ordering::Equal => whole.partial_cmp(&b),
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_exact_float_semantics() {
        let a = AttributeValue::Float(0.1 + 0.2);
        let b = AttributeValue::Float(0.3);
        assert_ne!(compare(&a, &b), Some(Some(Ordering::Equal)));

        let nan = AttributeValue::Float(f64::NAN);
        assert_eq!(compare(&nan, &b), Some(None));
    }

    #[test]
    fn integer_against_float_does_not_round() {
        let above = AttributeValue::Integer((1 << 53) + 1);
        let literal = AttributeValue::Float(9_007_199_254_740_992.0);
        assert_eq!(compare(&above, &literal), Some(Some(Ordering::Greater)));

        assert_eq!(cmp_integer_float(-5, -5.5), Some(Ordering::Greater));
        assert_eq!(cmp_integer_float(5, 5.5), Some(Ordering::Less));
        assert_eq!(cmp_integer_float(i64::MAX, 9_223_372_036_854_775_808.0), Some(Ordering::Less));
        assert_eq!(cmp_integer_float(i64::MIN, -9_223_372_036_854_775_808.0), Some(Ordering::Equal));
        assert_eq!(cmp_integer_float(0, f64::NEG_INFINITY), Some(Ordering::Greater));
        assert_eq!(cmp_integer_float(0, f64::NAN), None);
    }

    #[test]
    fn compare_rejects_wrong_type() {
        assert_eq!(
            compare(&AttributeValue::String("30".into()), &AttributeValue::Integer(30)),
            None
        );
        assert_eq!(
            compare(&AttributeValue::Integer(30), &AttributeValue::Float(30.0)),
            Some(Some(Ordering::Equal))
        );
    }

    #[test]
    fn not_preserves_unknown() {
        let unknown = Truth::Unknown(Reason::Missing("a".into()));
        assert_eq!(unknown.clone().not(), unknown);
        assert_eq!(Truth::True.not(), Truth::False);
    }

    #[test]
    fn compare_op_table() {
        assert!(CompareOp::Ge.holds(Ordering::Equal));
        assert!(!CompareOp::Gt.holds(Ordering::Equal));
        assert!(CompareOp::Ne.holds(Ordering::Less));
    }
}
