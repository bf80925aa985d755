//! Structured compilation errors with paths and suggestions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a compilation problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Rule id, version or connective shape is invalid.
    InvalidStructure,
    UnknownOperator,
    /// Attribute path is not declared in the catalog.
    UnresolvablePath,
    /// Operator or literal does not fit the attribute's declared type.
    TypeMismatch,
    /// Literal is malformed on its own (bad regex, bad timestamp, missing value).
    InvalidLiteral,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueKind::InvalidStructure => "invalid structure",
            IssueKind::UnknownOperator => "unknown operator",
            IssueKind::UnresolvablePath => "unresolvable attribute path",
            IssueKind::TypeMismatch => "type mismatch",
            IssueKind::InvalidLiteral => "invalid literal",
        };
        f.write_str(s)
    }
}

/// A single problem found while compiling a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileIssue {
    /// Location in the rule document, e.g. `condition.conditions[1].op`.
    pub path: String,
    pub kind: IssueKind,
    pub reason: String,
    /// Optional "did you mean ...?" suggestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl fmt::Display for CompileIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.path, self.reason, self.kind)?;
        if let Some(s) = &self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

/// A rule was rejected. Carries every issue found; nothing is partially compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilationError {
    pub rule_id: String,
    pub issues: Vec<CompileIssue>,
}

impl CompilationError {
    /// First offending path, for one-line reporting.
    pub fn path(&self) -> &str {
        self.issues.first().map(|i| i.path.as_str()).unwrap_or("")
    }

    pub fn has_kind(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }
}

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rule '{}' failed to compile with {} issue(s)",
            self.rule_id,
            self.issues.len()
        )?;
        for issue in &self.issues {
            write!(f, "; {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompilationError {}

/// Issue accumulator threaded through the compiler.
#[derive(Debug, Default)]
pub(crate) struct Issues(Vec<CompileIssue>);

impl Issues {
    pub(crate) fn push(&mut self, path: impl Into<String>, kind: IssueKind, reason: impl Into<String>) {
        self.0.push(CompileIssue {
            path: path.into(),
            kind,
            reason: reason.into(),
            suggestion: None,
        });
    }

    pub(crate) fn push_with_suggestion(
        &mut self,
        path: impl Into<String>,
        kind: IssueKind,
        reason: impl Into<String>,
        suggestion: Option<&str>,
    ) {
        self.0.push(CompileIssue {
            path: path.into(),
            kind,
            reason: reason.into(),
            suggestion: suggestion.map(str::to_string),
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn into_error(self, rule_id: &str) -> CompilationError {
        CompilationError {
            rule_id: rule_id.to_string(),
            issues: self.0,
        }
    }
}
