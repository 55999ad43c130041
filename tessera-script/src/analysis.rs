//! Static checks run before a snippet is simulated
//!
//! All three passes walk the syntax tree only; nothing is evaluated.

use crate::ast::{walk_program, Expr, LogicalOp, Program, Stmt, Visitor};
use crate::error::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifiers that give access to code loading or the host process
pub const DENIED_IDENTIFIERS: &[&str] = &[
    "eval",
    "Function",
    "require",
    "import",
    "process",
    "globalThis",
    "__proto__",
];

/// Member names that reach object internals
pub const DENIED_MEMBERS: &[&str] = &["constructor", "prototype", "__proto__"];

/// Names that only make sense inside a live client
pub const CLIENT_ONLY_IDENTIFIERS: &[&str] = &[
    "setTimeout",
    "setInterval",
    "requestAnimationFrame",
    "window",
    "document",
    "localStorage",
    "sessionStorage",
    "navigator",
    "alert",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("Disallowed construct '{construct}' at {span:?}")]
    Validation { construct: String, span: Span },

    #[error("Snippet exceeds {metric} limit ({actual} > {limit})")]
    ComplexityExceeded {
        metric: Metric,
        actual: usize,
        limit: usize,
    },

    #[error("Snippet is client-only: {reason}")]
    ClientOnly { reason: String },
}

/// A bounded property of a snippet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Nodes,
    Branches,
    Loops,
    Depth,
    SourceBytes,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::Nodes => "node count",
            Metric::Branches => "branch count",
            Metric::Loops => "loop count",
            Metric::Depth => "nesting depth",
            Metric::SourceBytes => "source size",
        })
    }
}

/// Upper bounds enforced on simulated snippets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityLimits {
    pub max_nodes: usize,
    pub max_branches: usize,
    pub max_loops: usize,
    pub max_depth: usize,
    pub max_source_bytes: usize,
}

impl Default for ComplexityLimits {
    fn default() -> Self {
        Self {
            max_nodes: 2000,
            max_branches: 64,
            max_loops: 16,
            max_depth: 24,
            max_source_bytes: 10_000,
        }
    }
}

/// Measured size of a snippet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Complexity {
    pub nodes: usize,
    pub branches: usize,
    pub loops: usize,
    pub depth: usize,
    pub source_bytes: usize,
}

impl Complexity {
    /// First metric over its limit, in a fixed order
    pub fn check(&self, limits: &ComplexityLimits) -> Result<(), AnalysisError> {
        let checks = [
            (Metric::SourceBytes, self.source_bytes, limits.max_source_bytes),
            (Metric::Nodes, self.nodes, limits.max_nodes),
            (Metric::Branches, self.branches, limits.max_branches),
            (Metric::Loops, self.loops, limits.max_loops),
            (Metric::Depth, self.depth, limits.max_depth),
        ];
        for (metric, actual, limit) in checks {
            if actual > limit {
                return Err(AnalysisError::ComplexityExceeded {
                    metric,
                    actual,
                    limit,
                });
            }
        }
        Ok(())
    }
}

/// Whether a snippet can run outside a live client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    Universal,
    ClientOnly { reason: String },
}

impl Classification {
    pub fn is_client_only(&self) -> bool {
        matches!(self, Classification::ClientOnly { .. })
    }
}

struct Validator {
    violation: Option<(String, Span)>,
}

impl Visitor for Validator {
    fn enter_expr(&mut self, expr: &Expr, _depth: usize) {
        if self.violation.is_some() {
            return;
        }
        match expr {
            Expr::Ident(name, span) if DENIED_IDENTIFIERS.contains(&name.as_str()) => {
                self.violation = Some((name.clone(), *span));
            }
            Expr::Member { property, span, .. } if DENIED_MEMBERS.contains(&property.as_str()) => {
                self.violation = Some((format!(".{}", property), *span));
            }
            Expr::Index(_, index, span) => {
                if let Expr::String(key, _) = index.as_ref() {
                    if DENIED_MEMBERS.contains(&key.as_str()) {
                        self.violation = Some((format!("[\"{}\"]", key), *span));
                    }
                }
            }
            _ => {}
        }
    }

    fn enter_stmt(&mut self, stmt: &Stmt, _depth: usize) {
        if self.violation.is_some() {
            return;
        }
        if let Stmt::Decl { name, span, .. } = stmt {
            if DENIED_IDENTIFIERS.contains(&name.as_str()) {
                self.violation = Some((name.clone(), *span));
            }
        }
    }
}

/// Reject constructs that escape the snippet sandbox
pub fn validate(program: &Program) -> Result<(), AnalysisError> {
    let mut validator = Validator { violation: None };
    walk_program(&mut validator, program);
    match validator.violation {
        Some((construct, span)) => Err(AnalysisError::Validation { construct, span }),
        None => Ok(()),
    }
}

#[derive(Default)]
struct Meter {
    complexity: Complexity,
}

impl Visitor for Meter {
    fn enter_expr(&mut self, expr: &Expr, depth: usize) {
        let c = &mut self.complexity;
        c.nodes += 1;
        c.depth = c.depth.max(depth + 1);
        match expr {
            Expr::Conditional(..) => c.branches += 1,
            Expr::Logical(_, LogicalOp::And | LogicalOp::Or | LogicalOp::Coalesce, _, _) => {
                c.branches += 1
            }
            Expr::Member { optional: true, .. } => c.branches += 1,
            _ => {}
        }
    }

    fn enter_stmt(&mut self, stmt: &Stmt, depth: usize) {
        let c = &mut self.complexity;
        c.nodes += 1;
        c.depth = c.depth.max(depth + 1);
        match stmt {
            Stmt::If { .. } => c.branches += 1,
            Stmt::While { .. } | Stmt::For { .. } | Stmt::ForOf { .. } => {
                c.loops += 1;
                c.branches += 1;
            }
            Stmt::Try {
                handler: Some(_), ..
            } => c.branches += 1,
            _ => {}
        }
    }
}

/// Measure a snippet; `source` is the text it was parsed from
pub fn measure(program: &Program, source: &str) -> Complexity {
    let mut meter = Meter::default();
    walk_program(&mut meter, program);
    Complexity {
        source_bytes: source.len(),
        ..meter.complexity
    }
}

struct Classifier {
    reason: Option<String>,
}

impl Visitor for Classifier {
    fn enter_expr(&mut self, expr: &Expr, _depth: usize) {
        if self.reason.is_some() {
            return;
        }
        if let Expr::Ident(name, _) = expr {
            if CLIENT_ONLY_IDENTIFIERS.contains(&name.as_str()) {
                self.reason = Some(format!("references '{}'", name));
            }
        }
    }
}

/// Mark snippets relying on display-bound constructs
pub fn classify(program: &Program) -> Classification {
    let mut classifier = Classifier { reason: None };
    walk_program(&mut classifier, program);
    match classifier.reason {
        Some(reason) => Classification::ClientOnly { reason },
        None => Classification::Universal,
    }
}
