//! Syntax tree for handler snippets
//!
//! The tree is produced once per distinct snippet text and shared by every
//! execution of that text, so nodes that closures need to outlive a single
//! run (arrow function bodies) are reference-counted.

use crate::error::Span;
use std::rc::Rc;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Short-circuiting operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Coalesce,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Plus,
    Not,
    Typeof,
}

/// Compound assignment operators; `Assign` is plain `=`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    pub fn binary(self) -> Option<BinOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinOp::Add),
            AssignOp::Sub => Some(BinOp::Sub),
            AssignOp::Mul => Some(BinOp::Mul),
            AssignOp::Div => Some(BinOp::Div),
        }
    }
}

/// A piece of a template string
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

/// Object literal property
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: String,
    pub value: Expr,
}

/// Arrow function definition, shared by every closure created from it
#[derive(Debug, Clone, PartialEq)]
pub struct ArrowFunction {
    pub params: Vec<String>,
    pub body: ArrowBody,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrowBody {
    Expr(Expr),
    Block(Vec<Stmt>),
}

/// Expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64, Span),
    String(String, Span),
    Template(Vec<TemplatePart>, Span),
    Bool(bool, Span),
    Null(Span),
    Undefined(Span),
    Ident(String, Span),
    Array(Vec<Expr>, Span),
    Object(Vec<Property>, Span),
    Unary(UnOp, Box<Expr>, Span),
    Binary(Box<Expr>, BinOp, Box<Expr>, Span),
    Logical(Box<Expr>, LogicalOp, Box<Expr>, Span),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>, Span),
    /// `object.name`, `optional` for `?.`
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
        span: Span,
    },
    Index(Box<Expr>, Box<Expr>, Span),
    Call(Box<Expr>, Vec<Expr>, Span),
    Assign(Box<Expr>, AssignOp, Box<Expr>, Span),
    /// `++x` / `x--`; `delta` is +1 or -1
    Update {
        target: Box<Expr>,
        delta: f64,
        prefix: bool,
        span: Span,
    },
    Arrow(Rc<ArrowFunction>),
    Await(Box<Expr>, Span),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number(_, s)
            | Expr::String(_, s)
            | Expr::Template(_, s)
            | Expr::Bool(_, s)
            | Expr::Null(s)
            | Expr::Undefined(s)
            | Expr::Ident(_, s)
            | Expr::Array(_, s)
            | Expr::Object(_, s)
            | Expr::Unary(_, _, s)
            | Expr::Binary(_, _, _, s)
            | Expr::Logical(_, _, _, s)
            | Expr::Conditional(_, _, _, s)
            | Expr::Index(_, _, s)
            | Expr::Call(_, _, s)
            | Expr::Assign(_, _, _, s)
            | Expr::Await(_, s) => *s,
            Expr::Member { span, .. } | Expr::Update { span, .. } => *span,
            Expr::Arrow(f) => f.span,
        }
    }

    /// Whether this expression may appear on the left of `=`
    pub fn is_assignable(&self) -> bool {
        matches!(self, Expr::Ident(..) | Expr::Member { .. } | Expr::Index(..))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

/// Statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Decl {
        kind: DeclKind,
        name: String,
        init: Option<Expr>,
        span: Span,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        span: Span,
    },
    ForOf {
        kind: DeclKind,
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    Block(Vec<Stmt>, Span),
    Return(Option<Expr>, Span),
    Break(Span),
    Continue(Span),
    Throw(Expr, Span),
    Try {
        body: Vec<Stmt>,
        param: Option<String>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
        span: Span,
    },
    Empty(Span),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Decl { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::For { span, .. }
            | Stmt::ForOf { span, .. }
            | Stmt::Try { span, .. } => *span,
            Stmt::Expr(e) => e.span(),
            Stmt::Block(_, s)
            | Stmt::Return(_, s)
            | Stmt::Break(s)
            | Stmt::Continue(s)
            | Stmt::Throw(_, s)
            | Stmt::Empty(s) => *s,
        }
    }
}

/// A parsed snippet
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
    /// Set when the snippet is a single bare expression; its value is the
    /// snippet's result even without `return`
    pub implicit_value: bool,
    /// Whether the snippet contains an `await` outside nested functions
    pub has_await: bool,
}

/// Read-only traversal over a syntax tree
///
/// Static analyses implement the hooks they care about; `walk_*` drive the
/// recursion.
pub trait Visitor {
    fn enter_expr(&mut self, _expr: &Expr, _depth: usize) {}
    fn enter_stmt(&mut self, _stmt: &Stmt, _depth: usize) {}
}

pub fn walk_program<V: Visitor>(visitor: &mut V, program: &Program) {
    for stmt in &program.body {
        walk_stmt(visitor, stmt, 0);
    }
}

pub fn walk_stmt<V: Visitor>(visitor: &mut V, stmt: &Stmt, depth: usize) {
    visitor.enter_stmt(stmt, depth);
    let inner = depth + 1;
    match stmt {
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                walk_expr(visitor, init, inner);
            }
        }
        Stmt::Expr(e) | Stmt::Throw(e, _) => walk_expr(visitor, e, inner),
        Stmt::Return(e, _) => {
            if let Some(e) = e {
                walk_expr(visitor, e, inner);
            }
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            walk_expr(visitor, cond, inner);
            walk_stmt(visitor, then_branch, inner);
            if let Some(e) = else_branch {
                walk_stmt(visitor, e, inner);
            }
        }
        Stmt::While { cond, body, .. } => {
            walk_expr(visitor, cond, inner);
            walk_stmt(visitor, body, inner);
        }
        Stmt::For {
            init,
            cond,
            update,
            body,
            ..
        } => {
            if let Some(init) = init {
                walk_stmt(visitor, init, inner);
            }
            if let Some(cond) = cond {
                walk_expr(visitor, cond, inner);
            }
            if let Some(update) = update {
                walk_expr(visitor, update, inner);
            }
            walk_stmt(visitor, body, inner);
        }
        Stmt::ForOf { iterable, body, .. } => {
            walk_expr(visitor, iterable, inner);
            walk_stmt(visitor, body, inner);
        }
        Stmt::Block(stmts, _) => {
            for s in stmts {
                walk_stmt(visitor, s, inner);
            }
        }
        Stmt::Try {
            body,
            handler,
            finalizer,
            ..
        } => {
            for s in body
                .iter()
                .chain(handler.iter().flatten())
                .chain(finalizer.iter().flatten())
            {
                walk_stmt(visitor, s, inner);
            }
        }
        Stmt::Break(_) | Stmt::Continue(_) | Stmt::Empty(_) => {}
    }
}

pub fn walk_expr<V: Visitor>(visitor: &mut V, expr: &Expr, depth: usize) {
    visitor.enter_expr(expr, depth);
    let inner = depth + 1;
    match expr {
        Expr::Number(..)
        | Expr::String(..)
        | Expr::Bool(..)
        | Expr::Null(_)
        | Expr::Undefined(_)
        | Expr::Ident(..) => {}
        Expr::Template(parts, _) => {
            for part in parts {
                if let TemplatePart::Expr(e) = part {
                    walk_expr(visitor, e, inner);
                }
            }
        }
        Expr::Array(items, _) => {
            for item in items {
                walk_expr(visitor, item, inner);
            }
        }
        Expr::Object(props, _) => {
            for prop in props {
                walk_expr(visitor, &prop.value, inner);
            }
        }
        Expr::Unary(_, e, _) | Expr::Await(e, _) => walk_expr(visitor, e, inner),
        Expr::Binary(l, _, r, _) | Expr::Logical(l, _, r, _) | Expr::Assign(l, _, r, _) => {
            walk_expr(visitor, l, inner);
            walk_expr(visitor, r, inner);
        }
        Expr::Index(l, r, _) => {
            walk_expr(visitor, l, inner);
            walk_expr(visitor, r, inner);
        }
        Expr::Conditional(c, t, e, _) => {
            walk_expr(visitor, c, inner);
            walk_expr(visitor, t, inner);
            walk_expr(visitor, e, inner);
        }
        Expr::Member { object, .. } => walk_expr(visitor, object, inner),
        Expr::Call(callee, args, _) => {
            walk_expr(visitor, callee, inner);
            for arg in args {
                walk_expr(visitor, arg, inner);
            }
        }
        Expr::Update { target, .. } => walk_expr(visitor, target, inner),
        Expr::Arrow(f) => match &f.body {
            ArrowBody::Expr(e) => walk_expr(visitor, e, inner),
            ArrowBody::Block(stmts) => {
                for s in stmts {
                    walk_stmt(visitor, s, inner);
                }
            }
        },
    }
}
