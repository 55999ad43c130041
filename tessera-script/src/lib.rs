//! # Tessera snippet language
//!
//! Handler snippets are small JavaScript-flavoured programs attached to
//! component properties. This crate turns snippet text into reusable
//! [`CompiledUnit`]s and evaluates them against an [`Environment`]
//! supplied by the runtime:
//! - `logos` lexer and recursive-descent parser producing an AST
//! - text-keyed [`UnitCache`] (identical text, identical unit)
//! - static [`analysis`] used before simulated runs
//! - async tree-walking [`Interpreter`] that can suspend at `await`
//!
//! ## Example
//!
//! ```
//! use tessera_script::{run, Value};
//!
//! assert_eq!(run("return 1 + 1").unwrap(), Value::Number(2.0));
//! ```

pub mod analysis;
pub mod ast;
pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod unit;
pub mod value;

#[cfg(test)]
mod tests;

pub use analysis::{
    classify, measure, validate, AnalysisError, Classification, Complexity, ComplexityLimits,
    Metric,
};
pub use ast::{Expr, Program, Stmt, Visitor};
pub use error::{ErrorContext, Result, ScriptError};
pub use interpreter::{
    Assignment, Closure, EmptyEnvironment, Environment, ExecutionLimits, Interpreter,
};
pub use lexer::{tokenize, SpannedToken, Token};
pub use parser::{parse, parse_source, Parser};
pub use unit::{CacheStats, CompileError, CompiledUnit, UnitCache};
pub use value::{NativeFn, Promise, Value, MAX_ARRAY_LENGTH, MAX_STRING_LENGTH};

pub use tessera_types::Span;

use std::rc::Rc;

/// Compile and run a snippet with no runtime attached
///
/// Snippets that suspend on a pending future are driven to completion on
/// the current thread.
pub fn run(text: &str) -> std::result::Result<Value, ScriptError> {
    let unit = Rc::new(CompiledUnit::compile(text).map_err(|e| e.error)?);
    futures::executor::block_on(unit.execute(Rc::new(EmptyEnvironment), ExecutionLimits::default()))
}
