//! Tree-walking evaluator for handler snippets
//!
//! Identifiers are resolved in this order: locals declared inside the
//! snippet (including arrow function parameters), then the [`Environment`]
//! the snippet runs against, then the built-in library. Assignments to
//! names nobody owns define a snippet-level local.
//!
//! Evaluation is asynchronous so a snippet can suspend at `await` and
//! resume at exactly that point later. A snippet without any pending
//! future completes on its first poll.

use crate::ast::{
    ArrowBody, ArrowFunction, AssignOp, BinOp, DeclKind, Expr, LogicalOp, Program, Stmt,
    TemplatePart, UnOp,
};
use crate::builtins;
use crate::error::{Result, ScriptError, Span};
use crate::value::{NativeFn, Promise, Value, MAX_ARRAY_LENGTH};
use futures::future::{FutureExt, LocalBoxFuture};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tessera_types::ComponentId;

/// Maximum nesting of snippet function calls
const MAX_CALL_DEPTH: usize = 128;

/// Outcome of writing a name through an [`Environment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// The environment stored the value
    Applied,
    /// The environment owns the name but refuses writes (reserved names)
    Ignored,
    /// The environment does not own the name
    Unowned,
}

/// The identifier surface a snippet runs against
///
/// `contains` must be answerable without resolving the name, so callers can
/// test ownership before paying for a lookup.
pub trait Environment {
    fn contains(&self, name: &str) -> bool;

    fn lookup(&self, name: &str) -> Result<Option<Value>>;

    fn assign(&self, name: &str, value: Value) -> Result<Assignment>;

    /// Read a property of a component view
    fn get_member(&self, component: &ComponentId, property: &str) -> Result<Value>;

    /// Write a property of a component view
    fn set_member(&self, component: &ComponentId, property: &str, value: Value) -> Result<()>;

    /// Invoke a runtime API operation by name
    fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value>;
}

/// An environment that owns no names
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyEnvironment;

impl Environment for EmptyEnvironment {
    fn contains(&self, _name: &str) -> bool {
        false
    }

    fn lookup(&self, _name: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    fn assign(&self, _name: &str, _value: Value) -> Result<Assignment> {
        Ok(Assignment::Unowned)
    }

    fn get_member(&self, component: &ComponentId, _property: &str) -> Result<Value> {
        Err(ScriptError::host("getComponent", format!("unknown component {}", component)))
    }

    fn set_member(&self, component: &ComponentId, _property: &str, _value: Value) -> Result<()> {
        Err(ScriptError::host("setComponentValue", format!("unknown component {}", component)))
    }

    fn call(&self, operation: &str, _args: Vec<Value>) -> Result<Value> {
        Err(ScriptError::host(operation, "no runtime API is available"))
    }
}

struct Binding {
    value: Value,
    mutable: bool,
}

/// Lexical frame of snippet-local bindings
pub struct Frame {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Frame>>,
}

pub type FrameRef = Rc<Frame>;

impl Frame {
    pub fn root() -> FrameRef {
        Rc::new(Frame {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &FrameRef) -> FrameRef {
        Rc::new(Frame {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// `None` when no frame binds `name`, `Some(false)` for a constant
    fn assign(&self, name: &str, value: Value) -> Option<bool> {
        if let Some(binding) = self.vars.borrow_mut().get_mut(name) {
            if !binding.mutable {
                return Some(false);
            }
            binding.value = value;
            return Some(true);
        }
        self.parent.as_ref().and_then(|p| p.assign(name, value))
    }

    fn outermost(frame: &FrameRef) -> FrameRef {
        let mut current = frame.clone();
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }
}

/// An arrow function value together with the frame it closed over
pub struct Closure {
    pub(crate) function: Rc<ArrowFunction>,
    pub(crate) frame: FrameRef,
}

impl Closure {
    pub fn params(&self) -> &[String] {
        &self.function.params
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({})", self.function.params.join(", "))
    }
}

/// Limits applied to a single run
#[derive(Debug, Clone, Default)]
pub struct ExecutionLimits {
    /// Wall-clock budget, checked at loop iterations and calls
    pub timeout: Option<Duration>,
}

impl ExecutionLimits {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Non-local exit: a host-level error or a value thrown by the snippet
enum Unwind {
    Error(ScriptError),
    Throw(Value),
}

impl From<ScriptError> for Unwind {
    fn from(err: ScriptError) -> Self {
        Unwind::Error(err)
    }
}

impl Unwind {
    fn into_error(self) -> ScriptError {
        match self {
            Unwind::Error(err) => err,
            Unwind::Throw(value) => ScriptError::Thrown {
                message: thrown_message(&value),
            },
        }
    }

    fn is_catchable(&self) -> bool {
        match self {
            Unwind::Error(err) => err.is_catchable(),
            Unwind::Throw(_) => true,
        }
    }

    /// The value a `catch (e)` clause binds
    fn into_value(self) -> Value {
        match self {
            Unwind::Throw(value) => value,
            Unwind::Error(err) => {
                let name = match err {
                    ScriptError::TypeError { .. } => "TypeError",
                    ScriptError::UnboundIdentifier { .. } => "ReferenceError",
                    _ => "Error",
                };
                let mut entries = IndexMap::new();
                entries.insert("name".to_string(), Value::string(name));
                entries.insert("message".to_string(), Value::string(err.message()));
                Value::object(entries)
            }
        }
    }
}

fn thrown_message(value: &Value) -> String {
    if let Value::Object(entries) = value {
        if let Some(message) = entries.borrow().get("message") {
            return message.to_display_string();
        }
    }
    value.to_display_string()
}

type Eval<T> = std::result::Result<T, Unwind>;

/// Evaluator for one snippet run
pub struct Interpreter {
    env: Rc<dyn Environment>,
    limits: ExecutionLimits,
    started: Instant,
    steps: u64,
    call_depth: usize,
    /// Futures started by the snippet that it did not await itself
    detached: Vec<Promise>,
}

impl Interpreter {
    pub fn new(env: Rc<dyn Environment>) -> Self {
        Self::with_limits(env, ExecutionLimits::default())
    }

    pub fn with_limits(env: Rc<dyn Environment>, limits: ExecutionLimits) -> Self {
        Self {
            env,
            limits,
            started: Instant::now(),
            steps: 0,
            call_depth: 0,
            detached: Vec::new(),
        }
    }

    /// Run a parsed snippet to completion
    ///
    /// Futures the snippet started without awaiting are driven to
    /// completion before the run finishes; their failures are logged, not
    /// propagated.
    pub async fn run(&mut self, program: &Program) -> Result<Value> {
        self.started = Instant::now();
        let frame = Frame::root();

        let outcome = if program.implicit_value {
            match program.body.first() {
                Some(Stmt::Expr(expr)) => self.eval(expr, &frame).await,
                _ => Ok(Value::Undefined),
            }
        } else {
            self.exec_statements(&program.body, &frame)
                .await
                .map(|flow| match flow {
                    Flow::Return(value) => value,
                    _ => Value::Undefined,
                })
        };

        let result = outcome.map_err(Unwind::into_error);
        self.drain_detached().await;
        result
    }

    /// Call a function value produced by an earlier run, such as a callback
    /// handed to a timer
    pub async fn invoke(&mut self, function: Value, args: Vec<Value>) -> Result<Value> {
        self.started = Instant::now();
        let result = self
            .call_value(function, args, Span::default())
            .await
            .map_err(Unwind::into_error);
        self.drain_detached().await;
        result
    }

    async fn drain_detached(&mut self) {
        while !self.detached.is_empty() {
            let pending = std::mem::take(&mut self.detached);
            for promise in pending {
                if let Err(message) = promise.settle().await {
                    tracing::warn!(error = %message, "Unawaited snippet operation failed");
                }
            }
        }
    }

    fn tick(&mut self) -> Eval<()> {
        self.steps += 1;
        if let Some(limit) = self.limits.timeout {
            if self.steps % 32 == 0 && self.started.elapsed() > limit {
                return Err(ScriptError::DeadlineExceeded {
                    limit_ms: limit.as_millis() as u64,
                }
                .into());
            }
        }
        Ok(())
    }

    fn exec_statements<'a>(
        &'a mut self,
        stmts: &'a [Stmt],
        frame: &'a FrameRef,
    ) -> LocalBoxFuture<'a, Eval<Flow>> {
        async move {
            for stmt in stmts {
                match self.exec_stmt(stmt, frame).await? {
                    Flow::Normal => {}
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        }
        .boxed_local()
    }

    fn exec_block<'a>(
        &'a mut self,
        stmts: &'a [Stmt],
        frame: &'a FrameRef,
    ) -> LocalBoxFuture<'a, Eval<Flow>> {
        async move {
            let inner = Frame::child(frame);
            self.exec_statements(stmts, &inner).await
        }
        .boxed_local()
    }

    fn exec_stmt<'a>(
        &'a mut self,
        stmt: &'a Stmt,
        frame: &'a FrameRef,
    ) -> LocalBoxFuture<'a, Eval<Flow>> {
        async move {
            match stmt {
                Stmt::Empty(_) => Ok(Flow::Normal),
                Stmt::Expr(expr) => {
                    self.eval(expr, frame).await?;
                    Ok(Flow::Normal)
                }
                Stmt::Decl {
                    kind, name, init, ..
                } => {
                    let value = match init {
                        Some(init) => self.eval(init, frame).await?,
                        None => Value::Undefined,
                    };
                    frame.declare(name, value, *kind != DeclKind::Const);
                    Ok(Flow::Normal)
                }
                Stmt::Block(stmts, _) => self.exec_block(stmts, frame).await,
                Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                    ..
                } => {
                    if self.eval(cond, frame).await?.is_truthy() {
                        self.exec_stmt(then_branch, frame).await
                    } else if let Some(else_branch) = else_branch {
                        self.exec_stmt(else_branch, frame).await
                    } else {
                        Ok(Flow::Normal)
                    }
                }
                Stmt::While { cond, body, .. } => {
                    while self.eval(cond, frame).await?.is_truthy() {
                        self.tick()?;
                        match self.exec_stmt(body, frame).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::For {
                    init,
                    cond,
                    update,
                    body,
                    ..
                } => {
                    let loop_frame = Frame::child(frame);
                    if let Some(init) = init {
                        self.exec_stmt(init, &loop_frame).await?;
                    }
                    loop {
                        if let Some(cond) = cond {
                            if !self.eval(cond, &loop_frame).await?.is_truthy() {
                                break;
                            }
                        }
                        self.tick()?;
                        match self.exec_stmt(body, &loop_frame).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                        if let Some(update) = update {
                            self.eval(update, &loop_frame).await?;
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::ForOf {
                    kind,
                    name,
                    iterable,
                    body,
                    span,
                } => {
                    let iterable = self.eval(iterable, frame).await?;
                    let items = self.iterate(iterable, *span)?;
                    for item in items {
                        self.tick()?;
                        let iteration = Frame::child(frame);
                        iteration.declare(name, item, *kind != DeclKind::Const);
                        match self.exec_stmt(body, &iteration).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Return(value, _) => {
                    let value = match value {
                        Some(expr) => self.eval(expr, frame).await?,
                        None => Value::Undefined,
                    };
                    Ok(Flow::Return(value))
                }
                Stmt::Break(_) => Ok(Flow::Break),
                Stmt::Continue(_) => Ok(Flow::Continue),
                Stmt::Throw(expr, _) => {
                    let value = self.eval(expr, frame).await?;
                    Err(Unwind::Throw(value))
                }
                Stmt::Try {
                    body,
                    param,
                    handler,
                    finalizer,
                    ..
                } => {
                    let mut outcome = self.exec_block(body, frame).await;
                    if let Some(handler) = handler {
                        outcome = match outcome {
                            Err(unwind) if unwind.is_catchable() => {
                                let catch_frame = Frame::child(frame);
                                if let Some(param) = param {
                                    catch_frame.declare(param, unwind.into_value(), true);
                                }
                                self.exec_statements(handler, &catch_frame).await
                            }
                            other => other,
                        };
                    }
                    if let Some(finalizer) = finalizer {
                        match self.exec_block(finalizer, frame).await? {
                            Flow::Normal => {}
                            other => return Ok(other),
                        }
                    }
                    outcome
                }
            }
        }
        .boxed_local()
    }

    fn iterate(&self, value: Value, span: Span) -> Eval<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::String(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
            other => Err(ScriptError::type_error(
                span,
                format!("{} is not iterable", other.type_of()),
            )
            .into()),
        }
    }

    fn eval<'a>(&'a mut self, expr: &'a Expr, frame: &'a FrameRef) -> LocalBoxFuture<'a, Eval<Value>> {
        async move {
            match expr {
                Expr::Number(n, _) => Ok(Value::Number(*n)),
                Expr::String(s, _) => Ok(Value::string(s)),
                Expr::Bool(b, _) => Ok(Value::Bool(*b)),
                Expr::Null(_) => Ok(Value::Null),
                Expr::Undefined(_) => Ok(Value::Undefined),
                Expr::Template(parts, _) => {
                    let mut out = String::new();
                    for part in parts {
                        match part {
                            TemplatePart::Text(text) => out.push_str(text),
                            TemplatePart::Expr(e) => {
                                out.push_str(&self.eval(e, frame).await?.to_display_string())
                            }
                        }
                    }
                    Ok(Value::string(out))
                }
                Expr::Ident(name, span) => self.resolve(name, *span, frame),
                Expr::Array(items, _) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item, frame).await?);
                    }
                    Ok(Value::array(values))
                }
                Expr::Object(props, _) => {
                    let mut entries = IndexMap::new();
                    for prop in props {
                        let value = self.eval(&prop.value, frame).await?;
                        entries.insert(prop.key.clone(), value);
                    }
                    Ok(Value::object(entries))
                }
                Expr::Unary(UnOp::Typeof, operand, _) => {
                    let value = match operand.as_ref() {
                        Expr::Ident(name, span) => match self.resolve(name, *span, frame) {
                            Err(Unwind::Error(ScriptError::UnboundIdentifier { .. })) => {
                                Value::Undefined
                            }
                            other => other?,
                        },
                        other => self.eval(other, frame).await?,
                    };
                    Ok(Value::string(value.type_of()))
                }
                Expr::Unary(op, operand, _) => {
                    let value = self.eval(operand, frame).await?;
                    Ok(match op {
                        UnOp::Not => Value::Bool(!value.is_truthy()),
                        UnOp::Neg => Value::Number(-value.to_number()),
                        UnOp::Plus => Value::Number(value.to_number()),
                        UnOp::Typeof => Value::string(value.type_of()),
                    })
                }
                Expr::Binary(lhs, op, rhs, _) => {
                    let lhs = self.eval(lhs, frame).await?;
                    let rhs = self.eval(rhs, frame).await?;
                    Ok(binary_op(*op, &lhs, &rhs))
                }
                Expr::Logical(lhs, op, rhs, _) => {
                    let lhs = self.eval(lhs, frame).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !lhs.is_truthy(),
                        LogicalOp::Or => lhs.is_truthy(),
                        LogicalOp::Coalesce => !lhs.is_nullish(),
                    };
                    if short_circuit {
                        Ok(lhs)
                    } else {
                        self.eval(rhs, frame).await
                    }
                }
                Expr::Conditional(cond, then_expr, else_expr, _) => {
                    if self.eval(cond, frame).await?.is_truthy() {
                        self.eval(then_expr, frame).await
                    } else {
                        self.eval(else_expr, frame).await
                    }
                }
                Expr::Member {
                    object,
                    property,
                    optional,
                    span,
                } => {
                    let target = self.eval(object, frame).await?;
                    if *optional && target.is_nullish() {
                        return Ok(Value::Undefined);
                    }
                    self.get_property(&target, property, *span)
                }
                Expr::Index(object, index, span) => {
                    let target = self.eval(object, frame).await?;
                    let key = self.eval(index, frame).await?;
                    self.get_index(&target, &key, *span)
                }
                Expr::Call(callee, args, span) => self.eval_call(callee, args, *span, frame).await,
                Expr::Assign(target, op, value, span) => {
                    self.eval_assign(target, *op, value, *span, frame).await
                }
                Expr::Update {
                    target,
                    delta,
                    prefix,
                    span,
                } => {
                    let delta = *delta;
                    let mut old = 0.0;
                    let updated = self
                        .modify(target, *span, frame, |current| {
                            old = current.to_number();
                            Value::Number(old + delta)
                        })
                        .await?;
                    Ok(if *prefix { updated } else { Value::Number(old) })
                }
                Expr::Arrow(function) => Ok(Value::Function(Rc::new(Closure {
                    function: function.clone(),
                    frame: frame.clone(),
                }))),
                Expr::Await(operand, _) => {
                    let value = self.eval(operand, frame).await?;
                    self.await_value(value).await
                }
            }
        }
        .boxed_local()
    }

    async fn await_value(&mut self, value: Value) -> Eval<Value> {
        match value {
            Value::Future(promise) => match promise.settle().await {
                Ok(value) => Ok(value),
                Err(message) => Err(Unwind::Throw(Value::string(message))),
            },
            other => Ok(other),
        }
    }

    fn resolve(&self, name: &str, span: Span, frame: &FrameRef) -> Eval<Value> {
        if let Some(value) = frame.lookup(name) {
            return Ok(value);
        }
        if self.env.contains(name) {
            if let Some(value) = self.env.lookup(name)? {
                return Ok(value);
            }
        }
        if let Some(value) = builtins::global(name) {
            return Ok(value);
        }
        Err(ScriptError::UnboundIdentifier {
            span,
            name: name.to_string(),
        }
        .into())
    }

    fn write_name(&self, name: &str, value: Value, span: Span, frame: &FrameRef) -> Eval<()> {
        match frame.assign(name, value.clone()) {
            Some(true) => return Ok(()),
            Some(false) => {
                return Err(ScriptError::type_error(
                    span,
                    format!("Assignment to constant variable {}", name),
                )
                .into())
            }
            None => {}
        }
        match self.env.assign(name, value.clone())? {
            Assignment::Applied | Assignment::Ignored => Ok(()),
            Assignment::Unowned => {
                Frame::outermost(frame).declare(name, value, true);
                Ok(())
            }
        }
    }

    async fn eval_assign(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
        span: Span,
        frame: &FrameRef,
    ) -> Eval<Value> {
        let rhs = self.eval(value, frame).await?;
        match op.binary() {
            None => {
                self.modify(target, span, frame, move |_| rhs).await
            }
            Some(bin) => {
                self.modify(target, span, frame, move |current| binary_op(bin, &current, &rhs))
                    .await
            }
        }
    }

    /// Read-modify-write of an assignable expression, evaluating the
    /// target's object and index exactly once
    async fn modify<F>(&mut self, target: &Expr, span: Span, frame: &FrameRef, f: F) -> Eval<Value>
    where
        F: FnOnce(Value) -> Value,
    {
        match target {
            Expr::Ident(name, ident_span) => {
                let current = match self.resolve(name, *ident_span, frame) {
                    Ok(v) => v,
                    Err(Unwind::Error(ScriptError::UnboundIdentifier { .. })) => Value::Undefined,
                    Err(other) => return Err(other),
                };
                let updated = f(current);
                self.write_name(name, updated.clone(), span, frame)?;
                Ok(updated)
            }
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, frame).await?;
                let current = self.get_property(&object, property, span)?;
                let updated = f(current);
                self.set_property(&object, property, updated.clone(), span)?;
                Ok(updated)
            }
            Expr::Index(object, index, _) => {
                let object = self.eval(object, frame).await?;
                let key = self.eval(index, frame).await?;
                let current = self.get_index(&object, &key, span)?;
                let updated = f(current);
                self.set_index(&object, &key, updated.clone(), span)?;
                Ok(updated)
            }
            _ => Err(ScriptError::evaluation(span, "Invalid assignment target").into()),
        }
    }

    fn get_property(&self, target: &Value, property: &str, span: Span) -> Eval<Value> {
        match target {
            Value::Undefined | Value::Null => Err(ScriptError::type_error(
                span,
                format!(
                    "Cannot read properties of {} (reading '{}')",
                    target.to_display_string(),
                    property
                ),
            )
            .into()),
            Value::Object(entries) => Ok(entries
                .borrow()
                .get(property)
                .cloned()
                .unwrap_or(Value::Undefined)),
            Value::Array(items) if property == "length" => {
                Ok(Value::Number(items.borrow().len() as f64))
            }
            Value::String(s) if property == "length" => {
                Ok(Value::Number(s.chars().count() as f64))
            }
            Value::Component(id) => Ok(self.env.get_member(id, property)?),
            Value::Native(NativeFn::Builtin(ns)) => {
                Ok(builtins::member(ns, property).unwrap_or(Value::Undefined))
            }
            Value::Native(NativeFn::Api(ns)) => Ok(Value::api(&format!("{}.{}", ns, property))),
            _ => Ok(Value::Undefined),
        }
    }

    fn set_property(&self, target: &Value, property: &str, value: Value, span: Span) -> Eval<()> {
        match target {
            Value::Undefined | Value::Null => Err(ScriptError::type_error(
                span,
                format!(
                    "Cannot set properties of {} (setting '{}')",
                    target.to_display_string(),
                    property
                ),
            )
            .into()),
            Value::Object(entries) => {
                entries.borrow_mut().insert(property.to_string(), value);
                Ok(())
            }
            Value::Array(items) if property == "length" => {
                let len = array_slot(value.to_number())
                    .filter(|len| *len <= MAX_ARRAY_LENGTH)
                    .ok_or_else(|| invalid_array_length(span))?;
                items.borrow_mut().resize(len, Value::Undefined);
                Ok(())
            }
            Value::Component(id) => Ok(self.env.set_member(id, property, value)?),
            // Writes to primitives are silently dropped.
            _ => Ok(()),
        }
    }

    fn get_index(&self, target: &Value, key: &Value, span: Span) -> Eval<Value> {
        match (target, key) {
            (Value::Array(items), Value::Number(n)) => Ok(array_slot(*n)
                .and_then(|i| items.borrow().get(i).cloned())
                .unwrap_or(Value::Undefined)),
            (Value::String(s), Value::Number(n)) => Ok(array_slot(*n)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::string(c.to_string()))
                .unwrap_or(Value::Undefined)),
            _ => self.get_property(target, &key.to_display_string(), span),
        }
    }

    fn set_index(&self, target: &Value, key: &Value, value: Value, span: Span) -> Eval<()> {
        if let (Value::Array(items), Value::Number(n)) = (target, key) {
            let index = array_slot(*n)
                .ok_or_else(|| ScriptError::evaluation(span, "Invalid array index"))?;
            let mut items = items.borrow_mut();
            if index >= items.len() {
                if index >= MAX_ARRAY_LENGTH {
                    return Err(invalid_array_length(span).into());
                }
                items.resize(index + 1, Value::Undefined);
            }
            items[index] = value;
            return Ok(());
        }
        self.set_property(target, &key.to_display_string(), value, span)
    }

    async fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
        frame: &FrameRef,
    ) -> Eval<Value> {
        if let Expr::Member {
            object,
            property,
            optional,
            ..
        } = callee
        {
            let receiver = self.eval(object, frame).await?;
            if *optional && receiver.is_nullish() {
                return Ok(Value::Undefined);
            }
            let args = self.eval_args(args, frame).await?;
            return self.call_method(receiver, property, args, span).await;
        }

        let function = self.eval(callee, frame).await?;
        let args = self.eval_args(args, frame).await?;
        self.call_value(function, args, span).await
    }

    async fn eval_args(&mut self, args: &[Expr], frame: &FrameRef) -> Eval<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, frame).await?);
        }
        Ok(values)
    }

    fn call_value<'a>(
        &'a mut self,
        function: Value,
        args: Vec<Value>,
        span: Span,
    ) -> LocalBoxFuture<'a, Eval<Value>> {
        async move {
            self.tick()?;
            match function {
                Value::Function(closure) => self.call_closure(closure, args, span).await,
                Value::Native(NativeFn::Builtin(name)) => {
                    Ok(builtins::call_function(&name, args, span)?)
                }
                Value::Native(NativeFn::Api(name)) => self.call_api(&name, args),
                other => Err(ScriptError::type_error(
                    span,
                    format!("{} is not a function", other.to_display_string()),
                )
                .into()),
            }
        }
        .boxed_local()
    }

    fn call_api(&mut self, name: &str, args: Vec<Value>) -> Eval<Value> {
        let result = self.env.call(name, args)?;
        if let Value::Future(promise) = &result {
            self.detached.push(promise.clone());
        }
        Ok(result)
    }

    async fn call_closure(&mut self, closure: Rc<Closure>, args: Vec<Value>, span: Span) -> Eval<Value> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::evaluation(span, "Maximum call depth exceeded").into());
        }

        let frame = Frame::child(&closure.frame);
        let mut args = args.into_iter();
        for param in &closure.function.params {
            frame.declare(param, args.next().unwrap_or(Value::Undefined), true);
        }

        self.call_depth += 1;
        let result = match &closure.function.body {
            ArrowBody::Expr(expr) => self.eval(expr, &frame).await,
            ArrowBody::Block(stmts) => {
                self.exec_statements(stmts, &frame)
                    .await
                    .map(|flow| match flow {
                        Flow::Return(value) => value,
                        _ => Value::Undefined,
                    })
            }
        };
        self.call_depth -= 1;
        result
    }

    async fn call_method(
        &mut self,
        receiver: Value,
        method: &str,
        args: Vec<Value>,
        span: Span,
    ) -> Eval<Value> {
        match &receiver {
            Value::Array(_) if builtins::is_callback_array_method(method) => {
                self.array_callback_method(receiver.clone(), method, args, span)
                    .await
            }
            Value::Array(items) => Ok(builtins::array_method(items, method, args, span)?),
            Value::String(s) => Ok(builtins::string_method(s, method, args, span)?),
            Value::Number(n) => Ok(builtins::number_method(*n, method, args, span)?),
            Value::Future(promise) => self.promise_method(promise.clone(), method, args, span),
            Value::Native(NativeFn::Builtin(ns)) => {
                Ok(builtins::call_function(&format!("{}.{}", ns, method), args, span)?)
            }
            Value::Native(NativeFn::Api(ns)) => self.call_api(&format!("{}.{}", ns, method), args),
            Value::Object(entries) if method == "hasOwnProperty" => {
                let key = args.first().map(Value::to_display_string).unwrap_or_default();
                Ok(Value::Bool(entries.borrow().contains_key(&key)))
            }
            _ => {
                let function = self.get_property(&receiver, method, span)?;
                if !function.is_callable() {
                    return Err(ScriptError::type_error(
                        span,
                        format!("{} is not a function", method),
                    )
                    .into());
                }
                self.call_value(function, args, span).await
            }
        }
    }

    async fn array_callback_method(
        &mut self,
        receiver: Value,
        method: &str,
        args: Vec<Value>,
        span: Span,
    ) -> Eval<Value> {
        let items = match &receiver {
            Value::Array(items) => items.borrow().clone(),
            _ => Vec::new(),
        };
        let mut args = args.into_iter();
        let callback = args.next().unwrap_or(Value::Undefined);
        if !callback.is_callable() && !(method == "sort" && callback.is_nullish()) {
            return Err(ScriptError::type_error(
                span,
                format!("{} is not a function", callback.to_display_string()),
            )
            .into());
        }

        match method {
            "map" => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    out.push(self.call_value(callback.clone(), vec![item, Value::from(i as i64)], span).await?);
                }
                Ok(Value::array(out))
            }
            "filter" => {
                let mut out = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    let keep = self
                        .call_value(callback.clone(), vec![item.clone(), Value::from(i as i64)], span)
                        .await?;
                    if keep.is_truthy() {
                        out.push(item);
                    }
                }
                Ok(Value::array(out))
            }
            "forEach" => {
                for (i, item) in items.into_iter().enumerate() {
                    self.call_value(callback.clone(), vec![item, Value::from(i as i64)], span)
                        .await?;
                }
                Ok(Value::Undefined)
            }
            "find" | "findIndex" => {
                for (i, item) in items.into_iter().enumerate() {
                    let hit = self
                        .call_value(callback.clone(), vec![item.clone(), Value::from(i as i64)], span)
                        .await?;
                    if hit.is_truthy() {
                        return Ok(if method == "find" {
                            item
                        } else {
                            Value::from(i as i64)
                        });
                    }
                }
                Ok(if method == "find" {
                    Value::Undefined
                } else {
                    Value::Number(-1.0)
                })
            }
            "some" | "every" => {
                let want = method == "some";
                for (i, item) in items.into_iter().enumerate() {
                    let hit = self
                        .call_value(callback.clone(), vec![item, Value::from(i as i64)], span)
                        .await?
                        .is_truthy();
                    if hit == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            "reduce" => {
                let mut iter = items.into_iter().enumerate();
                let mut acc = match args.next() {
                    Some(initial) => initial,
                    None => match iter.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(ScriptError::type_error(
                                span,
                                "Reduce of empty array with no initial value",
                            )
                            .into())
                        }
                    },
                };
                for (i, item) in iter {
                    acc = self
                        .call_value(callback.clone(), vec![acc, item, Value::from(i as i64)], span)
                        .await?;
                }
                Ok(acc)
            }
            "sort" => {
                let mut sorted: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    let mut at = sorted.len();
                    while at > 0 {
                        let before = if callback.is_nullish() {
                            item.to_display_string() < sorted[at - 1].to_display_string()
                        } else {
                            self.call_value(
                                callback.clone(),
                                vec![item.clone(), sorted[at - 1].clone()],
                                span,
                            )
                            .await?
                            .to_number()
                                < 0.0
                        };
                        if !before {
                            break;
                        }
                        at -= 1;
                    }
                    sorted.insert(at, item);
                }
                if let Value::Array(target) = &receiver {
                    *target.borrow_mut() = sorted;
                }
                Ok(receiver)
            }
            _ => Err(ScriptError::type_error(span, format!("Unknown array method {}", method)).into()),
        }
    }

    /// `then`/`catch` chain onto a promise with a fresh evaluator sharing
    /// this run's environment
    fn promise_method(
        &mut self,
        promise: Promise,
        method: &str,
        args: Vec<Value>,
        span: Span,
    ) -> Eval<Value> {
        let mut args = args.into_iter();
        let (on_ok, on_err) = match method {
            "then" => (args.next(), args.next()),
            "catch" => (None, args.next()),
            _ => {
                return Err(ScriptError::type_error(
                    span,
                    format!("Unknown promise method {}", method),
                )
                .into())
            }
        };

        let env = self.env.clone();
        let limits = self.limits.clone();
        let chained = Promise::new(async move {
            let outcome = promise.settle().await;
            let (callback, input) = match outcome {
                Ok(value) => match on_ok.filter(Value::is_callable) {
                    Some(cb) => (cb, value),
                    None => return Ok(value),
                },
                Err(message) => match on_err.filter(Value::is_callable) {
                    Some(cb) => (cb, Value::string(message)),
                    None => return Err(message),
                },
            };
            let mut interpreter = Interpreter::with_limits(env, limits);
            let result = interpreter
                .call_value(callback, vec![input], span)
                .await
                .map_err(|unwind| unwind.into_error().message());
            interpreter.drain_detached().await;
            let value = result?;
            match value {
                Value::Future(inner) => inner.settle().await,
                other => Ok(other),
            }
        });
        self.detached.push(chained.clone());
        Ok(Value::Future(chained))
    }
}

fn array_slot(n: f64) -> Option<usize> {
    if n >= 0.0 && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

fn invalid_array_length(span: Span) -> ScriptError {
    ScriptError::evaluation(span, "RangeError: Invalid array length")
}

/// Apply a binary operator with the usual coercions
pub fn binary_op(op: BinOp, lhs: &Value, rhs: &Value) -> Value {
    match op {
        BinOp::Add => {
            let stringy = |v: &Value| {
                matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_))
            };
            if stringy(lhs) || stringy(rhs) {
                Value::string(format!(
                    "{}{}",
                    lhs.to_display_string(),
                    rhs.to_display_string()
                ))
            } else {
                Value::Number(lhs.to_number() + rhs.to_number())
            }
        }
        BinOp::Sub => Value::Number(lhs.to_number() - rhs.to_number()),
        BinOp::Mul => Value::Number(lhs.to_number() * rhs.to_number()),
        BinOp::Div => Value::Number(lhs.to_number() / rhs.to_number()),
        BinOp::Rem => Value::Number(lhs.to_number() % rhs.to_number()),
        BinOp::Eq => Value::Bool(lhs.loose_eq(rhs)),
        BinOp::Ne => Value::Bool(!lhs.loose_eq(rhs)),
        BinOp::StrictEq => Value::Bool(lhs.strict_eq(rhs)),
        BinOp::StrictNe => Value::Bool(!lhs.strict_eq(rhs)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (lhs, rhs) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => lhs.to_number().partial_cmp(&rhs.to_number()),
            };
            Value::Bool(match ordering {
                None => false,
                Some(ord) => match op {
                    BinOp::Lt => ord.is_lt(),
                    BinOp::Le => ord.is_le(),
                    BinOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                },
            })
        }
    }
}
