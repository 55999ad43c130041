//! Simulation backend for non-interactive pre-render passes
//!
//! A snippet is checked statically before it runs: disallowed constructs,
//! complexity bounds and client-only constructs each reject it without
//! executing anything. It then runs against a surface where read operations
//! execute for real and every mutating operation is replaced by a recorder.

use futures::task::noop_waker_ref;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};
use tessera_script::{
    classify, measure, validate, Classification, ComplexityLimits, Environment, ExecutionLimits,
    Metric, ScriptError, Value,
};
use tessera_types::SideEffect;

use crate::api::{ApiOperation, Dispatch, Origin};
use crate::config::SimulationConfig;
use crate::context::Context;
use crate::errors::HandlerError;
use crate::host::inert_result;
use crate::live::{HandlerRequest, LiveDispatch};

/// Dispatch that records mutations instead of performing them
#[derive(Debug, Default)]
pub struct RecordingDispatch {
    effects: RefCell<Vec<SideEffect>>,
}

impl RecordingDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effects(&self) -> Vec<SideEffect> {
        self.effects.borrow().clone()
    }

    pub fn take(&self) -> Vec<SideEffect> {
        std::mem::take(&mut *self.effects.borrow_mut())
    }
}

impl Dispatch for RecordingDispatch {
    fn dispatch(
        &self,
        ctx: &Context,
        origin: &Origin,
        operation: &'static ApiOperation,
        args: Vec<Value>,
    ) -> tessera_script::Result<Value> {
        if !operation.is_mutating() {
            return LiveDispatch.dispatch(ctx, origin, operation, args);
        }
        tracing::trace!(operation = operation.name, "Recording side effect");
        self.effects.borrow_mut().push(SideEffect::new(
            operation.name,
            args.iter().map(Value::to_json).collect(),
            origin.component.clone(),
            origin.scope,
        ));
        Ok(inert_result(operation))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOptions {
    pub limits: ComplexityLimits,
    pub timeout: Option<Duration>,
    /// Runs slower than this are logged
    pub slow_threshold: Duration,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

impl SimulationOptions {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            limits: config.limits,
            timeout: Some(Duration::from_millis(config.timeout_ms)),
            slow_threshold: Duration::from_millis(config.slow_threshold_ms),
        }
    }
}

/// What a simulated run produced; always returned, never an `Err`
#[derive(Debug)]
pub struct SimulationOutcome {
    pub value: Value,
    pub side_effects: Vec<SideEffect>,
    pub error: Option<HandlerError>,
    pub elapsed: Duration,
}

impl SimulationOutcome {
    fn rejected(error: HandlerError, started: Instant) -> Self {
        Self {
            value: Value::Undefined,
            side_effects: Vec::new(),
            error: Some(error),
            elapsed: started.elapsed(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Check and run a handler without mutating anything
pub fn simulate(ctx: &Context, request: HandlerRequest, options: &SimulationOptions) -> SimulationOutcome {
    let started = Instant::now();
    if let Err(error) = ctx.ensure_live() {
        return SimulationOutcome::rejected(error, started);
    }

    // Oversized text is refused before the parser sees it.
    let limit = options.limits.max_source_bytes;
    if request.code.len() > limit {
        let error = HandlerError::ComplexityExceeded {
            metric: Metric::SourceBytes,
            actual: request.code.len(),
            limit,
        };
        tracing::debug!(error = %error, "Snippet rejected before compilation");
        return SimulationOutcome::rejected(error, started);
    }

    let unit = match ctx.units().compile(&request.code) {
        Ok(unit) => unit,
        Err(error) => return SimulationOutcome::rejected(error.into(), started),
    };
    let checked = validate(unit.program())
        .and_then(|()| measure(unit.program(), unit.text()).check(&options.limits));
    if let Err(error) = checked {
        tracing::debug!(error = %error, "Snippet rejected before simulation");
        return SimulationOutcome::rejected(error.into(), started);
    }
    if let Classification::ClientOnly { reason } = classify(unit.program()) {
        tracing::debug!(%reason, "Skipping client-only snippet");
        return SimulationOutcome::rejected(HandlerError::ClientOnly { reason }, started);
    }

    let recorder = Rc::new(RecordingDispatch::new());
    let env: Rc<dyn Environment> = Rc::new(request.resolver(ctx, recorder.clone()));
    let limits = ExecutionLimits {
        timeout: options.timeout,
    };
    let mut future = unit.execute(env, limits);
    let mut cx = TaskContext::from_waker(noop_waker_ref());
    let (value, error) = match future.as_mut().poll(&mut cx) {
        Poll::Ready(Ok(value)) => (value, None),
        Poll::Ready(Err(error)) => (Value::Undefined, Some(HandlerError::Execution(error))),
        Poll::Pending => (
            Value::Undefined,
            Some(HandlerError::Execution(ScriptError::host(
                "await",
                "handler suspended on an operation that cannot complete during simulation",
            ))),
        ),
    };
    drop(future);

    let elapsed = started.elapsed();
    if elapsed > options.slow_threshold {
        tracing::warn!(
            component = ?request.component,
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_ms = options.slow_threshold.as_millis() as u64,
            "Slow simulated handler"
        );
    }

    SimulationOutcome {
        value,
        side_effects: recorder.take(),
        error,
        elapsed,
    }
}
