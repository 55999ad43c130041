//! Server-side rendering entry points
//!
//! SSR runs handlers through the simulation backend inside a
//! request-scoped [`IsolationContext`](crate::isolation::IsolationContext)
//! and reports plain JSON. Recorded side effects can later be replayed
//! against a live context once the page is hydrated.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_script::Value;
use tessera_types::{ComponentId, HandlerScope, SideEffect};

use crate::api::{self, Dispatch, Origin, Provider};
use crate::context::Context;
use crate::errors::ErrorKind;
use crate::live::{HandlerRequest, LiveDispatch};
use crate::simulation::{simulate, SimulationOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SsrOptions {
    pub timeout_ms: u64,
    pub collect_side_effects: bool,
    pub handler_type: HandlerScope,
}

impl Default for SsrOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            collect_side_effects: true,
            handler_type: HandlerScope::Event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SsrOutcome {
    pub value: serde_json::Value,
    pub side_effects: Vec<SideEffect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
    pub elapsed_ms: u64,
}

/// Run one handler for server-side rendering
pub fn execute_ssr_handler(
    ctx: &Context,
    component: Option<&ComponentId>,
    code: &str,
    event: Value,
    item: Value,
    options: &SsrOptions,
) -> SsrOutcome {
    let mut request = HandlerRequest::new(code)
        .scope(options.handler_type)
        .event(event)
        .item(item);
    request.component = component.cloned();

    let simulation = SimulationOptions {
        timeout: Some(Duration::from_millis(options.timeout_ms)),
        ..SimulationOptions::from_config(&ctx.config().simulation)
    };
    let outcome = simulate(ctx, request, &simulation);

    SsrOutcome {
        value: outcome.value.to_json(),
        side_effects: if options.collect_side_effects {
            outcome.side_effects
        } else {
            Vec::new()
        },
        error: outcome.error.map(|error| OutcomeError {
            kind: error.kind(),
            message: error.to_string(),
        }),
        elapsed_ms: outcome.elapsed.as_millis() as u64,
    }
}

/// One entry of an SSR batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsrJob {
    #[serde(default)]
    pub component: Option<ComponentId>,
    pub code: String,
    #[serde(default)]
    pub event: serde_json::Value,
    #[serde(default)]
    pub item: serde_json::Value,
}

/// Run every job; a failing job does not stop the rest
pub fn execute_ssr_batch(ctx: &Context, jobs: &[SsrJob], options: &SsrOptions) -> Vec<SsrOutcome> {
    let outcomes: Vec<SsrOutcome> = jobs
        .iter()
        .map(|job| {
            execute_ssr_handler(
                ctx,
                job.component.as_ref(),
                &job.code,
                Value::from_json(&job.event),
                Value::from_json(&job.item),
                options,
            )
        })
        .collect();
    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    tracing::debug!(jobs = jobs.len(), failed, "Finished SSR batch");
    outcomes
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayReport {
    /// Core mutations applied to the context
    pub applied: usize,
    /// Operations forwarded to the host
    pub forwarded: usize,
    /// Index and message of each effect that could not be replayed
    pub failed: Vec<(usize, String)>,
}

/// Apply recorded side effects to a live context, in order
///
/// Asynchronous host operations are awaited before the next effect runs.
pub async fn replay(ctx: &Context, effects: &[SideEffect]) -> ReplayReport {
    let mut report = ReplayReport::default();
    for (index, effect) in effects.iter().enumerate() {
        let Some(operation) = api::lookup(&effect.kind) else {
            report
                .failed
                .push((index, format!("unknown operation '{}'", effect.kind)));
            continue;
        };
        let origin = Origin::new(effect.component_id.clone(), effect.scope);
        let args = effect.args.iter().map(Value::from_json).collect();

        let result = match LiveDispatch.dispatch(ctx, &origin, operation, args) {
            Ok(Value::Future(promise)) => promise.settle().await.map(|_| ()),
            Ok(_) => Ok(()),
            Err(error) => Err(error.message()),
        };
        match (result, operation.provider) {
            (Ok(()), Provider::Core) => report.applied += 1,
            (Ok(()), Provider::Host) => report.forwarded += 1,
            (Err(message), _) => report.failed.push((index, message)),
        }
    }
    ctx.bus().flush();
    report
}
