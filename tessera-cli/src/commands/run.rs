//! Execute a snippet with the live backend.
//!
//! Host operations are recorded and listed rather than performed, since
//! there is no client attached.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::rc::Rc;
use tessera_runtime::{execute, HandlerErrorRecord, RecordedCall, RecordingHost, Runtime};

use super::{load_config, HandlerArgs};

#[derive(Serialize)]
struct RunReport {
    value: serde_json::Value,
    variables: serde_json::Map<String, serde_json::Value>,
    host_calls: Vec<RecordedCall>,
    errors: Vec<HandlerErrorRecord>,
}

pub async fn run_handler(config_path: &Path, args: &HandlerArgs, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let host = Rc::new(RecordingHost::new());
    let runtime = Runtime::with_host(config, host.clone()).context("Invalid configuration")?;
    let request = args.request(&runtime)?;
    let source = request.code.clone();
    let component = request.component.clone();

    let completion = match execute(runtime.root(), request) {
        Ok(completion) => completion,
        Err(error) => bail!("{}", error.render(&source)),
    };
    let value = completion.resolve().await;

    let report = RunReport {
        value: value.to_json(),
        variables: runtime.root().variables(),
        host_calls: host.calls(),
        errors: component
            .as_ref()
            .map(|id| runtime.root().errors_for(id))
            .unwrap_or_default(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Result: {}", value.to_display_string());
        if !report.variables.is_empty() {
            println!("Variables:");
            for (name, value) in &report.variables {
                println!("  ${} = {}", name, value);
            }
        }
        for call in &report.host_calls {
            println!(
                "- host {} {}",
                call.operation,
                serde_json::Value::Array(call.args.clone())
            );
        }
        for error in &report.errors {
            println!("error [{}]: {}", error.scope, error.message);
        }
    }

    if !report.errors.is_empty() {
        bail!("Handler failed with {} error(s)", report.errors.len());
    }
    Ok(())
}
