//! Execute a snippet with the simulation backend.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tessera_runtime::{simulate, ErrorKind, Runtime, SimulationOptions};
use tessera_types::SideEffect;

use super::{load_config, HandlerArgs};

#[derive(Serialize)]
struct SimulationReport {
    value: serde_json::Value,
    side_effects: Vec<SideEffect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ReportedError>,
    elapsed_ms: u64,
}

#[derive(Serialize)]
struct ReportedError {
    kind: ErrorKind,
    message: String,
}

pub fn simulate_handler(
    config_path: &Path,
    args: &HandlerArgs,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut options = SimulationOptions::from_config(&config.simulation);
    if let Some(ms) = timeout_ms {
        options.timeout = Some(Duration::from_millis(ms));
    }
    let runtime = Runtime::new(config).context("Invalid configuration")?;
    let request = args.request(&runtime)?;
    let source = request.code.clone();

    let outcome = simulate(runtime.root(), request, &options);
    let report = SimulationReport {
        value: outcome.value.to_json(),
        side_effects: outcome.side_effects,
        error: outcome.error.as_ref().map(|error| ReportedError {
            kind: error.kind(),
            message: error.render(&source),
        }),
        elapsed_ms: outcome.elapsed.as_millis() as u64,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Result: {}", outcome.value.to_display_string());
        println!(
            "Side effects: {} ({}ms)",
            report.side_effects.len(),
            report.elapsed_ms
        );
        for effect in &report.side_effects {
            let component = effect
                .component_id
                .as_ref()
                .map(|id| format!(" [{}]", id))
                .unwrap_or_default();
            println!(
                "- {}{} {}",
                effect.kind,
                component,
                serde_json::Value::Array(effect.args.clone())
            );
        }
        if let Some(error) = &report.error {
            println!("error: {}", error.message);
        }
    }

    if let Some(error) = outcome.error {
        bail!("Simulation rejected the snippet ({:?})", error.kind());
    }
    Ok(())
}
