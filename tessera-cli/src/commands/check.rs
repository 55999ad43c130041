//! Static checks on a snippet without executing it.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::Path;
use tessera_script::{classify, measure, validate, Classification, Complexity, CompiledUnit};

use super::load_config;

#[derive(Serialize)]
struct CheckReport {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    complexity: Option<Complexity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    classification: Option<Classification>,
}

pub fn check_snippet(config_path: &Path, source: &str, json: bool) -> Result<()> {
    let limits = load_config(config_path)?.simulation.limits;

    let report = match CompiledUnit::compile(source) {
        Err(error) => CheckReport {
            valid: false,
            error: Some(error.render()),
            complexity: None,
            classification: None,
        },
        Ok(unit) => {
            let complexity = measure(unit.program(), unit.text());
            let error = validate(unit.program())
                .and_then(|()| complexity.check(&limits))
                .err()
                .map(|e| e.to_string());
            CheckReport {
                valid: error.is_none(),
                error,
                complexity: Some(complexity),
                classification: Some(classify(unit.program())),
            }
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &report.error {
            Some(error) => println!("Invalid: {}", error),
            None => println!("Valid"),
        }
        if let Some(c) = &report.complexity {
            println!(
                "Complexity: {} nodes, {} branches, {} loops, depth {}, {} bytes",
                c.nodes, c.branches, c.loops, c.depth, c.source_bytes
            );
        }
        match &report.classification {
            Some(Classification::ClientOnly { reason }) => println!("Client-only: {}", reason),
            Some(Classification::Universal) => println!("Runs anywhere"),
            None => {}
        }
    }

    if !report.valid {
        bail!("Snippet failed checks");
    }
    Ok(())
}
