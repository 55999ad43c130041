use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;

const APP: &str = r#"
applications:
  - id: shop
    name: Shop
components:
  - id: btn
    name: Checkout
    application_id: shop
  - id: total
    name: Total
    application_id: shop
    input:
      text: "0"
"#;

#[test]
fn run_applies_mutations_and_lists_host_calls() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("app.yml"), APP)?;

    #[allow(deprecated)]
    let assert = Command::cargo_bin("tessera")?
        .current_dir(dir.path())
        .args([
            "run",
            "--app",
            "app.yml",
            "--component",
            "Checkout",
            "--event",
            r#"{"amount": 12}"#,
            "--code",
            "$sum = event.amount * 2; Total.text = `${$sum}`; showToast('ok'); return $sum",
            "--json",
        ])
        .assert()
        .success();

    let output: Value = serde_json::from_slice(&assert.get_output().stdout)?;
    assert_eq!(output["value"], 24);
    assert_eq!(output["variables"]["sum"], 24);
    assert_eq!(output["host_calls"][0]["operation"], "showToast");
    assert_eq!(output["errors"].as_array().map(Vec::len), Some(0));
    Ok(())
}

#[test]
fn run_reports_compile_errors() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;

    #[allow(deprecated)]
    Command::cargo_bin("tessera")?
        .current_dir(dir.path())
        .args(["run", "--code", "return ("])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error at line 1, column"));
    Ok(())
}

#[test]
fn simulate_records_side_effects() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("app.yml"), APP)?;

    #[allow(deprecated)]
    let assert = Command::cargo_bin("tessera")?
        .current_dir(dir.path())
        .args([
            "simulate",
            "--app",
            "app.yml",
            "--component",
            "btn",
            "--code",
            "setVar('x', 5)",
            "--json",
        ])
        .assert()
        .success();

    let output: Value = serde_json::from_slice(&assert.get_output().stdout)?;
    assert_eq!(output["value"], Value::Null);
    assert_eq!(output["side_effects"][0]["type"], "setVar");
    assert_eq!(output["side_effects"][0]["args"], serde_json::json!(["x", 5]));
    assert_eq!(output["side_effects"][0]["componentId"], "btn");
    assert!(output.get("error").is_none());
    Ok(())
}

#[test]
fn simulate_honours_configured_limits() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("tessera.yml"),
        "simulation:\n  limits:\n    max_loops: 0\n",
    )?;

    #[allow(deprecated)]
    Command::cargo_bin("tessera")?
        .current_dir(dir.path())
        .args(["simulate", "--code", "while (false) { setVar('a', 1) }"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Side effects: 0"))
        .stdout(predicate::str::contains("loop count"));
    Ok(())
}

#[test]
fn check_classifies_client_only_snippets() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("snippet.js"), "setTimeout(() => {}, 10)")?;

    #[allow(deprecated)]
    let assert = Command::cargo_bin("tessera")?
        .current_dir(dir.path())
        .args(["check", "--file", "snippet.js", "--json"])
        .assert()
        .success();

    let output: Value = serde_json::from_slice(&assert.get_output().stdout)?;
    assert_eq!(output["valid"], true);
    assert_eq!(output["classification"]["kind"], "client_only");
    Ok(())
}

#[test]
fn check_rejects_disallowed_constructs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;

    #[allow(deprecated)]
    Command::cargo_bin("tessera")?
        .current_dir(dir.path())
        .args(["check", "--code", "eval('1')"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Disallowed construct 'eval'"));
    Ok(())
}
