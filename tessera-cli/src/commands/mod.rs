//! CLI command implementations.

pub mod check;
pub mod run;
pub mod simulate;

pub use check::check_snippet;
pub use run::run_handler;
pub use simulate::simulate_handler;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use tessera_runtime::{HandlerRequest, Runtime, RuntimeConfig};
use tessera_script::Value;
use tessera_types::{AppDefinition, HandlerScope};

#[derive(Copy, Clone, ValueEnum)]
pub enum ScopeArg {
    Input,
    Style,
    Event,
}

impl From<ScopeArg> for HandlerScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Input => HandlerScope::Input,
            ScopeArg::Style => HandlerScope::Style,
            ScopeArg::Event => HandlerScope::Event,
        }
    }
}

/// Inputs shared by `run` and `simulate`
#[derive(Args)]
pub struct HandlerArgs {
    /// Application definition (JSON or YAML)
    #[arg(long)]
    pub app: Option<PathBuf>,

    /// Component id or display name the handler belongs to
    #[arg(long)]
    pub component: Option<String>,

    /// Snippet text
    #[arg(long, conflicts_with = "file")]
    pub code: Option<String>,

    /// File containing the snippet
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Event payload as JSON
    #[arg(long)]
    pub event: Option<String>,

    /// Repeated-row item as JSON
    #[arg(long)]
    pub item: Option<String>,

    /// Property map the handler is attached to
    #[arg(long, value_enum, default_value_t = ScopeArg::Event)]
    pub scope: ScopeArg,
}

impl HandlerArgs {
    pub fn source(&self) -> Result<String> {
        read_snippet(self.code.as_deref(), self.file.as_deref())
    }

    /// Load the definition into `runtime` and build the request
    pub fn request(&self, runtime: &Runtime) -> Result<HandlerRequest> {
        if let Some(path) = &self.app {
            runtime.load(&load_definition(path)?);
        }
        let mut request = HandlerRequest::new(self.source()?)
            .scope(self.scope.into())
            .event(parse_json_arg("event", self.event.as_deref())?)
            .item(parse_json_arg("item", self.item.as_deref())?);
        if let Some(component) = &self.component {
            let element = runtime
                .root()
                .resolve_component(component)
                .ok_or_else(|| anyhow!("Unknown component '{}'", component))?;
            request = request.component(element.id);
        }
        Ok(request)
    }
}

/// Load the runtime configuration; a missing file means defaults
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(RuntimeConfig::default());
    }
    RuntimeConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

pub fn load_definition(path: &Path) -> Result<AppDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let definition = if is_json {
        serde_json::from_str(&content).context("Invalid application definition JSON")?
    } else {
        serde_yaml::from_str(&content).context("Invalid application definition YAML")?
    };
    Ok(definition)
}

pub fn read_snippet(code: Option<&str>, file: Option<&Path>) -> Result<String> {
    match (code, file) {
        (Some(code), _) => Ok(code.to_string()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snippet {}", path.display())),
        (None, None) => bail!("Provide a snippet with --code or --file"),
    }
}

fn parse_json_arg(name: &str, raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(raw) => {
            let json: serde_json::Value = serde_json::from_str(raw)
                .with_context(|| format!("--{} is not valid JSON", name))?;
            Ok(Value::from_json(&json))
        }
        None => Ok(Value::Undefined),
    }
}
