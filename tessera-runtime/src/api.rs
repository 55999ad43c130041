//! Runtime API surface
//!
//! Every reserved operation name a snippet can call is described by an
//! [`ApiOperation`]. The table is the single place that knows whether an
//! operation mutates shared state, which is all the simulation backend needs
//! to decide between running it and recording it.

use serde::Serialize;
use tessera_script::{builtins, Result, ScriptError, Value};
use tessera_types::{ComponentId, HandlerScope};

use crate::context::Context;
use crate::variables::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Read,
    Mutate,
}

/// Who implements an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Implemented by the runtime against its own stores
    Core,
    /// Forwarded to the embedder's [`HostBridge`](crate::host::HostBridge)
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApiOperation {
    pub name: &'static str,
    pub effect: Effect,
    pub asynchronous: bool,
    pub provider: Provider,
}

impl ApiOperation {
    const fn new(name: &'static str, effect: Effect, asynchronous: bool, provider: Provider) -> Self {
        Self {
            name,
            effect,
            asynchronous,
            provider,
        }
    }

    pub fn is_mutating(&self) -> bool {
        self.effect == Effect::Mutate
    }
}

const fn core(name: &'static str, effect: Effect) -> ApiOperation {
    ApiOperation::new(name, effect, false, Provider::Core)
}

const fn host(name: &'static str, effect: Effect) -> ApiOperation {
    ApiOperation::new(name, effect, false, Provider::Host)
}

const fn host_async(name: &'static str) -> ApiOperation {
    ApiOperation::new(name, Effect::Mutate, true, Provider::Host)
}

use Effect::{Mutate, Read};

pub static OPERATIONS: &[ApiOperation] = &[
    // Variables
    core("getVar", Read),
    core("setVar", Mutate),
    core("getGlobalVar", Read),
    core("setGlobalVar", Mutate),
    core("getLocalVar", Read),
    core("setLocalVar", Mutate),
    core("publishToGlobal", Mutate),
    // Components
    core("getComponent", Read),
    core("getAllComponents", Read),
    core("setComponentValue", Mutate),
    core("setStyle", Mutate),
    host("addComponent", Mutate),
    host("deleteComponent", Mutate),
    host("copyComponent", Mutate),
    host("pasteComponent", Mutate),
    // Applications and pages
    host("updateApplication", Mutate),
    host("deleteApplication", Mutate),
    host("addPage", Mutate),
    host("updatePage", Mutate),
    host("deletePage", Mutate),
    // Navigation
    host("navigate", Mutate),
    host("navigateToPage", Mutate),
    host("navigateToHash", Mutate),
    // Feedback
    host("showToast", Mutate),
    host("showModal", Mutate),
    host("hideModal", Mutate),
    host_async("confirm"),
    // Files and backend
    host_async("uploadFile"),
    host_async("browseFile"),
    host_async("runBackendFunction"),
    host_async("fetch"),
    // Editor
    host("openEditorTab", Mutate),
    host("closeEditorTab", Mutate),
    // Timers
    host("setTimeout", Mutate),
    host("setInterval", Mutate),
    host("clearTimeout", Mutate),
    host("clearInterval", Mutate),
    // Storage
    host("localStorage.getItem", Read),
    host("localStorage.setItem", Mutate),
    host("localStorage.removeItem", Mutate),
    host("sessionStorage.getItem", Read),
    host("sessionStorage.setItem", Mutate),
    host("sessionStorage.removeItem", Mutate),
    // Session
    core("getCurrentUser", Read),
    core("hasRole", Read),
    core("getUserRoles", Read),
];

/// Namespaces whose members are operations (`localStorage.getItem`)
pub const STORAGE_NAMESPACES: &[&str] = &["localStorage", "sessionStorage"];

pub fn lookup(name: &str) -> Option<&'static ApiOperation> {
    OPERATIONS.iter().find(|op| op.name == name)
}

/// Whether `name` is a reserved identifier: an operation, a storage
/// namespace or a built-in host global
pub fn is_reserved(name: &str) -> bool {
    builtins::is_global(name)
        || STORAGE_NAMESPACES.contains(&name)
        || (!name.contains('.') && lookup(name).is_some())
}

/// Value a reserved identifier resolves to
pub fn reserved_value(name: &str) -> Option<Value> {
    if let Some(value) = builtins::global(name) {
        return Some(value);
    }
    is_reserved(name).then(|| Value::api(name))
}

/// The handler an operation is being called from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub component: Option<ComponentId>,
    pub scope: HandlerScope,
}

impl Origin {
    pub fn new(component: Option<ComponentId>, scope: HandlerScope) -> Self {
        Self { component, scope }
    }

    /// The component reads should register as a dependent, if any
    pub fn reader(&self) -> Option<&ComponentId> {
        if self.scope.tracks_dependencies() {
            self.component.as_ref()
        } else {
            None
        }
    }
}

/// How API calls made by a running snippet are carried out
pub trait Dispatch {
    fn dispatch(
        &self,
        ctx: &Context,
        origin: &Origin,
        operation: &'static ApiOperation,
        args: Vec<Value>,
    ) -> Result<Value>;
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

fn string_arg(operation: &ApiOperation, args: &[Value], index: usize) -> Result<String> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.to_string()),
        Some(value) if !value.is_nullish() => Ok(value.to_display_string()),
        _ => Err(ScriptError::host(
            operation.name,
            format!("argument {} must be a string", index + 1),
        )),
    }
}

/// Component id from an id string, a display name, a component view or a
/// record carrying an `id` field
fn component_arg(
    ctx: &Context,
    operation: &ApiOperation,
    args: &[Value],
    index: usize,
) -> Result<ComponentId> {
    let reference = match args.get(index) {
        Some(Value::Component(id)) => return Ok(id.clone()),
        Some(Value::Object(entries)) => entries
            .borrow()
            .get("id")
            .map(Value::to_display_string)
            .unwrap_or_default(),
        Some(Value::String(s)) => s.to_string(),
        _ => String::new(),
    };
    ctx.resolve_component(&reference)
        .map(|component| component.id)
        .ok_or_else(|| {
            ScriptError::host(operation.name, format!("unknown component '{}'", reference))
        })
}

/// Run an operation implemented by the runtime itself
pub(crate) fn invoke_core(
    ctx: &Context,
    origin: &Origin,
    operation: &ApiOperation,
    args: Vec<Value>,
) -> Result<Value> {
    let reader = origin.reader();
    let failed = |e: crate::errors::HandlerError| ScriptError::host(operation.name, e.to_string());

    match operation.name {
        "getVar" => Ok(ctx.get_variable(&string_arg(operation, &args, 0)?, reader)),
        "setVar" => {
            let name = string_arg(operation, &args, 0)?;
            ctx.set_variable(&name, &arg(&args, 1)).map_err(failed)?;
            Ok(Value::Undefined)
        }
        "getGlobalVar" => Ok(ctx.get_tier(Tier::Global, &string_arg(operation, &args, 0)?, reader)),
        "setGlobalVar" => {
            let name = string_arg(operation, &args, 0)?;
            ctx.set_tier(Tier::Global, &name, &arg(&args, 1))
                .map_err(failed)?;
            Ok(Value::Undefined)
        }
        "getLocalVar" => Ok(ctx.get_tier(Tier::Local, &string_arg(operation, &args, 0)?, reader)),
        "setLocalVar" => {
            let name = string_arg(operation, &args, 0)?;
            ctx.set_tier(Tier::Local, &name, &arg(&args, 1))
                .map_err(failed)?;
            Ok(Value::Undefined)
        }
        "publishToGlobal" => {
            let name = string_arg(operation, &args, 0)?;
            ctx.publish(&name).map_err(failed)?;
            Ok(Value::Undefined)
        }
        "getComponent" => {
            let reference = string_arg(operation, &args, 0)?;
            Ok(ctx
                .resolve_component(&reference)
                .map(|component| Value::Component(component.id))
                .unwrap_or(Value::Null))
        }
        "getAllComponents" => Ok(Value::array(
            ctx.component_ids()
                .into_iter()
                .map(Value::Component)
                .collect(),
        )),
        "setComponentValue" => {
            let id = component_arg(ctx, operation, &args, 0)?;
            let property = string_arg(operation, &args, 1)?;
            ctx.set_component_value(&id, &property, &arg(&args, 2))
                .map_err(failed)?;
            Ok(Value::Undefined)
        }
        "setStyle" => {
            let id = component_arg(ctx, operation, &args, 0)?;
            let property = string_arg(operation, &args, 1)?;
            ctx.set_style(&id, &property, &arg(&args, 2))
                .map_err(failed)?;
            Ok(Value::Undefined)
        }
        "getCurrentUser" => Ok(ctx
            .user()
            .map(|user| Value::from_json(&serde_json::json!(user)))
            .unwrap_or(Value::Null)),
        "hasRole" => {
            let role = string_arg(operation, &args, 0)?;
            Ok(Value::Bool(ctx.user().is_some_and(|u| u.has_role(&role))))
        }
        "getUserRoles" => Ok(Value::array(
            ctx.user()
                .map(|u| u.roles.into_iter().map(Value::from).collect())
                .unwrap_or_default(),
        )),
        other => Err(ScriptError::host(other, "not a core operation")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_are_unique() {
        let mut names: Vec<_> = OPERATIONS.iter().map(|op| op.name).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn test_effects() {
        assert_eq!(lookup("getVar").map(|op| op.effect), Some(Effect::Read));
        assert!(lookup("setVar").is_some_and(ApiOperation::is_mutating));
        assert!(lookup("runBackendFunction").is_some_and(|op| op.asynchronous));
        assert_eq!(
            lookup("localStorage.getItem").map(|op| op.effect),
            Some(Effect::Read)
        );
        assert!(lookup("eval").is_none());
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("navigate"));
        assert!(is_reserved("Math"));
        assert!(is_reserved("localStorage"));
        assert!(!is_reserved("localStorage.getItem"));
        assert!(!is_reserved("Button1"));
        assert!(matches!(reserved_value("JSON"), Some(Value::Native(_))));
        assert_eq!(reserved_value("setVar"), Some(Value::api("setVar")));
        assert_eq!(reserved_value("count"), None);
    }

    #[test]
    fn test_origin_reader_only_for_tracking_scopes() {
        let id = Some(ComponentId::new("label"));
        assert!(Origin::new(id.clone(), HandlerScope::Input).reader().is_some());
        assert!(Origin::new(id, HandlerScope::Event).reader().is_none());
    }
}
