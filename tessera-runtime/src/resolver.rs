//! Identifier resolution for a running handler
//!
//! Names a snippet does not declare itself are resolved in this order:
//! 1. reserved API names and host globals
//! 2. `$`-prefixed variables
//! 3. ephemeral parameters of this invocation (`component`, `event`, `item`)
//! 4. components by display name
//!
//! Anything else is left to the snippet's own bindings. Writes follow the
//! same order, except that a parameter shadows a reserved name and writes to
//! reserved names or component names are accepted and dropped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tessera_script::{Assignment, Environment, Result, ScriptError, Value};
use tessera_types::ComponentId;

use crate::api::{self, Dispatch, Origin};
use crate::context::Context;

pub struct ScopeResolver {
    ctx: Context,
    origin: Origin,
    params: RefCell<HashMap<String, Value>>,
    dispatch: Rc<dyn Dispatch>,
}

impl ScopeResolver {
    pub fn new(ctx: Context, origin: Origin, dispatch: Rc<dyn Dispatch>) -> Self {
        Self {
            ctx,
            origin,
            params: RefCell::new(HashMap::new()),
            dispatch,
        }
    }

    pub fn with_param(self, name: &str, value: Value) -> Self {
        self.params.borrow_mut().insert(name.to_string(), value);
        self
    }

    pub fn param(&self, name: &str) -> Option<Value> {
        self.params.borrow().get(name).cloned()
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    fn dispatch_named(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let operation = api::lookup(name)
            .ok_or_else(|| ScriptError::host(name, format!("{} is not an API operation", name)))?;
        // Arguments are snapshotted into stores and projected to JSON.
        if args.iter().any(Value::is_cyclic) {
            return Err(ScriptError::host(
                name,
                "TypeError: Converting circular structure to JSON",
            ));
        }
        self.dispatch.dispatch(&self.ctx, &self.origin, operation, args)
    }
}

impl Environment for ScopeResolver {
    fn contains(&self, name: &str) -> bool {
        api::is_reserved(name)
            || name.starts_with('$')
            || self.params.borrow().contains_key(name)
            || self.ctx.find_by_name(name).is_some()
    }

    fn lookup(&self, name: &str) -> Result<Option<Value>> {
        if let Some(value) = api::reserved_value(name) {
            return Ok(Some(value));
        }
        if let Some(variable) = name.strip_prefix('$') {
            return self
                .dispatch_named("getVar", vec![Value::from(variable)])
                .map(Some);
        }
        if let Some(value) = self.param(name) {
            return Ok(Some(value));
        }
        Ok(self.ctx.find_by_name(name).map(Value::Component))
    }

    fn assign(&self, name: &str, value: Value) -> Result<Assignment> {
        if let Some(slot) = self.params.borrow_mut().get_mut(name) {
            *slot = value;
            return Ok(Assignment::Applied);
        }
        if api::is_reserved(name) {
            tracing::debug!(name, "Ignoring write to reserved name");
            return Ok(Assignment::Ignored);
        }
        if let Some(variable) = name.strip_prefix('$') {
            self.dispatch_named("setVar", vec![Value::from(variable), value])?;
            return Ok(Assignment::Applied);
        }
        if self.ctx.find_by_name(name).is_some() {
            return Ok(Assignment::Ignored);
        }
        Ok(Assignment::Unowned)
    }

    fn get_member(&self, component: &ComponentId, property: &str) -> Result<Value> {
        Ok(self
            .ctx
            .component_value(component, property, self.origin.reader()))
    }

    fn set_member(&self, component: &ComponentId, property: &str, value: Value) -> Result<()> {
        self.dispatch_named(
            "setComponentValue",
            vec![
                Value::Component(component.clone()),
                Value::from(property),
                value,
            ],
        )?;
        Ok(())
    }

    fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value> {
        self.dispatch_named(operation, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Runtime;
    use crate::live::LiveDispatch;
    use tessera_types::{AppDefinition, ComponentElement, HandlerScope, PropertyValue};

    fn resolver(runtime: &Runtime) -> ScopeResolver {
        runtime.load(
            &AppDefinition::new().with_component(
                ComponentElement::new("btn", "Button1", "app")
                    .with_input("text", PropertyValue::literal("Save")),
            ),
        );
        ScopeResolver::new(
            runtime.root().clone(),
            Origin::new(Some(ComponentId::new("btn")), HandlerScope::Event),
            Rc::new(LiveDispatch),
        )
        .with_param("event", Value::from("click"))
    }

    #[test]
    fn test_resolution_order() {
        let runtime = Runtime::default();
        let env = resolver(&runtime);
        runtime
            .root()
            .set_variable("count", &Value::from(4.0))
            .unwrap();

        assert!(matches!(env.lookup("Math").unwrap(), Some(Value::Native(_))));
        assert_eq!(env.lookup("navigate").unwrap(), Some(Value::api("navigate")));
        assert_eq!(env.lookup("$count").unwrap(), Some(Value::from(4.0)));
        assert_eq!(env.lookup("event").unwrap(), Some(Value::from("click")));
        assert_eq!(
            env.lookup("Button1").unwrap(),
            Some(Value::Component(ComponentId::new("btn")))
        );
        assert_eq!(env.lookup("total").unwrap(), None);
        assert!(env.contains("Button1"));
        assert!(!env.contains("total"));
    }

    #[test]
    fn test_write_rules() {
        let runtime = Runtime::default();
        let env = resolver(&runtime);

        assert_eq!(env.assign("navigate", Value::Null).unwrap(), Assignment::Ignored);
        assert_eq!(env.lookup("navigate").unwrap(), Some(Value::api("navigate")));

        assert_eq!(
            env.assign("$count", Value::from(1.0)).unwrap(),
            Assignment::Applied
        );
        assert_eq!(runtime.root().get_variable("count", None), Value::from(1.0));

        assert_eq!(
            env.assign("event", Value::from("tap")).unwrap(),
            Assignment::Applied
        );
        assert_eq!(env.param("event"), Some(Value::from("tap")));

        assert_eq!(env.assign("Button1", Value::Null).unwrap(), Assignment::Ignored);
        assert_eq!(env.assign("total", Value::Null).unwrap(), Assignment::Unowned);
    }

    #[test]
    fn test_member_writes_target_instance() {
        let runtime = Runtime::default();
        let env = resolver(&runtime);
        let id = ComponentId::new("btn");
        assert_eq!(env.get_member(&id, "text").unwrap(), Value::from("Save"));
        env.set_member(&id, "text", Value::from("Saved")).unwrap();
        assert_eq!(env.get_member(&id, "text").unwrap(), Value::from("Saved"));
        assert_eq!(
            runtime.root().store().instance(&id).peek("text"),
            Some(Value::from("Saved"))
        );
    }

    #[test]
    fn test_cyclic_writes_are_rejected() {
        let runtime = Runtime::default();
        let env = resolver(&runtime);
        let items = Value::array(vec![]);
        if let Value::Array(inner) = &items {
            inner.borrow_mut().push(items.clone());
        }
        let err = env.assign("$loop", items).unwrap_err();
        assert!(err.message().contains("circular structure"));
        assert_eq!(runtime.root().get_variable("loop", None), Value::Undefined);
    }

    #[test]
    fn test_unknown_operation_is_host_error() {
        let runtime = Runtime::default();
        let env = resolver(&runtime);
        assert!(matches!(
            env.call("teleport", vec![]),
            Err(ScriptError::HostError { .. })
        ));
    }
}
