//! Runtime and execution contexts
//!
//! A [`Runtime`] owns what every tenant shares: the event bus, the global
//! variable tier, the compiled-unit cache, the host bridge and the resource
//! pool. A [`Context`] owns what one tenant sees: its component registry,
//! reactive records, dependency registry, error log and, for isolation
//! contexts, a private local variable tier.
//!
//! Contexts are passed explicitly to every call; there is no process-wide
//! singleton.

use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tessera_script::{UnitCache, Value};
use tessera_types::{
    AppDefinition, ComponentElement, ComponentId, ContextId, HandlerScope, UserContext,
};

use crate::config::{ConfigError, RuntimeConfig};
use crate::errors::{HandlerError, HandlerErrorLog, HandlerErrorRecord, Result};
use crate::events::{topics, EventBus, SubscriptionId};
use crate::host::{HostBridge, NullHost};
use crate::listeners::DependencyKey;
use crate::pool::{PooledResource, ResourcePool};
use crate::reactive::{Notifier, ReactiveStore};
use crate::registry::ComponentRegistry;
use crate::variables::{parse_name, Tier, VariableStore};

/// State shared by every context of one runtime
pub(crate) struct Shared {
    pub(crate) config: RuntimeConfig,
    pub(crate) bus: Rc<EventBus>,
    pub(crate) globals: VariableStore,
    pub(crate) units: UnitCache,
    pub(crate) host: Rc<dyn HostBridge>,
    pub(crate) pool: ResourcePool,
}

pub struct Runtime {
    shared: Rc<Shared>,
    root: Context,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::build(
            RuntimeConfig::default(),
            Rc::new(EventBus::default()),
            Rc::new(NullHost),
        )
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_host(config, Rc::new(NullHost))
    }

    /// Build a runtime that forwards host operations to `host`
    pub fn with_host(
        config: RuntimeConfig,
        host: Rc<dyn HostBridge>,
    ) -> std::result::Result<Self, ConfigError> {
        let patterns = config.events.compile_patterns()?;
        let bus = Rc::new(EventBus::new(config.events.batching, patterns));
        Ok(Self::build(config, bus, host))
    }

    fn build(config: RuntimeConfig, bus: Rc<EventBus>, host: Rc<dyn HostBridge>) -> Self {
        let units = UnitCache::with_capacity(config.compiler.cache_capacity);
        let shared = Rc::new(Shared {
            config,
            bus,
            globals: VariableStore::new(),
            units,
            host,
            pool: ResourcePool::new(),
        });
        let root = Context::new(Rc::clone(&shared), None, ComponentRegistry::new(), None);
        Self { shared, root }
    }

    /// The top-level context; unqualified variables live in the global tier
    pub fn root(&self) -> &Context {
        &self.root
    }

    /// Register components with the top-level context
    pub fn load(&self, definition: &AppDefinition) {
        self.root.load(definition);
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn bus(&self) -> &Rc<EventBus> {
        &self.shared.bus
    }

    pub fn globals(&self) -> &VariableStore {
        &self.shared.globals
    }

    pub fn units(&self) -> &UnitCache {
        &self.shared.units
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.shared.pool
    }

    pub(crate) fn shared(&self) -> &Rc<Shared> {
        &self.shared
    }
}

struct ContextInner {
    id: Option<ContextId>,
    shared: Rc<Shared>,
    registry: RefCell<ComponentRegistry>,
    locals: Option<VariableStore>,
    notifier: Rc<Notifier>,
    store: ReactiveStore,
    errors: RefCell<HandlerErrorLog>,
    user: Option<UserContext>,
    subscriptions: RefCell<Vec<SubscriptionId>>,
    resources: RefCell<Vec<String>>,
    disposed: Cell<bool>,
}

/// Handle to one tenant's state; clones share the same context
#[derive(Clone)]
pub struct Context(Rc<ContextInner>);

impl Context {
    pub(crate) fn new(
        shared: Rc<Shared>,
        id: Option<ContextId>,
        registry: ComponentRegistry,
        user: Option<UserContext>,
    ) -> Self {
        let prefix = id
            .as_ref()
            .map(|id| format!("app:{}:", id))
            .unwrap_or_default();
        let notifier = Rc::new(Notifier::new(Rc::clone(&shared.bus), prefix));
        let locals = id.as_ref().map(|_| VariableStore::new());

        let subscriptions = [topics::GLOBAL_VARIABLE_PUBLISHED, topics::GLOBAL_VARIABLE_CHANGED]
            .into_iter()
            .map(|topic| {
                shared
                    .bus
                    .on(topic, refresh_variable_dependents(Rc::downgrade(&notifier)))
            })
            .collect();

        tracing::debug!(
            context = id.as_ref().map_or("root", |id| id.as_str()),
            components = registry.len(),
            "Created context"
        );

        Context(Rc::new(ContextInner {
            id,
            store: ReactiveStore::new(Rc::clone(&notifier)),
            notifier,
            registry: RefCell::new(registry),
            locals,
            errors: RefCell::new(HandlerErrorLog::new()),
            user,
            subscriptions: RefCell::new(subscriptions),
            resources: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
            shared,
        }))
    }

    /// `None` for the root context
    pub fn id(&self) -> Option<&ContextId> {
        self.0.id.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.0.id.is_none()
    }

    /// Prefix of every topic this context emits
    pub fn prefix(&self) -> &str {
        self.0.notifier.prefix()
    }

    pub fn bus(&self) -> &Rc<EventBus> {
        &self.0.shared.bus
    }

    /// Subscribe to a topic inside this context's namespace
    ///
    /// `topic` is given without the prefix. The subscription is dropped
    /// when the context is disposed.
    pub fn on<F>(&self, topic: &str, listener: F) -> Result<SubscriptionId>
    where
        F: Fn(&str, &serde_json::Value) + 'static,
    {
        self.ensure_live()?;
        let id = self.bus().on(format!("{}{}", self.prefix(), topic), listener);
        self.0.subscriptions.borrow_mut().push(id);
        Ok(id)
    }

    pub fn units(&self) -> &UnitCache {
        &self.0.shared.units
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.0.shared.config
    }

    pub fn host(&self) -> Rc<dyn HostBridge> {
        Rc::clone(&self.0.shared.host)
    }

    pub fn notifier(&self) -> &Rc<Notifier> {
        &self.0.notifier
    }

    pub fn store(&self) -> &ReactiveStore {
        &self.0.store
    }

    pub fn user(&self) -> Option<UserContext> {
        self.0.user.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            let id = self.0.id.clone().unwrap_or_else(|| ContextId::new("root"));
            return Err(HandlerError::ContextDisposed(id));
        }
        Ok(())
    }

    pub fn load(&self, definition: &AppDefinition) {
        self.0.registry.borrow_mut().load(definition);
    }

    pub fn register(&self, component: ComponentElement) {
        self.0.registry.borrow_mut().register(component);
    }

    pub fn component(&self, id: &ComponentId) -> Option<ComponentElement> {
        self.0.registry.borrow().get(id).cloned()
    }

    /// Component by id, or by display name across this context's
    /// applications
    pub fn resolve_component(&self, id_or_name: &str) -> Option<ComponentElement> {
        self.0.registry.borrow().resolve(id_or_name).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<ComponentId> {
        self.0
            .registry
            .borrow()
            .find_by_name(name)
            .map(|c| c.id.clone())
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.0.registry.borrow().ids()
    }

    // Variables

    fn default_tier(&self) -> Tier {
        if self.0.locals.is_some() {
            Tier::Local
        } else {
            Tier::Global
        }
    }

    /// Read a possibly qualified variable
    ///
    /// Unqualified names read the local tier first and fall back to the
    /// global tier. `reader` is registered as a dependent of the name.
    pub fn get_variable(&self, name: &str, reader: Option<&ComponentId>) -> Value {
        match parse_name(name) {
            (Some(tier), bare) => self.get_tier(tier, bare, reader),
            (None, bare) => {
                if let Some(locals) = &self.0.locals {
                    if locals.contains(bare) {
                        return self.get_tier(Tier::Local, bare, reader);
                    }
                }
                self.get_tier(Tier::Global, bare, reader)
            }
        }
    }

    pub fn get_tier(&self, tier: Tier, name: &str, reader: Option<&ComponentId>) -> Value {
        if let Some(reader) = reader {
            self.0.notifier.track(DependencyKey::variable(name), reader);
        }
        match (tier, &self.0.locals) {
            (Tier::Local, Some(locals)) => locals.get(name),
            _ => self.0.shared.globals.get(name),
        }
    }

    /// Write a possibly qualified variable; unqualified writes target the
    /// local tier in an isolation context and the global tier at the root
    pub fn set_variable(&self, name: &str, value: &Value) -> Result<bool> {
        let (tier, bare) = parse_name(name);
        self.set_tier(tier.unwrap_or_else(|| self.default_tier()), bare, value)
    }

    /// Write one tier; returns whether the value changed structurally
    ///
    /// The root context has no local tier, so local writes there land in
    /// the global tier.
    pub fn set_tier(&self, tier: Tier, name: &str, value: &Value) -> Result<bool> {
        self.ensure_live()?;
        let payload = json!({ "name": name, "value": value.to_json() });
        match (tier, &self.0.locals) {
            (Tier::Local, Some(locals)) => {
                let changed = locals.set(name, value);
                if changed {
                    self.0
                        .notifier
                        .notify(&DependencyKey::variable(name), value);
                    self.bus()
                        .emit(topics::variable_changed(self.prefix(), name), payload);
                }
                Ok(changed)
            }
            _ => {
                let changed = self.0.shared.globals.set(name, value);
                if changed {
                    self.bus()
                        .emit(topics::variable_changed(self.prefix(), name), payload.clone());
                    // Every context, this one included, refreshes its own
                    // dependents from the shared topic.
                    self.bus().emit(topics::GLOBAL_VARIABLE_CHANGED, payload);
                }
                Ok(changed)
            }
        }
    }

    /// Copy a local variable into the shared global tier
    ///
    /// A no-op at the root, where unqualified variables are already global.
    pub fn publish(&self, name: &str) -> Result<()> {
        self.ensure_live()?;
        let Some(locals) = &self.0.locals else {
            return Ok(());
        };
        if !locals.contains(name) {
            return Err(HandlerError::UnknownVariable(name.to_string()));
        }
        let value = locals.get(name);
        self.0.shared.globals.set(name, &value);
        tracing::debug!(context = ?self.0.id, name, "Published variable to global");
        self.bus().emit(
            topics::GLOBAL_VARIABLE_PUBLISHED,
            json!({
                "name": name,
                "value": value.to_json(),
                "context": self.0.id,
            }),
        );
        Ok(())
    }

    /// Local tier as JSON; the global tier at the root
    pub fn variables(&self) -> serde_json::Map<String, serde_json::Value> {
        match &self.0.locals {
            Some(locals) => locals.snapshot(),
            None => self.0.shared.globals.snapshot(),
        }
    }

    // Component values

    /// Merged view of one component property
    ///
    /// Live instance values win over declared static inputs. An input
    /// declared as a handler has no value until something stores one in
    /// the instance record.
    pub fn component_value(
        &self,
        id: &ComponentId,
        property: &str,
        reader: Option<&ComponentId>,
    ) -> Value {
        if let Some(value) = self.0.store.instance(id).get(property, reader) {
            return value;
        }
        let registry = self.0.registry.borrow();
        let Some(element) = registry.get(id) else {
            return Value::Undefined;
        };
        if let Some(declared) = element.input.get(property) {
            return declared
                .as_static()
                .map(Value::from_json)
                .unwrap_or(Value::Undefined);
        }
        match property {
            "id" => Value::from(element.id.as_str()),
            "name" => Value::from(element.name.as_str()),
            "applicationId" => Value::from(element.application_id.as_str()),
            "parentId" => element
                .parent_id
                .as_ref()
                .map(|p| Value::from(p.as_str()))
                .unwrap_or(Value::Null),
            "style" => self.style_view(element, reader),
            _ => Value::Undefined,
        }
    }

    fn style_view(&self, element: &ComponentElement, reader: Option<&ComponentId>) -> Value {
        let record = self.0.store.style(&element.id);
        let mut merged = indexmap::IndexMap::new();
        for (name, declared) in &element.style {
            if let Some(value) = declared.as_static() {
                merged.insert(name.clone(), Value::from_json(value));
            }
        }
        for name in record.keys() {
            if let Some(value) = record.get(&name, reader) {
                merged.insert(name, value);
            }
        }
        Value::object(merged)
    }

    pub fn set_component_value(&self, id: &ComponentId, property: &str, value: &Value) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.0.store.instance(id).set(property, value))
    }

    pub fn set_style(&self, id: &ComponentId, property: &str, value: &Value) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.0.store.style(id).set(property, value))
    }

    /// Forget a component's dependencies, reactive records and errors
    pub fn disconnect_component(&self, id: &ComponentId) {
        let removed = self.0.notifier.disconnect(id);
        self.0.store.release(id);
        self.0.errors.borrow_mut().clear(id);
        tracing::trace!(component = %id, removed, "Disconnected component");
    }

    // Errors

    pub fn record_handler_error(
        &self,
        component: &ComponentId,
        scope: HandlerScope,
        source: &str,
        error: &HandlerError,
    ) {
        let message = error.to_string();
        tracing::warn!(
            component = %component,
            context = ?self.0.id,
            %scope,
            error = %message,
            "Handler failed"
        );
        self.0.errors.borrow_mut().record(HandlerErrorRecord {
            component_id: component.clone(),
            scope,
            message: message.clone(),
            source: source.to_string(),
            at: chrono::Utc::now(),
        });
        self.bus().emit(
            topics::handler_error(self.prefix(), component.as_str()),
            json!({ "message": message, "scope": scope, "kind": error.kind() }),
        );
    }

    pub fn errors_for(&self, id: &ComponentId) -> Vec<HandlerErrorRecord> {
        self.0.errors.borrow().errors_for(id)
    }

    pub fn error_count(&self) -> usize {
        self.0.errors.borrow().total()
    }

    // Lifecycle

    /// Take a pooled resource for the lifetime of this context
    pub fn acquire_resource<F>(&self, key: &str, create: F) -> Result<Rc<dyn PooledResource>>
    where
        F: FnOnce() -> Rc<dyn PooledResource>,
    {
        self.ensure_live()?;
        let resource = self.0.shared.pool.acquire(key, create);
        self.0.resources.borrow_mut().push(key.to_string());
        Ok(resource)
    }

    /// Release everything this context owns; later calls are no-ops
    pub fn dispose(&self) {
        if self.0.disposed.replace(true) {
            return;
        }
        for id in self.0.subscriptions.borrow_mut().drain(..) {
            self.bus().off(id);
        }
        self.0.registry.borrow_mut().clear();
        if let Some(locals) = &self.0.locals {
            locals.clear();
        }
        self.0.store.clear();
        self.0.notifier.clear();
        self.0.errors.borrow_mut().clear_all();
        for key in self.0.resources.borrow_mut().drain(..) {
            self.0.shared.pool.release(&key);
        }
        let discarded = if self.prefix().is_empty() {
            0
        } else {
            self.bus().discard_pending(self.prefix())
        };
        tracing::debug!(context = ?self.0.id, discarded, "Disposed context");
    }

    /// Whether two handles refer to the same context
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Listener for the shared global-variable topics
fn refresh_variable_dependents(
    notifier: Weak<Notifier>,
) -> impl Fn(&str, &serde_json::Value) + 'static {
    move |_topic, payload| {
        let Some(notifier) = notifier.upgrade() else {
            return;
        };
        let Some(name) = payload.get("name").and_then(|n| n.as_str()) else {
            return;
        };
        let value = payload
            .get("value")
            .map(Value::from_json)
            .unwrap_or(Value::Undefined);
        notifier.notify(&DependencyKey::variable(name), &value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::PropertyValue;

    fn counter(bus: &EventBus, topic: &str) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let sink = Rc::clone(&count);
        bus.on(topic, move |_, _| sink.set(sink.get() + 1));
        count
    }

    #[test]
    fn test_root_variables_are_global() {
        let runtime = Runtime::default();
        let root = runtime.root();
        root.set_variable("theme", &Value::from("dark")).unwrap();
        assert_eq!(runtime.globals().get("theme"), Value::from("dark"));
        root.set_variable("local.size", &Value::from(3.0)).unwrap();
        assert_eq!(root.get_variable("global.size", None), Value::from(3.0));
        root.publish("theme").unwrap();
    }

    #[test]
    fn test_variable_dependents_refresh_once() {
        let runtime = Runtime::default();
        let root = runtime.root();
        let label = ComponentId::new("label");
        let refreshes = counter(runtime.bus(), "refresh:label");

        root.get_variable("count", Some(&label));
        root.set_variable("count", &Value::from(1.0)).unwrap();
        root.set_variable("count", &Value::from(1.0)).unwrap();
        runtime.bus().flush();
        assert_eq!(refreshes.get(), 1);
    }

    #[test]
    fn test_component_value_merges_instance_over_declared() {
        let runtime = Runtime::default();
        runtime.load(
            &AppDefinition::new().with_component(
                ComponentElement::new("btn", "Button1", "app")
                    .with_input("text", PropertyValue::literal("Save"))
                    .with_input("label", PropertyValue::handler("$label"))
                    .with_style("color", PropertyValue::literal("red")),
            ),
        );
        let root = runtime.root();
        let id = ComponentId::new("btn");

        assert_eq!(root.component_value(&id, "text", None), Value::from("Save"));
        assert_eq!(root.component_value(&id, "label", None), Value::Undefined);
        assert_eq!(root.component_value(&id, "name", None), Value::from("Button1"));

        root.set_component_value(&id, "text", &Value::from("Saving")).unwrap();
        assert_eq!(root.component_value(&id, "text", None), Value::from("Saving"));

        root.set_style(&id, "width", &Value::from(10.0)).unwrap();
        assert_eq!(
            root.component_value(&id, "style", None).to_json(),
            json!({"color": "red", "width": 10})
        );
    }

    #[test]
    fn test_disconnect_clears_dependencies_and_errors() {
        let runtime = Runtime::default();
        let root = runtime.root();
        let label = ComponentId::new("label");
        root.get_variable("count", Some(&label));
        root.record_handler_error(
            &label,
            HandlerScope::Input,
            "$count.x.y",
            &HandlerError::UnknownVariable("count".to_string()),
        );
        assert_eq!(root.error_count(), 1);

        root.disconnect_component(&label);
        assert_eq!(root.notifier().tracked_keys(), 0);
        assert_eq!(root.error_count(), 0);
    }
}
