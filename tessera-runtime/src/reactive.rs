//! Reactive instance and style records
//!
//! Every component has exactly one instance record and one style record per
//! context. Reads through [`ReactiveRecord::get`] register the reading
//! component as a dependent; writes that change a value structurally send a
//! `refresh` notification to every dependent.

use indexmap::IndexMap;
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tessera_script::Value;
use tessera_types::ComponentId;

use crate::events::{topics, EventBus};
use crate::listeners::{DependencyKey, ListenerRegistry};

/// Dependency tracking plus change fan-out for one context
pub struct Notifier {
    bus: Rc<EventBus>,
    listeners: RefCell<ListenerRegistry>,
    prefix: String,
}

impl Notifier {
    pub fn new(bus: Rc<EventBus>, prefix: impl Into<String>) -> Self {
        Self {
            bus,
            listeners: RefCell::new(ListenerRegistry::new()),
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bus(&self) -> &Rc<EventBus> {
        &self.bus
    }

    pub fn track(&self, key: DependencyKey, reader: &ComponentId) {
        self.listeners.borrow_mut().track(key, reader);
    }

    /// Send `refresh` to every dependent of `key`; returns how many
    pub fn notify(&self, key: &DependencyKey, value: &Value) -> usize {
        let dependents = self.listeners.borrow().dependents(key);
        if dependents.is_empty() {
            return 0;
        }
        let payload = refresh_payload(key, value);
        for dependent in &dependents {
            self.bus
                .emit(topics::refresh(&self.prefix, dependent.as_str()), payload.clone());
        }
        dependents.len()
    }

    pub fn dependents(&self, key: &DependencyKey) -> Vec<ComponentId> {
        self.listeners.borrow().dependents(key)
    }

    pub fn is_tracking(&self, key: &DependencyKey, reader: &ComponentId) -> bool {
        self.listeners.borrow().is_tracking(key, reader)
    }

    pub fn disconnect(&self, id: &ComponentId) -> usize {
        self.listeners.borrow_mut().disconnect(id)
    }

    pub fn tracked_keys(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }
}

fn refresh_payload(key: &DependencyKey, value: &Value) -> serde_json::Value {
    match key {
        DependencyKey::Property { owner, property } | DependencyKey::Style { owner, property } => {
            json!({
                "source": key.to_string(),
                "owner": owner,
                "property": property,
                "value": value.to_json(),
            })
        }
        DependencyKey::Variable(name) => json!({
            "source": key.to_string(),
            "name": name,
            "value": value.to_json(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Instance,
    Style,
}

/// Observable value bag for one component
pub struct ReactiveRecord {
    owner: ComponentId,
    kind: RecordKind,
    values: RefCell<IndexMap<String, Value>>,
    notifier: Rc<Notifier>,
}

impl ReactiveRecord {
    fn new(owner: ComponentId, kind: RecordKind, notifier: Rc<Notifier>) -> Self {
        Self {
            owner,
            kind,
            values: RefCell::new(IndexMap::new()),
            notifier,
        }
    }

    pub fn owner(&self) -> &ComponentId {
        &self.owner
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    fn key(&self, property: &str) -> DependencyKey {
        match self.kind {
            RecordKind::Instance => DependencyKey::property(&self.owner, property),
            RecordKind::Style => DependencyKey::style(&self.owner, property),
        }
    }

    /// Read a value, registering `reader` as a dependent
    ///
    /// The dependency is recorded even when the property is unset, so the
    /// first write still reaches the reader.
    pub fn get(&self, property: &str, reader: Option<&ComponentId>) -> Option<Value> {
        if let Some(reader) = reader {
            self.notifier.track(self.key(property), reader);
        }
        self.peek(property)
    }

    /// Read without tracking
    pub fn peek(&self, property: &str) -> Option<Value> {
        self.values.borrow().get(property).map(Value::deep_clone)
    }

    pub fn contains(&self, property: &str) -> bool {
        self.values.borrow().contains_key(property)
    }

    /// Store a snapshot of `value`; returns whether it changed structurally
    ///
    /// The value is stored either way. Only a structural change notifies.
    pub fn set(&self, property: &str, value: &Value) -> bool {
        let snapshot = value.deep_clone();
        let changed = {
            let mut values = self.values.borrow_mut();
            let changed = values
                .get(property)
                .map_or(true, |previous| !previous.structural_eq(&snapshot));
            values.insert(property.to_string(), snapshot);
            changed
        };
        if changed {
            let notified = self.notifier.notify(&self.key(property), value);
            tracing::trace!(
                owner = %self.owner,
                property,
                notified,
                "Reactive value changed"
            );
            self.notifier.bus().emit(
                topics::property_changed(self.notifier.prefix(), self.owner.as_str()),
                json!({ "property": property, "kind": self.kind_name() }),
            );
        }
        changed
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            RecordKind::Instance => "instance",
            RecordKind::Style => "style",
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.borrow().keys().cloned().collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    fn clear(&self) {
        self.values.borrow_mut().clear();
    }
}

/// Identity cache of reactive records keyed by component id
pub struct ReactiveStore {
    notifier: Rc<Notifier>,
    instances: RefCell<HashMap<ComponentId, Rc<ReactiveRecord>>>,
    styles: RefCell<HashMap<ComponentId, Rc<ReactiveRecord>>>,
}

impl ReactiveStore {
    pub fn new(notifier: Rc<Notifier>) -> Self {
        Self {
            notifier,
            instances: RefCell::new(HashMap::new()),
            styles: RefCell::new(HashMap::new()),
        }
    }

    /// The live instance record of `id`, created on first use
    pub fn instance(&self, id: &ComponentId) -> Rc<ReactiveRecord> {
        self.record(&self.instances, id, RecordKind::Instance)
    }

    /// The style override record of `id`, created on first use
    pub fn style(&self, id: &ComponentId) -> Rc<ReactiveRecord> {
        self.record(&self.styles, id, RecordKind::Style)
    }

    fn record(
        &self,
        records: &RefCell<HashMap<ComponentId, Rc<ReactiveRecord>>>,
        id: &ComponentId,
        kind: RecordKind,
    ) -> Rc<ReactiveRecord> {
        Rc::clone(records.borrow_mut().entry(id.clone()).or_insert_with(|| {
            Rc::new(ReactiveRecord::new(
                id.clone(),
                kind,
                Rc::clone(&self.notifier),
            ))
        }))
    }

    pub fn has_instance(&self, id: &ComponentId) -> bool {
        self.instances.borrow().contains_key(id)
    }

    /// Drop both records of `id`
    ///
    /// Holders of a released record keep a detached copy; a later
    /// [`ReactiveStore::instance`] call creates a fresh record.
    pub fn release(&self, id: &ComponentId) {
        if let Some(record) = self.instances.borrow_mut().remove(id) {
            record.clear();
        }
        if let Some(record) = self.styles.borrow_mut().remove(id) {
            record.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.instances.borrow_mut().clear();
        self.styles.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn setup() -> (Rc<EventBus>, ReactiveStore) {
        let bus = Rc::new(EventBus::default());
        let notifier = Rc::new(Notifier::new(Rc::clone(&bus), ""));
        (bus, ReactiveStore::new(notifier))
    }

    fn counter(bus: &EventBus, topic: &str) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let sink = Rc::clone(&count);
        bus.on(topic, move |_, _| sink.set(sink.get() + 1));
        count
    }

    #[test]
    fn test_same_record_for_same_id() {
        let (_, store) = setup();
        let id = ComponentId::new("btn");
        assert!(Rc::ptr_eq(&store.instance(&id), &store.instance(&id)));
        assert!(!Rc::ptr_eq(&store.instance(&id), &store.style(&id)));
    }

    #[test]
    fn test_structurally_equal_write_is_silent() {
        let (bus, store) = setup();
        let owner = ComponentId::new("input");
        let reader = ComponentId::new("label");
        let refreshes = counter(&bus, "refresh:label");

        let record = store.instance(&owner);
        record.set("value", &Value::from_json(&serde_json::json!({"a": [1]})));
        record.get("value", Some(&reader));

        assert!(!record.set("value", &Value::from_json(&serde_json::json!({"a": [1]}))));
        bus.flush();
        assert_eq!(refreshes.get(), 0);

        assert!(record.set("value", &Value::from_json(&serde_json::json!({"a": [2]}))));
        bus.flush();
        assert_eq!(refreshes.get(), 1);
    }

    #[test]
    fn test_untracked_reads_do_not_subscribe() {
        let (bus, store) = setup();
        let record = store.style(&ComponentId::new("box"));
        let refreshes = counter(&bus, "refresh:label");
        record.peek("color");
        record.get("color", None);
        record.set("color", &Value::from("red"));
        bus.flush();
        assert_eq!(refreshes.get(), 0);
    }

    #[test]
    fn test_release_creates_fresh_record() {
        let (_, store) = setup();
        let id = ComponentId::new("btn");
        let first = store.instance(&id);
        first.set("text", &Value::from("Save"));
        store.release(&id);
        let second = store.instance(&id);
        assert!(!Rc::ptr_eq(&first, &second));
        assert_eq!(second.peek("text"), None);
    }
}
