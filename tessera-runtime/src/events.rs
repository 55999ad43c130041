//! Topic-keyed publish/subscribe hub
//!
//! Every delivery also reaches the firehose listeners registered with
//! [`EventBus::on_any`]. Topics matching a batched pattern are held until
//! [`EventBus::flush`]; repeated emissions to one topic inside that window
//! collapse to the last payload.

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value as Payload;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::config::DEFAULT_BATCHED_PATTERNS;

/// Handle returned by [`EventBus::on`] and [`EventBus::on_any`]
pub type SubscriptionId = u64;

/// Listener callback; receives the topic and its payload
pub type Listener = Rc<dyn Fn(&str, &Payload)>;

/// Passes over pending topics a single flush may take before giving up on
/// listeners that keep re-emitting
const MAX_FLUSH_ROUNDS: usize = 64;

/// Well-known topic names
pub mod topics {
    /// Not prefixed and never batched: every context listens for it
    pub const GLOBAL_VARIABLE_PUBLISHED: &str = "global-variable-published";

    /// A variable in the shared global tier changed
    pub const GLOBAL_VARIABLE_CHANGED: &str = "global-variable-changed";

    pub fn refresh(prefix: &str, component: &str) -> String {
        format!("{}refresh:{}", prefix, component)
    }

    pub fn variable_changed(prefix: &str, name: &str) -> String {
        format!("{}variable-changed:{}", prefix, name)
    }

    pub fn property_changed(prefix: &str, component: &str) -> String {
        format!("{}property-changed:{}", prefix, component)
    }

    pub fn handler_error(prefix: &str, component: &str) -> String {
        format!("{}handler-error:{}", prefix, component)
    }
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, Vec<(SubscriptionId, Listener)>>,
    firehose: Vec<(SubscriptionId, Listener)>,
    pending: IndexMap<String, Payload>,
}

pub struct EventBus {
    state: RefCell<BusState>,
    patterns: Vec<Regex>,
    batching: Cell<bool>,
    next_id: Cell<SubscriptionId>,
}

impl Default for EventBus {
    fn default() -> Self {
        let patterns = DEFAULT_BATCHED_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self::new(true, patterns)
    }
}

impl EventBus {
    pub fn new(batching: bool, patterns: Vec<Regex>) -> Self {
        Self {
            state: RefCell::new(BusState::default()),
            patterns,
            batching: Cell::new(batching),
            next_id: Cell::new(1),
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Register a listener for one topic
    pub fn on<F>(&self, topic: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&str, &Payload) + 'static,
    {
        let id = self.allocate_id();
        self.state
            .borrow_mut()
            .topics
            .entry(topic.into())
            .or_default()
            .push((id, Rc::new(listener)));
        id
    }

    /// Register a listener for every delivered topic
    pub fn on_any<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&str, &Payload) + 'static,
    {
        let id = self.allocate_id();
        self.state
            .borrow_mut()
            .firehose
            .push((id, Rc::new(listener)));
        id
    }

    /// Remove a listener; returns false if the id was unknown
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.firehose.len();
        state.firehose.retain(|(sid, _)| *sid != id);
        if state.firehose.len() != before {
            return true;
        }
        let mut removed = false;
        state.topics.retain(|_, listeners| {
            let len = listeners.len();
            listeners.retain(|(sid, _)| *sid != id);
            removed |= listeners.len() != len;
            !listeners.is_empty()
        });
        removed
    }

    pub fn is_batched(&self, topic: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(topic))
    }

    /// Deliver now, or hold until the next flush for batched topics
    pub fn emit(&self, topic: impl Into<String>, payload: Payload) {
        let topic = topic.into();
        if self.batching.get() && self.is_batched(&topic) {
            self.state.borrow_mut().pending.insert(topic, payload);
            return;
        }
        self.deliver(&topic, &payload);
    }

    /// Deliver synchronously regardless of batching
    pub fn emit_now(&self, topic: &str, payload: Payload) {
        self.deliver(topic, &payload);
    }

    fn deliver(&self, topic: &str, payload: &Payload) {
        // Listeners may subscribe or emit while running, so dispatch from a
        // snapshot taken outside the borrow.
        let listeners: Vec<Listener> = {
            let state = self.state.borrow();
            state
                .topics
                .get(topic)
                .into_iter()
                .flatten()
                .chain(state.firehose.iter())
                .map(|(_, l)| Rc::clone(l))
                .collect()
        };
        for listener in listeners {
            listener(topic, payload);
        }
    }

    /// Deliver every held topic; returns how many deliveries were made
    ///
    /// Topics emitted by listeners during the flush are delivered in a
    /// follow-up pass of the same flush.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_FLUSH_ROUNDS {
            let batch = std::mem::take(&mut self.state.borrow_mut().pending);
            if batch.is_empty() {
                if delivered > 0 {
                    tracing::debug!(delivered, "Flushed batched events");
                }
                return delivered;
            }
            for (topic, payload) in batch {
                self.deliver(&topic, &payload);
                delivered += 1;
            }
        }
        tracing::warn!(
            pending = self.pending_len(),
            "Batched events still pending after {} flush rounds",
            MAX_FLUSH_ROUNDS
        );
        delivered
    }

    /// Enable or disable batching; disabling delivers anything held
    pub fn set_batching(&self, enabled: bool) {
        self.batching.set(enabled);
        if !enabled {
            self.flush();
        }
    }

    pub fn batching(&self) -> bool {
        self.batching.get()
    }

    pub fn pending_len(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Drop held topics starting with `prefix` without delivering them
    pub fn discard_pending(&self, prefix: &str) -> usize {
        let mut state = self.state.borrow_mut();
        let before = state.pending.len();
        state.pending.retain(|topic, _| !topic.starts_with(prefix));
        before - state.pending.len()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.state
            .borrow()
            .topics
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder(bus: &EventBus, topic: &str) -> Rc<RefCell<Vec<Payload>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        bus.on(topic, move |_, payload| sink.borrow_mut().push(payload.clone()));
        seen
    }

    #[test]
    fn test_unbatched_topic_delivers_immediately() {
        let bus = EventBus::default();
        let seen = recorder(&bus, "toast");
        bus.emit("toast", json!("hi"));
        assert_eq!(*seen.borrow(), vec![json!("hi")]);
    }

    #[test]
    fn test_batched_topic_coalesces_to_last_payload() {
        let bus = EventBus::default();
        let seen = recorder(&bus, "refresh:btn");
        for i in 0..5 {
            bus.emit("refresh:btn", json!(i));
        }
        assert!(seen.borrow().is_empty());
        assert_eq!(bus.pending_len(), 1);

        assert_eq!(bus.flush(), 1);
        assert_eq!(*seen.borrow(), vec![json!(4)]);
        assert_eq!(bus.flush(), 0);
    }

    #[test]
    fn test_prefixed_topics_match_batched_patterns() {
        let bus = EventBus::default();
        assert!(bus.is_batched("app:a1:refresh:btn"));
        assert!(bus.is_batched("variable-changed:count"));
        assert!(!bus.is_batched("global-variable-published"));
        assert!(!bus.is_batched("handler-error:btn"));
    }

    #[test]
    fn test_emit_now_bypasses_batching() {
        let bus = EventBus::default();
        let seen = recorder(&bus, "refresh:btn");
        bus.emit_now("refresh:btn", json!(1));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(bus.pending_len(), 0);
    }

    #[test]
    fn test_disable_batching_flushes() {
        let bus = EventBus::default();
        let seen = recorder(&bus, "refresh:btn");
        bus.emit("refresh:btn", json!(1));
        bus.set_batching(false);
        assert_eq!(seen.borrow().len(), 1);
        bus.emit("refresh:btn", json!(2));
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_firehose_sees_everything() {
        let bus = EventBus::default();
        let topics = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&topics);
        bus.on_any(move |topic, _| sink.borrow_mut().push(topic.to_string()));
        bus.emit("a", json!(null));
        bus.emit("refresh:x", json!(null));
        bus.flush();
        assert_eq!(*topics.borrow(), vec!["a".to_string(), "refresh:x".to_string()]);
    }

    #[test]
    fn test_off_removes_listener() {
        let bus = EventBus::default();
        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        let id = bus.on("t", move |_, _| counter.set(counter.get() + 1));
        bus.emit("t", json!(null));
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit("t", json!(null));
        assert_eq!(seen.get(), 1);
        assert_eq!(bus.listener_count("t"), 0);
    }

    #[test]
    fn test_reentrant_emit_during_flush() {
        let bus = Rc::new(EventBus::default());
        let seen = recorder(&bus, "refresh:b");
        let weak = Rc::downgrade(&bus);
        bus.on("refresh:a", move |_, payload| {
            if let Some(bus) = weak.upgrade() {
                bus.emit("refresh:b", payload.clone());
            }
        });
        bus.emit("refresh:a", json!("chained"));
        assert_eq!(bus.flush(), 2);
        assert_eq!(*seen.borrow(), vec![json!("chained")]);
    }

    #[test]
    fn test_discard_pending_by_prefix() {
        let bus = EventBus::default();
        bus.emit("app:x:refresh:a", json!(1));
        bus.emit("refresh:a", json!(1));
        assert_eq!(bus.discard_pending("app:x:"), 1);
        assert_eq!(bus.pending_len(), 1);
    }
}
