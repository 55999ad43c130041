//! Variable stores
//!
//! Values are snapshotted on the way in and out so a snippet holding a
//! container it read cannot mutate the store behind its back.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use tessera_script::Value;

/// Which variable store a name lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Shared across every context of a runtime
    Global,
    /// Private to one isolation context
    Local,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Global => f.write_str("global"),
            Tier::Local => f.write_str("local"),
        }
    }
}

/// Split an optionally qualified name (`global.x`, `local.x`, `x`)
pub fn parse_name(name: &str) -> (Option<Tier>, &str) {
    if let Some(rest) = name.strip_prefix("global.") {
        (Some(Tier::Global), rest)
    } else if let Some(rest) = name.strip_prefix("local.") {
        (Some(Tier::Local), rest)
    } else {
        (None, name)
    }
}

/// Name to value map for one tier
#[derive(Debug, Default)]
pub struct VariableStore {
    entries: RefCell<IndexMap<String, Value>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current value, `Undefined` when unset
    ///
    /// Mutating the copy leaves the store untouched; callers write the
    /// container back with [`VariableStore::set`].
    pub fn get(&self, name: &str) -> Value {
        self.entries
            .borrow()
            .get(name)
            .map(Value::deep_clone)
            .unwrap_or(Value::Undefined)
    }

    /// Store a value; returns whether it differs structurally from the
    /// previous one
    pub fn set(&self, name: &str, value: &Value) -> bool {
        let snapshot = value.deep_clone();
        let mut entries = self.entries.borrow_mut();
        let changed = entries
            .get(name)
            .map_or(true, |previous| !previous.structural_eq(&snapshot));
        entries.insert(name.to_string(), snapshot);
        changed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.entries.borrow_mut().shift_remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// JSON view of every entry, in insertion order
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.entries
            .borrow()
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_qualified_names() {
        assert_eq!(parse_name("global.theme"), (Some(Tier::Global), "theme"));
        assert_eq!(parse_name("local.count"), (Some(Tier::Local), "count"));
        assert_eq!(parse_name("count"), (None, "count"));
        assert_eq!(parse_name("globalCount"), (None, "globalCount"));
    }

    #[test]
    fn test_set_reports_structural_change() {
        let store = VariableStore::new();
        let list = Value::from_json(&json!([1, 2]));
        assert!(store.set("xs", &list));
        assert!(!store.set("xs", &Value::from_json(&json!([1, 2]))));
        assert!(store.set("xs", &Value::from_json(&json!([1, 2, 3]))));
        assert_eq!(store.get("xs").to_json(), json!([1, 2, 3]));
    }

    #[test]
    fn test_values_are_snapshotted() {
        let store = VariableStore::new();
        let list = Value::from_json(&json!([1]));
        store.set("xs", &list);
        if let Value::Array(items) = &list {
            items.borrow_mut().push(Value::Number(2.0));
        }
        assert_eq!(store.get("xs").to_json(), json!([1]));

        if let Value::Array(items) = store.get("xs") {
            items.borrow_mut().clear();
        }
        assert_eq!(store.get("xs").to_json(), json!([1]));
    }

    #[test]
    fn test_unset_reads_undefined() {
        let store = VariableStore::new();
        assert_eq!(store.get("missing"), Value::Undefined);
        assert!(!store.contains("missing"));
        store.set("a", &Value::Number(1.0));
        store.set("b", &Value::Null);
        assert_eq!(store.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.snapshot()["a"], json!(1));
        assert_eq!(store.remove("a"), Some(Value::Number(1.0)));
        assert_eq!(store.len(), 1);
    }
}
