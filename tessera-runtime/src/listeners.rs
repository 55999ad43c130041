//! Dependency registry: which components re-resolve when a value changes

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tessera_types::ComponentId;

/// Something a handler can read and later be notified about
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyKey {
    /// A live instance value of a component
    Property { owner: ComponentId, property: String },
    /// A style override of a component
    Style { owner: ComponentId, property: String },
    /// A `$`-variable, regardless of tier
    Variable(String),
}

impl DependencyKey {
    pub fn property(owner: &ComponentId, property: &str) -> Self {
        DependencyKey::Property {
            owner: owner.clone(),
            property: property.to_string(),
        }
    }

    pub fn style(owner: &ComponentId, property: &str) -> Self {
        DependencyKey::Style {
            owner: owner.clone(),
            property: property.to_string(),
        }
    }

    pub fn variable(name: &str) -> Self {
        DependencyKey::Variable(name.to_string())
    }

    fn owner(&self) -> Option<&ComponentId> {
        match self {
            DependencyKey::Property { owner, .. } | DependencyKey::Style { owner, .. } => {
                Some(owner)
            }
            DependencyKey::Variable(_) => None,
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKey::Property { owner, property } => write!(f, "{}.{}", owner, property),
            DependencyKey::Style { owner, property } => write!(f, "{}.style.{}", owner, property),
            DependencyKey::Variable(name) => write!(f, "${}", name),
        }
    }
}

#[derive(Debug, Default)]
pub struct ListenerRegistry {
    dependents: HashMap<DependencyKey, BTreeSet<ComponentId>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `reader` depends on `key`; returns true if newly added
    pub fn track(&mut self, key: DependencyKey, reader: &ComponentId) -> bool {
        self.dependents
            .entry(key)
            .or_default()
            .insert(reader.clone())
    }

    /// Components to notify when `key` changes, in id order
    pub fn dependents(&self, key: &DependencyKey) -> Vec<ComponentId> {
        self.dependents
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_tracking(&self, key: &DependencyKey, reader: &ComponentId) -> bool {
        self.dependents
            .get(key)
            .is_some_and(|set| set.contains(reader))
    }

    /// Forget `id` both as a dependent and as the owner of tracked values
    pub fn disconnect(&mut self, id: &ComponentId) -> usize {
        let before = self.total();
        self.dependents.retain(|key, readers| {
            readers.remove(id);
            !readers.is_empty() && key.owner() != Some(id)
        });
        before - self.total()
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.dependents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }

    /// Number of (key, dependent) pairs
    pub fn total(&self) -> usize {
        self.dependents.values().map(BTreeSet::len).sum()
    }

    pub fn clear(&mut self) {
        self.dependents.clear();
    }
}
