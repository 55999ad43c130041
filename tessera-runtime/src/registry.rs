//! Component registry indexed by id and by display name per application

use indexmap::IndexMap;
use std::collections::HashMap;
use tessera_types::{AppDefinition, AppId, Application, ComponentElement, ComponentId, Page};

#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: IndexMap<ComponentId, ComponentElement>,
    by_name: HashMap<(AppId, String), ComponentId>,
    applications: IndexMap<AppId, Application>,
    pages: Vec<Page>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definition(definition: &AppDefinition) -> Self {
        let mut registry = Self::new();
        registry.load(definition);
        registry
    }

    /// Add everything in `definition`; components with a known id are
    /// replaced
    pub fn load(&mut self, definition: &AppDefinition) {
        for app in &definition.applications {
            self.applications.insert(app.id.clone(), app.clone());
        }
        self.pages.extend(definition.pages.iter().cloned());
        for component in &definition.components {
            self.register(component.clone());
        }
    }

    pub fn register(&mut self, component: ComponentElement) -> Option<ComponentElement> {
        let previous = self.remove(&component.id);
        self.by_name.insert(
            (component.application_id.clone(), component.name.clone()),
            component.id.clone(),
        );
        if !self.applications.contains_key(&component.application_id) {
            let id = component.application_id.clone();
            self.applications.insert(
                id.clone(),
                Application {
                    name: id.to_string(),
                    id,
                },
            );
        }
        self.components.insert(component.id.clone(), component);
        previous
    }

    pub fn get(&self, id: &ComponentId) -> Option<&ComponentElement> {
        self.components.get(id)
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.components.contains_key(id)
    }

    /// Find a component by display name
    ///
    /// Applications are searched in registration order; the first match
    /// wins.
    pub fn find_by_name(&self, name: &str) -> Option<&ComponentElement> {
        self.applications
            .keys()
            .find_map(|app| self.find_in_app(app, name))
    }

    pub fn find_in_app(&self, app: &AppId, name: &str) -> Option<&ComponentElement> {
        self.by_name
            .get(&(app.clone(), name.to_string()))
            .and_then(|id| self.components.get(id))
    }

    /// Look a component up by id, falling back to display name
    pub fn resolve(&self, id_or_name: &str) -> Option<&ComponentElement> {
        self.components
            .get(&ComponentId::new(id_or_name))
            .or_else(|| self.find_by_name(id_or_name))
    }

    pub fn remove(&mut self, id: &ComponentId) -> Option<ComponentElement> {
        let removed = self.components.shift_remove(id)?;
        let key = (removed.application_id.clone(), removed.name.clone());
        if self.by_name.get(&key) == Some(id) {
            self.by_name.remove(&key);
        }
        Some(removed)
    }

    pub fn all(&self) -> impl Iterator<Item = &ComponentElement> {
        self.components.values()
    }

    pub fn ids(&self) -> Vec<ComponentId> {
        self.components.keys().cloned().collect()
    }

    pub fn applications(&self) -> impl Iterator<Item = &Application> {
        self.applications.values()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn clear(&mut self) {
        self.components.clear();
        self.by_name.clear();
        self.applications.clear();
        self.pages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> AppDefinition {
        AppDefinition::new()
            .with_application("shop", "Shop")
            .with_application("admin", "Admin")
            .with_component(ComponentElement::new("a-title", "Title", "admin"))
            .with_component(ComponentElement::new("s-title", "Title", "shop"))
            .with_component(ComponentElement::new("s-cart", "Cart", "shop"))
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let registry = ComponentRegistry::from_definition(&definition());
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.find_by_name("Title").map(|c| c.id.as_str()),
            Some("s-title")
        );
        assert_eq!(
            registry
                .find_in_app(&AppId::new("admin"), "Title")
                .map(|c| c.id.as_str()),
            Some("a-title")
        );
        assert_eq!(registry.resolve("s-cart").map(|c| c.name.as_str()), Some("Cart"));
        assert_eq!(registry.resolve("Cart").map(|c| c.id.as_str()), Some("s-cart"));
        assert!(registry.resolve("Missing").is_none());
    }

    #[test]
    fn test_remove_drops_name_index() {
        let mut registry = ComponentRegistry::from_definition(&definition());
        registry.remove(&ComponentId::new("s-title"));
        assert_eq!(
            registry.find_by_name("Title").map(|c| c.id.as_str()),
            Some("a-title")
        );
    }

    #[test]
    fn test_register_infers_application() {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentElement::new("x", "X", "adhoc"));
        assert_eq!(registry.applications().count(), 1);
        assert!(registry.find_by_name("X").is_some());
    }

    #[test]
    fn test_rename_on_reregister() {
        let mut registry = ComponentRegistry::from_definition(&definition());
        let renamed = ComponentElement::new("s-cart", "Basket", "shop");
        assert!(registry.register(renamed).is_some());
        assert!(registry.find_by_name("Cart").is_none());
        assert!(registry.find_by_name("Basket").is_some());
    }
}
