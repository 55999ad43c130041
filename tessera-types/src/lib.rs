//! Shared types for tessera
//!
//! This crate provides the data model shared by the script interpreter, the
//! handler runtime and the CLI: identifiers, declarative component
//! definitions, handler snippets, user context and the side-effect records
//! produced by simulated execution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Component identifier, unique across all applications
    ComponentId
);
string_id!(
    /// Application identifier
    AppId
);
string_id!(
    /// Page identifier
    PageId
);
string_id!(
    /// Isolation context identifier
    ContextId
);

/// Byte span in snippet source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both `self` and `other`
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Which property map a handler snippet was attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerScope {
    /// Computes an input value; re-run when its dependencies change
    Input,
    /// Computes a style value; re-run when its dependencies change
    Style,
    /// Runs once per UI event
    Event,
}

impl HandlerScope {
    /// Whether reads performed by this handler register dependencies
    pub fn tracks_dependencies(self) -> bool {
        matches!(self, HandlerScope::Input | HandlerScope::Style)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HandlerScope::Input => "input",
            HandlerScope::Style => "style",
            HandlerScope::Event => "event",
        }
    }
}

impl fmt::Display for HandlerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-authored script snippet attached to a component property
///
/// Snippets are immutable once authored and are identified by their text
/// for caching purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerSnippet {
    pub component_id: ComponentId,
    pub scope: HandlerScope,
    pub source: String,
}

impl HandlerSnippet {
    pub fn new(component_id: ComponentId, scope: HandlerScope, source: impl Into<String>) -> Self {
        Self {
            component_id,
            scope,
            source: source.into(),
        }
    }
}

/// A declared property value: either a static literal or a handler
///
/// Handlers are written as `{"$handler": "<snippet text>"}` in definition
/// files; everything else is a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Handler {
        #[serde(rename = "$handler")]
        handler: String,
    },
    Static(serde_json::Value),
}

impl PropertyValue {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        PropertyValue::Static(value.into())
    }

    pub fn handler(source: impl Into<String>) -> Self {
        PropertyValue::Handler {
            handler: source.into(),
        }
    }

    pub fn as_static(&self) -> Option<&serde_json::Value> {
        match self {
            PropertyValue::Static(v) => Some(v),
            PropertyValue::Handler { .. } => None,
        }
    }

    pub fn as_handler(&self) -> Option<&str> {
        match self {
            PropertyValue::Handler { handler } => Some(handler),
            PropertyValue::Static(_) => None,
        }
    }
}

/// Declarative definition of one UI component
///
/// Live runtime values are not stored here; they live in the runtime's
/// reactive instance record for this component id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentElement {
    pub id: ComponentId,
    pub name: String,
    pub application_id: AppId,

    #[serde(default)]
    pub page_id: Option<PageId>,

    #[serde(default)]
    pub parent_id: Option<ComponentId>,

    #[serde(default)]
    pub children: Vec<ComponentId>,

    #[serde(default)]
    pub input: BTreeMap<String, PropertyValue>,

    #[serde(default)]
    pub style: BTreeMap<String, PropertyValue>,

    #[serde(default)]
    pub event: BTreeMap<String, PropertyValue>,
}

impl ComponentElement {
    pub fn new(id: impl Into<ComponentId>, name: impl Into<String>, app: impl Into<AppId>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            application_id: app.into(),
            page_id: None,
            parent_id: None,
            children: Vec::new(),
            input: BTreeMap::new(),
            style: BTreeMap::new(),
            event: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.input.insert(name.into(), value);
        self
    }

    pub fn with_style(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.style.insert(name.into(), value);
        self
    }

    pub fn with_event(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.event.insert(name.into(), PropertyValue::handler(source));
        self
    }

    pub fn with_parent(mut self, parent: impl Into<ComponentId>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    pub fn on_page(mut self, page: impl Into<PageId>) -> Self {
        self.page_id = Some(page.into());
        self
    }

    /// Property map for a handler scope
    pub fn properties(&self, scope: HandlerScope) -> &BTreeMap<String, PropertyValue> {
        match scope {
            HandlerScope::Input => &self.input,
            HandlerScope::Style => &self.style,
            HandlerScope::Event => &self.event,
        }
    }

    /// All handler snippets declared on this component
    pub fn handlers(&self) -> Vec<(String, HandlerSnippet)> {
        [HandlerScope::Input, HandlerScope::Style, HandlerScope::Event]
            .into_iter()
            .flat_map(|scope| {
                self.properties(scope).iter().filter_map(move |(name, value)| {
                    value.as_handler().map(|source| {
                        (
                            name.clone(),
                            HandlerSnippet::new(self.id.clone(), scope, source),
                        )
                    })
                })
            })
            .collect()
    }
}

/// An application grouping components and pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: AppId,
    pub name: String,
}

/// A page within an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub name: String,
    pub application_id: AppId,

    #[serde(default)]
    pub path: Option<String>,
}

/// A pre-resolved set of applications, pages and components
///
/// This is what an isolation context is populated from, and the format of
/// definition files read by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    #[serde(default)]
    pub applications: Vec<Application>,

    #[serde(default)]
    pub pages: Vec<Page>,

    #[serde(default)]
    pub components: Vec<ComponentElement>,
}

impl AppDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application(mut self, id: impl Into<AppId>, name: impl Into<String>) -> Self {
        self.applications.push(Application {
            id: id.into(),
            name: name.into(),
        });
        self
    }

    pub fn with_page(mut self, page: Page) -> Self {
        self.pages.push(page);
        self
    }

    pub fn with_component(mut self, component: ComponentElement) -> Self {
        self.components.push(component);
        self
    }
}

/// Authenticated user attached to a request-scoped context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub id: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A mutating call recorded during simulated execution
///
/// Carries everything needed to replay the call later: the operation name,
/// its arguments, the component whose handler made the call and the scope
/// that handler ran in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideEffect {
    #[serde(rename = "type")]
    pub kind: String,
    pub args: Vec<serde_json::Value>,
    pub component_id: Option<ComponentId>,
    pub scope: HandlerScope,
}

impl SideEffect {
    pub fn new(
        kind: impl Into<String>,
        args: Vec<serde_json::Value>,
        component_id: Option<ComponentId>,
        scope: HandlerScope,
    ) -> Self {
        Self {
            kind: kind.into(),
            args,
            component_id,
            scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_value_untagged() {
        let parsed: BTreeMap<String, PropertyValue> = serde_json::from_value(json!({
            "text": "Hello",
            "count": 3,
            "label": { "$handler": "return $name" },
        }))
        .unwrap();

        assert_eq!(parsed["text"], PropertyValue::literal("Hello"));
        assert_eq!(parsed["count"].as_static(), Some(&json!(3)));
        assert_eq!(parsed["label"].as_handler(), Some("return $name"));
    }

    #[test]
    fn test_component_handlers_listing() {
        let component = ComponentElement::new("c1", "Button1", "app")
            .with_input("text", PropertyValue::handler("$label"))
            .with_style("color", PropertyValue::literal("red"))
            .with_event("onClick", "$count = $count + 1");

        let handlers = component.handlers();
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].0, "text");
        assert_eq!(handlers[0].1.scope, HandlerScope::Input);
        assert_eq!(handlers[1].0, "onClick");
        assert_eq!(handlers[1].1.scope, HandlerScope::Event);
        assert_eq!(handlers[1].1.component_id, ComponentId::new("c1"));
    }

    #[test]
    fn test_side_effect_serializes_type_tag() {
        let effect = SideEffect::new(
            "setVar",
            vec![json!("x"), json!(5)],
            Some(ComponentId::new("compA")),
            HandlerScope::Event,
        );
        let value = serde_json::to_value(&effect).unwrap();
        assert_eq!(value["type"], "setVar");
        assert_eq!(value["componentId"], "compA");
        assert_eq!(value["component_id"], serde_json::Value::Null);
        assert_eq!(value["scope"], "event");
    }

    #[test]
    fn test_scope_tracking() {
        assert!(HandlerScope::Input.tracks_dependencies());
        assert!(HandlerScope::Style.tracks_dependencies());
        assert!(!HandlerScope::Event.tracks_dependencies());
    }

    #[test]
    fn test_span_merge() {
        let a = Span::new(4, 8);
        let b = Span::new(1, 5);
        assert_eq!(a.to(b), Span::new(1, 8));
        assert_eq!(a.len(), 4);
    }
}
