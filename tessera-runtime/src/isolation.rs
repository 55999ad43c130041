//! Isolation contexts for embedded sub-apps
//!
//! An isolation context is populated from a supplied definition rather than
//! the root registry. It has a private local variable tier and emits every
//! notification under its own `app:{id}:` prefix. Dropping it disposes it.

use std::ops::Deref;
use tessera_types::{AppDefinition, ContextId, UserContext};

use crate::context::{Context, Runtime};
use crate::errors::Result;
use crate::registry::ComponentRegistry;

pub struct IsolationContext {
    id: ContextId,
    context: Context,
}

impl IsolationContext {
    /// Context for one embedded sub-app instance
    pub fn create(runtime: &Runtime, id: impl Into<ContextId>, definition: &AppDefinition) -> Self {
        Self::build(runtime, id.into(), definition, None)
    }

    /// Request-scoped context for server-side rendering
    pub fn for_request(
        runtime: &Runtime,
        id: impl Into<ContextId>,
        definition: &AppDefinition,
        user: Option<UserContext>,
    ) -> Self {
        Self::build(runtime, id.into(), definition, user)
    }

    fn build(
        runtime: &Runtime,
        id: ContextId,
        definition: &AppDefinition,
        user: Option<UserContext>,
    ) -> Self {
        let registry = ComponentRegistry::from_definition(definition);
        let context = Context::new(
            std::rc::Rc::clone(runtime.shared()),
            Some(id.clone()),
            registry,
            user,
        );
        Self { id, context }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// Handle usable after this value is moved into a backend call
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Copy local variable `name` into the shared global tier and notify
    /// every context
    pub fn publish_to_global(&self, name: &str) -> Result<()> {
        self.context.publish(name)
    }

    pub fn dispose(&self) {
        self.context.dispose();
    }
}

impl Deref for IsolationContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.context
    }
}

impl Drop for IsolationContext {
    fn drop(&mut self) {
        self.context.dispose();
    }
}
