//! # Tessera runtime
//!
//! Executes handler snippets attached to UI components.
//!
//! ## Architecture
//!
//! - **Runtime / Context**: shared stores plus per-tenant state, passed
//!   explicitly to every call
//! - **IsolationContext**: a context for one embedded sub-app with private
//!   local variables and a namespaced event prefix
//! - **ScopeResolver**: the identifier surface a running snippet sees
//! - **Reactive store**: per-component instance and style records with
//!   dependency tracking and deduplicated change notification
//! - **EventBus**: topic pub/sub with a firehose and batched topics
//! - **Backends**: [`live`] applies mutations, [`simulation`] records them,
//!   [`ssr`] wraps simulation for server-side rendering
//!
//! ## Example
//!
//! ```
//! use tessera_runtime::{execute_handler, Runtime};
//! use tessera_script::Value;
//! use tessera_types::{AppDefinition, ComponentElement, ComponentId};
//!
//! let runtime = Runtime::default();
//! runtime.load(&AppDefinition::new().with_component(ComponentElement::new("b1", "Button1", "app")));
//!
//! let result = execute_handler(
//!     runtime.root(),
//!     &ComponentId::new("b1"),
//!     "$clicks = ($clicks ?? 0) + 1; return $clicks",
//!     Value::Undefined,
//!     Value::Undefined,
//! )
//! .unwrap();
//! assert_eq!(result.ready(), Some(&Value::Number(1.0)));
//! ```

pub mod api;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod host;
pub mod isolation;
pub mod listeners;
pub mod live;
pub mod pool;
pub mod reactive;
pub mod registry;
pub mod resolver;
pub mod simulation;
pub mod ssr;
pub mod variables;

#[cfg(test)]
mod tests;

pub use api::{ApiOperation, Dispatch, Effect, Origin, Provider, OPERATIONS};
pub use config::{ConfigError, RuntimeConfig};
pub use context::{Context, Runtime};
pub use errors::{ErrorKind, HandlerError, HandlerErrorLog, HandlerErrorRecord, Result};
pub use events::{topics, EventBus, SubscriptionId};
pub use host::{HostBridge, HostCall, NullHost, RecordedCall, RecordingHost};
pub use isolation::IsolationContext;
pub use listeners::{DependencyKey, ListenerRegistry};
pub use live::{execute, execute_handler, invoke_callback, Completion, HandlerRequest, LiveDispatch};
pub use pool::{PooledResource, ResourcePool};
pub use reactive::{Notifier, ReactiveRecord, ReactiveStore, RecordKind};
pub use registry::ComponentRegistry;
pub use resolver::ScopeResolver;
pub use simulation::{simulate, RecordingDispatch, SimulationOptions, SimulationOutcome};
pub use ssr::{
    execute_ssr_batch, execute_ssr_handler, replay, OutcomeError, ReplayReport, SsrJob, SsrOptions,
    SsrOutcome,
};
pub use variables::{Tier, VariableStore};
