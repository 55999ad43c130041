//! Live execution backend
//!
//! Runs a handler with the full API surface: core operations mutate the
//! context immediately and host operations go to the embedder's bridge.
//! A handler that never suspends completes inside [`execute`]; one that
//! awaits a pending host future comes back as [`Completion::Pending`] and
//! finishes when the caller drives it.

use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::noop_waker_ref;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};
use tessera_script::{Environment, ExecutionLimits, Interpreter, ScriptError, Value};
use tessera_types::{ComponentId, HandlerScope};

use crate::api::{self, ApiOperation, Dispatch, Origin, Provider};
use crate::context::Context;
use crate::errors::{HandlerError, Result};
use crate::host::HostCall;
use crate::resolver::ScopeResolver;

/// Dispatch that performs every operation for real
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveDispatch;

impl Dispatch for LiveDispatch {
    fn dispatch(
        &self,
        ctx: &Context,
        origin: &Origin,
        operation: &'static ApiOperation,
        args: Vec<Value>,
    ) -> tessera_script::Result<Value> {
        match operation.provider {
            Provider::Core => api::invoke_core(ctx, origin, operation, args),
            Provider::Host => ctx
                .host()
                .call(HostCall {
                    operation,
                    args,
                    component_id: origin.component.clone(),
                    context_id: ctx.id().cloned(),
                })
                .map_err(|message| ScriptError::host(operation.name, message)),
        }
    }
}

/// Result of starting a live handler
pub enum Completion {
    Ready(Value),
    /// The handler suspended on a pending future
    Pending(LocalBoxFuture<'static, Value>),
}

impl Completion {
    pub fn ready(&self) -> Option<&Value> {
        match self {
            Completion::Ready(value) => Some(value),
            Completion::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Completion::Pending(_))
    }

    /// Drive the handler to completion
    pub async fn resolve(self) -> Value {
        match self {
            Completion::Ready(value) => value,
            Completion::Pending(future) => future.await,
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Completion::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// One handler invocation
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub component: Option<ComponentId>,
    pub code: String,
    pub scope: HandlerScope,
    pub event: Value,
    pub item: Value,
}

impl HandlerRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            component: None,
            code: code.into(),
            scope: HandlerScope::Event,
            event: Value::Undefined,
            item: Value::Undefined,
        }
    }

    pub fn component(mut self, id: impl Into<ComponentId>) -> Self {
        self.component = Some(id.into());
        self
    }

    pub fn scope(mut self, scope: HandlerScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn event(mut self, event: Value) -> Self {
        self.event = event;
        self
    }

    pub fn item(mut self, item: Value) -> Self {
        self.item = item;
        self
    }

    pub(crate) fn resolver(&self, ctx: &Context, dispatch: Rc<dyn Dispatch>) -> ScopeResolver {
        let component = self
            .component
            .clone()
            .map(Value::Component)
            .unwrap_or(Value::Undefined);
        ScopeResolver::new(
            ctx.clone(),
            Origin::new(self.component.clone(), self.scope),
            dispatch,
        )
        .with_param("component", component)
        .with_param("event", self.event.clone())
        .with_param("item", self.item.clone())
    }
}

/// Run event handler `code` for `component`
pub fn execute_handler(
    ctx: &Context,
    component: &ComponentId,
    code: &str,
    event: Value,
    item: Value,
) -> Result<Completion> {
    execute(
        ctx,
        HandlerRequest::new(code)
            .component(component.clone())
            .event(event)
            .item(item),
    )
}

/// Run a handler against the live API surface
///
/// Compilation failures are returned. Failures while running are recorded
/// in the context's error log and the handler yields `undefined`.
pub fn execute(ctx: &Context, request: HandlerRequest) -> Result<Completion> {
    ctx.ensure_live()?;
    let unit = ctx.units().compile(&request.code)?;
    let env: Rc<dyn Environment> = Rc::new(request.resolver(ctx, Rc::new(LiveDispatch)));
    let future = unit.execute(env, ExecutionLimits::default());
    Ok(drive(ctx, future, Failure::from(request)))
}

/// Call a function value a handler handed out, such as a timer callback
pub fn invoke_callback(
    ctx: &Context,
    component: Option<&ComponentId>,
    function: Value,
    args: Vec<Value>,
) -> Result<Completion> {
    ctx.ensure_live()?;
    let mut request = HandlerRequest::new("<callback>");
    request.component = component.cloned();
    let env: Rc<dyn Environment> = Rc::new(request.resolver(ctx, Rc::new(LiveDispatch)));
    let future = async move {
        let mut interpreter = Interpreter::new(env);
        interpreter.invoke(function, args).await
    }
    .boxed_local();
    Ok(drive(ctx, future, Failure::from(request)))
}

/// Where to file a failure
struct Failure {
    component: Option<ComponentId>,
    scope: HandlerScope,
    source: String,
}

impl From<HandlerRequest> for Failure {
    fn from(request: HandlerRequest) -> Self {
        Self {
            component: request.component,
            scope: request.scope,
            source: request.code,
        }
    }
}

impl Failure {
    fn settle(&self, ctx: &Context, result: tessera_script::Result<Value>) -> Value {
        match result {
            Ok(value) => value,
            Err(error) => {
                let error = HandlerError::Execution(error);
                match &self.component {
                    Some(component) => {
                        ctx.record_handler_error(component, self.scope, &self.source, &error)
                    }
                    None => tracing::warn!(error = %error, "Handler failed"),
                }
                Value::Undefined
            }
        }
    }
}

/// Poll once; hand back the rest if the handler suspended
fn drive(
    ctx: &Context,
    mut future: LocalBoxFuture<'static, tessera_script::Result<Value>>,
    failure: Failure,
) -> Completion {
    let mut cx = TaskContext::from_waker(noop_waker_ref());
    let polled = future.as_mut().poll(&mut cx);
    match polled {
        Poll::Ready(result) => {
            let value = failure.settle(ctx, result);
            ctx.bus().flush();
            Completion::Ready(value)
        }
        Poll::Pending => {
            ctx.bus().flush();
            let ctx = ctx.clone();
            Completion::Pending(
                async move {
                    let value = failure.settle(&ctx, future.await);
                    ctx.bus().flush();
                    value
                }
                .boxed_local(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Runtime;
    use crate::host::{HostBridge, RecordingHost};
    use futures::channel::oneshot;
    use futures::executor::block_on;
    use std::cell::RefCell;
    use tessera_script::Promise;
    use tessera_types::{AppDefinition, ComponentElement, PropertyValue};

    fn runtime_with(host: Rc<dyn HostBridge>) -> Runtime {
        let runtime = Runtime::with_host(Default::default(), host).unwrap();
        runtime.load(
            &AppDefinition::new()
                .with_component(ComponentElement::new("btn", "Button1", "app"))
                .with_component(
                    ComponentElement::new("label", "Label1", "app")
                        .with_input("text", PropertyValue::literal("0")),
                ),
        );
        runtime
    }

    #[test]
    fn test_event_handler_mutates_immediately() {
        let runtime = runtime_with(Rc::new(RecordingHost::new()));
        let root = runtime.root();
        let btn = ComponentId::new("btn");
        root.set_variable("count", &Value::from(0.0)).unwrap();

        let completion = execute_handler(
            root,
            &btn,
            "$count = $count + 1; Label1.text = `Clicked ${$count}`; return event.x",
            Value::from_json(&serde_json::json!({"x": 7})),
            Value::Undefined,
        )
        .unwrap();

        assert_eq!(completion.ready(), Some(&Value::from(7.0)));
        assert_eq!(root.get_variable("count", None), Value::from(1.0));
        assert_eq!(
            root.component_value(&ComponentId::new("label"), "text", None),
            Value::from("Clicked 1")
        );
    }

    #[test]
    fn test_cyclic_variable_write_fails_the_handler() {
        let runtime = runtime_with(Rc::new(RecordingHost::new()));
        let root = runtime.root();
        let btn = ComponentId::new("btn");

        let completion = execute_handler(
            root,
            &btn,
            "let a = []; a.push(a); $x = a; return 1",
            Value::Undefined,
            Value::Undefined,
        )
        .unwrap();
        assert_eq!(completion.ready(), Some(&Value::Undefined));
        assert!(root.errors_for(&btn)[0].message.contains("circular structure"));
        assert_eq!(root.get_variable("x", None), Value::Undefined);

        let completion = execute_handler(
            root,
            &btn,
            "let a = []; a.push(a); try { $x = a } catch (e) { return 'cyclic' }",
            Value::Undefined,
            Value::Undefined,
        )
        .unwrap();
        assert_eq!(completion.ready(), Some(&Value::from("cyclic")));
    }

    #[test]
    fn test_variable_reads_are_copies() {
        let runtime = runtime_with(Rc::new(RecordingHost::new()));
        let root = runtime.root();
        let btn = ComponentId::new("btn");
        root.set_variable("items", &Value::from_json(&serde_json::json!([1, 2])))
            .unwrap();

        let completion = execute_handler(
            root,
            &btn,
            "$items.push(3); return $items.length",
            Value::Undefined,
            Value::Undefined,
        )
        .unwrap();
        assert_eq!(completion.ready(), Some(&Value::from(2.0)));

        // Mutations are published by writing the container back.
        let completion = execute_handler(
            root,
            &btn,
            "const items = $items; items.push(3); $items = items; return $items.length",
            Value::Undefined,
            Value::Undefined,
        )
        .unwrap();
        assert_eq!(completion.ready(), Some(&Value::from(3.0)));
    }

    #[test]
    fn test_compile_error_is_surfaced() {
        let runtime = runtime_with(Rc::new(RecordingHost::new()));
        let err = execute_handler(
            runtime.root(),
            &ComponentId::new("btn"),
            "return (",
            Value::Undefined,
            Value::Undefined,
        )
        .unwrap_err();
        assert!(matches!(err, HandlerError::Compilation(_)));
        // Failed compilations are not cached.
        assert_eq!(runtime.units().len(), 0);
    }

    #[test]
    fn test_execution_error_is_recorded() {
        let runtime = runtime_with(Rc::new(RecordingHost::new()));
        let root = runtime.root();
        let btn = ComponentId::new("btn");
        let completion =
            execute_handler(root, &btn, "missing.call()", Value::Undefined, Value::Undefined)
                .unwrap();
        assert_eq!(completion.ready(), Some(&Value::Undefined));
        let errors = root.errors_for(&btn);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("missing is not defined"));
        assert_eq!(errors[0].source, "missing.call()");
    }

    #[test]
    fn test_host_operations_are_forwarded() {
        let host = Rc::new(RecordingHost::new());
        let runtime = runtime_with(host.clone());
        execute_handler(
            runtime.root(),
            &ComponentId::new("btn"),
            "showToast('Saved', 'success'); navigate('/done')",
            Value::Undefined,
            Value::Undefined,
        )
        .unwrap();
        let calls = host.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation, "showToast");
        assert_eq!(calls[0].component_id, Some(ComponentId::new("btn")));
        assert_eq!(calls[1].args, vec![serde_json::json!("/done")]);
    }

    /// Host whose backend calls stay pending until the test answers them
    #[derive(Default)]
    struct DeferredHost {
        waiting: RefCell<Vec<oneshot::Sender<Value>>>,
    }

    impl HostBridge for DeferredHost {
        fn call(&self, _call: HostCall<'_>) -> std::result::Result<Value, String> {
            let (tx, rx) = oneshot::channel();
            self.waiting.borrow_mut().push(tx);
            Ok(Value::Future(Promise::new(async move {
                rx.await.map_err(|_| "cancelled".to_string())
            })))
        }
    }

    #[test]
    fn test_async_handler_resumes_after_host_future() {
        let host = Rc::new(DeferredHost::default());
        let runtime = runtime_with(host.clone());
        let root = runtime.root();

        let completion = execute_handler(
            root,
            &ComponentId::new("btn"),
            "$status = 'loading'
             const rows = await runBackendFunction('list')
             $status = 'done'
             return rows.length",
            Value::Undefined,
            Value::Undefined,
        )
        .unwrap();

        assert!(completion.is_pending());
        assert_eq!(root.get_variable("status", None), Value::from("loading"));

        let sender = host.waiting.borrow_mut().pop().unwrap();
        sender
            .send(Value::from_json(&serde_json::json!([1, 2, 3])))
            .unwrap();
        assert_eq!(block_on(completion.resolve()), Value::from(3.0));
        assert_eq!(root.get_variable("status", None), Value::from("done"));
    }

    #[test]
    fn test_invoke_callback_uses_live_surface() {
        let runtime = runtime_with(Rc::new(RecordingHost::new()));
        let root = runtime.root();
        let completion = execute(root, HandlerRequest::new("return n => { $ticks = n }")).unwrap();
        let callback = completion.ready().cloned().unwrap();

        invoke_callback(root, None, callback, vec![Value::from(5.0)]).unwrap();
        assert_eq!(root.get_variable("ticks", None), Value::from(5.0));
    }
}
