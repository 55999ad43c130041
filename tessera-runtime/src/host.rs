//! Host bridge
//!
//! Operations the runtime does not implement itself (navigation, CRUD on
//! the application model, toasts, file I/O, backend calls) are forwarded to
//! a [`HostBridge`] supplied by the embedder.

use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use tessera_script::{Promise, Value};
use tessera_types::{ComponentId, ContextId};

use crate::api::ApiOperation;

/// One forwarded operation
#[derive(Debug)]
pub struct HostCall<'a> {
    pub operation: &'a ApiOperation,
    pub args: Vec<Value>,
    pub component_id: Option<ComponentId>,
    pub context_id: Option<ContextId>,
}

pub trait HostBridge {
    /// Perform `call`; asynchronous operations return a `Value::Future`
    fn call(&self, call: HostCall<'_>) -> Result<Value, String>;
}

/// Host that accepts every operation and does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl HostBridge for NullHost {
    fn call(&self, call: HostCall<'_>) -> Result<Value, String> {
        Ok(inert_result(call.operation))
    }
}

/// Placeholder result for an operation that was not really performed
pub fn inert_result(operation: &ApiOperation) -> Value {
    if operation.asynchronous {
        Value::Future(Promise::resolved(Value::Undefined))
    } else {
        Value::Undefined
    }
}

/// A forwarded call as seen by [`RecordingHost`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedCall {
    pub operation: String,
    pub args: Vec<serde_json::Value>,
    pub component_id: Option<ComponentId>,
    pub context_id: Option<ContextId>,
}

/// Host that records every call and answers from canned responses
#[derive(Debug, Default)]
pub struct RecordingHost {
    calls: RefCell<Vec<RecordedCall>>,
    responses: RefCell<HashMap<String, serde_json::Value>>,
    failures: RefCell<HashMap<String, String>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `operation` with `value` from now on
    pub fn respond(&self, operation: &str, value: serde_json::Value) {
        self.responses
            .borrow_mut()
            .insert(operation.to_string(), value);
    }

    /// Fail `operation` with `message` from now on
    pub fn fail(&self, operation: &str, message: &str) {
        self.failures
            .borrow_mut()
            .insert(operation.to_string(), message.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub fn calls_to(&self, operation: &str) -> Vec<RecordedCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl HostBridge for RecordingHost {
    fn call(&self, call: HostCall<'_>) -> Result<Value, String> {
        let name = call.operation.name;
        self.calls.borrow_mut().push(RecordedCall {
            operation: name.to_string(),
            args: call.args.iter().map(Value::to_json).collect(),
            component_id: call.component_id,
            context_id: call.context_id,
        });

        let failure = self.failures.borrow().get(name).cloned();
        if let Some(message) = failure {
            return if call.operation.asynchronous {
                Ok(Value::Future(Promise::rejected(message)))
            } else {
                Err(message)
            };
        }

        let response = self.responses.borrow().get(name).map(Value::from_json);
        Ok(match response {
            Some(value) if call.operation.asynchronous => Value::Future(Promise::resolved(value)),
            Some(value) => value,
            None => inert_result(call.operation),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use serde_json::json;

    fn call<'a>(operation: &'a ApiOperation, args: Vec<Value>) -> HostCall<'a> {
        HostCall {
            operation,
            args,
            component_id: Some(ComponentId::new("btn")),
            context_id: None,
        }
    }

    #[test]
    fn test_null_host_inert_results() {
        let toast = api::lookup("showToast").unwrap();
        let fetch = api::lookup("fetch").unwrap();
        assert_eq!(NullHost.call(call(toast, vec![])), Ok(Value::Undefined));
        assert!(matches!(NullHost.call(call(fetch, vec![])), Ok(Value::Future(_))));
    }

    #[test]
    fn test_recording_host_responses() {
        let host = RecordingHost::new();
        host.respond("confirm", json!(true));
        host.fail("navigate", "no router");

        let confirm = api::lookup("confirm").unwrap();
        let result = host.call(call(confirm, vec![Value::from("Sure?")])).unwrap();
        let Value::Future(promise) = result else {
            panic!("confirm is asynchronous");
        };
        assert_eq!(
            futures::executor::block_on(promise.settle()),
            Ok(Value::Bool(true))
        );

        let navigate = api::lookup("navigate").unwrap();
        assert_eq!(
            host.call(call(navigate, vec![Value::from("/home")])),
            Err("no router".to_string())
        );

        let calls = host.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec![json!("Sure?")]);
        assert_eq!(host.calls_to("navigate").len(), 1);
    }
}
