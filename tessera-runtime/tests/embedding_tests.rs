//! Tests that drive the runtime the way an embedding application does

use futures::executor::block_on;
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use tessera_runtime::{
    execute_handler, execute_ssr_handler, replay, HostBridge, HostCall, IsolationContext,
    RecordingHost, Runtime, RuntimeConfig, SsrOptions,
};
use tessera_script::Value;
use tessera_types::{AppDefinition, ComponentElement, ComponentId, PropertyValue, UserContext};

/// Host that keeps `localStorage` in memory
#[derive(Default)]
struct MemoryStorageHost {
    items: RefCell<HashMap<String, String>>,
}

impl HostBridge for MemoryStorageHost {
    fn call(&self, call: HostCall<'_>) -> Result<Value, String> {
        let key = call
            .args
            .first()
            .map(Value::to_display_string)
            .ok_or_else(|| "missing key".to_string())?;
        match call.operation.name {
            "localStorage.getItem" => Ok(self
                .items
                .borrow()
                .get(&key)
                .map(|v| Value::from(v.as_str()))
                .unwrap_or(Value::Null)),
            "localStorage.setItem" => {
                let value = call
                    .args
                    .get(1)
                    .map(Value::to_display_string)
                    .unwrap_or_default();
                self.items.borrow_mut().insert(key, value);
                Ok(Value::Undefined)
            }
            other => Err(format!("{} is not supported", other)),
        }
    }
}

fn shop() -> AppDefinition {
    AppDefinition::new()
        .with_component(
            ComponentElement::new("cart", "Cart", "shop")
                .with_input("items", PropertyValue::literal(json!([]))),
        )
        .with_component(ComponentElement::new("checkout", "Checkout", "shop"))
}

#[test]
fn test_config_file_drives_runtime() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "events:\n  batching: false\ncompiler:\n  cache_capacity: 2\nsimulation:\n  timeout_ms: 250"
    )
    .unwrap();

    let config = RuntimeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.compiler.cache_capacity, Some(2));
    let runtime = Runtime::new(config).unwrap();
    assert!(!runtime.bus().batching());

    for n in 0..4 {
        runtime.units().compile(&format!("return {}", n)).unwrap();
    }
    assert_eq!(runtime.units().len(), 2);
}

#[test]
fn test_invalid_pattern_is_rejected() {
    let err = RuntimeConfig::from_yaml_str("events:\n  batched_patterns: ['(']").unwrap_err();
    assert!(err.to_string().contains("Invalid batched topic pattern"));
}

#[test]
fn test_storage_round_trips_through_host() {
    let runtime = Runtime::with_host(Default::default(), Rc::new(MemoryStorageHost::default()))
        .unwrap();
    runtime.load(&shop());
    let checkout = ComponentId::new("checkout");

    execute_handler(
        runtime.root(),
        &checkout,
        "localStorage.setItem('last', event.orderId)",
        Value::from_json(&json!({ "orderId": "A-17" })),
        Value::Undefined,
    )
    .unwrap();
    let completion = execute_handler(
        runtime.root(),
        &checkout,
        "return localStorage.getItem('last')",
        Value::Undefined,
        Value::Undefined,
    )
    .unwrap();
    assert_eq!(completion.ready(), Some(&Value::from("A-17")));

    execute_handler(
        runtime.root(),
        &checkout,
        "navigate('/thanks')",
        Value::Undefined,
        Value::Undefined,
    )
    .unwrap();
    let errors = runtime.root().errors_for(&checkout);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("navigate is not supported"));
}

#[test]
fn test_backend_result_feeds_component_state() {
    let host = Rc::new(RecordingHost::new());
    host.respond("runBackendFunction", json!([{ "sku": "x1" }, { "sku": "y2" }]));
    let runtime = Runtime::with_host(Default::default(), host.clone()).unwrap();
    runtime.load(&shop());

    let completion = execute_handler(
        runtime.root(),
        &ComponentId::new("checkout"),
        "const rows = await runBackendFunction('cart.load', { user: 'u1' })
         Cart.items = rows.map(r => r.sku)
         return rows.length",
        Value::Undefined,
        Value::Undefined,
    )
    .unwrap();
    assert_eq!(block_on(completion.resolve()), Value::from(2.0));
    assert_eq!(
        runtime
            .root()
            .component_value(&ComponentId::new("cart"), "items", None)
            .to_json(),
        json!(["x1", "y2"])
    );
    assert_eq!(
        host.calls_to("runBackendFunction")[0].args,
        vec![json!("cart.load"), json!({ "user": "u1" })]
    );
}

#[test]
fn test_ssr_then_hydrate() {
    let host = Rc::new(RecordingHost::new());
    let runtime = Runtime::with_host(Default::default(), host.clone()).unwrap();
    let request = IsolationContext::for_request(
        &runtime,
        "req-42",
        &shop(),
        Some(UserContext::new("u9").with_role("buyer")),
    );

    let outcome = execute_ssr_handler(
        &request,
        Some(&ComponentId::new("cart")),
        "if (hasRole('buyer')) { $greeting = 'Hi ' + getCurrentUser().id; showToast($greeting) }",
        Value::Undefined,
        Value::Undefined,
        &SsrOptions::default(),
    );
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert_eq!(outcome.side_effects.len(), 2);
    assert!(host.calls().is_empty());
    // Recorded writes did not land; reads during the run saw nothing.
    assert!(request.get_variable("greeting", None).is_nullish());

    let hydrated = IsolationContext::create(&runtime, "page-1", &shop());
    let report = block_on(replay(&hydrated, &outcome.side_effects));
    assert_eq!((report.applied, report.forwarded), (1, 1));
    assert!(report.failed.is_empty());
    assert_eq!(hydrated.get_variable("greeting", None), Value::from("Hi u9"));
    assert_eq!(host.calls()[0].context_id.as_ref().map(|c| c.as_str()), Some("page-1"));
}
