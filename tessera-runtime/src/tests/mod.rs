//! Integration tests for tessera-runtime

#[cfg(test)]
mod integration_tests {
    use crate::{
        api::OPERATIONS,
        context::Runtime,
        events::EventBus,
        host::RecordingHost,
        isolation::IsolationContext,
        listeners::DependencyKey,
        live::{execute, execute_handler, HandlerRequest},
        simulation::{simulate, SimulationOptions},
    };
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use tessera_script::{ComplexityLimits, Value};
    use tessera_types::{AppDefinition, ComponentElement, ComponentId, PropertyValue};

    fn counter(bus: &EventBus, topic: &str) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let sink = Rc::clone(&count);
        bus.on(topic, move |_, _| sink.set(sink.get() + 1));
        count
    }

    fn sub_app() -> AppDefinition {
        AppDefinition::new()
            .with_component(ComponentElement::new("lbl", "Label", "widget"))
            .with_component(ComponentElement::new("btn", "Button", "widget"))
    }

    #[test]
    fn test_scenario_compile_and_run_without_context() {
        let runtime = Runtime::default();
        let completion = execute(runtime.root(), HandlerRequest::new("return 1+1")).unwrap();
        assert_eq!(completion.ready(), Some(&Value::from(2.0)));
    }

    #[test]
    fn test_identical_text_shares_one_unit() {
        let runtime = Runtime::default();
        let first = runtime.units().compile("return $a + 1").unwrap();
        let second = runtime.units().compile("return $a + 1").unwrap();
        assert!(Rc::ptr_eq(&first, &second));

        execute(runtime.root(), HandlerRequest::new("return $a + 1")).unwrap();
        assert_eq!(runtime.units().len(), 1);
    }

    #[test]
    fn test_scenario_isolated_locals() {
        let runtime = Runtime::default();
        let c1 = IsolationContext::create(&runtime, "c1", &sub_app());
        let c2 = IsolationContext::create(&runtime, "c2", &sub_app());
        c1.set_variable("count", &Value::from(0.0)).unwrap();
        c2.set_variable("count", &Value::from(0.0)).unwrap();

        execute_handler(
            &c1,
            &ComponentId::new("btn"),
            "$count = $count + 1",
            Value::Undefined,
            Value::Undefined,
        )
        .unwrap();

        assert_eq!(c1.get_variable("count", None), Value::from(1.0));
        assert_eq!(c2.get_variable("count", None), Value::from(0.0));
        assert!(runtime.globals().get("count").is_nullish());
    }

    #[test]
    fn test_variable_write_then_read_across_invocations() {
        let runtime = Runtime::default();
        let btn = ComponentId::new("btn");
        runtime.load(&sub_app());
        let values = [
            ("1", Value::from(1.0)),
            ("'text'", Value::from("text")),
            ("[1, 2]", Value::from_json(&json!([1, 2]))),
            ("{ a: { b: true } }", Value::from_json(&json!({"a": {"b": true}}))),
            ("null", Value::Null),
        ];
        for (literal, expected) in values {
            let same = execute_handler(
                runtime.root(),
                &btn,
                &format!("$x = {}; return $x", literal),
                Value::Undefined,
                Value::Undefined,
            )
            .unwrap();
            assert!(same.ready().unwrap().structural_eq(&expected), "{}", literal);

            let later = execute_handler(
                runtime.root(),
                &btn,
                "return $x",
                Value::Undefined,
                Value::Undefined,
            )
            .unwrap();
            assert!(later.ready().unwrap().structural_eq(&expected), "{}", literal);
        }
    }

    #[test]
    fn test_reserved_writes_are_noops() {
        let runtime = Runtime::default();
        runtime.load(&sub_app());
        let completion = execute_handler(
            runtime.root(),
            &ComponentId::new("btn"),
            "navigate = 5; Math = null; return [typeof navigate, Math.max(1, 2)]",
            Value::Undefined,
            Value::Undefined,
        )
        .unwrap();
        assert_eq!(
            completion.ready().unwrap().to_json(),
            json!(["function", 2])
        );
        assert_eq!(runtime.root().error_count(), 0);
    }

    #[test]
    fn test_structurally_equal_write_is_silent() {
        let runtime = Runtime::default();
        let root = runtime.root();
        let btn = ComponentId::new("btn");
        let lbl = ComponentId::new("lbl");
        let refreshes = counter(runtime.bus(), "refresh:lbl");
        let record = root.store().instance(&btn);

        record.set("data", &Value::from_json(&json!({"rows": [1, 2]})));
        record.get("data", Some(&lbl));

        assert!(!record.set("data", &Value::from_json(&json!({"rows": [1, 2]}))));
        runtime.bus().flush();
        assert_eq!(refreshes.get(), 0);

        assert!(record.set("data", &Value::from_json(&json!({"rows": [1, 2, 3]}))));
        runtime.bus().flush();
        assert_eq!(refreshes.get(), 1);
    }

    #[test]
    fn test_rapid_emissions_coalesce_to_last() {
        let bus = EventBus::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        bus.on("refresh:lbl", move |_, payload| sink.borrow_mut().push(payload.clone()));

        for n in 0..10 {
            bus.emit("refresh:lbl", json!({ "n": n }));
        }
        assert!(seen.borrow().is_empty());
        bus.flush();
        assert_eq!(*seen.borrow(), vec![json!({ "n": 9 })]);
    }

    #[test]
    fn test_publish_notifies_dependents_in_every_context() {
        let runtime = Runtime::default();
        let c1 = IsolationContext::create(&runtime, "c1", &sub_app());
        let c2 = IsolationContext::create(&runtime, "c2", &sub_app());
        let lbl = ComponentId::new("lbl");
        let c1_refresh = counter(runtime.bus(), "app:c1:refresh:lbl");
        let c2_refresh = counter(runtime.bus(), "app:c2:refresh:lbl");

        c1.get_variable("theme", Some(&lbl));
        c2.get_variable("theme", Some(&lbl));
        c1.set_variable("theme", &Value::from("dark")).unwrap();
        c2.set_variable("theme", &Value::from("light")).unwrap();
        runtime.bus().flush();
        assert_eq!((c1_refresh.get(), c2_refresh.get()), (1, 1));
        assert_eq!(c1.get_variable("theme", None), Value::from("dark"));
        assert_eq!(c2.get_variable("theme", None), Value::from("light"));

        c1.publish_to_global("theme").unwrap();
        runtime.bus().flush();
        assert_eq!((c1_refresh.get(), c2_refresh.get()), (2, 2));
        assert_eq!(runtime.globals().get("theme"), Value::from("dark"));
        assert_eq!(c2.get_variable("global.theme", None), Value::from("dark"));
        assert_eq!(c2.get_variable("theme", None), Value::from("light"));
    }

    #[test]
    fn test_simulation_never_reaches_mutating_host_operations() {
        let host = Rc::new(RecordingHost::new());
        let runtime = Runtime::with_host(Default::default(), host.clone()).unwrap();
        for operation in OPERATIONS.iter().filter(|op| op.is_mutating()) {
            let outcome = simulate(
                runtime.root(),
                HandlerRequest::new(format!("{}('a', 1)", operation.name)),
                &SimulationOptions::default(),
            );
            if outcome.is_ok() {
                assert_eq!(outcome.side_effects.len(), 1, "{}", operation.name);
            }
        }
        assert!(host.calls().is_empty());
        assert!(runtime.globals().is_empty());
    }

    #[test]
    fn test_scenario_simulated_mutation_is_recorded() {
        let runtime = Runtime::default();
        runtime.load(&AppDefinition::new().with_component(ComponentElement::new(
            "compA", "Header", "app",
        )));
        let outcome = simulate(
            runtime.root(),
            HandlerRequest::new("return setVar('x', 5)").component("compA"),
            &SimulationOptions::default(),
        );
        assert!(outcome.is_ok());
        assert_eq!(outcome.value, Value::Undefined);
        assert_eq!(outcome.side_effects.len(), 1);
        let effect = &outcome.side_effects[0];
        assert_eq!(effect.kind, "setVar");
        assert_eq!(effect.args, vec![json!("x"), json!(5)]);
        assert_eq!(effect.component_id, Some(ComponentId::new("compA")));
    }

    #[test]
    fn test_scenario_complexity_bound_rejects_before_running() {
        let runtime = Runtime::default();
        let options = SimulationOptions {
            limits: ComplexityLimits {
                max_loops: 1,
                ..ComplexityLimits::default()
            },
            ..SimulationOptions::default()
        };
        let outcome = simulate(
            runtime.root(),
            HandlerRequest::new(
                "setVar('a', 1); for (const x of [1]) { } for (const y of [2]) { }",
            ),
            &options,
        );
        let error = outcome.error.expect("rejected");
        assert!(!error.to_string().is_empty());
        assert!(outcome.side_effects.is_empty());
        assert!(runtime.globals().is_empty());
    }

    #[test]
    fn test_disconnect_leaves_no_listeners() {
        let runtime = Runtime::default();
        runtime.load(
            &AppDefinition::new()
                .with_component(ComponentElement::new("btn", "Button", "app"))
                .with_component(
                    ComponentElement::new("lbl", "Label", "app")
                        .with_input("text", PropertyValue::literal("-")),
                ),
        );
        let root = runtime.root();
        let lbl = ComponentId::new("lbl");
        let btn = ComponentId::new("btn");

        root.get_variable("count", Some(&lbl));
        root.component_value(&btn, "text", Some(&lbl));
        assert!(root.notifier().is_tracking(&DependencyKey::variable("count"), &lbl));
        assert_eq!(root.notifier().tracked_keys(), 2);

        root.disconnect_component(&lbl);
        assert_eq!(root.notifier().tracked_keys(), 0);

        let refreshes = counter(runtime.bus(), "refresh:lbl");
        root.set_variable("count", &Value::from(1.0)).unwrap();
        runtime.bus().flush();
        assert_eq!(refreshes.get(), 0);
    }

    #[test]
    fn test_handler_input_scope_tracks_reads() {
        let runtime = Runtime::default();
        runtime.load(&sub_app());
        let lbl = ComponentId::new("lbl");
        execute(
            runtime.root(),
            HandlerRequest::new("return `Hello ${$name}`")
                .component("lbl")
                .scope(tessera_types::HandlerScope::Input),
        )
        .unwrap();
        assert!(runtime
            .root()
            .notifier()
            .is_tracking(&DependencyKey::variable("name"), &lbl));

        execute(
            runtime.root(),
            HandlerRequest::new("return $other").component("btn"),
        )
        .unwrap();
        assert!(!runtime
            .root()
            .notifier()
            .is_tracking(&DependencyKey::variable("other"), &ComponentId::new("btn")));
    }
}
