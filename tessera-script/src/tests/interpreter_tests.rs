use crate::error::ScriptError;
use crate::interpreter::{Assignment, Environment, ExecutionLimits};
use crate::unit::UnitCache;
use crate::value::{Promise, Value};
use crate::{run, Result};
use futures::executor::block_on;
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tessera_types::ComponentId;

/// Environment with `$`-variables, one component and a recorded API
#[derive(Default)]
struct RecordingEnv {
    vars: RefCell<HashMap<String, Value>>,
    members: RefCell<HashMap<String, Value>>,
    calls: RefCell<Vec<(String, Vec<Value>)>>,
}

impl Environment for RecordingEnv {
    fn contains(&self, name: &str) -> bool {
        name.starts_with('$') || name == "Button1" || name == "notify" || name == "Math"
    }

    fn lookup(&self, name: &str) -> Result<Option<Value>> {
        if let Some(var) = name.strip_prefix('$') {
            return Ok(Some(
                self.vars
                    .borrow()
                    .get(var)
                    .cloned()
                    .unwrap_or(Value::Undefined),
            ));
        }
        Ok(match name {
            "Button1" => Some(Value::Component(ComponentId::new("btn-1"))),
            "notify" => Some(Value::api("notify")),
            _ => None,
        })
    }

    fn assign(&self, name: &str, value: Value) -> Result<Assignment> {
        if let Some(var) = name.strip_prefix('$') {
            self.vars.borrow_mut().insert(var.to_string(), value);
            return Ok(Assignment::Applied);
        }
        if name == "Math" || name == "notify" {
            return Ok(Assignment::Ignored);
        }
        Ok(Assignment::Unowned)
    }

    fn get_member(&self, _component: &ComponentId, property: &str) -> Result<Value> {
        Ok(self
            .members
            .borrow()
            .get(property)
            .cloned()
            .unwrap_or(Value::Undefined))
    }

    fn set_member(&self, _component: &ComponentId, property: &str, value: Value) -> Result<()> {
        self.members.borrow_mut().insert(property.to_string(), value);
        Ok(())
    }

    fn call(&self, operation: &str, args: Vec<Value>) -> Result<Value> {
        self.calls.borrow_mut().push((operation.to_string(), args));
        match operation {
            "notify" => Ok(Value::Future(Promise::resolved(Value::from("sent")))),
            other => Err(ScriptError::host(other, "unsupported")),
        }
    }
}

fn run_in(env: &Rc<RecordingEnv>, source: &str) -> Result<Value> {
    let cache = UnitCache::new();
    let unit = cache.compile(source).map_err(|e| e.error)?;
    block_on(unit.execute(env.clone(), ExecutionLimits::default()))
}

#[test]
fn test_scenario_return_one_plus_one() {
    assert_eq!(run("return 1+1").unwrap(), Value::Number(2.0));
}

#[test]
fn test_dollar_variables_route_through_environment() {
    let env = Rc::new(RecordingEnv::default());
    run_in(&env, "$count = 1").unwrap();
    run_in(&env, "$count += 2").unwrap();
    assert_eq!(run_in(&env, "$count").unwrap(), Value::Number(3.0));
    assert_eq!(env.vars.borrow().get("count"), Some(&Value::Number(3.0)));
}

#[test]
fn test_reserved_name_write_is_ignored() {
    let env = Rc::new(RecordingEnv::default());
    let value = run_in(&env, "Math = 5; return typeof Math").unwrap();
    assert_eq!(value, Value::string("function"));
}

#[test]
fn test_component_members_read_and_write() {
    let env = Rc::new(RecordingEnv::default());
    run_in(&env, "Button1.text = 'Save'").unwrap();
    assert_eq!(
        run_in(&env, "Button1.text.toUpperCase()").unwrap(),
        Value::string("SAVE")
    );
}

#[test]
fn test_api_call_and_await() {
    let env = Rc::new(RecordingEnv::default());
    let value = run_in(&env, "const r = await notify('hi', 2); return r").unwrap();
    assert_eq!(value, Value::string("sent"));
    let calls = env.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "notify");
    assert_eq!(calls[0].1, vec![Value::from("hi"), Value::from(2.0)]);
}

#[test]
fn test_host_error_is_catchable() {
    let env = Rc::new(RecordingEnv::default());
    let value = run_in(&env, "try { notify.missing() } catch (e) { return e.message }").unwrap();
    assert_eq!(value, Value::string("unsupported"));
}

#[test]
fn test_array_pipeline() {
    let value = run(
        "const items = [{ price: 5 }, { price: 12 }, { price: 8 }]
         return items
             .filter(i => i.price > 6)
             .map(i => i.price * 2)
             .reduce((acc, p) => acc + p, 0)",
    )
    .unwrap();
    assert_eq!(value, Value::Number(40.0));
}

#[test]
fn test_sort_with_comparator() {
    let value = run("const xs = [3, 1, 2]; xs.sort((a, b) => b - a); return xs").unwrap();
    assert_eq!(value.to_json(), json!([3, 2, 1]));
    let value = run("return ['b', 'c', 'a'].sort()").unwrap();
    assert_eq!(value.to_json(), json!(["a", "b", "c"]));
}

#[test]
fn test_objects_are_shared_references() {
    let value = run("const a = { n: 1 }; const b = a; b.n = 2; return a.n").unwrap();
    assert_eq!(value, Value::Number(2.0));
}

#[test]
fn test_optional_chaining_and_coalescing() {
    assert_eq!(
        run("const u = null; return u?.name ?? 'anon'").unwrap(),
        Value::string("anon")
    );
    assert_eq!(run("const u = null; return u?.greet()").unwrap(), Value::Undefined);
}

#[test]
fn test_update_expressions() {
    assert_eq!(
        run("let i = 1; const a = i++; const b = ++i; return [a, b, i]")
            .unwrap()
            .to_json(),
        json!([1, 3, 3])
    );
    assert_eq!(
        run("const o = { n: 1 }; o.n--; return o.n").unwrap(),
        Value::Number(0.0)
    );
}

#[test]
fn test_index_assignment_extends_arrays() {
    let value = run("const xs = []; xs[2] = 'c'; return xs.length").unwrap();
    assert_eq!(value, Value::Number(3.0));
}

#[test]
fn test_huge_array_growth_is_a_range_error() {
    let err = run("let a = []; a[1e15] = 1; return 1").unwrap_err();
    assert_eq!(err.message(), "RangeError: Invalid array length");

    let err = run("const a = [1]; a.length = 1e12; return a").unwrap_err();
    assert_eq!(err.message(), "RangeError: Invalid array length");

    let caught = run("try { 'ab'.repeat(1e19) } catch (e) { return e.message }").unwrap();
    assert_eq!(caught, Value::string("RangeError: Invalid string length"));
}

#[test]
fn test_self_referencing_arrays_stay_usable() {
    let value = run("const a = [1]; a.push(a); return '' + a").unwrap();
    assert_eq!(value, Value::string("1,"));

    let value = run("const a = [1]; a.push(a); return a").unwrap();
    assert_eq!(value.to_json(), json!([1, null]));

    let caught = run("const o = {}; o.self = o; try { JSON.stringify(o) } catch (e) { return 'cyclic' }")
        .unwrap();
    assert_eq!(caught, Value::string("cyclic"));
}

#[test]
fn test_json_and_string_builtins() {
    assert_eq!(
        run("return JSON.stringify({ a: [1, 'x'], b: undefined })").unwrap(),
        Value::string(r#"{"a":[1,"x"]}"#)
    );
    assert_eq!(
        run("return parseInt('42px') + parseFloat('0.5')").unwrap(),
        Value::Number(42.5)
    );
    assert_eq!(
        run("return 'a-b-c'.split('-').join('+')").unwrap(),
        Value::string("a+b+c")
    );
}

#[test]
fn test_rejected_promise_throws_at_await() {
    let value = run("try { await Promise.reject('nope') } catch (e) { return 'caught ' + e }")
        .unwrap();
    assert_eq!(value, Value::string("caught nope"));
}

#[test]
fn test_calling_non_function_is_type_error() {
    let err = run("const x = 3; x()").unwrap_err();
    assert!(matches!(err, ScriptError::TypeError { .. }));
}
