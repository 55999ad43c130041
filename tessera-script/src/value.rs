//! Runtime values
//!
//! Values follow the reference semantics snippet authors expect: arrays and
//! objects are shared, mutable containers, while everything else is copied.
//! Stores that must not alias snippet-owned containers take a
//! [`Value::deep_clone`] snapshot.

use crate::interpreter::Closure;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use tessera_types::ComponentId;

pub type Array = Rc<RefCell<Vec<Value>>>;
pub type Object = Rc<RefCell<IndexMap<String, Value>>>;

/// A callable implemented outside the snippet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeFn {
    /// Built-in library function or namespace (`Math`, `Math.floor`)
    Builtin(Rc<str>),
    /// Runtime API operation, dispatched to the environment by name
    Api(Rc<str>),
}

impl NativeFn {
    pub fn name(&self) -> &str {
        match self {
            NativeFn::Builtin(name) | NativeFn::Api(name) => name,
        }
    }
}

/// Result of an asynchronous operation, awaitable any number of times
#[derive(Clone)]
pub struct Promise(Shared<LocalBoxFuture<'static, Result<Value, String>>>);

impl Promise {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, String>> + 'static,
    {
        Promise(future.boxed_local().shared())
    }

    /// An already-settled successful promise
    pub fn resolved(value: Value) -> Self {
        Promise::new(futures::future::ready(Ok(value)))
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Promise::new(futures::future::ready(Err(message.into())))
    }

    /// Outcome, if the underlying future has already completed
    pub fn peek(&self) -> Option<&Result<Value, String>> {
        self.0.peek()
    }

    pub fn settle(&self) -> Shared<LocalBoxFuture<'static, Result<Value, String>>> {
        self.0.clone()
    }

    fn ptr_eq(&self, other: &Promise) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peek() {
            Some(Ok(v)) => write!(f, "Promise(resolved: {:?})", v),
            Some(Err(e)) => write!(f, "Promise(rejected: {})", e),
            None => f.write_str("Promise(pending)"),
        }
    }
}

/// Runtime value
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Array),
    Object(Object),
    Function(Rc<Closure>),
    Native(NativeFn),
    /// Merged view of a named component's live and declared values
    Component(ComponentId),
    Future(Promise),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn builtin(name: &str) -> Self {
        Value::Native(NativeFn::Builtin(Rc::from(name)))
    }

    pub fn api(name: &str) -> Self {
        Value::Native(NativeFn::Api(Rc::from(name)))
    }

    /// `typeof` result
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) | Value::Object(_) | Value::Component(_) | Value::Future(_) => {
                "object"
            }
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric conversion with the usual coercions
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => {
                let items = items.borrow();
                match items.as_slice() {
                    [] => 0.0,
                    [single] => single.to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// String conversion used by `+`, template strings and `String(x)`
    ///
    /// An array that contains itself renders the inner occurrence as empty.
    pub fn to_display_string(&self) -> String {
        self.display_in(&mut Vec::new())
    }

    fn display_in(&self, path: &mut Vec<*const ()>) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Array(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if path.contains(&ptr) {
                    return String::new();
                }
                path.push(ptr);
                let text = items
                    .borrow()
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            v.display_in(path)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                path.pop();
                text
            }
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(_) => "[function]".to_string(),
            Value::Native(f) => format!("[function {}]", f.name()),
            Value::Component(id) => format!("[component {}]", id),
            Value::Future(_) => "[object Promise]".to_string(),
        }
    }

    /// Deep structural equality, used to suppress no-op change notifications
    pub fn structural_eq(&self, other: &Value) -> bool {
        self.eq_in(other, &mut Vec::new())
    }

    fn eq_in(&self, other: &Value, path: &mut Vec<(*const (), *const ())>) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ());
                // A pair already being compared further up is assumed equal.
                if path.contains(&pair) {
                    return true;
                }
                path.push(pair);
                let (a, b) = (a.borrow(), b.borrow());
                let equal = a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.eq_in(y, path));
                path.pop();
                equal
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ());
                if path.contains(&pair) {
                    return true;
                }
                path.push(pair);
                let (a, b) = (a.borrow(), b.borrow());
                let equal = a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.eq_in(w, path)));
                path.pop();
                equal
            }
            (Value::Component(a), Value::Component(b)) => a == b,
            _ => self.strict_eq(other),
        }
    }

    /// Whether some container holds a reference back to one of its ancestors
    ///
    /// Shared but acyclic containers are fine; only a path that revisits a
    /// container counts.
    pub fn is_cyclic(&self) -> bool {
        fn walk(value: &Value, path: &mut Vec<*const ()>) -> bool {
            let Some(ptr) = container_ptr(value) else {
                return false;
            };
            if path.contains(&ptr) {
                return true;
            }
            path.push(ptr);
            let found = match value {
                Value::Array(items) => items.borrow().iter().any(|v| walk(v, path)),
                Value::Object(entries) => entries.borrow().values().any(|v| walk(v, path)),
                _ => false,
            };
            path.pop();
            found
        }
        walk(self, &mut Vec::new())
    }

    /// `===`
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::Component(a), Value::Component(b)) => a == b,
            (Value::Future(a), Value::Future(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_eq(other),
        }
    }

    /// Copy all nested containers so the result shares nothing with `self`
    ///
    /// Sharing and cycles inside `self` are reproduced in the copy.
    pub fn deep_clone(&self) -> Value {
        self.clone_in(&mut Vec::new())
    }

    fn clone_in(&self, copies: &mut Vec<(*const (), Value)>) -> Value {
        let Some(ptr) = container_ptr(self) else {
            return self.clone();
        };
        if let Some((_, copy)) = copies.iter().find(|(seen, _)| *seen == ptr) {
            return copy.clone();
        }
        match self {
            Value::Array(items) => {
                let fresh: Array = Rc::new(RefCell::new(Vec::new()));
                copies.push((ptr, Value::Array(fresh.clone())));
                let cloned = items.borrow().iter().map(|v| v.clone_in(copies)).collect();
                *fresh.borrow_mut() = cloned;
                Value::Array(fresh)
            }
            Value::Object(entries) => {
                let fresh: Object = Rc::new(RefCell::new(IndexMap::new()));
                copies.push((ptr, Value::Object(fresh.clone())));
                let cloned = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone_in(copies)))
                    .collect();
                *fresh.borrow_mut() = cloned;
                Value::Object(fresh)
            }
            other => other.clone(),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::string(s),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON projection; functions and pending futures become `null`,
    /// components become their id and back-references into an enclosing
    /// container become `null`
    pub fn to_json(&self) -> serde_json::Value {
        self.json_in(&mut Vec::new())
    }

    fn json_in(&self, path: &mut Vec<*const ()>) -> serde_json::Value {
        if let Some(ptr) = container_ptr(self) {
            if path.contains(&ptr) {
                return serde_json::Value::Null;
            }
            path.push(ptr);
        }
        let json = match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => serde_json::Value::Array(
                items.borrow().iter().map(|v| v.json_in(path)).collect(),
            ),
            Value::Object(entries) => serde_json::Value::Object(
                entries
                    .borrow()
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined))
                    .map(|(k, v)| (k.clone(), v.json_in(path)))
                    .collect(),
            ),
            Value::Component(id) => serde_json::Value::String(id.to_string()),
            Value::Future(p) => match p.peek() {
                Some(Ok(v)) => v.json_in(path),
                _ => serde_json::Value::Null,
            },
            Value::Function(_) | Value::Native(_) => serde_json::Value::Null,
        };
        if container_ptr(self).is_some() {
            path.pop();
        }
        json
    }
}

fn container_ptr(value: &Value) -> Option<*const ()> {
    match value {
        Value::Array(items) => Some(Rc::as_ptr(items) as *const ()),
        Value::Object(entries) => Some(Rc::as_ptr(entries) as *const ()),
        _ => None,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Longest array a snippet may grow by index or `length` assignment
///
/// Arrays are dense, so every slot up to the highest index is allocated.
pub const MAX_ARRAY_LENGTH: usize = 1 << 22;

/// Longest string, in bytes, a string builtin may produce
pub const MAX_STRING_LENGTH: usize = 1 << 26;

fn number_to_json(n: f64) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Number formatting without a trailing `.0` on integral values
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
        assert!(Value::string("0").is_truthy());
    }

    #[test]
    fn test_structural_vs_strict_equality() {
        let a = Value::from_json(&json!({"x": [1, 2], "y": "z"}));
        let b = Value::from_json(&json!({"x": [1, 2], "y": "z"}));
        assert!(a.structural_eq(&b));
        assert!(!a.strict_eq(&b));
        assert!(a.strict_eq(&a.clone()));
    }

    #[test]
    fn test_loose_equality_coercions() {
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(Value::Number(5.0).loose_eq(&Value::string("5")));
        assert!(Value::Bool(true).loose_eq(&Value::Number(1.0)));
        assert!(!Value::Null.loose_eq(&Value::Number(0.0)));
    }

    #[test]
    fn test_json_projection_integral_numbers() {
        let v = Value::from_json(&json!({"a": 5, "b": 2.5, "c": [true, null]}));
        assert_eq!(v.to_json(), json!({"a": 5, "b": 2.5, "c": [true, null]}));
        assert_eq!(Value::Number(f64::NAN).to_json(), json!(null));
    }

    #[test]
    fn test_deep_clone_detaches_containers() {
        let original = Value::from_json(&json!({"items": [1]}));
        let copy = original.deep_clone();
        if let Value::Object(entries) = &original {
            if let Some(Value::Array(items)) = entries.borrow().get("items") {
                items.borrow_mut().push(Value::Number(2.0));
            }
        }
        assert_eq!(copy.to_json(), json!({"items": [1]}));
        assert_eq!(original.to_json(), json!({"items": [1, 2]}));
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(Value::Number(2.0).to_display_string(), "2");
        assert_eq!(Value::Number(0.5).to_display_string(), "0.5");
        assert_eq!(
            Value::from_json(&json!([1, null, "a"])).to_display_string(),
            "1,,a"
        );
        assert_eq!(Value::Number(f64::INFINITY).to_display_string(), "Infinity");
    }

    #[test]
    fn test_cyclic_values_are_detected_and_traversed() {
        let items = Value::array(vec![Value::Number(1.0)]);
        if let Value::Array(inner) = &items {
            inner.borrow_mut().push(items.clone());
        }
        assert!(items.is_cyclic());
        assert_eq!(items.to_json(), json!([1, null]));
        assert_eq!(items.to_display_string(), "1,");

        let copy = items.deep_clone();
        assert!(copy.is_cyclic());
        assert!(!copy.strict_eq(&items));
        assert!(copy.structural_eq(&items));
    }

    #[test]
    fn test_shared_containers_are_not_cyclic() {
        let leaf = Value::from_json(&json!({"n": 1}));
        let both = Value::array(vec![leaf.clone(), leaf]);
        assert!(!both.is_cyclic());
        assert_eq!(both.to_json(), json!([{"n": 1}, {"n": 1}]));

        // Sharing survives the copy.
        let copy = both.deep_clone();
        if let Value::Array(items) = &copy {
            let items = items.borrow();
            assert!(items[0].strict_eq(&items[1]));
        }
    }

    #[test]
    fn test_resolved_promise_peek() {
        let p = Promise::resolved(Value::Number(1.0));
        // Shared futures only record their output once polled.
        assert!(p.peek().is_none());
        let out = futures::executor::block_on(p.settle());
        assert_eq!(out, Ok(Value::Number(1.0)));
        assert!(p.peek().is_some());
    }
}
