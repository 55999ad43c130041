//! Built-in library available to every snippet
//!
//! Namespaces (`Math`, `JSON`, ...) are represented as [`NativeFn::Builtin`]
//! values; member access on them yields a qualified builtin such as
//! `Math.floor` that [`call_function`] dispatches on.
//!
//! [`NativeFn::Builtin`]: crate::value::NativeFn::Builtin

use crate::error::{Result, ScriptError, Span};
use crate::value::{format_number, Array, Promise, Value, MAX_STRING_LENGTH};
use indexmap::IndexMap;

/// Names resolvable as globals when nothing else binds them
pub const GLOBAL_NAMES: &[&str] = &[
    "Math",
    "JSON",
    "console",
    "Object",
    "Array",
    "Number",
    "String",
    "Boolean",
    "Promise",
    "parseInt",
    "parseFloat",
    "isNaN",
    "NaN",
    "Infinity",
];

pub fn is_global(name: &str) -> bool {
    GLOBAL_NAMES.contains(&name)
}

pub fn global(name: &str) -> Option<Value> {
    match name {
        "NaN" => Some(Value::Number(f64::NAN)),
        "Infinity" => Some(Value::Number(f64::INFINITY)),
        _ if is_global(name) => Some(Value::builtin(name)),
        _ => None,
    }
}

/// Property of a builtin namespace
pub fn member(namespace: &str, property: &str) -> Option<Value> {
    let constant = match (namespace, property) {
        ("Math", "PI") => Some(std::f64::consts::PI),
        ("Math", "E") => Some(std::f64::consts::E),
        ("Number", "MAX_SAFE_INTEGER") => Some(9_007_199_254_740_991.0),
        ("Number", "MIN_SAFE_INTEGER") => Some(-9_007_199_254_740_991.0),
        ("Number", "EPSILON") => Some(f64::EPSILON),
        _ => None,
    };
    if let Some(n) = constant {
        return Some(Value::Number(n));
    }
    if namespace.contains('.') {
        return None;
    }
    Some(Value::builtin(&format!("{}.{}", namespace, property)))
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn number_arg(args: &[Value], i: usize) -> f64 {
    arg(args, i).to_number()
}

fn invalid_string_length(span: Span) -> ScriptError {
    ScriptError::evaluation(span, "RangeError: Invalid string length")
}

fn unknown(name: &str, span: Span) -> ScriptError {
    ScriptError::type_error(span, format!("{} is not a function", name))
}

/// Call a builtin function by qualified name
pub fn call_function(name: &str, args: Vec<Value>, span: Span) -> Result<Value> {
    match name.split_once('.') {
        None => call_global(name, args, span),
        Some(("Math", f)) => call_math(f, &args, span),
        Some(("JSON", f)) => call_json(f, &args, span),
        Some(("console", f)) => {
            let line = args
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(" ");
            match f {
                "error" => tracing::error!(target: "tessera::console", "{}", line),
                "warn" => tracing::warn!(target: "tessera::console", "{}", line),
                "debug" => tracing::debug!(target: "tessera::console", "{}", line),
                _ => tracing::info!(target: "tessera::console", "{}", line),
            }
            Ok(Value::Undefined)
        }
        Some(("Object", f)) => call_object(f, &args, span),
        Some(("Array", "isArray")) => Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_)))),
        Some(("Array", "from")) => match arg(&args, 0) {
            Value::Array(items) => Ok(Value::array(items.borrow().clone())),
            Value::String(s) => Ok(Value::array(
                s.chars().map(|c| Value::string(c.to_string())).collect(),
            )),
            _ => Ok(Value::array(Vec::new())),
        },
        Some(("Number", "isInteger")) => {
            Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.fract() == 0.0)))
        }
        Some(("Number", "isFinite")) => {
            Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite())))
        }
        Some(("Promise", "resolve")) => Ok(match arg(&args, 0) {
            Value::Future(p) => Value::Future(p),
            other => Value::Future(Promise::resolved(other)),
        }),
        Some(("Promise", "reject")) => Ok(Value::Future(Promise::rejected(
            arg(&args, 0).to_display_string(),
        ))),
        _ => Err(unknown(name, span)),
    }
}

fn call_global(name: &str, args: Vec<Value>, span: Span) -> Result<Value> {
    match name {
        "Number" => Ok(Value::Number(number_arg(&args, 0))),
        "String" => Ok(Value::string(arg(&args, 0).to_display_string())),
        "Boolean" => Ok(Value::Bool(arg(&args, 0).is_truthy())),
        "isNaN" => Ok(Value::Bool(number_arg(&args, 0).is_nan())),
        "parseFloat" => Ok(Value::Number(parse_float_prefix(
            &arg(&args, 0).to_display_string(),
        ))),
        "parseInt" => {
            let radix = match arg(&args, 1) {
                Value::Undefined => 10,
                other => other.to_number() as u32,
            };
            Ok(Value::Number(parse_int_prefix(
                &arg(&args, 0).to_display_string(),
                radix,
            )))
        }
        "Array" => Ok(Value::array(args)),
        "Object" => Ok(match arg(&args, 0) {
            v @ Value::Object(_) => v,
            _ => Value::object(IndexMap::new()),
        }),
        _ => Err(unknown(name, span)),
    }
}

fn parse_float_prefix(text: &str) -> f64 {
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let bytes = text.as_bytes();
    while end < bytes.len() {
        let c = bytes[end];
        let ok = match c {
            b'0'..=b'9' => true,
            b'+' | b'-' => end == 0 || matches!(bytes[end - 1], b'e' | b'E'),
            b'.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            b'e' | b'E' if !seen_exp && end > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end += 1;
    }
    // Back off trailing exponent or sign characters that do not form a number.
    let mut candidate = &text[..end];
    while !candidate.is_empty() {
        if let Ok(n) = candidate.parse::<f64>() {
            return n;
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    f64::NAN
}

fn parse_int_prefix(text: &str, radix: u32) -> f64 {
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let text = text.trim_start();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let digits = if radix == 16 {
        digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits)
    } else {
        digits
    };
    let mut value: f64 = 0.0;
    let mut any = false;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * radix as f64 + d as f64;
                any = true;
            }
            None => break,
        }
    }
    if !any {
        f64::NAN
    } else if negative {
        -value
    } else {
        value
    }
}

fn call_math(f: &str, args: &[Value], span: Span) -> Result<Value> {
    let x = number_arg(args, 0);
    let n = match f {
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        // Halves round towards positive infinity.
        "round" => (x + 0.5).floor(),
        "trunc" => x.trunc(),
        "abs" => x.abs(),
        "sign" => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        "sqrt" => x.sqrt(),
        "pow" => x.powf(number_arg(args, 1)),
        "log" => x.ln(),
        "min" => args
            .iter()
            .map(Value::to_number)
            .fold(f64::INFINITY, |acc, v| if v.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(v) }),
        "max" => args
            .iter()
            .map(Value::to_number)
            .fold(f64::NEG_INFINITY, |acc, v| if v.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(v) }),
        _ => return Err(unknown(&format!("Math.{}", f), span)),
    };
    Ok(Value::Number(n))
}

fn call_json(f: &str, args: &[Value], span: Span) -> Result<Value> {
    match f {
        "stringify" => {
            let value = arg(args, 0);
            if matches!(value, Value::Undefined) {
                return Ok(Value::Undefined);
            }
            // Indentation is clamped to ten columns.
            let indent = match arg(args, 2) {
                Value::Number(n) if n >= 1.0 => Some((n as usize).min(10)),
                _ => None,
            };
            if value.is_cyclic() {
                return Err(ScriptError::type_error(
                    span,
                    "Converting circular structure to JSON",
                ));
            }
            let json = value.to_json();
            let text = match indent {
                Some(width) => pretty_json(&json, width),
                None => serde_json::to_string(&json),
            }
            .map_err(|e| ScriptError::type_error(span, e.to_string()))?;
            Ok(Value::string(text))
        }
        "parse" => {
            let text = arg(args, 0).to_display_string();
            serde_json::from_str::<serde_json::Value>(&text)
                .map(|json| Value::from_json(&json))
                .map_err(|e| ScriptError::Thrown {
                    message: format!("SyntaxError: {}", e),
                })
        }
        _ => Err(unknown(&format!("JSON.{}", f), span)),
    }
}

fn pretty_json(json: &serde_json::Value, width: usize) -> serde_json::Result<String> {
    use serde::Serialize;
    let indent = " ".repeat(width);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    json.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn call_object(f: &str, args: &[Value], span: Span) -> Result<Value> {
    let entries = match arg(args, 0) {
        Value::Object(entries) => entries.borrow().clone(),
        Value::Array(items) => items
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        _ => IndexMap::new(),
    };
    match f {
        "keys" => Ok(Value::array(entries.keys().map(Value::string).collect())),
        "values" => Ok(Value::array(entries.values().cloned().collect())),
        "entries" => Ok(Value::array(
            entries
                .into_iter()
                .map(|(k, v)| Value::array(vec![Value::string(k), v]))
                .collect(),
        )),
        "assign" => {
            let target = arg(args, 0);
            if let Value::Object(target_entries) = &target {
                for source in args.iter().skip(1) {
                    if let Value::Object(source) = source {
                        let copied = source.borrow().clone();
                        target_entries.borrow_mut().extend(copied);
                    }
                }
            }
            Ok(target)
        }
        _ => Err(unknown(&format!("Object.{}", f), span)),
    }
}

/// Array methods that take a snippet callback and are run by the interpreter
pub fn is_callback_array_method(method: &str) -> bool {
    matches!(
        method,
        "map" | "filter" | "forEach" | "find" | "findIndex" | "some" | "every" | "reduce" | "sort"
    )
}

fn relative_index(n: f64, len: usize) -> usize {
    if n.is_nan() {
        0
    } else if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

/// Array methods that need no callbacks
pub fn array_method(items: &Array, method: &str, args: Vec<Value>, span: Span) -> Result<Value> {
    match method {
        "push" => {
            let mut items = items.borrow_mut();
            items.extend(args);
            Ok(Value::Number(items.len() as f64))
        }
        "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
        "shift" => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                Ok(Value::Undefined)
            } else {
                Ok(items.remove(0))
            }
        }
        "unshift" => {
            let mut items = items.borrow_mut();
            for (i, v) in args.into_iter().enumerate() {
                items.insert(i, v);
            }
            Ok(Value::Number(items.len() as f64))
        }
        "includes" => {
            let needle = arg(&args, 0);
            Ok(Value::Bool(
                items.borrow().iter().any(|v| v.strict_eq(&needle)),
            ))
        }
        "indexOf" => {
            let needle = arg(&args, 0);
            Ok(Value::Number(
                items
                    .borrow()
                    .iter()
                    .position(|v| v.strict_eq(&needle))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            ))
        }
        "join" => {
            let sep = match arg(&args, 0) {
                Value::Undefined => ",".to_string(),
                other => other.to_display_string(),
            };
            Ok(Value::string(
                items
                    .borrow()
                    .iter()
                    .map(|v| {
                        if v.is_nullish() {
                            String::new()
                        } else {
                            v.to_display_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }
        "slice" => {
            let items = items.borrow();
            let len = items.len();
            let start = relative_index(number_arg(&args, 0), len);
            let end = match arg(&args, 1) {
                Value::Undefined => len,
                other => relative_index(other.to_number(), len),
            };
            Ok(Value::array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }
        "concat" => {
            let mut out = items.borrow().clone();
            for a in args {
                match a {
                    Value::Array(more) => out.extend(more.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            Ok(Value::array(out))
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(Value::Array(items.clone()))
        }
        "toString" => Ok(Value::string(Value::Array(items.clone()).to_display_string())),
        _ => Err(unknown(method, span)),
    }
}

/// String methods
pub fn string_method(s: &str, method: &str, args: Vec<Value>, span: Span) -> Result<Value> {
    let text_arg = |i: usize| arg(&args, i).to_display_string();
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let substring = |start: usize, end: usize| -> Value {
        if start < end {
            Value::string(chars[start..end].iter().collect::<String>())
        } else {
            Value::string("")
        }
    };

    match method {
        "toUpperCase" => Ok(Value::string(s.to_uppercase())),
        "toLowerCase" => Ok(Value::string(s.to_lowercase())),
        "trim" => Ok(Value::string(s.trim())),
        "trimStart" => Ok(Value::string(s.trim_start())),
        "trimEnd" => Ok(Value::string(s.trim_end())),
        "includes" => Ok(Value::Bool(s.contains(&text_arg(0)))),
        "startsWith" => Ok(Value::Bool(s.starts_with(&text_arg(0)))),
        "endsWith" => Ok(Value::Bool(s.ends_with(&text_arg(0)))),
        "indexOf" => Ok(Value::Number(
            s.find(&text_arg(0))
                .map(|byte| s[..byte].chars().count() as f64)
                .unwrap_or(-1.0),
        )),
        "charAt" => {
            let i = number_arg(&args, 0);
            let i = if i.is_nan() { 0 } else { i as usize };
            Ok(Value::string(
                chars.get(i).map(|c| c.to_string()).unwrap_or_default(),
            ))
        }
        "slice" => {
            let start = relative_index(number_arg(&args, 0), len);
            let end = match arg(&args, 1) {
                Value::Undefined => len,
                other => relative_index(other.to_number(), len),
            };
            Ok(substring(start, end))
        }
        "substring" => {
            let clamp = |v: Value| {
                let n = v.to_number();
                if n.is_nan() || n < 0.0 {
                    0
                } else {
                    (n as usize).min(len)
                }
            };
            let a = clamp(arg(&args, 0));
            let b = match arg(&args, 1) {
                Value::Undefined => len,
                other => clamp(other),
            };
            Ok(substring(a.min(b), a.max(b)))
        }
        "split" => {
            let parts: Vec<Value> = match arg(&args, 0) {
                Value::Undefined => vec![Value::string(s)],
                sep => {
                    let sep = sep.to_display_string();
                    if sep.is_empty() {
                        chars.iter().map(|c| Value::string(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::string).collect()
                    }
                }
            };
            Ok(Value::array(parts))
        }
        "replace" => Ok(Value::string(s.replacen(&text_arg(0), &text_arg(1), 1))),
        "replaceAll" => Ok(Value::string(s.replace(&text_arg(0), &text_arg(1)))),
        "repeat" => {
            let n = number_arg(&args, 0);
            if !(n >= 0.0) || n.is_infinite() {
                return Err(ScriptError::evaluation(span, "RangeError: Invalid count value"));
            }
            let count = n as usize;
            match s.len().checked_mul(count) {
                Some(total) if total <= MAX_STRING_LENGTH => Ok(Value::string(s.repeat(count))),
                _ => Err(invalid_string_length(span)),
            }
        }
        "padStart" | "padEnd" => {
            let target = number_arg(&args, 0);
            let fill = match arg(&args, 1) {
                Value::Undefined => " ".to_string(),
                other => other.to_display_string(),
            };
            let target = if target.is_nan() { 0 } else { target as usize };
            if target <= len || fill.is_empty() {
                return Ok(Value::string(s));
            }
            if target > MAX_STRING_LENGTH {
                return Err(invalid_string_length(span));
            }
            let padding: String = fill.chars().cycle().take(target - len).collect();
            Ok(Value::string(if method == "padStart" {
                padding + s
            } else {
                s.to_string() + &padding
            }))
        }
        "concat" => {
            let mut out = s.to_string();
            for a in &args {
                out.push_str(&a.to_display_string());
            }
            Ok(Value::string(out))
        }
        "toString" => Ok(Value::string(s)),
        _ => Err(unknown(method, span)),
    }
}

/// Number methods
pub fn number_method(n: f64, method: &str, args: Vec<Value>, span: Span) -> Result<Value> {
    match method {
        "toFixed" => {
            let digits = number_arg(&args, 0);
            let digits = if digits.is_nan() { 0 } else { digits as usize };
            if digits > 100 {
                return Err(ScriptError::evaluation(span, "toFixed() digits out of range"));
            }
            Ok(Value::string(format!("{:.*}", digits, n)))
        }
        "toString" => Ok(Value::string(format_number(n))),
        _ => Err(unknown(method, span)),
    }
}
