//! Compiled units and the text-keyed unit cache

use crate::ast::Program;
use crate::error::{ErrorContext, ScriptError};
use crate::interpreter::{Environment, ExecutionLimits, Interpreter};
use crate::parser::parse_source;
use crate::value::Value;
use futures::future::{FutureExt, LocalBoxFuture};
use lru::LruCache;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::rc::Rc;

/// Snippet text that failed to compile
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct CompileError {
    pub text: String,
    pub error: ScriptError,
}

impl CompileError {
    /// Multi-line diagnostic pointing at the offending span
    pub fn render(&self) -> String {
        ErrorContext::new(&self.text, &self.error).to_string()
    }
}

/// Executable form of exactly one snippet text
#[derive(Debug)]
pub struct CompiledUnit {
    text: Rc<str>,
    program: Program,
}

impl CompiledUnit {
    pub fn compile(text: &str) -> Result<Self, CompileError> {
        let program = parse_source(text).map_err(|error| CompileError {
            text: text.to_string(),
            error,
        })?;
        Ok(Self {
            text: Rc::from(text),
            program,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Whether the unit can suspend at a top-level `await`
    pub fn is_async(&self) -> bool {
        self.program.has_await
    }

    /// Start executing the unit against `env`
    ///
    /// The returned future owns everything it needs, so it may be polled
    /// once for a synchronous result and kept around if still pending.
    pub fn execute(
        self: &Rc<Self>,
        env: Rc<dyn Environment>,
        limits: ExecutionLimits,
    ) -> LocalBoxFuture<'static, crate::error::Result<Value>> {
        let unit = Rc::clone(self);
        async move {
            let mut interpreter = Interpreter::with_limits(env, limits);
            interpreter.run(&unit.program).await
        }
        .boxed_local()
    }
}

/// Hit/miss counters for a [`UnitCache`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
    pub entries: usize,
}

enum Slots {
    Unbounded(HashMap<String, Rc<CompiledUnit>>),
    Bounded(LruCache<String, Rc<CompiledUnit>>),
}

impl Slots {
    fn get(&mut self, text: &str) -> Option<Rc<CompiledUnit>> {
        match self {
            Slots::Unbounded(map) => map.get(text).cloned(),
            Slots::Bounded(lru) => lru.get(text).cloned(),
        }
    }

    fn insert(&mut self, text: String, unit: Rc<CompiledUnit>) {
        match self {
            Slots::Unbounded(map) => {
                map.insert(text, unit);
            }
            Slots::Bounded(lru) => {
                if let Some((evicted, _)) = lru.push(text, unit) {
                    tracing::debug!(bytes = evicted.len(), "Evicted compiled unit");
                }
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Slots::Unbounded(map) => map.len(),
            Slots::Bounded(lru) => lru.len(),
        }
    }

    fn clear(&mut self) {
        match self {
            Slots::Unbounded(map) => map.clear(),
            Slots::Bounded(lru) => lru.clear(),
        }
    }
}

/// Memoizes compilation by verbatim snippet text
///
/// Compiling the same text again returns the identical `Rc`. Failed
/// compilations are not stored, so a later attempt parses again. With a
/// capacity the cache evicts least recently used units, after which a
/// recompiled text yields a fresh unit.
pub struct UnitCache {
    slots: RefCell<Slots>,
    hits: Cell<u64>,
    misses: Cell<u64>,
    failures: Cell<u64>,
}

impl Default for UnitCache {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitCache {
    pub fn new() -> Self {
        Self::from_slots(Slots::Unbounded(HashMap::new()))
    }

    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self::from_slots(Slots::Bounded(LruCache::new(capacity)))
    }

    /// Bounded when `capacity` is a positive number, unbounded otherwise
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => Self::bounded(capacity),
            None => Self::new(),
        }
    }

    fn from_slots(slots: Slots) -> Self {
        Self {
            slots: RefCell::new(slots),
            hits: Cell::new(0),
            misses: Cell::new(0),
            failures: Cell::new(0),
        }
    }

    pub fn compile(&self, text: &str) -> Result<Rc<CompiledUnit>, CompileError> {
        if let Some(unit) = self.slots.borrow_mut().get(text) {
            self.hits.set(self.hits.get() + 1);
            return Ok(unit);
        }

        self.misses.set(self.misses.get() + 1);
        match CompiledUnit::compile(text) {
            Ok(unit) => {
                let unit = Rc::new(unit);
                tracing::debug!(bytes = text.len(), "Compiled snippet");
                self.slots
                    .borrow_mut()
                    .insert(text.to_string(), Rc::clone(&unit));
                Ok(unit)
            }
            Err(err) => {
                self.failures.set(self.failures.get() + 1);
                Err(err)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.borrow_mut().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.get(),
            misses: self.misses.get(),
            failures: self.failures.get(),
            entries: self.len(),
        }
    }
}
