//! Handler error taxonomy and the per-component error log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tessera_script::{AnalysisError, CompileError, Metric, ScriptError, Span};
use tessera_types::{ComponentId, ContextId, HandlerScope};
use thiserror::Error;

use crate::config::ConfigError;

/// Entries kept per component before the oldest are dropped
pub const MAX_ERRORS_PER_COMPONENT: usize = 20;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Compilation failed: {0}")]
    Compilation(#[from] CompileError),

    #[error("Disallowed construct '{construct}' at {span:?}")]
    Validation { construct: String, span: Span },

    #[error("Snippet exceeds {metric} limit ({actual} > {limit})")]
    ComplexityExceeded {
        metric: Metric,
        actual: usize,
        limit: usize,
    },

    #[error("Snippet is client-only: {reason}")]
    ClientOnly { reason: String },

    #[error("Execution failed: {0}")]
    Execution(#[from] ScriptError),

    #[error("Context {0} has been disposed")]
    ContextDisposed(ContextId),

    #[error("No local variable '{0}' to publish")]
    UnknownVariable(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<AnalysisError> for HandlerError {
    fn from(error: AnalysisError) -> Self {
        match error {
            AnalysisError::Validation { construct, span } => {
                HandlerError::Validation { construct, span }
            }
            AnalysisError::ComplexityExceeded {
                metric,
                actual,
                limit,
            } => HandlerError::ComplexityExceeded {
                metric,
                actual,
                limit,
            },
            AnalysisError::ClientOnly { reason } => HandlerError::ClientOnly { reason },
        }
    }
}

/// Serializable tag for a [`HandlerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Compilation,
    Validation,
    ComplexityExceeded,
    ClientOnly,
    Execution,
    ContextDisposed,
    UnknownVariable,
    Config,
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Compilation(_) => ErrorKind::Compilation,
            HandlerError::Validation { .. } => ErrorKind::Validation,
            HandlerError::ComplexityExceeded { .. } => ErrorKind::ComplexityExceeded,
            HandlerError::ClientOnly { .. } => ErrorKind::ClientOnly,
            HandlerError::Execution(_) => ErrorKind::Execution,
            HandlerError::ContextDisposed(_) => ErrorKind::ContextDisposed,
            HandlerError::UnknownVariable(_) => ErrorKind::UnknownVariable,
            HandlerError::Config(_) => ErrorKind::Config,
        }
    }

    /// Multi-line diagnostic when the error points into snippet text
    pub fn render(&self, source: &str) -> String {
        match self {
            HandlerError::Compilation(error) => error.render(),
            HandlerError::Execution(error) if error.span().is_some() => {
                tessera_script::ErrorContext::new(source, error).to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HandlerError>;

/// One failed live handler run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerErrorRecord {
    pub component_id: ComponentId,
    pub scope: HandlerScope,
    pub message: String,
    pub source: String,
    pub at: DateTime<Utc>,
}

/// Recent handler failures per component, for inspection
#[derive(Debug, Default)]
pub struct HandlerErrorLog {
    entries: HashMap<ComponentId, VecDeque<HandlerErrorRecord>>,
}

impl HandlerErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: HandlerErrorRecord) {
        let entries = self.entries.entry(record.component_id.clone()).or_default();
        if entries.len() == MAX_ERRORS_PER_COMPONENT {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Oldest first
    pub fn errors_for(&self, id: &ComponentId) -> Vec<HandlerErrorRecord> {
        self.entries
            .get(id)
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, id: &ComponentId) -> Option<&HandlerErrorRecord> {
        self.entries.get(id).and_then(|e| e.back())
    }

    pub fn clear(&mut self, id: &ComponentId) {
        self.entries.remove(id);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn total(&self) -> usize {
        self.entries.values().map(VecDeque::len).sum()
    }
}
