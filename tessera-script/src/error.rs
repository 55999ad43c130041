use std::fmt;

pub use tessera_types::Span;

/// Errors that can occur while compiling or evaluating a snippet
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("Lexer error at {span:?}: {message}")]
    LexerError { span: Span, message: String },

    #[error("Parser error at {span:?}: {message}")]
    ParserError { span: Span, message: String },

    #[error("Evaluation error at {span:?}: {message}")]
    EvaluationError { span: Span, message: String },

    #[error("Unbound identifier at {span:?}: {name} is not defined")]
    UnboundIdentifier { span: Span, name: String },

    #[error("Type error at {span:?}: {message}")]
    TypeError { span: Span, message: String },

    #[error("Uncaught exception: {message}")]
    Thrown { message: String },

    #[error("Host operation {operation} failed: {message}")]
    HostError { operation: String, message: String },

    #[error("Execution deadline of {limit_ms}ms exceeded")]
    DeadlineExceeded { limit_ms: u64 },
}

impl ScriptError {
    pub fn evaluation(span: Span, message: impl Into<String>) -> Self {
        ScriptError::EvaluationError {
            span,
            message: message.into(),
        }
    }

    pub fn type_error(span: Span, message: impl Into<String>) -> Self {
        ScriptError::TypeError {
            span,
            message: message.into(),
        }
    }

    pub fn host(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::HostError {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Source span, if the error is tied to one
    pub fn span(&self) -> Option<Span> {
        match self {
            ScriptError::LexerError { span, .. }
            | ScriptError::ParserError { span, .. }
            | ScriptError::EvaluationError { span, .. }
            | ScriptError::UnboundIdentifier { span, .. }
            | ScriptError::TypeError { span, .. } => Some(*span),
            ScriptError::Thrown { .. }
            | ScriptError::HostError { .. }
            | ScriptError::DeadlineExceeded { .. } => None,
        }
    }

    /// Whether a `try`/`catch` inside the snippet may intercept this error
    pub fn is_catchable(&self) -> bool {
        !matches!(self, ScriptError::DeadlineExceeded { .. })
    }

    /// Message without the span prefix, as seen by a `catch` clause
    pub fn message(&self) -> String {
        match self {
            ScriptError::LexerError { message, .. }
            | ScriptError::ParserError { message, .. }
            | ScriptError::EvaluationError { message, .. }
            | ScriptError::TypeError { message, .. }
            | ScriptError::Thrown { message }
            | ScriptError::HostError { message, .. } => message.clone(),
            ScriptError::UnboundIdentifier { name, .. } => format!("{} is not defined", name),
            ScriptError::DeadlineExceeded { limit_ms } => {
                format!("execution deadline of {}ms exceeded", limit_ms)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;

/// Display context for better error messages
pub struct ErrorContext<'a> {
    pub source: &'a str,
    pub error: &'a ScriptError,
}

impl<'a> ErrorContext<'a> {
    pub fn new(source: &'a str, error: &'a ScriptError) -> Self {
        Self { source, error }
    }

    fn start(&self) -> usize {
        self.error
            .span()
            .map(|s| s.start)
            .unwrap_or(0)
            .min(self.source.len())
    }

    /// Get the source line containing the error
    pub fn source_line(&self) -> Option<&'a str> {
        self.error.span()?;
        let start = self.start();

        let line_start = self.source[..start]
            .rfind('\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let line_end = self.source[start..]
            .find('\n')
            .map(|pos| start + pos)
            .unwrap_or(self.source.len());

        Some(&self.source[line_start..line_end])
    }

    /// Get line and column numbers (1-indexed)
    pub fn line_col(&self) -> (usize, usize) {
        let start = self.start();

        let line = self.source[..start].matches('\n').count() + 1;
        let line_start = self.source[..start]
            .rfind('\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let col = start - line_start + 1;

        (line, col)
    }
}

impl<'a> fmt::Display for ErrorContext<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (line, col) = self.line_col();
        writeln!(f, "Error at line {}, column {}:", line, col)?;
        writeln!(f, "  {}", self.error.message())?;

        if let (Some(source_line), Some(span)) = (self.source_line(), self.error.span()) {
            writeln!(f)?;
            writeln!(f, "  {}", source_line)?;
            let col_start = col - 1;
            let width = span.len().min(source_line.len().saturating_sub(col_start));
            let indicator = " ".repeat(col_start) + &"^".repeat(width.max(1));
            writeln!(f, "  {}", indicator)?;
        }

        Ok(())
    }
}
