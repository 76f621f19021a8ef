//! Error types for template compilation and rendering.
//!
//! Errors fall into two families:
//!
//! - **Template errors** are raised by the engine itself: translation failures
//!   ([`Error::Compile`]), sources that cannot be parsed ([`Error::Uncompilable`]) and
//!   pre-flight argument checks ([`Error::MissingArgument`]). They pass through the
//!   backtrace translator untouched.
//! - **Runtime errors** ([`Error::Runtime`]) happen while generated code executes. They
//!   carry a backtrace of [`Frame`]s which is rewritten from generated locations to
//!   original template locations at the compiled-unit boundary.

use std::fmt;

use crate::compiler::CompileError;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The template parsed but could not be translated or generated.
    #[error("{0}")]
    Compile(#[from] CompileError),

    /// The template body could not be parsed.
    #[error("cannot compile template {file}:\n{message}")]
    Uncompilable { file: String, message: String },

    /// A required parameter was not supplied.
    #[error("missing {} argument `{name}`", argument_kind(.keyword))]
    MissingArgument { name: String, keyword: bool },

    /// An error raised while generated code was executing.
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
}

fn argument_kind(keyword: &bool) -> &'static str {
    if *keyword { "keyword" } else { "positional" }
}

impl Error {
    /// Returns true for errors produced by the engine itself rather than by executing
    /// template code.
    pub fn is_template_error(&self) -> bool {
        !matches!(self, Error::Runtime(_))
    }

    /// Returns the runtime error, if this is one.
    pub fn as_runtime(&self) -> Option<&RuntimeError> {
        match self {
            Error::Runtime(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn runtime(kind: RuntimeErrorKind) -> Self {
        Error::Runtime(RuntimeError::new(kind))
    }
}

/// An error raised by generated code, with its backtrace.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Innermost frame first.
    pub backtrace: Vec<Frame>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            backtrace: Vec::new(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(frame) = self.backtrace.first() {
            write!(f, " ({})", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// The kind of runtime error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeErrorKind {
    /// Raised explicitly with `raise`.
    #[error("{0}")]
    Raised(String),

    #[error("undefined method `{method}` for {receiver}")]
    NoMethod { method: String, receiver: String },

    /// `hidden_buffer` is set while the counts still include the synthetic buffer
    /// parameter of a compiled unit.
    #[error("wrong number of arguments (given {given}, expected {expected})")]
    Arity {
        given: usize,
        expected: Arity,
        hidden_buffer: bool,
    },

    #[error("unknown keyword: {0}")]
    UnknownKeyword(String),

    #[error("missing keyword: :{0}")]
    MissingKeyword(String),

    #[error("no block given (render_yield)")]
    MissingBlock,

    #[error("uninitialized constant {0}")]
    UndefinedConstant(String),

    #[error("undefined local variable or method `{0}`")]
    UndefinedVariable(String),

    #[error("unknown extension `{0}`")]
    UnknownExtension(String),

    #[error("{0} is not callable")]
    NotCallable(String),

    #[error("{0}")]
    Type(String),

    #[error("divided by 0")]
    ZeroDivision,

    #[error("markdown conversion failed: {0}")]
    Markdown(String),

    #[error("void element <{0}> cannot have content")]
    VoidContent(String),
}

/// Expected argument count for arity errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    /// `None` when a rest parameter accepts any number of extra arguments.
    pub max: Option<usize>,
}

impl Arity {
    pub(crate) fn shifted_down(self) -> Self {
        Self {
            min: self.min.saturating_sub(1),
            max: self.max.map(|m| m.saturating_sub(1)),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", self.min),
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}+", self.min),
        }
    }
}

/// One backtrace entry: a location plus an optional label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// File name or synthetic compiled-unit identity.
    pub file: String,
    pub line: usize,
    pub label: Option<String>,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)?;
        if let Some(label) = &self.label {
            write!(f, " in `{}`", label)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_display() {
        assert_eq!(Arity { min: 1, max: Some(1) }.to_string(), "1");
        assert_eq!(Arity { min: 1, max: Some(3) }.to_string(), "1..3");
        assert_eq!(Arity { min: 2, max: None }.to_string(), "2+");
    }

    #[test]
    fn test_missing_argument_message() {
        let err = Error::MissingArgument {
            name: "title".into(),
            keyword: true,
        };
        assert_eq!(err.to_string(), "missing keyword argument `title`");
        assert!(err.is_template_error());
    }

    #[test]
    fn test_runtime_error_shows_innermost_frame() {
        let mut err = RuntimeError::new(RuntimeErrorKind::Raised("boom".into()));
        err.backtrace.push(Frame {
            file: "page.tpl".into(),
            line: 3,
            label: None,
        });
        assert_eq!(err.to_string(), "boom (page.tpl:3)");
        assert!(!Error::Runtime(err).is_template_error());
    }
}
