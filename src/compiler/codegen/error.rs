//! Error types for translation and code generation.
//!
//! Every error is explicit and carries the span of the offending call so it can be
//! shown against the template source.

use crate::compiler::ast::Span;
use std::fmt;

/// The kind of compile error that occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// `block.call { ... }` on the template's own block parameter.
    BlockInvocationWithBlock,
    /// A void element given inner text or a block.
    VoidElementContent,
    /// A construct that the current rendering mode cannot express.
    UnsupportedInMode,
    /// Positional arguments a markup call does not accept.
    UnexpectedArgument,
    /// A builtin called without an argument it requires.
    MissingArgument,
    /// An assignment target the generator cannot store into.
    InvalidAssignment,
    /// An expression form the generator has no instruction for.
    UnsupportedExpression,
}

impl CompileErrorKind {
    /// Returns a human-readable description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            Self::BlockInvocationWithBlock => "cannot pass a block to a block invocation",
            Self::VoidElementContent => "void element cannot have content",
            Self::UnsupportedInMode => "construct not supported in this rendering mode",
            Self::UnexpectedArgument => "unexpected argument",
            Self::MissingArgument => "missing argument",
            Self::InvalidAssignment => "invalid assignment target",
            Self::UnsupportedExpression => "unsupported expression",
        }
    }
}

/// A detailed compile error with context information.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    /// Context describing what was being compiled (`<br>`, `render`).
    pub context: String,
    pub expected: Vec<String>,
    pub found: Option<String>,
    pub help: Option<String>,
    /// Byte span in the template source.
    pub span: Option<Span>,
    /// Rendered source excerpt, attached once the template source is known.
    pub excerpt: Option<String>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind) -> Self {
        Self {
            kind,
            context: String::new(),
            expected: Vec::new(),
            found: None,
            help: None,
            span: None,
            excerpt: None,
        }
    }

    /// Creates a "void element cannot have content" error.
    pub fn void_content(tag: &str, span: Span) -> Self {
        Self::new(CompileErrorKind::VoidElementContent)
            .with_context(&format!("<{tag}>"))
            .with_span(span)
            .with_help(&format!("<{tag}> takes attributes only"))
    }

    /// Creates an "unsupported in this mode" error.
    pub fn unsupported(construct: &str, mode: &str, span: Span) -> Self {
        Self::new(CompileErrorKind::UnsupportedInMode)
            .with_context(construct)
            .with_found(&format!("{mode} mode"))
            .with_span(span)
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = context.to_string();
        self
    }

    pub fn with_expected(mut self, expected: &[&str]) -> Self {
        self.expected = expected.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn with_found(mut self, found: &str) -> Self {
        self.found = Some(found.to_string());
        self
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Returns the position (start byte offset) for error highlighting.
    pub fn position(&self) -> Option<usize> {
        self.span.map(|s| s.start)
    }

    /// Converts the error to a user-friendly message.
    pub fn to_message(&self) -> String {
        let mut msg = String::from(self.kind.description());

        if !self.context.is_empty() {
            msg.push_str(&format!(" ({})", self.context));
        }
        if let Some(ref found) = self.found {
            msg.push_str(&format!(", found {found}"));
        }
        if !self.expected.is_empty() {
            if self.expected.len() == 1 {
                msg.push_str(&format!(", expected {}", self.expected[0]));
            } else {
                msg.push_str(&format!(", expected one of: {}", self.expected.join(", ")));
            }
        }
        if let Some(ref help) = self.help {
            msg.push_str(&format!("\n  help: {help}"));
        }
        msg
    }

    /// Formats the error rustc-style against the template source.
    pub fn format_with_source(&self, source: &str, filename: &str, line_offset: usize) -> String {
        use crate::compiler::error_fmt::{ErrorFormat, build_annotation};

        let Some(span) = self.span else {
            return self.to_message();
        };
        let message = if self.context.is_empty() {
            self.kind.description().to_string()
        } else {
            format!("{} ({})", self.kind.description(), self.context)
        };
        let expected: Vec<&str> = self.expected.iter().map(String::as_str).collect();
        let mut fmt = ErrorFormat::new(&message, source, span.start)
            .filename(filename)
            .line_offset(line_offset);
        if let Some(ann) = build_annotation(self.found.as_deref(), &expected) {
            fmt = fmt.annotation(ann);
        }
        if let Some(ref help) = self.help {
            fmt = fmt.help(help);
        }
        fmt.format()
    }

    /// Attaches the rendered source excerpt used by `Display`.
    pub(crate) fn with_source(mut self, source: &str, filename: &str, line_offset: usize) -> Self {
        if self.span.is_some() {
            self.excerpt = Some(self.format_with_source(source, filename, line_offset));
        }
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.excerpt {
            Some(excerpt) => write!(f, "{}", excerpt.trim_end()),
            None => write!(f, "{}", self.to_message()),
        }
    }
}

impl std::error::Error for CompileError {}

/// Result type for translation and code generation.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_void_content_message() {
        let err = CompileError::void_content("br", Span::new(0, 2));
        let msg = err.to_message();
        assert!(msg.contains("void element"), "{msg}");
        assert!(msg.contains("<br>"), "{msg}");
        assert_eq!(err.position(), Some(0));
    }

    #[test]
    fn test_expected_list() {
        let err = CompileError::new(CompileErrorKind::MissingArgument)
            .with_context("render")
            .with_expected(&["template", "lambda"]);
        assert!(err.to_message().contains("expected one of: template, lambda"));
    }

    #[test]
    fn test_display_uses_excerpt() {
        let source = "div {\n  br \"x\"\n}";
        let err = CompileError::void_content("br", Span::new(8, 14)).with_source(
            source,
            "card.tpl",
            0,
        );
        let shown = err.to_string();
        assert!(shown.contains("--> card.tpl:2:3"), "{shown}");
        assert!(shown.contains("2 | br \"x\""), "{shown}");
    }

    #[test]
    fn test_all_error_kinds_have_descriptions() {
        let kinds = [
            CompileErrorKind::BlockInvocationWithBlock,
            CompileErrorKind::VoidElementContent,
            CompileErrorKind::UnsupportedInMode,
            CompileErrorKind::UnexpectedArgument,
            CompileErrorKind::MissingArgument,
            CompileErrorKind::InvalidAssignment,
            CompileErrorKind::UnsupportedExpression,
        ];
        for kind in kinds {
            assert!(!kind.description().is_empty(), "{kind:?} has empty description");
        }
    }
}
