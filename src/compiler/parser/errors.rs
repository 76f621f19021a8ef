//! Error types for the template parser.
//!
//! Provides detailed, context-rich error messages for debugging parse failures.

use crate::compiler::syntax::SyntaxKind;
use std::fmt;

/// The kind of parse error that occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Encountered an unexpected token.
    UnexpectedToken,
    /// Reached end of input unexpectedly.
    UnexpectedEof,
    /// Left-hand side of assignment is not valid.
    InvalidAssignmentTarget,
    /// Missing closing parenthesis ')'.
    MissingClosingParen,
    /// Missing closing bracket ']'.
    MissingClosingBracket,
    /// Missing closing brace '}'.
    MissingClosingBrace,
    /// Missing `end` for a block or control structure.
    MissingEnd,
    /// Missing ':' in conditional expression.
    MissingConditionalColon,
    /// Missing string literal closing quote.
    UnterminatedStringLiteral,
    /// Invalid numeric literal.
    InvalidNumericLiteral,
    /// Expected identifier.
    ExpectedIdentifier,
    /// Expected expression.
    ExpectedExpression,
    /// Invalid parameter declaration.
    InvalidParameter,
    /// Positional argument after keyword arguments.
    PositionalAfterKeyword,
}

impl ParseErrorKind {
    /// Returns a human-readable description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnexpectedToken => "unexpected token",
            Self::UnexpectedEof => "unexpected end of input",
            Self::InvalidAssignmentTarget => "invalid assignment target",
            Self::MissingClosingParen => "missing closing parenthesis ')'",
            Self::MissingClosingBracket => "missing closing bracket ']'",
            Self::MissingClosingBrace => "missing closing brace '}'",
            Self::MissingEnd => "missing 'end'",
            Self::MissingConditionalColon => "missing ':' in conditional expression",
            Self::UnterminatedStringLiteral => "unterminated string literal",
            Self::InvalidNumericLiteral => "invalid numeric literal",
            Self::ExpectedIdentifier => "expected identifier",
            Self::ExpectedExpression => "expected expression",
            Self::InvalidParameter => "invalid parameter",
            Self::PositionalAfterKeyword => "positional argument after keyword arguments",
        }
    }
}

/// A parse error with enough detail to render a rustc-style excerpt.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// Byte offset in the template source.
    pub position: usize,
    /// What was being parsed (`argument list`, `block body`).
    pub context: String,
    pub expected: Vec<String>,
    pub found: Option<String>,
    pub help: Option<String>,
    /// Offset of the opening delimiter for unclosed `(`, `[`, `{` and `do`.
    pub opened_at: Option<usize>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, position: usize) -> Self {
        Self {
            kind,
            position,
            context: String::new(),
            expected: Vec::new(),
            found: None,
            help: None,
            opened_at: None,
        }
    }

    pub fn unexpected_token_text(position: usize, expected: &[&str], found: &str) -> Self {
        Self::new(ParseErrorKind::UnexpectedToken, position)
            .with_expected(expected)
            .with_found(&format!("'{found}'"))
    }

    pub fn unexpected_eof(position: usize, context: &str) -> Self {
        Self::new(ParseErrorKind::UnexpectedEof, position).with_context(context)
    }

    /// An expression was required; newlines are reported as "end of line".
    pub fn expected_expression_found(position: usize, found: SyntaxKind, text: &str) -> Self {
        let found = match found {
            SyntaxKind::Newline => "end of line".to_string(),
            _ => format!("'{text}'"),
        };
        Self::new(ParseErrorKind::ExpectedExpression, position)
            .with_expected(&["expression"])
            .with_found(&found)
    }

    pub fn invalid_assignment_target(position: usize) -> Self {
        Self::new(ParseErrorKind::InvalidAssignmentTarget, position)
            .with_expected(&["local, @ivar, `x[i]` or `x.attr`"])
    }

    /// An unclosed delimiter. `kind` selects which one.
    pub fn missing_closing(kind: ParseErrorKind, position: usize, opened_at: usize) -> Self {
        let delimiter = match kind {
            ParseErrorKind::MissingClosingParen => "')'",
            ParseErrorKind::MissingClosingBracket => "']'",
            ParseErrorKind::MissingClosingBrace => "'}'",
            ParseErrorKind::MissingEnd => "'end'",
            _ => "closing delimiter",
        };
        let mut err = Self::new(kind, position).with_expected(&[delimiter]);
        err.opened_at = Some(opened_at);
        err
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

    /// One-line message without source context.
    pub fn to_message(&self) -> String {
        let mut msg = self.kind.description().to_string();
        if !self.context.is_empty() {
            msg.push_str(&format!(" in {}", self.context));
        }
        if let Some(found) = &self.found {
            msg.push_str(&format!(", found {found}"));
        }
        match self.expected.as_slice() {
            [] => {}
            [one] => msg.push_str(&format!(", expected {one}")),
            many => msg.push_str(&format!(", expected one of: {}", many.join(", "))),
        }
        msg.push_str(&format!(" (at byte {})", self.position));
        if let Some(help) = &self.help {
            msg.push_str(&format!("\n  help: {help}"));
        }
        msg
    }

    /// Formats the error rustc-style against the template source.
    pub fn format_with_source(&self, source: &str, filename: &str, line_offset: usize) -> String {
        use crate::compiler::error_fmt::{ErrorFormat, SourceLocation, build_annotation};

        let message = if self.context.is_empty() {
            self.kind.description().to_string()
        } else {
            format!("{} in {}", self.kind.description(), self.context)
        };
        let help = match (&self.help, self.opened_at) {
            (Some(help), _) => Some(help.clone()),
            (None, Some(opened)) => {
                let loc = SourceLocation::from_offset(source, opened);
                Some(format!(
                    "unclosed delimiter opened on line {}",
                    loc.line + line_offset
                ))
            }
            (None, None) => None,
        };
        let expected: Vec<&str> = self.expected.iter().map(String::as_str).collect();
        let mut fmt = ErrorFormat::new(&message, source, self.position)
            .filename(filename)
            .line_offset(line_offset);
        if let Some(ann) = build_annotation(self.found.as_deref(), &expected) {
            fmt = fmt.annotation(ann);
        }
        if let Some(help) = &help {
            fmt = fmt.help(help);
        }
        fmt.format()
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_message())
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_token_lists_expectations() {
        let err = ParseError::unexpected_token_text(42, &["identifier", "'|'"], ")");
        let msg = err.to_message();
        assert!(msg.starts_with("unexpected token"), "{msg}");
        assert!(msg.contains("found ')'"), "{msg}");
        assert!(msg.contains("expected one of: identifier, '|'"), "{msg}");
        assert!(msg.contains("byte 42"), "{msg}");
    }

    #[test]
    fn test_eof_mentions_context() {
        let msg = ParseError::unexpected_eof(100, "block body").to_message();
        assert!(msg.contains("in block body"), "{msg}");
    }

    #[test]
    fn test_newline_is_end_of_line() {
        let err = ParseError::expected_expression_found(3, SyntaxKind::Newline, "\n");
        assert_eq!(err.found.as_deref(), Some("end of line"));
    }

    #[test]
    fn test_unclosed_delimiter_points_at_opener() {
        let source = "div do\n  p 1\n";
        let err = ParseError::missing_closing(ParseErrorKind::MissingEnd, source.len(), 4);
        let formatted = err.format_with_source(source, "page.tpl", 10);
        assert!(formatted.contains("error: missing 'end'"), "{formatted}");
        assert!(formatted.contains("opened on line 11"), "{formatted}");
    }
}
