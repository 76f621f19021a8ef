//! Lexer for the template language.
//!
//! Produces a flat token stream. Whitespace and `#` comments are skipped; the token
//! that follows them carries `space_before = true`, which the parser uses to tell
//! command-call arguments (`h1 -x`) from binary operators (`a - x`). Line breaks are
//! significant and become `Newline` tokens, except when the next line continues a
//! method chain with a leading `.`.

use super::syntax::SyntaxKind;

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The kind of token.
    pub kind: SyntaxKind,
    /// The text of the token.
    pub text: String,
    /// The byte offset where this token starts.
    pub start: usize,
    /// Whether whitespace or a comment precedes the token.
    pub space_before: bool,
}

impl Token {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// The lexer for template input.
pub struct Lexer<'a> {
    /// The input text.
    input: &'a str,
    /// Current byte position in the input.
    pos: usize,
    /// Offset added to every token start (for sub-lexers over interpolations).
    base: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            base: 0,
        }
    }

    /// Creates a lexer whose token offsets are shifted by `base`.
    pub fn with_base(input: &'a str, base: usize) -> Self {
        Self {
            input,
            pos: 0,
            base,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.remaining().chars().nth(n)
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn consume_while<F: Fn(char) -> bool>(&mut self, pred: F) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if pred(c) {
                self.advance(c.len_utf8());
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    /// Tokenizes the entire input.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            let space_before = self.skip_trivia();
            if self.pos >= self.input.len() {
                break;
            }
            let start = self.pos;
            let kind = self.lex_token();
            if kind == SyntaxKind::Newline {
                let redundant = tokens
                    .last()
                    .is_none_or(|t| t.kind == SyntaxKind::Newline)
                    || self.continues_chain();
                if redundant {
                    continue;
                }
            }
            tokens.push(Token {
                kind,
                text: self.input[start..self.pos].to_string(),
                start: start + self.base,
                space_before,
            });
        }
        tokens
    }

    /// Skips spaces, tabs, comments and escaped line breaks.
    fn skip_trivia(&mut self) -> bool {
        let start = self.pos;
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => self.advance(1),
                Some('\\') if self.peek_nth(1) == Some('\n') => self.advance(2),
                Some('#') => {
                    self.consume_while(|c| c != '\n');
                }
                _ => break,
            }
        }
        self.pos > start
    }

    /// A line starting with `.` (but not `..`) continues the previous expression.
    fn continues_chain(&self) -> bool {
        let rest = self.remaining().trim_start();
        (rest.starts_with('.') && !rest.starts_with("..")) || rest.starts_with("&.")
    }

    fn lex_token(&mut self) -> SyntaxKind {
        let Some(c) = self.peek() else {
            return SyntaxKind::Error;
        };

        match c {
            '\n' => {
                self.advance(1);
                SyntaxKind::Newline
            }
            'a'..='z' | '_' => self.lex_ident(),
            'A'..='Z' => {
                self.consume_while(is_ident_char);
                if self.at_label() {
                    self.advance(1);
                    return SyntaxKind::Label;
                }
                SyntaxKind::Const
            }
            '0'..='9' => self.lex_number(),
            '@' => {
                self.advance(1);
                if self.consume_while(is_ident_char).is_empty() {
                    return SyntaxKind::Error;
                }
                SyntaxKind::Ivar
            }
            '"' => self.lex_dstring(),
            '\'' => self.lex_sstring(),
            ':' => self.lex_colon(),
            _ => self.lex_punct(c),
        }
    }

    fn lex_ident(&mut self) -> SyntaxKind {
        let start = self.pos;
        self.consume_while(is_ident_char);
        // `empty?` and `save!`, but not `a!=b` or `a?b:c`
        if let Some(suffix @ ('?' | '!')) = self.peek()
            && self.peek_nth(1) != Some('=')
            && !(suffix == '?' && self.peek_nth(1).is_some_and(|c| is_ident_char(c) || c == ':'))
        {
            self.advance(1);
        }
        if self.at_label() {
            self.advance(1);
            return SyntaxKind::Label;
        }
        let text = &self.input[start..self.pos];
        SyntaxKind::keyword(text).unwrap_or(SyntaxKind::Ident)
    }

    /// A single `:` directly after a name makes it a label (`class: "x"`).
    fn at_label(&self) -> bool {
        self.peek() == Some(':') && self.peek_nth(1) != Some(':')
    }

    fn lex_number(&mut self) -> SyntaxKind {
        self.consume_while(|c| c.is_ascii_digit() || c == '_');
        if self.peek() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance(1);
            self.consume_while(|c| c.is_ascii_digit() || c == '_');
            if matches!(self.peek(), Some('e' | 'E')) {
                self.advance(1);
                if matches!(self.peek(), Some('+' | '-')) {
                    self.advance(1);
                }
                self.consume_while(|c| c.is_ascii_digit());
            }
            return SyntaxKind::Float;
        }
        SyntaxKind::Int
    }

    fn lex_colon(&mut self) -> SyntaxKind {
        if self.remaining().starts_with("::") {
            self.advance(2);
            return SyntaxKind::ColonColon;
        }
        self.advance(1);
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                self.consume_while(is_ident_char);
                if matches!(self.peek(), Some('?' | '!' | '=')) && self.peek_nth(1) != Some('=') {
                    self.advance(1);
                }
                SyntaxKind::Symbol
            }
            Some('"') => match self.lex_dstring() {
                SyntaxKind::DString => SyntaxKind::Symbol,
                other => other,
            },
            _ => SyntaxKind::Colon,
        }
    }

    fn lex_sstring(&mut self) -> SyntaxKind {
        self.advance(1);
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.advance(1);
                    if let Some(next) = self.peek() {
                        self.advance(next.len_utf8());
                    }
                }
                '\'' => {
                    self.advance(1);
                    return SyntaxKind::SString;
                }
                _ => self.advance(c.len_utf8()),
            }
        }
        SyntaxKind::Error
    }

    fn lex_dstring(&mut self) -> SyntaxKind {
        self.advance(1);
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.advance(1);
                    if let Some(next) = self.peek() {
                        self.advance(next.len_utf8());
                    }
                }
                '"' => {
                    self.advance(1);
                    return SyntaxKind::DString;
                }
                '#' if self.peek_nth(1) == Some('{') => {
                    self.advance(2);
                    if !self.skip_interpolation() {
                        return SyntaxKind::Error;
                    }
                }
                _ => self.advance(c.len_utf8()),
            }
        }
        SyntaxKind::Error
    }

    /// Skips to the `}` closing an interpolation, honouring nested braces and strings.
    fn skip_interpolation(&mut self) -> bool {
        let mut depth = 1usize;
        while let Some(c) = self.peek() {
            match c {
                '{' => {
                    depth += 1;
                    self.advance(1);
                }
                '}' => {
                    self.advance(1);
                    depth -= 1;
                    if depth == 0 {
                        return true;
                    }
                }
                '"' => {
                    if self.lex_dstring() == SyntaxKind::Error {
                        return false;
                    }
                }
                '\'' => {
                    if self.lex_sstring() == SyntaxKind::Error {
                        return false;
                    }
                }
                _ => self.advance(c.len_utf8()),
            }
        }
        false
    }

    fn lex_punct(&mut self, c: char) -> SyntaxKind {
        const PUNCT: &[(&str, SyntaxKind)] = &[
            ("...", SyntaxKind::DotDotDot),
            ("||=", SyntaxKind::OrOrEq),
            ("**", SyntaxKind::DoubleStar),
            ("..", SyntaxKind::DotDot),
            ("&.", SyntaxKind::AmpDot),
            ("=>", SyntaxKind::FatArrow),
            ("->", SyntaxKind::Arrow),
            ("==", SyntaxKind::EqEq),
            ("!=", SyntaxKind::NotEq),
            ("<=", SyntaxKind::Le),
            (">=", SyntaxKind::Ge),
            ("&&", SyntaxKind::AndAnd),
            ("||", SyntaxKind::OrOr),
            ("<<", SyntaxKind::Shl),
            ("+=", SyntaxKind::PlusEq),
            ("-=", SyntaxKind::MinusEq),
            ("(", SyntaxKind::LParen),
            (")", SyntaxKind::RParen),
            ("[", SyntaxKind::LBracket),
            ("]", SyntaxKind::RBracket),
            ("{", SyntaxKind::LBrace),
            ("}", SyntaxKind::RBrace),
            (",", SyntaxKind::Comma),
            (".", SyntaxKind::Dot),
            ("?", SyntaxKind::Question),
            ("|", SyntaxKind::Pipe),
            ("&", SyntaxKind::Amp),
            ("*", SyntaxKind::Star),
            ("=", SyntaxKind::Eq),
            ("<", SyntaxKind::Lt),
            (">", SyntaxKind::Gt),
            ("+", SyntaxKind::Plus),
            ("-", SyntaxKind::Minus),
            ("/", SyntaxKind::Slash),
            ("%", SyntaxKind::Percent),
            ("!", SyntaxKind::Bang),
            (";", SyntaxKind::Semicolon),
        ];

        let remaining = self.remaining();
        for (text, kind) in PUNCT {
            if remaining.starts_with(text) {
                self.advance(text.len());
                return *kind;
            }
        }
        self.advance(c.len_utf8());
        SyntaxKind::Error
    }
}

/// Given the text following `#{`, returns the byte offset of the matching `}`.
pub fn interpolation_end(text: &str) -> Option<usize> {
    let mut lexer = Lexer::new(text);
    lexer.skip_interpolation().then(|| lexer.pos - 1)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<SyntaxKind> {
        Lexer::new(input).tokenize().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tag_call_with_block() {
        use SyntaxKind::*;
        assert_eq!(
            kinds(r#"div { h1 "Hi" }"#),
            vec![Ident, LBrace, Ident, DString, RBrace]
        );
    }

    #[test]
    fn test_labels_and_symbols() {
        use SyntaxKind::*;
        assert_eq!(
            kinds("a(class: :x, Foo::Bar)"),
            vec![Ident, LParen, Label, Symbol, Comma, Const, ColonColon, Const, RParen]
        );
    }

    #[test]
    fn test_predicate_identifiers() {
        let tokens = Lexer::new("x.empty? != y").tokenize();
        assert_eq!(tokens[2].text, "empty?");
        assert_eq!(tokens[3].kind, SyntaxKind::NotEq);
    }

    #[test]
    fn test_ternary_keeps_question_separate() {
        use SyntaxKind::*;
        assert_eq!(
            kinds("a ? b : c"),
            vec![Ident, Question, Ident, Colon, Ident]
        );
    }

    #[test]
    fn test_interpolated_string_is_one_token() {
        let tokens = Lexer::new(r#"p "a #{x + "}"} b""#).tokenize();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].kind, SyntaxKind::DString);
        assert_eq!(tokens[1].text, r#""a #{x + "}"} b""#);
    }

    #[test]
    fn test_newlines_collapse_and_comments_skip() {
        use SyntaxKind::*;
        assert_eq!(
            kinds("a # note\n\n\nb\n"),
            vec![Ident, Newline, Ident, Newline]
        );
    }

    #[test]
    fn test_leading_dot_continues_chain() {
        use SyntaxKind::*;
        assert_eq!(
            kinds("items\n  .map { |x| x }"),
            vec![Ident, Dot, Ident, LBrace, Pipe, Ident, Pipe, Ident, RBrace]
        );
    }

    #[test]
    fn test_space_before_flag() {
        let tokens = Lexer::new("a -1").tokenize();
        assert!(tokens[1].space_before);
        assert!(!tokens[2].space_before);
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert_eq!(kinds("\"abc"), vec![SyntaxKind::Error]);
    }

    #[test]
    fn test_interpolation_end() {
        assert_eq!(interpolation_end("a + {b: 1}[:b]} tail"), Some(14));
        assert_eq!(interpolation_end("\"}\"} x"), Some(3));
        assert_eq!(interpolation_end("open"), None);
    }

    #[test]
    fn test_numbers() {
        use SyntaxKind::*;
        assert_eq!(kinds("1 2.5 1..3"), vec![Int, Float, Int, DotDot, Int]);
    }
}
