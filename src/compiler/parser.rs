//! Parser for the template language.
//!
//! A recursive-descent statement parser with a Pratt expression core. The parser
//! tracks lexical scopes so that a bare identifier can be classified while parsing:
//! a known local is a variable read, anything else is a receiverless call (which
//! the translator later turns into markup).

mod errors;
mod precedence;

pub use errors::{ParseError, ParseErrorKind, ParseResult};

use super::ast::{
    Arg, BlockExpr, Call, Expr, ExprKind, HashItem, Param, ParamKind, Params, Span,
    StrPart, TemplateAst,
};
use super::lexer::{Lexer, Token, interpolation_end};
use super::syntax::SyntaxKind;
use precedence::{Infix, infix_binding_power, prec};

/// Parses a template source. `locals` are names already bound in the template's
/// captured environment.
pub fn parse<'a>(
    source: &str,
    locals: impl IntoIterator<Item = &'a str>,
) -> ParseResult<TemplateAst> {
    let mut parser = Parser::new(source, 0);
    parser.scopes[0].extend(locals.into_iter().map(str::to_string));
    parser.parse_template()
}

/// The parser for template input.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Byte length of the input, for end-of-input errors.
    end: usize,
    /// Lexical scopes, innermost last.
    scopes: Vec<Vec<String>>,
    /// Nonzero while `do` must not attach to an inner call (command arguments,
    /// loop conditions).
    no_do: usize,
}

impl Parser {
    fn new(input: &str, base: usize) -> Self {
        Self {
            tokens: Lexer::with_base(input, base).tokenize(),
            pos: 0,
            end: base + input.len(),
            scopes: vec![Vec::new()],
            no_do: 0,
        }
    }

    // =========================================================================
    // Token navigation
    // =========================================================================

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn current_kind(&self) -> Option<SyntaxKind> {
        self.current().map(|t| t.kind)
    }

    fn at(&self, kind: SyntaxKind) -> bool {
        self.current_kind() == Some(kind)
    }

    /// At `kind` with no whitespace before it (`f(`, `a[`).
    fn at_tight(&self, kind: SyntaxKind) -> bool {
        self.current().is_some_and(|t| t.kind == kind && !t.space_before)
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn position(&self) -> usize {
        self.current().map_or(self.end, |t| t.start)
    }

    fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(0, Token::end)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: SyntaxKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_closing(&mut self, kind: SyntaxKind, opened_at: usize) -> ParseResult<()> {
        if self.eat(kind) {
            return Ok(());
        }
        let error_kind = match kind {
            SyntaxKind::RParen => ParseErrorKind::MissingClosingParen,
            SyntaxKind::RBracket => ParseErrorKind::MissingClosingBracket,
            SyntaxKind::RBrace => ParseErrorKind::MissingClosingBrace,
            _ => ParseErrorKind::MissingEnd,
        };
        let mut err = ParseError::missing_closing(error_kind, self.position(), opened_at);
        if let Some(token) = self.current() {
            err = err.with_found(&format!("'{}'", token.text.trim()));
        }
        Err(err)
    }

    fn skip_newlines(&mut self) {
        while self.at(SyntaxKind::Newline) {
            self.pos += 1;
        }
    }

    fn skip_terminators(&mut self) {
        while self.current_kind().is_some_and(SyntaxKind::is_terminator) {
            self.pos += 1;
        }
    }

    fn unexpected(&self, expected: &[&str]) -> ParseError {
        match self.current() {
            None => ParseError::unexpected_eof(self.end, "template").with_expected(expected),
            Some(token) if token.kind == SyntaxKind::Error => self.lex_error(token),
            Some(token) => ParseError::unexpected_token_text(token.start, expected, &token.text),
        }
    }

    fn lex_error(&self, token: &Token) -> ParseError {
        if token.text.starts_with(['"', '\'']) {
            ParseError::new(ParseErrorKind::UnterminatedStringLiteral, token.start)
        } else {
            ParseError::unexpected_token_text(token.start, &[], &token.text)
        }
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|s| s.iter().any(|n| n == name))
    }

    fn declare(&mut self, name: &str) {
        if !self.is_local(name)
            && let Some(scope) = self.scopes.last_mut()
        {
            scope.push(name.to_string());
        }
    }

    // =========================================================================
    // Template and statements
    // =========================================================================

    fn parse_template(&mut self) -> ParseResult<TemplateAst> {
        self.skip_terminators();
        let mut params = Params::default();
        if self.at(SyntaxKind::Pipe) {
            self.pos += 1;
            params = self.parse_param_list(SyntaxKind::Pipe)?;
        } else if self.eat(SyntaxKind::OrOr) {
            // `||` header: no parameters
        } else if self.at(SyntaxKind::Arrow) {
            // a source that is a single lambda literal
            let save = self.pos;
            let start = self.position();
            if let Ok(lambda) = self.parse_lambda(start) {
                self.skip_terminators();
                if self.at_eof() {
                    return Ok(TemplateAst {
                        params: lambda.params,
                        body: lambda.body,
                    });
                }
            }
            self.pos = save;
        }

        let body = self.parse_stmts(&[])?;
        if !self.at_eof() {
            return Err(self.unexpected(&["statement"]));
        }
        Ok(TemplateAst { params, body })
    }

    /// Parses statements until end of input or one of `terminators`.
    fn parse_stmts(&mut self, terminators: &[SyntaxKind]) -> ParseResult<Vec<Expr>> {
        let mut body = Vec::new();
        loop {
            self.skip_terminators();
            match self.current_kind() {
                None => break,
                Some(kind) if terminators.contains(&kind) => break,
                _ => {}
            }
            body.push(self.parse_stmt()?);
            match self.current_kind() {
                None => break,
                Some(kind) if kind.is_terminator() || terminators.contains(&kind) => {}
                Some(_) => return Err(self.unexpected(&["end of line"])),
            }
        }
        Ok(body)
    }

    fn parse_stmt(&mut self) -> ParseResult<Expr> {
        let mut stmt = self.parse_logic()?;
        loop {
            let Some(kind) = self.current_kind() else {
                break;
            };
            match kind {
                SyntaxKind::IfKw | SyntaxKind::UnlessKw => {
                    self.pos += 1;
                    let mut cond = self.parse_logic()?;
                    if kind == SyntaxKind::UnlessKw {
                        cond = negate(cond);
                    }
                    let span = stmt.span.to(cond.span);
                    stmt = Expr::new(
                        ExprKind::If {
                            cond: Box::new(cond),
                            then_body: vec![stmt],
                            else_body: Vec::new(),
                        },
                        span,
                    );
                }
                SyntaxKind::WhileKw | SyntaxKind::UntilKw => {
                    self.pos += 1;
                    let cond = self.parse_logic()?;
                    let span = stmt.span.to(cond.span);
                    stmt = Expr::new(
                        ExprKind::While {
                            cond: Box::new(cond),
                            body: vec![stmt],
                            until: kind == SyntaxKind::UntilKw,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(stmt)
    }

    /// `not`, `and`, `or`: the loosest operators.
    fn parse_logic(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_not()?;
        loop {
            let is_and = match self.current_kind() {
                Some(SyntaxKind::AndKw) => true,
                Some(SyntaxKind::OrKw) => false,
                _ => break,
            };
            self.pos += 1;
            self.skip_newlines();
            let rhs = self.parse_not()?;
            let span = lhs.span.to(rhs.span);
            let kind = if is_and {
                ExprKind::And(Box::new(lhs), Box::new(rhs))
            } else {
                ExprKind::Or(Box::new(lhs), Box::new(rhs))
            };
            lhs = Expr::new(kind, span);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.at(SyntaxKind::NotKw) {
            let start = self.position();
            self.pos += 1;
            let operand = self.parse_not()?;
            let span = Span::new(start, operand.span.end);
            return Ok(Expr::new(ExprKind::Not(Box::new(operand)), span));
        }
        self.parse_expr(0)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn parse_expr(&mut self, min_bp: u8) -> ParseResult<Expr> {
        let mut lhs = self.parse_prefix()?;

        while let Some(kind) = self.current_kind() {
            let Some((op, bp)) = infix_binding_power(kind) else {
                break;
            };
            if bp.left < min_bp {
                break;
            }
            self.pos += 1;
            self.skip_newlines();

            lhs = match op {
                Infix::Binary(op) => {
                    let rhs = self.parse_expr(bp.right)?;
                    let span = lhs.span.to(rhs.span);
                    Expr::new(
                        ExprKind::Binary {
                            op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        span,
                    )
                }
                Infix::And | Infix::Or => {
                    let rhs = self.parse_expr(bp.right)?;
                    let span = lhs.span.to(rhs.span);
                    if op == Infix::And {
                        Expr::new(ExprKind::And(Box::new(lhs), Box::new(rhs)), span)
                    } else {
                        Expr::new(ExprKind::Or(Box::new(lhs), Box::new(rhs)), span)
                    }
                }
                Infix::Range { exclusive } => {
                    let rhs = self.parse_expr(bp.right + 1)?;
                    let span = lhs.span.to(rhs.span);
                    Expr::new(
                        ExprKind::Range {
                            start: Box::new(lhs),
                            end: Box::new(rhs),
                            exclusive,
                        },
                        span,
                    )
                }
                Infix::Conditional => {
                    let then_expr = self.parse_expr(bp.left)?;
                    self.skip_newlines();
                    if !self.eat(SyntaxKind::Colon) {
                        return Err(ParseError::new(
                            ParseErrorKind::MissingConditionalColon,
                            self.position(),
                        )
                        .with_expected(&["':'"]));
                    }
                    self.skip_newlines();
                    let else_expr = self.parse_expr(bp.right)?;
                    let span = lhs.span.to(else_expr.span);
                    Expr::new(
                        ExprKind::If {
                            cond: Box::new(lhs),
                            then_body: vec![then_expr],
                            else_body: vec![else_expr],
                        },
                        span,
                    )
                }
                Infix::Assign => {
                    let target = self.assignment_target(lhs)?;
                    let value = self.parse_expr(bp.right)?;
                    let span = target.span.to(value.span);
                    Expr::new(
                        ExprKind::Assign {
                            target: Box::new(target),
                            value: Box::new(value),
                        },
                        span,
                    )
                }
                Infix::OpAssign(op) => {
                    let target = self.assignment_target(lhs)?;
                    let value = self.parse_expr(bp.right)?;
                    let span = target.span.to(value.span);
                    Expr::new(
                        ExprKind::OpAssign {
                            target: Box::new(target),
                            op,
                            value: Box::new(value),
                        },
                        span,
                    )
                }
            };
        }

        Ok(lhs)
    }

    /// Validates an assignment target, turning a bare receiverless call into a new
    /// local.
    fn assignment_target(&mut self, target: Expr) -> ParseResult<Expr> {
        match &target.kind {
            ExprKind::Local(_) | ExprKind::Ivar(_) => Ok(target),
            ExprKind::Call(call)
                if call.receiver.is_none()
                    && call.args.is_empty()
                    && call.block.is_none()
                    && !call.name.ends_with(['?', '!']) =>
            {
                self.declare(&call.name);
                Ok(Expr::new(ExprKind::Local(call.name.clone()), target.span))
            }
            ExprKind::Call(call)
                if call.receiver.is_some()
                    && call.block.is_none()
                    && (call.name == "[]" || call.args.is_empty()) =>
            {
                Ok(target)
            }
            _ => Err(ParseError::invalid_assignment_target(target.span.start)),
        }
    }

    fn parse_prefix(&mut self) -> ParseResult<Expr> {
        let start = self.position();
        match self.current_kind() {
            Some(SyntaxKind::Bang | SyntaxKind::NotKw) => {
                self.pos += 1;
                let operand = self.parse_expr(prec::PREFIX)?;
                let span = Span::new(start, operand.span.end);
                Ok(Expr::new(ExprKind::Not(Box::new(operand)), span))
            }
            Some(SyntaxKind::Minus) => {
                self.pos += 1;
                if self.at_tight(SyntaxKind::Int) || self.at_tight(SyntaxKind::Float) {
                    let literal = self.parse_primary()?;
                    let negated = match literal.kind {
                        ExprKind::Int(n) => ExprKind::Int(-n),
                        ExprKind::Float(f) => ExprKind::Float(-f),
                        other => other,
                    };
                    let literal = Expr::new(negated, Span::new(start, literal.span.end));
                    return self.parse_postfix(literal);
                }
                let operand = self.parse_expr(prec::PREFIX)?;
                let span = Span::new(start, operand.span.end);
                Ok(Expr::new(ExprKind::Neg(Box::new(operand)), span))
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let Some(token) = self.current().cloned() else {
            return Err(ParseError::unexpected_eof(self.end, "expression")
                .with_expected(&["expression"]));
        };
        let span = Span::new(token.start, token.end());

        let kind = match token.kind {
            SyntaxKind::Int => {
                self.pos += 1;
                let value = token.text.replace('_', "").parse::<i64>().map_err(|_| {
                    ParseError::new(ParseErrorKind::InvalidNumericLiteral, token.start)
                        .with_found(&token.text)
                })?;
                ExprKind::Int(value)
            }
            SyntaxKind::Float => {
                self.pos += 1;
                let value = token.text.replace('_', "").parse::<f64>().map_err(|_| {
                    ParseError::new(ParseErrorKind::InvalidNumericLiteral, token.start)
                        .with_found(&token.text)
                })?;
                ExprKind::Float(value)
            }
            SyntaxKind::SString => {
                self.pos += 1;
                ExprKind::Str(unescape_single(&token.text[1..token.text.len() - 1]))
            }
            SyntaxKind::DString => {
                self.pos += 1;
                self.parse_dstring(&token)?
            }
            SyntaxKind::Symbol => {
                self.pos += 1;
                let name = &token.text[1..];
                match name.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                    Some(quoted) => ExprKind::Symbol(unescape_double(quoted)),
                    None => ExprKind::Symbol(name.to_string()),
                }
            }
            SyntaxKind::NilKw => {
                self.pos += 1;
                ExprKind::Nil
            }
            SyntaxKind::TrueKw => {
                self.pos += 1;
                ExprKind::Bool(true)
            }
            SyntaxKind::FalseKw => {
                self.pos += 1;
                ExprKind::Bool(false)
            }
            SyntaxKind::Ivar => {
                self.pos += 1;
                ExprKind::Ivar(token.text[1..].to_string())
            }
            SyntaxKind::Const => return self.parse_const(token),
            SyntaxKind::Ident => return self.parse_identifier(token),
            SyntaxKind::LBracket => return self.parse_array(),
            SyntaxKind::LBrace => return self.parse_hash(),
            SyntaxKind::LParen => return self.parse_paren(),
            SyntaxKind::Arrow => {
                let block = self.parse_lambda(token.start)?;
                let span = block.span;
                return Ok(Expr::new(ExprKind::Lambda(block), span));
            }
            SyntaxKind::IfKw | SyntaxKind::UnlessKw => return self.parse_if(),
            SyntaxKind::WhileKw | SyntaxKind::UntilKw => return self.parse_while(),
            SyntaxKind::Error => return Err(self.lex_error(&token)),
            SyntaxKind::Label => {
                return Err(
                    ParseError::unexpected_token_text(token.start, &["expression"], &token.text)
                        .with_help("labels are only allowed in argument lists and hashes"),
                );
            }
            other => {
                return Err(ParseError::expected_expression_found(
                    token.start,
                    other,
                    &token.text,
                ));
            }
        };
        Ok(Expr::new(kind, span))
    }

    fn parse_identifier(&mut self, token: Token) -> ParseResult<Expr> {
        self.pos += 1;
        let name = token.text.clone();

        if self.is_local(&name) {
            // `helper(x)` on a local proc is sugar for `helper.(x)`
            if self.at_tight(SyntaxKind::LParen) {
                let args = self.parse_paren_args()?;
                let receiver = Expr::new(
                    ExprKind::Local(name),
                    Span::new(token.start, token.end()),
                );
                return Ok(self.call(Some(receiver), "call".into(), args, None, token.start));
            }
            return Ok(Expr::new(
                ExprKind::Local(name),
                Span::new(token.start, token.end()),
            ));
        }

        let args = self.parse_call_args()?;
        let block = self.parse_block_opt()?;
        Ok(self.call(None, name, args, block, token.start))
    }

    /// Capitalized names: constant reads, or template calls when given arguments or a
    /// block.
    fn parse_const(&mut self, token: Token) -> ParseResult<Expr> {
        self.pos += 1;
        let span = Span::new(token.start, token.end());
        if self.is_call_start() {
            let args = self.parse_call_args()?;
            let block = self.parse_block_opt()?;
            return Ok(self.call(None, token.text, args, block, token.start));
        }
        Ok(Expr::new(
            ExprKind::Const {
                scope: None,
                name: token.text,
            },
            span,
        ))
    }

    fn is_call_start(&self) -> bool {
        self.at_tight(SyntaxKind::LParen)
            || self.at(SyntaxKind::LBrace)
            || (self.at(SyntaxKind::DoKw) && self.no_do == 0)
            || self.at_command_arg()
    }

    /// Whether the current token starts a command-call argument (`h1 "Hi"`).
    fn at_command_arg(&self) -> bool {
        let Some(token) = self.current() else {
            return false;
        };
        if !token.space_before {
            return false;
        }
        if token.kind.starts_argument() {
            return true;
        }
        token.kind.is_prefix_ambiguous()
            && self
                .tokens
                .get(self.pos + 1)
                .is_some_and(|next| !next.space_before && next.kind != SyntaxKind::Newline)
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Arg>> {
        if self.at_tight(SyntaxKind::LParen) {
            self.parse_paren_args()
        } else if self.at_command_arg() {
            self.parse_command_args()
        } else {
            Ok(Vec::new())
        }
    }

    fn call(
        &self,
        receiver: Option<Expr>,
        name: String,
        args: Vec<Arg>,
        block: Option<BlockExpr>,
        start: usize,
    ) -> Expr {
        let span = Span::new(start, self.prev_end().max(start));
        Expr::new(
            ExprKind::Call(Box::new(Call {
                receiver,
                name,
                args,
                block,
                safe_nav: false,
                span,
            })),
            span,
        )
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> ParseResult<Expr> {
        loop {
            let Some(token) = self.current().cloned() else {
                break;
            };
            match token.kind {
                SyntaxKind::Dot | SyntaxKind::AmpDot => {
                    self.pos += 1;
                    self.skip_newlines();
                    let start = expr.span.start;
                    let name = if self.at(SyntaxKind::LParen) {
                        "call".to_string()
                    } else {
                        match self.consume() {
                            Some(t)
                                if matches!(
                                    t.kind,
                                    SyntaxKind::Ident | SyntaxKind::Const
                                ) || t.kind.is_keyword() =>
                            {
                                t.text
                            }
                            Some(t) if t.kind == SyntaxKind::Label => {
                                return Err(ParseError::unexpected_token_text(
                                    t.start,
                                    &["method name"],
                                    &t.text,
                                ));
                            }
                            _ => {
                                return Err(ParseError::new(
                                    ParseErrorKind::ExpectedIdentifier,
                                    self.position(),
                                )
                                .with_context("method call"));
                            }
                        }
                    };
                    let args = if name == "call" && self.at(SyntaxKind::LParen) {
                        self.parse_paren_args()?
                    } else {
                        self.parse_call_args()?
                    };
                    let block = self.parse_block_opt()?;
                    expr = self.call(Some(expr), name, args, block, start);
                    if token.kind == SyntaxKind::AmpDot
                        && let ExprKind::Call(call) = &mut expr.kind
                    {
                        call.safe_nav = true;
                    }
                }
                SyntaxKind::LBracket
                    if !token.space_before
                        || matches!(
                            expr.kind,
                            ExprKind::Local(_) | ExprKind::Ivar(_) | ExprKind::Const { .. }
                        ) =>
                {
                    let opened_at = token.start;
                    self.pos += 1;
                    self.skip_newlines();
                    let saved = std::mem::replace(&mut self.no_do, 0);
                    let mut args = Vec::new();
                    while !self.at(SyntaxKind::RBracket) && !self.at_eof() {
                        self.parse_arg_item(&mut args)?;
                        self.skip_newlines();
                        if !self.eat(SyntaxKind::Comma) {
                            break;
                        }
                        self.skip_newlines();
                    }
                    self.no_do = saved;
                    self.expect_closing(SyntaxKind::RBracket, opened_at)?;
                    let start = expr.span.start;
                    expr = self.call(Some(expr), "[]".into(), args, None, start);
                }
                SyntaxKind::ColonColon if !token.space_before => {
                    self.pos += 1;
                    let Some(name) = self.consume().filter(|t| t.kind == SyntaxKind::Const)
                    else {
                        return Err(ParseError::new(
                            ParseErrorKind::ExpectedIdentifier,
                            self.position(),
                        )
                        .with_context("constant path")
                        .with_expected(&["constant name"]));
                    };
                    let start = expr.span.start;
                    if self.is_call_start() {
                        let args = self.parse_call_args()?;
                        let block = self.parse_block_opt()?;
                        expr = self.call(Some(expr), name.text, args, block, start);
                    } else {
                        expr = Expr::new(
                            ExprKind::Const {
                                scope: Some(Box::new(expr)),
                                name: name.text.clone(),
                            },
                            Span::new(start, name.end()),
                        );
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    // =========================================================================
    // Arguments
    // =========================================================================

    fn parse_paren_args(&mut self) -> ParseResult<Vec<Arg>> {
        let opened_at = self.position();
        self.pos += 1;
        let saved = std::mem::replace(&mut self.no_do, 0);
        self.skip_newlines();
        let mut args = Vec::new();
        while !self.at(SyntaxKind::RParen) && !self.at_eof() {
            self.parse_arg_item(&mut args)?;
            self.skip_newlines();
            if !self.eat(SyntaxKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.no_do = saved;
        self.expect_closing(SyntaxKind::RParen, opened_at)?;
        Ok(args)
    }

    fn parse_command_args(&mut self) -> ParseResult<Vec<Arg>> {
        self.no_do += 1;
        let mut args = Vec::new();
        let result = loop {
            if let Err(err) = self.parse_arg_item(&mut args) {
                break Err(err);
            }
            if !self.eat(SyntaxKind::Comma) {
                break Ok(());
            }
            self.skip_newlines();
        };
        self.no_do -= 1;
        result.map(|()| args)
    }

    /// Parses one argument, appending keyword items to a trailing `Keywords` group.
    fn parse_arg_item(&mut self, args: &mut Vec<Arg>) -> ParseResult<()> {
        let start = self.position();
        let item = match self.current_kind() {
            Some(SyntaxKind::Label) => {
                let key = self.parse_label_key()?;
                self.skip_newlines();
                let value = self.parse_expr(0)?;
                Some(HashItem::Pair { key, value })
            }
            Some(SyntaxKind::DoubleStar) => {
                self.pos += 1;
                Some(HashItem::Splat(self.parse_expr(prec::PREFIX)?))
            }
            Some(SyntaxKind::Star) => {
                self.pos += 1;
                let value = self.parse_expr(prec::PREFIX)?;
                return self.push_positional(args, Arg::Splat(value), start);
            }
            Some(SyntaxKind::Amp) => {
                self.pos += 1;
                args.push(Arg::BlockPass(self.parse_expr(prec::PREFIX)?));
                return Ok(());
            }
            _ => {
                let value = self.parse_stmt_expr()?;
                if self.eat(SyntaxKind::FatArrow) {
                    self.skip_newlines();
                    let rhs = self.parse_expr(0)?;
                    Some(HashItem::Pair {
                        key: value,
                        value: rhs,
                    })
                } else {
                    return self.push_positional(args, Arg::Positional(value), start);
                }
            }
        };

        if let Some(item) = item {
            match args.last_mut() {
                Some(Arg::Keywords(items)) => items.push(item),
                _ => args.push(Arg::Keywords(vec![item])),
            }
        }
        Ok(())
    }

    /// Argument expressions allow `not x` but no statement modifiers.
    fn parse_stmt_expr(&mut self) -> ParseResult<Expr> {
        if self.at(SyntaxKind::NotKw) {
            return self.parse_not();
        }
        self.parse_expr(0)
    }

    fn push_positional(&self, args: &mut Vec<Arg>, arg: Arg, start: usize) -> ParseResult<()> {
        if args
            .iter()
            .any(|a| matches!(a, Arg::Keywords(_) | Arg::BlockPass(_)))
        {
            return Err(ParseError::new(ParseErrorKind::PositionalAfterKeyword, start)
                .with_help("move positional arguments before `key: value` pairs"));
        }
        args.push(arg);
        Ok(())
    }

    fn parse_label_key(&mut self) -> ParseResult<Expr> {
        let Some(token) = self.consume() else {
            return Err(self.unexpected(&["label"]));
        };
        let name = token.text.trim_end_matches(':').to_string();
        Ok(Expr::new(
            ExprKind::Symbol(name),
            Span::new(token.start, token.end()),
        ))
    }

    // =========================================================================
    // Literals
    // =========================================================================

    fn parse_array(&mut self) -> ParseResult<Expr> {
        let opened_at = self.position();
        self.pos += 1;
        let saved = std::mem::replace(&mut self.no_do, 0);
        self.skip_newlines();
        let mut items = Vec::new();
        while !self.at(SyntaxKind::RBracket) && !self.at_eof() {
            if self.eat(SyntaxKind::Star) {
                items.push(Arg::Splat(self.parse_expr(prec::PREFIX)?));
            } else {
                items.push(Arg::Positional(self.parse_stmt_expr()?));
            }
            self.skip_newlines();
            if !self.eat(SyntaxKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.no_do = saved;
        self.expect_closing(SyntaxKind::RBracket, opened_at)?;
        Ok(Expr::new(
            ExprKind::Array(items),
            Span::new(opened_at, self.prev_end()),
        ))
    }

    fn parse_hash(&mut self) -> ParseResult<Expr> {
        let opened_at = self.position();
        self.pos += 1;
        let saved = std::mem::replace(&mut self.no_do, 0);
        self.skip_newlines();
        let mut items = Vec::new();
        while !self.at(SyntaxKind::RBrace) && !self.at_eof() {
            let item = match self.current_kind() {
                Some(SyntaxKind::Label) => {
                    let key = self.parse_label_key()?;
                    self.skip_newlines();
                    HashItem::Pair {
                        key,
                        value: self.parse_expr(0)?,
                    }
                }
                Some(SyntaxKind::DoubleStar) => {
                    self.pos += 1;
                    HashItem::Splat(self.parse_expr(prec::PREFIX)?)
                }
                _ => {
                    let key = self.parse_expr(0)?;
                    self.skip_newlines();
                    if !self.eat(SyntaxKind::FatArrow) {
                        return Err(self.unexpected(&["'=>'"]));
                    }
                    self.skip_newlines();
                    HashItem::Pair {
                        key,
                        value: self.parse_expr(0)?,
                    }
                }
            };
            items.push(item);
            self.skip_newlines();
            if !self.eat(SyntaxKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.no_do = saved;
        self.expect_closing(SyntaxKind::RBrace, opened_at)?;
        Ok(Expr::new(
            ExprKind::Hash(items),
            Span::new(opened_at, self.prev_end()),
        ))
    }

    fn parse_paren(&mut self) -> ParseResult<Expr> {
        let opened_at = self.position();
        self.pos += 1;
        let saved = std::mem::replace(&mut self.no_do, 0);
        self.skip_newlines();
        let inner = if self.at(SyntaxKind::RParen) {
            Expr::new(ExprKind::Nil, Span::new(opened_at, opened_at))
        } else {
            self.parse_stmt()?
        };
        self.skip_newlines();
        self.no_do = saved;
        self.expect_closing(SyntaxKind::RParen, opened_at)?;
        Ok(Expr::new(inner.kind, Span::new(opened_at, self.prev_end())))
    }

    fn parse_dstring(&self, token: &Token) -> ParseResult<ExprKind> {
        let body = &token.text[1..token.text.len() - 1];
        let body_start = token.start + 1;
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = body;

        while let Some(idx) = rest.find(['\\', '#']) {
            literal.push_str(&rest[..idx]);
            let tail = &rest[idx..];
            if tail.starts_with('\\') {
                let mut chars = tail[1..].chars();
                if let Some(c) = chars.next() {
                    push_escape(&mut literal, c);
                    rest = &tail[1 + c.len_utf8()..];
                } else {
                    rest = "";
                }
            } else if let Some(inner) = tail.strip_prefix("#{") {
                let Some(close) = interpolation_end(inner) else {
                    return Err(ParseError::new(
                        ParseErrorKind::UnterminatedStringLiteral,
                        token.start,
                    ));
                };
                if !literal.is_empty() {
                    parts.push(StrPart::Lit(std::mem::take(&mut literal)));
                }
                let offset = body_start + (body.len() - inner.len());
                parts.push(StrPart::Code(self.parse_interpolation(&inner[..close], offset)?));
                rest = &inner[close + 1..];
            } else {
                literal.push('#');
                rest = &tail[1..];
            }
        }
        literal.push_str(rest);

        if parts.is_empty() {
            return Ok(ExprKind::Str(literal));
        }
        if !literal.is_empty() {
            parts.push(StrPart::Lit(literal));
        }
        Ok(ExprKind::Interp(parts))
    }

    fn parse_interpolation(&self, source: &str, base: usize) -> ParseResult<Expr> {
        let mut sub = Parser::new(source, base);
        sub.scopes = vec![self.scopes.concat()];
        let mut body = sub.parse_stmts(&[])?;
        if !sub.at_eof() {
            return Err(sub.unexpected(&["'}'"]));
        }
        match body.len() {
            0 => Ok(Expr::new(ExprKind::Nil, Span::new(base, base))),
            1 => Ok(body.remove(0)),
            _ => Err(ParseError::unexpected_token_text(
                body[1].span.start,
                &["'}'"],
                "second statement",
            )),
        }
    }

    // =========================================================================
    // Blocks, lambdas and parameters
    // =========================================================================

    fn parse_block_opt(&mut self) -> ParseResult<Option<BlockExpr>> {
        let start = self.position();
        let close = match self.current_kind() {
            Some(SyntaxKind::LBrace) => SyntaxKind::RBrace,
            Some(SyntaxKind::DoKw) if self.no_do == 0 => SyntaxKind::EndKw,
            _ => return Ok(None),
        };
        self.pos += 1;
        self.scopes.push(Vec::new());
        let result = self.parse_block_rest(close, start);
        self.scopes.pop();
        result.map(Some)
    }

    fn parse_block_rest(&mut self, close: SyntaxKind, start: usize) -> ParseResult<BlockExpr> {
        let params = if self.eat(SyntaxKind::Pipe) {
            self.parse_param_list(SyntaxKind::Pipe)?
        } else {
            self.eat(SyntaxKind::OrOr);
            Params::default()
        };
        let saved = std::mem::replace(&mut self.no_do, 0);
        let body = self.parse_stmts(&[close]);
        self.no_do = saved;
        let body = body?;
        self.expect_closing(close, start)?;
        Ok(BlockExpr {
            params,
            body,
            span: Span::new(start, self.prev_end()),
        })
    }

    fn parse_lambda(&mut self, start: usize) -> ParseResult<BlockExpr> {
        self.pos += 1;
        self.scopes.push(Vec::new());
        let result = self.parse_lambda_rest(start);
        self.scopes.pop();
        result
    }

    fn parse_lambda_rest(&mut self, start: usize) -> ParseResult<BlockExpr> {
        let params = if self.eat(SyntaxKind::LParen) {
            self.parse_param_list(SyntaxKind::RParen)?
        } else {
            Params::default()
        };
        let body_start = self.position();
        let close = match self.current_kind() {
            Some(SyntaxKind::LBrace) => SyntaxKind::RBrace,
            Some(SyntaxKind::DoKw) => SyntaxKind::EndKw,
            _ => return Err(self.unexpected(&["'{'", "'do'"]).with_context("lambda")),
        };
        self.pos += 1;
        let saved = std::mem::replace(&mut self.no_do, 0);
        let body = self.parse_stmts(&[close]);
        self.no_do = saved;
        let body = body?;
        self.expect_closing(close, body_start)?;
        Ok(BlockExpr {
            params,
            body,
            span: Span::new(start, self.prev_end()),
        })
    }

    /// Parses parameters up to and including `close`, declaring each name.
    fn parse_param_list(&mut self, close: SyntaxKind) -> ParseResult<Params> {
        let mut items = Vec::new();
        self.skip_newlines();
        while !self.eat(close) {
            let Some(token) = self.consume() else {
                return Err(ParseError::unexpected_eof(self.end, "parameter list"));
            };
            let param = match token.kind {
                SyntaxKind::Ident => {
                    let kind = if self.eat(SyntaxKind::Eq) {
                        ParamKind::Optional(self.parse_expr(prec::CONDITIONAL.left)?)
                    } else {
                        ParamKind::Required
                    };
                    Param {
                        name: token.text,
                        kind,
                    }
                }
                SyntaxKind::Label => {
                    let name = token.text.trim_end_matches(':').to_string();
                    let kind = if self.at(SyntaxKind::Comma) || self.at(close) {
                        ParamKind::Key
                    } else {
                        ParamKind::KeyOptional(self.parse_expr(prec::CONDITIONAL.left)?)
                    };
                    Param { name, kind }
                }
                SyntaxKind::Star | SyntaxKind::DoubleStar | SyntaxKind::Amp => {
                    let Some(name) = self.consume().filter(|t| t.kind == SyntaxKind::Ident)
                    else {
                        return Err(ParseError::new(
                            ParseErrorKind::InvalidParameter,
                            token.start,
                        )
                        .with_expected(&["parameter name"]));
                    };
                    let kind = match token.kind {
                        SyntaxKind::Star => ParamKind::Rest,
                        SyntaxKind::DoubleStar => ParamKind::KeyRest,
                        _ => ParamKind::Block,
                    };
                    Param {
                        name: name.text,
                        kind,
                    }
                }
                _ => {
                    return Err(ParseError::new(ParseErrorKind::InvalidParameter, token.start)
                        .with_found(&format!("'{}'", token.text)));
                }
            };
            self.declare(&param.name);
            items.push(param);
            self.skip_newlines();
            if !self.eat(SyntaxKind::Comma) {
                self.skip_newlines();
                if !self.eat(close) {
                    return Err(self.unexpected(&["','", "end of parameters"]));
                }
                break;
            }
            self.skip_newlines();
        }
        Ok(Params {
            items,
            buffer: false,
        })
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    fn parse_if(&mut self) -> ParseResult<Expr> {
        let Some(keyword) = self.consume() else {
            return Err(self.unexpected(&["'if'"]));
        };
        let mut cond = self.parse_cond()?;
        if keyword.kind == SyntaxKind::UnlessKw {
            cond = negate(cond);
        }
        let then_body = self.parse_stmts(&[
            SyntaxKind::ElsifKw,
            SyntaxKind::ElseKw,
            SyntaxKind::EndKw,
        ])?;

        let else_body = match self.current_kind() {
            Some(SyntaxKind::ElsifKw) if keyword.kind == SyntaxKind::IfKw => {
                vec![self.parse_if()?]
            }
            Some(SyntaxKind::ElseKw) => {
                self.pos += 1;
                let body = self.parse_stmts(&[SyntaxKind::EndKw])?;
                self.expect_closing(SyntaxKind::EndKw, keyword.start)?;
                body
            }
            _ => {
                self.expect_closing(SyntaxKind::EndKw, keyword.start)?;
                Vec::new()
            }
        };

        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then_body,
                else_body,
            },
            Span::new(keyword.start, self.prev_end()),
        ))
    }

    /// Condition of `if`/`while`, followed by `then`, `do` or a line break.
    fn parse_cond(&mut self) -> ParseResult<Expr> {
        self.no_do += 1;
        let cond = self.parse_logic();
        self.no_do -= 1;
        let cond = cond?;
        if !self.eat(SyntaxKind::ThenKw) {
            self.eat(SyntaxKind::DoKw);
        }
        Ok(cond)
    }

    fn parse_while(&mut self) -> ParseResult<Expr> {
        let Some(keyword) = self.consume() else {
            return Err(self.unexpected(&["'while'"]));
        };
        let cond = self.parse_cond()?;
        let body = self.parse_stmts(&[SyntaxKind::EndKw])?;
        self.expect_closing(SyntaxKind::EndKw, keyword.start)?;
        Ok(Expr::new(
            ExprKind::While {
                cond: Box::new(cond),
                body,
                until: keyword.kind == SyntaxKind::UntilKw,
            },
            Span::new(keyword.start, self.prev_end()),
        ))
    }
}

fn negate(expr: Expr) -> Expr {
    let span = expr.span;
    Expr::new(ExprKind::Not(Box::new(expr)), span)
}

fn push_escape(out: &mut String, c: char) {
    match c {
        'n' => out.push('\n'),
        't' => out.push('\t'),
        'r' => out.push('\r'),
        '0' => out.push('\0'),
        's' => out.push(' '),
        'e' => out.push('\u{1b}'),
        other => out.push(other),
    }
}

fn unescape_double(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                push_escape(&mut out, next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_single(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\'
            && let Some(&next @ ('\'' | '\\')) = chars.peek()
        {
            out.push(next);
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::BinOp;

    fn parse_body(src: &str) -> Vec<Expr> {
        parse(src, []).unwrap_or_else(|e| panic!("{src:?}: {e}")).body
    }

    fn call(expr: &Expr) -> &Call {
        match &expr.kind {
            ExprKind::Call(call) => call,
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn test_tag_call_with_block() {
        let body = parse_body(r#"div { h1 "Hi" }"#);
        let div = call(&body[0]);
        assert_eq!(div.name, "div");
        let block = div.block.as_ref().expect("block");
        let h1 = call(&block.body[0]);
        assert_eq!(h1.name, "h1");
        assert!(matches!(&h1.args[0], Arg::Positional(Expr { kind: ExprKind::Str(s), .. }) if s == "Hi"));
    }

    #[test]
    fn test_header_params_are_locals() {
        let ast = parse("|title, items:, active: nil, &block|\nh1 title", []).unwrap();
        assert_eq!(ast.params.items.len(), 4);
        assert_eq!(ast.params.block_param(), Some("block"));
        let h1 = call(&ast.body[0]);
        assert!(matches!(&h1.args[0], Arg::Positional(Expr { kind: ExprKind::Local(n), .. }) if n == "title"));
    }

    #[test]
    fn test_single_lambda_source() {
        let ast = parse("->(a:) { text a }", []).unwrap();
        assert_eq!(ast.params.items[0].kind, ParamKind::Key);
        assert_eq!(ast.body.len(), 1);
    }

    #[test]
    fn test_keyword_arguments_group() {
        let body = parse_body(r#"a "x", href: "/", "data-x" => 1"#);
        let a = call(&body[0]);
        assert_eq!(a.args.len(), 2);
        let Arg::Keywords(items) = &a.args[1] else {
            panic!("expected keywords");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_command_call_vs_binary_minus() {
        let body = parse_body("x = 1\ny = x -1\nspan -1");
        assert!(matches!(&body[1].kind, ExprKind::Assign { value, .. } if matches!(value.kind, ExprKind::Binary { op: BinOp::Sub, .. })));
        let span = call(&body[2]);
        assert!(matches!(&span.args[0], Arg::Positional(Expr { kind: ExprKind::Int(-1), .. })));
    }

    #[test]
    fn test_assignment_declares_local() {
        let body = parse_body("name = 1\np name");
        let p = call(&body[1]);
        assert!(matches!(&p.args[0], Arg::Positional(Expr { kind: ExprKind::Local(_), .. })));
    }

    #[test]
    fn test_block_params_scope() {
        let body = parse_body("items = []\nitems.each { |i| li i }\np i");
        let each = call(&body[1]);
        let li = call(&each.block.as_ref().unwrap().body[0]);
        assert!(matches!(&li.args[0], Arg::Positional(Expr { kind: ExprKind::Local(_), .. })));
        // `i` is out of scope again
        let p = call(&body[2]);
        assert!(matches!(&p.args[0], Arg::Positional(Expr { kind: ExprKind::Call(_), .. })));
    }

    #[test]
    fn test_do_block_binds_to_command_call() {
        let body = parse_body("ul class: \"x\" do\n  li 1\nend");
        let ul = call(&body[0]);
        assert_eq!(ul.args.len(), 1);
        assert!(ul.block.is_some());
    }

    #[test]
    fn test_range_in_conditional_branch() {
        let body = parse_body("r = false ? 1 : 2..3");
        let ExprKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::If { else_body, .. } = &value.kind else {
            panic!("expected conditional, got {:?}", value.kind);
        };
        assert!(matches!(else_body[0].kind, ExprKind::Range { exclusive: false, .. }));
    }

    #[test]
    fn test_if_elsif_else() {
        let body = parse_body("if a\n  p 1\nelsif b\n  p 2\nelse\n  p 3\nend");
        let ExprKind::If { else_body, .. } = &body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(else_body[0].kind, ExprKind::If { .. }));
    }

    #[test]
    fn test_modifiers() {
        let body = parse_body("p 1 if x\np 2 unless y");
        assert!(matches!(body[0].kind, ExprKind::If { .. }));
        let ExprKind::If { cond, .. } = &body[1].kind else {
            panic!("expected if");
        };
        assert!(matches!(cond.kind, ExprKind::Not(_)));
    }

    #[test]
    fn test_string_interpolation() {
        let body = parse_body(r#"p "Hello #{name}!""#);
        let p = call(&body[0]);
        let Arg::Positional(arg) = &p.args[0] else {
            panic!()
        };
        let ExprKind::Interp(parts) = &arg.kind else {
            panic!("expected interpolation, got {:?}", arg.kind);
        };
        assert_eq!(parts.len(), 3);
        let StrPart::Code(code) = &parts[1] else {
            panic!()
        };
        assert_eq!(&r#"p "Hello #{name}!""#[code.span.start..code.span.end], "name");
    }

    #[test]
    fn test_ternary_and_precedence() {
        let body = parse_body("x = a + b * c > 1 ? 1 : 2");
        let ExprKind::Assign { value, .. } = &body[0].kind else {
            panic!()
        };
        assert!(matches!(value.kind, ExprKind::If { .. }));
    }

    #[test]
    fn test_index_and_method_chain() {
        let body = parse_body("h = {a: [1, 2]}\np h[:a].first.to_s");
        let p = call(&body[1]);
        let Arg::Positional(arg) = &p.args[0] else {
            panic!()
        };
        assert_eq!(call(arg).name, "to_s");
    }

    #[test]
    fn test_const_paths() {
        let body = parse_body("Card(title: 1)\nLayouts::Page() { p 1 }\nx = Foo::Bar");
        assert_eq!(call(&body[0]).name, "Card");
        let page = call(&body[1]);
        assert_eq!(page.name, "Page");
        assert!(page.receiver.as_ref().and_then(|r| r.const_path()).is_some());
        assert!(matches!(&body[2].kind, ExprKind::Assign { value, .. } if value.const_path().is_some()));
    }

    #[test]
    fn test_lambda_argument_to_render() {
        let body = parse_body("render ->(x) { p x }, 5");
        let render = call(&body[0]);
        assert!(matches!(&render.args[0], Arg::Positional(Expr { kind: ExprKind::Lambda(_), .. })));
        assert_eq!(render.args.len(), 2);
    }

    #[test]
    fn test_missing_end_error() {
        let err = parse("div do\n  p 1\n", []).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingEnd);
    }

    #[test]
    fn test_missing_brace_error() {
        let err = parse("div {\n  p 1\n", []).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingClosingBrace);
    }

    #[test]
    fn test_unterminated_string_error() {
        let err = parse("p \"abc", []).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedStringLiteral);
    }

    #[test]
    fn test_bound_locals() {
        let ast = parse("p helper(1)", ["helper"]).unwrap();
        let p = call(&ast.body[0]);
        let Arg::Positional(arg) = &p.args[0] else {
            panic!()
        };
        let helper = call(arg);
        assert_eq!(helper.name, "call");
        assert!(helper.receiver.as_ref().and_then(Expr::as_local).is_some());
    }
}
