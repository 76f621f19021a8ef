//! Code generation from the translated tree.
//!
//! The generator walks the tree once and produces two artefacts in lock-step: a
//! human-readable listing (one statement per line) and the [`code`](super::code)
//! instruction tree that the runtime executes. Every instruction records the listing
//! line it was printed on, and every printed statement records the template line it
//! came from in the unit's [`SourceMap`].
//!
//! ## Fragment coalescing
//!
//! Markup nodes do not emit statements directly. They append fragments (literal text
//! or escaped interpolations) to a pending list, and consecutive fragments are merged
//! into a single `__buffer__ << "..."` push. The pending list is flushed whenever
//! anything else has to be emitted, and at the end of every body:
//!
//! ```text
//! div { h1 "Hi" }   =>   __buffer__ << "<div><h1>Hi</h1></div>"
//! ```
//!
//! With [`CodegenConfig::coalesce`] off, every fragment gets its own push.

mod error;

pub use error::{CompileError, CompileErrorKind, CompileResult};

use std::rc::Rc;

use super::ast::{
    Arg, BinOp, BlockExpr, Call, Expr, ExprKind, HashItem, ParamKind, Params, Span, StrPart,
    TemplateAst,
};
use super::code::{
    ArgCode, Block, Body, Code, Fragment, HashCode, ParamCode, ParamCodeKind, Stmt, Target,
};
use super::nodes::{
    BuiltinKind, BuiltinNode, MarkupNode, TagNode, YieldNode, contains_defer, contains_yield,
};
use super::source_map::SourceMap;
use super::translate::split_attributes;
use crate::markup::{Escape, HTML_DOCTYPE, Mode, format_attributes};
use crate::value::{Key, Value};

/// Configuration for code generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenConfig {
    /// Name of the synthetic leading output-buffer parameter.
    pub buffer_var: String,
    /// Name of the synthetic trailing child-block parameter.
    pub block_var: String,
    /// Merge consecutive static fragments into one push.
    pub coalesce: bool,
    /// Wrap the unit body in a handler that translates backtraces.
    pub wrap: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            buffer_var: "__buffer__".to_string(),
            block_var: "__block__".to_string(),
            coalesce: true,
            wrap: true,
        }
    }
}

/// Output of [`generate`].
#[derive(Debug)]
pub struct Generated {
    pub listing: String,
    /// Entry point of the unit, buffer parameter included.
    pub entry: Rc<Block>,
    pub source_map: SourceMap,
    /// Number of lines in the listing.
    pub lines: usize,
}

/// Generates the listing and instructions for a translated template.
///
/// `line_offset` is added to template line numbers (templates defined mid-file).
pub fn generate(
    ast: &TemplateAst,
    source: &str,
    file: &str,
    line_offset: usize,
    mode: Mode,
    config: &CodegenConfig,
) -> CompileResult<Generated> {
    let mut generator = Generator {
        source,
        line_offset,
        mode,
        config,
        out: String::new(),
        line: 1,
        indent: 0,
        inline: 0,
        at_line_start: true,
        frames: Vec::new(),
        map: SourceMap::new(file),
        yield_var: ast
            .params
            .block_param()
            .map_or_else(|| config.block_var.clone(), str::to_string),
    };
    let entry = generator.unit(ast)?;
    Ok(Generated {
        lines: generator.line,
        listing: generator.out,
        entry: Rc::new(entry),
        source_map: generator.map,
    })
}

/// A fragment waiting to be pushed, with its listing text and originating offset.
struct Pending {
    start: usize,
    text: String,
    fragment: Fragment,
}

/// Statements and pending fragments of the body being generated.
#[derive(Default)]
struct BodyFrame {
    stmts: Body,
    pending: Vec<Pending>,
}

struct Generator<'a> {
    source: &'a str,
    line_offset: usize,
    mode: Mode,
    config: &'a CodegenConfig,
    out: String,
    /// Current listing line, 1-based.
    line: usize,
    indent: usize,
    /// Nonzero while capturing an expression that is printed inside a push.
    inline: usize,
    at_line_start: bool,
    frames: Vec<BodyFrame>,
    map: SourceMap,
    yield_var: String,
}

impl<'a> Generator<'a> {
    // =========================================================================
    // Listing output
    // =========================================================================

    fn write(&mut self, text: &str) {
        if self.at_line_start && self.inline == 0 {
            for _ in 0..self.indent {
                self.out.push_str("  ");
            }
        }
        self.at_line_start = false;
        self.out.push_str(text);
    }

    fn newline(&mut self) {
        if self.inline > 0 {
            self.out.push_str("; ");
        } else {
            self.out.push('\n');
            self.line += 1;
            self.at_line_start = true;
        }
    }

    /// Generates into a detached listing, returning the text and the result.
    fn capture<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<(String, T)> {
        let saved = std::mem::take(&mut self.out);
        let saved_start = std::mem::replace(&mut self.at_line_start, false);
        self.inline += 1;
        let result = f(self);
        self.inline -= 1;
        self.at_line_start = saved_start;
        let text = std::mem::replace(&mut self.out, saved);
        result.map(|value| (text, value))
    }

    fn source_line(&self, offset: usize) -> usize {
        let offset = offset.min(self.source.len());
        self.source.as_bytes()[..offset]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1
            + self.line_offset
    }

    fn record(&mut self, offset: usize) {
        let line = self.source_line(offset);
        self.map.record(self.line, line);
    }

    fn frame(&mut self) -> &mut BodyFrame {
        if self.frames.is_empty() {
            self.frames.push(BodyFrame::default());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    // =========================================================================
    // Statements and fragments
    // =========================================================================

    /// Emits one statement on its own line. Pending fragments are flushed first.
    fn stmt(
        &mut self,
        offset: usize,
        f: impl FnOnce(&mut Self) -> CompileResult<Code>,
    ) -> CompileResult<()> {
        self.flush();
        self.record(offset);
        let line = self.line;
        let code = f(self)?;
        self.newline();
        self.frame().stmts.push(Stmt { line, code });
        Ok(())
    }

    fn push_literal(&mut self, start: usize, text: &str) {
        if text.is_empty() {
            return;
        }
        self.frame().pending.push(Pending {
            start,
            text: quote_literal(text),
            fragment: Fragment::Literal(text.to_string()),
        });
    }

    /// Appends text content. Static values are escaped now; dynamic ones are
    /// interpolated and escaped at runtime.
    fn push_content(&mut self, expr: &Expr, escape: Escape) -> CompileResult<()> {
        let start = expr.span.start;
        if let Some(value) = literal_value(expr) {
            self.push_literal(start, &escape.apply(&value.to_s()));
            return Ok(());
        }
        if let ExprKind::Interp(parts) = &expr.kind {
            for part in parts {
                match part {
                    StrPart::Lit(text) => self.push_literal(start, &escape.apply(text)),
                    StrPart::Code(code) => self.push_content(code, escape)?,
                }
            }
            return Ok(());
        }
        let (text, code) = self.capture(|g| g.expr(expr))?;
        let text = match escape.helper() {
            Some(helper) => format!("#{{{helper}({text})}}"),
            None => format!("#{{{text}}}"),
        };
        self.frame().pending.push(Pending {
            start,
            text,
            fragment: Fragment::Escaped(code, escape),
        });
        Ok(())
    }

    /// Appends a serialized attribute list.
    fn push_attributes(&mut self, start: usize, items: &[HashItem]) -> CompileResult<()> {
        let escape = self.mode.escape();
        if let Some(value) = static_hash(items) {
            let text = format_attributes(&value, escape).unwrap_or_default();
            self.push_literal(start, &text);
            return Ok(());
        }
        let (text, code) = self.capture(|g| g.hash(items))?;
        self.frame().pending.push(Pending {
            start,
            text: format!("#{{format_attributes({text})}}"),
            fragment: Fragment::Attributes(code, escape),
        });
        Ok(())
    }

    /// Writes pending fragments as push statements.
    fn flush(&mut self) {
        let pending = std::mem::take(&mut self.frame().pending);
        if pending.is_empty() {
            return;
        }
        if self.config.coalesce {
            let start = pending[0].start;
            let (text, fragments) = merge_pending(pending);
            self.push_stmt(start, &text, fragments);
        } else {
            for piece in pending {
                self.push_stmt(piece.start, &piece.text, vec![piece.fragment]);
            }
        }
    }

    fn push_stmt(&mut self, start: usize, text: &str, fragments: Vec<Fragment>) {
        self.record(start);
        let line = self.line;
        let buffer = self.config.buffer_var.clone();
        self.write(&format!("{buffer} << \"{text}\""));
        self.newline();
        self.frame().stmts.push(Stmt {
            line,
            code: Code::Push(fragments),
        });
    }

    // =========================================================================
    // Units, bodies and blocks
    // =========================================================================

    fn unit(&mut self, ast: &TemplateAst) -> CompileResult<Block> {
        let uses_yield = contains_yield(&ast.body) && ast.params.block_param().is_none();
        let defers = contains_defer(&ast.body);

        self.record(0);
        self.write("->(");
        let mut params = self.params(&ast.params, true)?;
        if uses_yield {
            let var = self.yield_var.clone();
            self.write(&format!(", &{var}"));
            params.push(ParamCode {
                name: var,
                kind: ParamCodeKind::Block,
            });
        }
        self.write(") do");
        self.newline();

        self.indent += 1;
        self.frames.push(BodyFrame::default());
        if defers {
            let buffer = self.config.buffer_var.clone();
            self.stmt(0, |g| {
                g.write(&format!("{buffer}.begin_defer"));
                Ok(Code::BeginDefer)
            })?;
        }
        for expr in &ast.body {
            self.statement(expr)?;
        }
        if defers {
            let buffer = self.config.buffer_var.clone();
            let end = self.source.len();
            self.stmt(end, |g| {
                g.write(&format!("{buffer}.flush_deferred"));
                Ok(Code::FlushDeferred)
            })?;
        }
        self.flush();
        let body = self.frames.pop().map(|f| f.stmts).unwrap_or_default();
        self.indent -= 1;

        if self.config.wrap {
            self.write("rescue => __error__");
            self.newline();
            self.indent += 1;
            self.write("raise __source_map__.translate(__error__)");
            self.newline();
            self.indent -= 1;
        }
        self.write("end");
        self.newline();

        Ok(Block {
            params,
            body,
            lambda: true,
            takes_buffer: true,
        })
    }

    /// Generates a nested body on its own lines.
    fn body(&mut self, body: &[Expr]) -> CompileResult<Body> {
        self.indent += 1;
        self.frames.push(BodyFrame::default());
        let result = body.iter().try_for_each(|expr| self.statement(expr));
        self.flush();
        let frame = self.frames.pop().unwrap_or_default();
        self.indent -= 1;
        result.map(|()| frame.stmts)
    }

    /// Writes `<opener> |params|` or `->(params)`, the body and `end`.
    fn block(
        &mut self,
        block: &BlockExpr,
        lambda: bool,
        takes_buffer: bool,
    ) -> CompileResult<Rc<Block>> {
        let takes_buffer = takes_buffer || block.params.buffer;
        let mut params = Vec::new();
        if lambda {
            self.write("->(");
            params = self.params(&block.params, takes_buffer)?;
            self.write(") do");
        } else {
            self.write(" do");
            if takes_buffer || !block.params.items.is_empty() {
                self.write(" |");
                params = self.params(&block.params, takes_buffer)?;
                self.write("|");
            }
        }
        self.newline();
        let body = self.body(&block.body)?;
        self.write("end");
        Ok(Rc::new(Block {
            params,
            body,
            lambda,
            takes_buffer,
        }))
    }

    fn params(&mut self, params: &Params, with_buffer: bool) -> CompileResult<Vec<ParamCode>> {
        let mut first = true;
        if with_buffer {
            let buffer = self.config.buffer_var.clone();
            self.write(&buffer);
            first = false;
        }
        let mut out = Vec::with_capacity(params.items.len());
        for param in &params.items {
            if !first {
                self.write(", ");
            }
            first = false;
            let name = param.name.clone();
            let kind = match &param.kind {
                ParamKind::Required => {
                    self.write(&name);
                    ParamCodeKind::Required
                }
                ParamKind::Optional(default) => {
                    self.write(&format!("{name} = "));
                    ParamCodeKind::Optional(self.expr(default)?)
                }
                ParamKind::Rest => {
                    self.write(&format!("*{name}"));
                    ParamCodeKind::Rest
                }
                ParamKind::Key => {
                    self.write(&format!("{name}:"));
                    ParamCodeKind::Key
                }
                ParamKind::KeyOptional(default) => {
                    self.write(&format!("{name}: "));
                    ParamCodeKind::KeyOptional(self.expr(default)?)
                }
                ParamKind::KeyRest => {
                    self.write(&format!("**{name}"));
                    ParamCodeKind::KeyRest
                }
                ParamKind::Block => {
                    self.write(&format!("&{name}"));
                    ParamCodeKind::Block
                }
            };
            out.push(ParamCode { name, kind });
        }
        Ok(out)
    }

    /// Generates one statement of a body.
    fn statement(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Markup(node) => self.markup(node),
            _ => self.stmt(expr.span.start, |g| g.expr(expr)),
        }
    }

    // =========================================================================
    // Markup
    // =========================================================================

    fn markup(&mut self, node: &MarkupNode) -> CompileResult<()> {
        let span = node.origin().span;
        if self.mode == Mode::Json {
            return self.json_markup(node);
        }
        match node {
            MarkupNode::Tag(tag) => self.tag(tag),
            MarkupNode::Text(text) => match &text.expr {
                Some(expr) => self.push_content(expr, self.mode.escape()),
                None => Ok(()),
            },
            MarkupNode::Raw(text) => match &text.expr {
                Some(expr) => self.push_content(expr, Escape::None),
                None => Ok(()),
            },
            MarkupNode::Builtin(builtin) => self.builtin(builtin),
            MarkupNode::Defer(defer) => {
                let buffer = self.config.buffer_var.clone();
                self.stmt(span.start, |g| {
                    g.write(&format!("{buffer}.defer(&"));
                    let block = match &defer.block {
                        Some(block) => g.block(block, true, true)?,
                        None => {
                            g.write(&format!("->({buffer}) {{}}"));
                            Rc::new(Block {
                                params: Vec::new(),
                                body: Vec::new(),
                                lambda: true,
                                takes_buffer: true,
                            })
                        }
                    };
                    g.write(")");
                    Ok(Code::Defer(block))
                })
            }
            _ => self.invocation(node),
        }
    }

    /// Nodes that call into another unit, block or extension. Shared by all modes.
    fn invocation(&mut self, node: &MarkupNode) -> CompileResult<()> {
        let span = node.origin().span;
        let buffer = self.config.buffer_var.clone();
        match node {
            MarkupNode::ConstTag(invoke) => self.stmt(span.start, |g| {
                g.write(&format!("{}.({buffer}", invoke.path.join("::")));
                let args = g.call_args(&invoke.args, true)?;
                g.write(")");
                let block = g.child_block(invoke.block.as_ref())?;
                Ok(Code::Invoke {
                    target: Target::Const(invoke.path.clone()),
                    args,
                    block,
                })
            }),
            MarkupNode::Render(render) => self.stmt(span.start, |g| {
                g.write("(");
                let target = g.expr(&render.target)?;
                g.write(&format!(").({buffer}"));
                let args = g.call_args(&render.args, true)?;
                g.write(")");
                let block = g.child_block(render.block.as_ref())?;
                Ok(Code::Invoke {
                    target: Target::Value(target.boxed()),
                    args,
                    block,
                })
            }),
            MarkupNode::Extension(ext) => self.stmt(span.start, |g| {
                match &ext.helper {
                    Some(helper) => g.write(&format!(
                        "__extensions__[:{}][:{helper}].({buffer}",
                        ext.key
                    )),
                    None => g.write(&format!("__extensions__[:{}].({buffer}", ext.key)),
                }
                let args = g.call_args(&ext.args, true)?;
                g.write(")");
                let block = g.child_block(ext.block.as_ref())?;
                Ok(Code::Invoke {
                    target: Target::Extension {
                        key: ext.key.clone(),
                        helper: ext.helper.clone(),
                    },
                    args,
                    block,
                })
            }),
            MarkupNode::RenderYield(node) => self.yield_block(node, true),
            MarkupNode::RenderChildren(node) => self.yield_block(node, false),
            MarkupNode::BlockInvocation(invocation) => self.stmt(span.start, |g| {
                g.write(&format!("{}.({buffer}", invocation.receiver));
                let args = g.call_args(&invocation.args, true)?;
                g.write(")");
                Ok(Code::Invoke {
                    target: Target::BlockParam(invocation.receiver.clone()),
                    args,
                    block: None,
                })
            }),
            other => Err(CompileError::unsupported(
                other.describe(),
                mode_name(self.mode),
                span,
            )),
        }
    }

    fn yield_block(&mut self, node: &YieldNode, required: bool) -> CompileResult<()> {
        let var = self.yield_var.clone();
        let buffer = self.config.buffer_var.clone();
        self.stmt(node.origin.span.start, |g| {
            if required {
                g.write(&format!(
                    "({var} or raise(\"no block given (render_yield)\")).({buffer}"
                ));
            } else {
                g.write(&format!("{var}&.({buffer}"));
            }
            let args = g.call_args(&node.args, true)?;
            g.write(")");
            Ok(Code::Yield {
                var: var.clone(),
                args,
                required,
            })
        })
    }

    /// A block attached to a unit invocation, forwarded as the callee's child block.
    fn child_block(&mut self, block: Option<&BlockExpr>) -> CompileResult<Option<Rc<Block>>> {
        block
            .map(|block| {
                self.write(" &");
                self.block(block, true, true)
            })
            .transpose()
    }

    fn tag(&mut self, tag: &TagNode) -> CompileResult<()> {
        let span = tag.origin.span;
        let has_block = tag.block.as_ref().is_some_and(|b| !b.body.is_empty());
        if tag.is_void && (tag.inner_text.is_some() || has_block) {
            return Err(CompileError::void_content(&tag.tag, span));
        }
        if let Some(extra) = tag.extra.first() {
            return Err(CompileError::new(CompileErrorKind::UnexpectedArgument)
                .with_context(&format!("<{}>", tag.tag))
                .with_found(arg_kind(extra))
                .with_span(span)
                .with_help("tags take inner text, attributes and a block"));
        }

        self.push_literal(span.start, &format!("<{}", tag.tag));
        if let Some(items) = &tag.attributes {
            self.push_attributes(span.start, items)?;
        }
        if tag.is_void {
            self.push_literal(span.start, ">");
            return Ok(());
        }
        if self.mode == Mode::Xml && tag.inner_text.is_none() && !has_block {
            self.push_literal(span.start, "/>");
            return Ok(());
        }
        self.push_literal(span.start, ">");
        if let Some(inner) = &tag.inner_text {
            let escape = if self.mode.is_raw_text(&tag.tag) {
                Escape::None
            } else {
                self.mode.escape()
            };
            self.push_content(inner, escape)?;
        }
        if let Some(block) = &tag.block {
            for expr in &block.body {
                self.statement(expr)?;
            }
        }
        self.push_literal(span.end, &format!("</{}>", tag.tag));
        Ok(())
    }

    fn builtin(&mut self, node: &BuiltinNode) -> CompileResult<()> {
        let span = node.origin.span;
        match node.kind {
            BuiltinKind::Html | BuiltinKind::Html5 => {
                let (attributes, _) = split_attributes(node.args.clone());
                self.push_literal(span.start, HTML_DOCTYPE);
                self.push_literal(span.start, "<html");
                if let Some(items) = &attributes {
                    self.push_attributes(span.start, items)?;
                }
                self.push_literal(span.start, ">");
                if let Some(block) = &node.block {
                    for expr in &block.body {
                        self.statement(expr)?;
                    }
                }
                self.push_literal(span.end, "</html>");
                Ok(())
            }
            BuiltinKind::Markdown => {
                let (options, rest) = split_attributes(node.args.clone());
                let Some(Arg::Positional(text)) = rest.first() else {
                    return Err(CompileError::new(CompileErrorKind::MissingArgument)
                        .with_context("markdown")
                        .with_expected(&["markdown text"])
                        .with_span(span));
                };
                let (listing, (text, options)) = self.capture(|g| {
                    let text = g.expr(text)?;
                    let options = match &options {
                        Some(items) => {
                            g.write(", ");
                            Some(g.hash(items)?)
                        }
                        None => None,
                    };
                    Ok((text, options))
                })?;
                self.frame().pending.push(Pending {
                    start: span.start,
                    text: format!("#{{markdown({listing})}}"),
                    fragment: Fragment::Markdown { text, options },
                });
                Ok(())
            }
            BuiltinKind::Tag => self.dynamic_tag(node),
        }
    }

    /// `tag(name, inner, **attributes) { ... }`
    fn dynamic_tag(&mut self, node: &BuiltinNode) -> CompileResult<()> {
        let span = node.origin.span;
        let (attributes, rest) = split_attributes(node.args.clone());
        let mut positional = rest.into_iter();
        let Some(Arg::Positional(name)) = positional.next() else {
            return Err(CompileError::new(CompileErrorKind::MissingArgument)
                .with_context("tag")
                .with_expected(&["tag name"])
                .with_span(span));
        };
        let inner_text = match positional.next() {
            Some(Arg::Positional(inner)) => Some(inner),
            Some(other) => {
                return Err(CompileError::new(CompileErrorKind::UnexpectedArgument)
                    .with_context("tag")
                    .with_found(arg_kind(&other))
                    .with_span(span));
            }
            None => None,
        };
        let extra: Vec<Arg> = positional.collect();

        // A literal name compiles like any other tag.
        if let ExprKind::Symbol(tag) | ExprKind::Str(tag) = &name.kind {
            let tag = crate::markup::tag_name(tag);
            return self.tag(&TagNode {
                origin: node.origin.clone(),
                is_void: self.mode.is_void(&tag),
                tag,
                attributes,
                inner_text,
                extra,
                block: node.block.clone(),
            });
        }
        if let Some(arg) = extra.first() {
            return Err(CompileError::new(CompileErrorKind::UnexpectedArgument)
                .with_context("tag")
                .with_found(arg_kind(arg))
                .with_span(span));
        }

        let escape = self.mode.escape();
        let mode = self.mode;
        let buffer = self.config.buffer_var.clone();
        self.stmt(span.start, |g| {
            g.write(&format!("{buffer}.tag("));
            let name = g.expr(&name)?;
            let attributes = match &attributes {
                Some(items) => {
                    g.write(", ");
                    Some(g.hash(items)?.boxed())
                }
                None => None,
            };
            let inner = match &inner_text {
                Some(inner) => {
                    g.write(", ");
                    Some(g.expr(inner)?.boxed())
                }
                None => None,
            };
            g.write(")");
            let block = match &node.block {
                Some(block) => {
                    g.write(" do");
                    g.newline();
                    let body = g.body(&block.body)?;
                    g.write("end");
                    Some(body)
                }
                None => None,
            };
            Ok(Code::DynamicTag {
                name: name.boxed(),
                attributes,
                inner,
                block,
                escape,
                void_check: mode == Mode::Html,
                self_close: mode == Mode::Xml,
            })
        })
    }

    /// JSON mode: tags build the document, invocations write into it.
    fn json_markup(&mut self, node: &MarkupNode) -> CompileResult<()> {
        let span = node.origin().span;
        let MarkupNode::Tag(tag) = node else {
            return match node {
                MarkupNode::ConstTag(_)
                | MarkupNode::Render(_)
                | MarkupNode::Extension(_)
                | MarkupNode::RenderYield(_)
                | MarkupNode::RenderChildren(_)
                | MarkupNode::BlockInvocation(_) => self.invocation(node),
                other => Err(CompileError::unsupported(other.describe(), "json", span)),
            };
        };

        if let Some(extra) = tag.extra.first() {
            return Err(CompileError::new(CompileErrorKind::UnexpectedArgument)
                .with_context(&tag.origin.name)
                .with_found(arg_kind(extra))
                .with_span(span));
        }
        if tag.inner_text.is_some() && tag.attributes.is_some() {
            return Err(CompileError::new(CompileErrorKind::UnexpectedArgument)
                .with_context(&tag.origin.name)
                .with_found("value and keyword arguments")
                .with_span(span)
                .with_help("pass either a value or key: value pairs"));
        }
        let has_block = tag.block.as_ref().is_some_and(|b| !b.body.is_empty());
        if has_block && (tag.inner_text.is_some() || tag.attributes.is_some()) {
            return Err(CompileError::new(CompileErrorKind::UnexpectedArgument)
                .with_context(&tag.origin.name)
                .with_found("value and block")
                .with_span(span)
                .with_help("a block builds the value itself"));
        }

        let key = (tag.origin.name != "item").then(|| tag.origin.name.clone());
        let buffer = self.config.buffer_var.clone();
        self.stmt(span.start, |g| {
            match &key {
                Some(key) => g.write(&format!("{buffer}.json_set(:{key}")),
                None => g.write(&format!("{buffer}.json_push(")),
            }
            let value = match (&tag.inner_text, &tag.attributes) {
                (Some(inner), _) => {
                    if key.is_some() {
                        g.write(", ");
                    }
                    Some(g.expr(inner)?.boxed())
                }
                (None, Some(items)) => {
                    if key.is_some() {
                        g.write(", ");
                    }
                    Some(g.hash(items)?.boxed())
                }
                (None, None) => None,
            };
            g.write(")");
            let block = match &tag.block {
                Some(block) if has_block => {
                    g.write(" do");
                    g.newline();
                    let body = g.body(&block.body)?;
                    g.write("end");
                    Some(body)
                }
                _ => None,
            };
            Ok(Code::JsonTag { key, value, block })
        })
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr(&mut self, expr: &Expr) -> CompileResult<Code> {
        match &expr.kind {
            ExprKind::Nil => {
                self.write("nil");
                Ok(Code::nil())
            }
            ExprKind::Bool(b) => {
                self.write(if *b { "true" } else { "false" });
                Ok(Code::Lit(Value::Bool(*b)))
            }
            ExprKind::Int(n) => {
                self.write(&n.to_string());
                Ok(Code::Lit(Value::Int(*n)))
            }
            ExprKind::Float(f) => {
                let value = Value::Float(*f);
                self.write(&value.inspect());
                Ok(Code::Lit(value))
            }
            ExprKind::Str(s) => {
                let value = Value::from(s.as_str());
                self.write(&value.inspect());
                Ok(Code::Lit(value))
            }
            ExprKind::Symbol(s) => {
                let value = Value::symbol(s);
                self.write(&value.inspect());
                Ok(Code::Lit(value))
            }
            ExprKind::Interp(parts) => {
                self.write("\"");
                let mut codes = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        StrPart::Lit(text) => {
                            self.write(&quote_literal(text));
                            codes.push(Code::Lit(Value::from(text.as_str())));
                        }
                        StrPart::Code(code) => {
                            self.write("#{");
                            codes.push(self.expr(code)?);
                            self.write("}");
                        }
                    }
                }
                self.write("\"");
                Ok(Code::Interp(codes))
            }
            ExprKind::Array(items) => {
                self.write("[");
                let items = self.arg_list(items)?;
                self.write("]");
                Ok(Code::Array(items))
            }
            ExprKind::Hash(items) => self.hash(items),
            ExprKind::Range {
                start,
                end,
                exclusive,
            } => {
                self.write("(");
                let start = self.expr(start)?;
                self.write(if *exclusive { "..." } else { ".." });
                let end = self.expr(end)?;
                self.write(")");
                Ok(Code::Range {
                    start: start.boxed(),
                    end: end.boxed(),
                    exclusive: *exclusive,
                })
            }
            ExprKind::Local(name) => {
                self.write(name);
                Ok(Code::Local(name.clone()))
            }
            ExprKind::Ivar(name) => {
                self.write(&format!("@{name}"));
                Ok(Code::Ivar(name.clone()))
            }
            ExprKind::Const { .. } => {
                let Some(path) = expr.const_path() else {
                    return Err(CompileError::new(CompileErrorKind::UnsupportedExpression)
                        .with_context("constant lookup on a non-constant scope")
                        .with_span(expr.span));
                };
                self.write(&path.join("::"));
                Ok(Code::Const(path))
            }
            ExprKind::Assign { target, value } => self.assign(target, value, expr.span),
            ExprKind::OpAssign { target, op, value } => self.op_assign(target, *op, value, expr.span),
            ExprKind::Call(call) => self.call(call),
            ExprKind::Not(inner) => {
                self.write("!");
                Ok(Code::Not(self.expr(inner)?.boxed()))
            }
            ExprKind::Neg(inner) => {
                self.write("-");
                Ok(Code::Neg(self.expr(inner)?.boxed()))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.write("(");
                let lhs = self.expr(lhs)?;
                self.write(&format!(" {} ", op.symbol()));
                let rhs = self.expr(rhs)?;
                self.write(")");
                let code = Code::Binary(*op, lhs.boxed(), rhs.boxed());
                // `a << b` on a string yields a new string; store it back
                if *op == BinOp::Shl {
                    return Ok(store_back(&expr_target(&expr.kind), code));
                }
                Ok(code)
            }
            ExprKind::And(lhs, rhs) | ExprKind::Or(lhs, rhs) => {
                let and = matches!(expr.kind, ExprKind::And(..));
                self.write("(");
                let lhs = self.expr(lhs)?;
                self.write(if and { " && " } else { " || " });
                let rhs = self.expr(rhs)?;
                self.write(")");
                Ok(if and {
                    Code::And(lhs.boxed(), rhs.boxed())
                } else {
                    Code::Or(lhs.boxed(), rhs.boxed())
                })
            }
            ExprKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.write("if ");
                let cond = self.expr(cond)?;
                self.newline();
                let then_body = self.body(then_body)?;
                let else_body = if else_body.is_empty() {
                    Vec::new()
                } else {
                    self.write("else");
                    self.newline();
                    self.body(else_body)?
                };
                self.write("end");
                Ok(Code::If(cond.boxed(), then_body, else_body))
            }
            ExprKind::While { cond, body, until } => {
                self.write(if *until { "until " } else { "while " });
                let cond = self.expr(cond)?;
                self.newline();
                let body = self.body(body)?;
                self.write("end");
                Ok(Code::While {
                    cond: cond.boxed(),
                    body,
                    until: *until,
                })
            }
            ExprKind::Lambda(block) => Ok(Code::Lambda(self.block(block, true, false)?)),
            ExprKind::Markup(node) => {
                self.write("begin");
                self.newline();
                self.indent += 1;
                self.frames.push(BodyFrame::default());
                let result = self.markup(node);
                self.flush();
                let frame = self.frames.pop().unwrap_or_default();
                self.indent -= 1;
                result?;
                self.write("end");
                Ok(Code::Do(frame.stmts))
            }
        }
    }

    fn hash(&mut self, items: &[HashItem]) -> CompileResult<Code> {
        self.write("{");
        let items = self.hash_items(items)?;
        self.write("}");
        Ok(Code::Hash(items))
    }

    fn hash_items(&mut self, items: &[HashItem]) -> CompileResult<Vec<HashCode>> {
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            out.push(match item {
                HashItem::Pair { key, value } => {
                    let key = match &key.kind {
                        ExprKind::Symbol(name) if is_label(name) => {
                            self.write(&format!("{name}: "));
                            Code::Lit(Value::symbol(name))
                        }
                        _ => {
                            let key = self.expr(key)?;
                            self.write(" => ");
                            key
                        }
                    };
                    HashCode::Pair(key, self.expr(value)?)
                }
                HashItem::Splat(value) => {
                    self.write("**");
                    HashCode::Splat(self.expr(value)?)
                }
            });
        }
        Ok(out)
    }

    fn arg_list(&mut self, args: &[Arg]) -> CompileResult<Vec<ArgCode>> {
        let mut out = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            out.push(match arg {
                Arg::Positional(e) => ArgCode::Positional(self.expr(e)?),
                Arg::Splat(e) => {
                    self.write("*");
                    ArgCode::Splat(self.expr(e)?)
                }
                Arg::Keywords(items) => ArgCode::Keywords(self.hash_items(items)?),
                Arg::BlockPass(e) => {
                    self.write("&");
                    ArgCode::BlockPass(self.expr(e)?)
                }
            });
        }
        Ok(out)
    }

    /// Arguments after the buffer in an invocation listing.
    fn call_args(&mut self, args: &[Arg], after_buffer: bool) -> CompileResult<Vec<ArgCode>> {
        if after_buffer && !args.is_empty() {
            self.write(", ");
        }
        self.arg_list(args)
    }

    fn call(&mut self, call: &Call) -> CompileResult<Code> {
        let recv = match &call.receiver {
            Some(receiver) => {
                let recv = self.expr(receiver)?;
                Some(recv.boxed())
            }
            None => None,
        };
        let dot = if call.safe_nav { "&." } else { "." };
        let args = match (recv.is_some(), call.name.as_str()) {
            (true, "[]") => {
                self.write("[");
                let args = self.arg_list(&call.args)?;
                self.write("]");
                args
            }
            (true, "call") => {
                self.write(&format!("{dot}("));
                let args = self.arg_list(&call.args)?;
                self.write(")");
                args
            }
            (has_recv, name) => {
                if has_recv {
                    self.write(dot);
                }
                self.write(name);
                if call.args.is_empty() {
                    Vec::new()
                } else {
                    self.write("(");
                    let args = self.arg_list(&call.args)?;
                    self.write(")");
                    args
                }
            }
        };
        let block = match &call.block {
            Some(block) => Some(self.block(block, false, false)?),
            None => None,
        };
        Ok(Code::Call {
            recv,
            name: call.name.clone(),
            args,
            block,
            safe_nav: call.safe_nav,
        })
    }

    fn assign(&mut self, target: &Expr, value: &Expr, span: Span) -> CompileResult<Code> {
        match &target.kind {
            ExprKind::Local(name) => {
                self.write(&format!("{name} = "));
                Ok(Code::SetLocal(name.clone(), self.expr(value)?.boxed()))
            }
            ExprKind::Ivar(name) => {
                self.write(&format!("@{name} = "));
                Ok(Code::SetIvar(name.clone(), self.expr(value)?.boxed()))
            }
            ExprKind::Call(call) if call.receiver.is_some() => {
                let Some(receiver) = &call.receiver else {
                    return Err(invalid_assignment(span));
                };
                let recv = self.expr(receiver)?;
                if call.name == "[]" {
                    self.write("[");
                    let args = self.arg_list(&call.args)?;
                    self.write("] = ");
                    let value = self.expr(value)?;
                    Ok(Code::SetIndex {
                        recv: recv.boxed(),
                        args,
                        value: value.boxed(),
                    })
                } else {
                    self.write(&format!(".{} = ", call.name));
                    let value = self.expr(value)?;
                    Ok(Code::Call {
                        recv: Some(recv.boxed()),
                        name: format!("{}=", call.name),
                        args: vec![ArgCode::Positional(value)],
                        block: None,
                        safe_nav: false,
                    })
                }
            }
            _ => Err(invalid_assignment(span)),
        }
    }

    /// `a += b` is `a = a + b`; `a ||= b` is `a || (a = b)`.
    fn op_assign(
        &mut self,
        target: &Expr,
        op: BinOp,
        value: &Expr,
        span: Span,
    ) -> CompileResult<Code> {
        let read = self.capture(|g| g.expr(target))?.1;
        let written = match &target.kind {
            ExprKind::Local(name) => {
                self.write(&format!("{name} {}= ", op.symbol()));
                let value = self.expr(value)?;
                let value = combine(op, read.clone(), value);
                Code::SetLocal(name.clone(), value.boxed())
            }
            ExprKind::Ivar(name) => {
                self.write(&format!("@{name} {}= ", op.symbol()));
                let value = self.expr(value)?;
                let value = combine(op, read.clone(), value);
                Code::SetIvar(name.clone(), value.boxed())
            }
            ExprKind::Call(call) if call.name == "[]" => {
                let Some(receiver) = &call.receiver else {
                    return Err(invalid_assignment(span));
                };
                let recv = self.expr(receiver)?;
                self.write("[");
                let args = self.arg_list(&call.args)?;
                self.write(&format!("] {}= ", op.symbol()));
                let value = self.expr(value)?;
                Code::SetIndex {
                    recv: recv.boxed(),
                    args,
                    value: combine(op, read.clone(), value).boxed(),
                }
            }
            _ => return Err(invalid_assignment(span)),
        };
        Ok(match op {
            BinOp::OrAssign => Code::Or(read.boxed(), written.boxed()),
            _ => written,
        })
    }
}

/// The value stored by an operator assignment.
fn combine(op: BinOp, read: Code, value: Code) -> Code {
    match op {
        BinOp::OrAssign => value,
        op => Code::Binary(op, read.boxed(), value.boxed()),
    }
}

/// Variable written back by `x << y` when `x` is a local or instance variable.
enum ShlTarget {
    Local(String),
    Ivar(String),
    None,
}

fn expr_target(kind: &ExprKind) -> ShlTarget {
    let ExprKind::Binary { lhs, .. } = kind else {
        return ShlTarget::None;
    };
    match &lhs.kind {
        ExprKind::Local(name) => ShlTarget::Local(name.clone()),
        ExprKind::Ivar(name) => ShlTarget::Ivar(name.clone()),
        _ => ShlTarget::None,
    }
}

fn store_back(target: &ShlTarget, code: Code) -> Code {
    match target {
        ShlTarget::Local(name) => Code::SetLocal(name.clone(), code.boxed()),
        ShlTarget::Ivar(name) => Code::SetIvar(name.clone(), code.boxed()),
        ShlTarget::None => code,
    }
}

fn invalid_assignment(span: Span) -> CompileError {
    CompileError::new(CompileErrorKind::InvalidAssignment).with_span(span)
}

fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Html => "html",
        Mode::Xml => "xml",
        Mode::Json => "json",
    }
}

fn arg_kind(arg: &Arg) -> &'static str {
    match arg {
        Arg::Positional(_) => "extra positional argument",
        Arg::Splat(_) => "splat argument",
        Arg::Keywords(_) => "keyword arguments",
        Arg::BlockPass(_) => "block argument",
    }
}

fn is_label(name: &str) -> bool {
    name.chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// The compile-time value of a literal expression.
fn literal_value(expr: &Expr) -> Option<Value> {
    Some(match &expr.kind {
        ExprKind::Nil => Value::Nil,
        ExprKind::Bool(b) => Value::Bool(*b),
        ExprKind::Int(n) => Value::Int(*n),
        ExprKind::Float(f) => Value::Float(*f),
        ExprKind::Str(s) => Value::from(s.as_str()),
        ExprKind::Symbol(s) => Value::symbol(s),
        ExprKind::Array(items) => Value::array(
            items
                .iter()
                .map(|item| match item {
                    Arg::Positional(e) => literal_value(e),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()?,
        ),
        _ => return None,
    })
}

/// An attribute list whose keys and values are all literals.
fn static_hash(items: &[HashItem]) -> Option<Value> {
    let entries = items
        .iter()
        .map(|item| match item {
            HashItem::Pair { key, value } => {
                Some((Key::from_value(&literal_value(key)?)?, literal_value(value)?))
            }
            HashItem::Splat(_) => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(Value::hash(entries))
}

/// Quotes text for a double-quoted listing literal.
fn quote_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '#' if chars.peek() == Some(&'{') => out.push_str("\\#"),
            c => out.push(c),
        }
    }
    out
}

/// Merges pending pieces into one listing literal and one fragment list, joining
/// adjacent literals.
fn merge_pending(pending: Vec<Pending>) -> (String, Vec<Fragment>) {
    let mut text = String::new();
    let mut fragments: Vec<Fragment> = Vec::with_capacity(pending.len());
    for piece in pending {
        text.push_str(&piece.text);
        match (fragments.last_mut(), piece.fragment) {
            (Some(Fragment::Literal(prev)), Fragment::Literal(next)) => prev.push_str(&next),
            (_, fragment) => fragments.push(fragment),
        }
    }
    (text, fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse;
    use crate::compiler::translate::Translator;
    use crate::extensions::Extensions;

    fn gen_with(src: &str, mode: Mode, config: CodegenConfig) -> CompileResult<Generated> {
        let ast = parse(src, []).unwrap_or_else(|e| panic!("{src:?}: {e}"));
        let ast = Translator::new(mode, &Extensions::new()).translate(ast)?;
        generate(&ast, src, "test.tpl", 0, mode, &config)
    }

    fn gen_html(src: &str) -> Generated {
        gen_with(src, Mode::Html, CodegenConfig::default()).unwrap()
    }

    fn pushes(body: &Body) -> Vec<&Vec<Fragment>> {
        body.iter()
            .filter_map(|s| match &s.code {
                Code::Push(fragments) => Some(fragments),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_static_markup_is_one_push() {
        let generated = gen_html(r#"div { h1 "Hi" }"#);
        assert_eq!(generated.entry.body.len(), 1);
        assert_eq!(
            pushes(&generated.entry.body)[0],
            &vec![Fragment::Literal("<div><h1>Hi</h1></div>".into())]
        );
        assert!(
            generated
                .listing
                .contains(r#"__buffer__ << "<div><h1>Hi</h1></div>""#),
            "{}",
            generated.listing
        );
    }

    #[test]
    fn test_listing_header_and_wrapper() {
        let generated = gen_html("|title, size: 1|\nh1 title");
        let mut lines = generated.listing.lines();
        assert_eq!(lines.next(), Some("->(__buffer__, title, size: 1) do"));
        assert!(generated.listing.contains("rescue => __error__"));
        assert!(generated.listing.trim_end().ends_with("end"));
        assert_eq!(generated.entry.params.len(), 2);
    }

    #[test]
    fn test_no_wrap_omits_handler() {
        let config = CodegenConfig {
            wrap: false,
            ..CodegenConfig::default()
        };
        let generated = gen_with("p 1", Mode::Html, config).unwrap();
        assert!(!generated.listing.contains("rescue"));
    }

    #[test]
    fn test_dynamic_text_is_interpolated() {
        let generated = gen_html("|name|\np \"Hello #{name}!\"");
        let fragments = pushes(&generated.entry.body)[0];
        assert_eq!(fragments.len(), 3);
        assert!(matches!(&fragments[1], Fragment::Escaped(Code::Local(n), Escape::Html) if n == "name"));
        assert!(generated.listing.contains("#{escape_html(name)}"), "{}", generated.listing);
    }

    #[test]
    fn test_static_attributes_are_serialized() {
        let generated = gen_html(r#"input type: "checkbox", checked: true, disabled: false"#);
        assert_eq!(
            pushes(&generated.entry.body)[0],
            &vec![Fragment::Literal(r#"<input type="checkbox" checked>"#.into())]
        );
    }

    #[test]
    fn test_dynamic_attributes_use_runtime_formatting() {
        let generated = gen_html("|cls|\ndiv(class: cls) { }");
        let fragments = pushes(&generated.entry.body)[0];
        assert!(matches!(fragments[1], Fragment::Attributes(..)));
    }

    #[test]
    fn test_void_element_with_content_is_error() {
        let err = gen_with("br 'x'", Mode::Html, CodegenConfig::default()).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::VoidElementContent);
        let err = gen_with("hr { p 1 }", Mode::Html, CodegenConfig::default()).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::VoidElementContent);
        assert!(gen_with("br { }", Mode::Html, CodegenConfig::default()).is_ok());
    }

    #[test]
    fn test_extra_positional_is_error() {
        let err = gen_with("p 'a', 'b'", Mode::Html, CodegenConfig::default()).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnexpectedArgument);
    }

    #[test]
    fn test_xml_self_closing() {
        let generated = gen_with("foo {}", Mode::Xml, CodegenConfig::default()).unwrap();
        assert_eq!(
            pushes(&generated.entry.body)[0],
            &vec![Fragment::Literal("<foo/>".into())]
        );
    }

    #[test]
    fn test_raw_text_elements_are_not_escaped() {
        let generated = gen_html("style 'a > b'\np 'a > b'");
        assert_eq!(
            pushes(&generated.entry.body)[0],
            &vec![Fragment::Literal("<style>a > b</style><p>a &gt; b</p>".into())]
        );
    }

    #[test]
    fn test_generic_code_flushes_pending() {
        let generated = gen_html("|items|\nul {\n  items.each { |i| li i }\n}");
        let body = &generated.entry.body;
        assert_eq!(body.len(), 3);
        assert!(matches!(body[0].code, Code::Push(_)));
        assert!(matches!(body[1].code, Code::Call { .. }));
        assert!(matches!(body[2].code, Code::Push(_)));
    }

    #[test]
    fn test_source_map_points_at_template_lines() {
        let generated = gen_html("|items|\nul {\n  items.each { |i| li i }\n}");
        let body = &generated.entry.body;
        let each = generated.source_map.get(body[1].line).map(|l| l.line);
        assert_eq!(each, Some(3));
        assert_eq!(generated.source_map.get(1).map(|l| l.line), Some(1));
    }

    #[test]
    fn test_uncoalesced_pushes_one_fragment_each() {
        let config = CodegenConfig {
            coalesce: false,
            ..CodegenConfig::default()
        };
        let generated = gen_with(r#"div { h1 "Hi" }"#, Mode::Html, config).unwrap();
        let pushes = pushes(&generated.entry.body);
        assert!(pushes.len() > 1);
        assert!(pushes.iter().all(|p| p.len() == 1));
    }

    #[test]
    fn test_yield_adds_block_param() {
        let generated = gen_html("div { render_yield }");
        assert!(generated.listing.starts_with("->(__buffer__, &__block__) do"));
        assert!(matches!(
            generated.entry.params.last().map(|p| &p.kind),
            Some(ParamCodeKind::Block)
        ));
    }

    #[test]
    fn test_declared_block_param_is_reused() {
        let generated = gen_html("|&content|\nrender_children");
        assert!(generated.listing.starts_with("->(__buffer__, &content) do"));
        assert!(generated.listing.contains("content&.(__buffer__)"));
    }

    #[test]
    fn test_defer_prelude_and_postlude() {
        let generated = gen_html("div { defer { h1 @title } }\n@title = 'x'");
        let body = &generated.entry.body;
        assert!(matches!(body.first().map(|s| &s.code), Some(Code::BeginDefer)));
        assert!(matches!(body.last().map(|s| &s.code), Some(Code::FlushDeferred)));
    }

    #[test]
    fn test_json_mode_rejects_text() {
        let err = gen_with("text 'x'", Mode::Json, CodegenConfig::default()).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnsupportedInMode);
        let generated = gen_with("name 'x'\nitem 1", Mode::Json, CodegenConfig::default()).unwrap();
        assert!(matches!(
            &generated.entry.body[0].code,
            Code::JsonTag { key: Some(k), .. } if k == "name"
        ));
        assert!(matches!(
            &generated.entry.body[1].code,
            Code::JsonTag { key: None, .. }
        ));
    }

    #[test]
    fn test_literal_quoting() {
        assert_eq!(quote_literal("a \"b\" #{c}\n"), "a \\\"b\\\" \\#{c}\\n");
    }
}
