//! Recognizes markup call shapes in a parsed template and rewrites them into
//! [`MarkupNode`]s.
//!
//! The translation is a single top-down pass that builds a new tree. At every call
//! the rules below are tried in order and the first match wins:
//!
//! 1. builtin forms (`render`, `text`, `defer`, `html`, ...) without a receiver
//! 2. registered extensions (`icon(...)`, `ui.button(...)`)
//! 3. capitalized names (`Card(...)`, `Layouts::Page(...)`)
//! 4. `block.call(...)` on the template's declared block parameter
//! 5. any other receiverless call becomes a tag
//!
//! Everything else is rebuilt with translated children.

use super::ast::{
    Arg, BlockExpr, Call, Expr, ExprKind, HashItem, Param, ParamKind, Params, StrPart,
    TemplateAst,
};
use super::codegen::{CompileError, CompileErrorKind, CompileResult};
use super::nodes::{
    BlockInvocationNode, BuiltinKind, BuiltinNode, DeferNode, ExtensionNode, InvokeNode,
    MarkupNode, Origin, RenderNode, TagNode, TextNode, YieldNode,
};
use crate::extensions::Extensions;
use crate::markup::{Mode, tag_name};

pub struct Translator<'a> {
    mode: Mode,
    extensions: &'a Extensions,
    /// Name of the template's declared `&block` parameter.
    block_param: Option<String>,
}

impl<'a> Translator<'a> {
    pub fn new(mode: Mode, extensions: &'a Extensions) -> Self {
        Self {
            mode,
            extensions,
            block_param: None,
        }
    }

    pub fn translate(mut self, ast: TemplateAst) -> CompileResult<TemplateAst> {
        self.block_param = ast.params.block_param().map(str::to_string);
        Ok(TemplateAst {
            params: self.params(ast.params)?,
            body: self.body(ast.body)?,
        })
    }

    fn body(&self, body: Vec<Expr>) -> CompileResult<Vec<Expr>> {
        body.into_iter().map(|e| self.expr(e)).collect()
    }

    fn params(&self, params: Params) -> CompileResult<Params> {
        let items = params
            .items
            .into_iter()
            .map(|p| {
                let kind = match p.kind {
                    ParamKind::Optional(e) => ParamKind::Optional(self.expr(e)?),
                    ParamKind::KeyOptional(e) => ParamKind::KeyOptional(self.expr(e)?),
                    other => other,
                };
                Ok(Param { name: p.name, kind })
            })
            .collect::<CompileResult<_>>()?;
        Ok(Params {
            items,
            buffer: params.buffer,
        })
    }

    fn block(&self, block: Option<BlockExpr>) -> CompileResult<Option<BlockExpr>> {
        block
            .map(|b| {
                Ok(BlockExpr {
                    params: self.params(b.params)?,
                    body: self.body(b.body)?,
                    span: b.span,
                })
            })
            .transpose()
    }

    fn args(&self, args: Vec<Arg>) -> CompileResult<Vec<Arg>> {
        args.into_iter()
            .map(|arg| {
                Ok(match arg {
                    Arg::Positional(e) => Arg::Positional(self.expr(e)?),
                    Arg::Splat(e) => Arg::Splat(self.expr(e)?),
                    Arg::BlockPass(e) => Arg::BlockPass(self.expr(e)?),
                    Arg::Keywords(items) => Arg::Keywords(self.items(items)?),
                })
            })
            .collect()
    }

    fn items(&self, items: Vec<HashItem>) -> CompileResult<Vec<HashItem>> {
        items
            .into_iter()
            .map(|item| {
                Ok(match item {
                    HashItem::Pair { key, value } => HashItem::Pair {
                        key: self.expr(key)?,
                        value: self.expr(value)?,
                    },
                    HashItem::Splat(e) => HashItem::Splat(self.expr(e)?),
                })
            })
            .collect()
    }

    fn boxed(&self, expr: Box<Expr>) -> CompileResult<Box<Expr>> {
        Ok(Box::new(self.expr(*expr)?))
    }

    fn expr(&self, expr: Expr) -> CompileResult<Expr> {
        let span = expr.span;
        let kind = match expr.kind {
            ExprKind::Call(call) => return self.call(*call),
            ExprKind::Interp(parts) => ExprKind::Interp(
                parts
                    .into_iter()
                    .map(|part| {
                        Ok(match part {
                            StrPart::Code(e) => StrPart::Code(self.expr(e)?),
                            lit => lit,
                        })
                    })
                    .collect::<CompileResult<_>>()?,
            ),
            ExprKind::Array(items) => ExprKind::Array(self.args(items)?),
            ExprKind::Hash(items) => ExprKind::Hash(self.items(items)?),
            ExprKind::Range {
                start,
                end,
                exclusive,
            } => ExprKind::Range {
                start: self.boxed(start)?,
                end: self.boxed(end)?,
                exclusive,
            },
            ExprKind::Const { scope, name } => ExprKind::Const {
                scope: scope.map(|s| self.boxed(s)).transpose()?,
                name,
            },
            ExprKind::Assign { target, value } => ExprKind::Assign {
                target: self.boxed(target)?,
                value: self.boxed(value)?,
            },
            ExprKind::OpAssign { target, op, value } => ExprKind::OpAssign {
                target: self.boxed(target)?,
                op,
                value: self.boxed(value)?,
            },
            ExprKind::Not(e) => ExprKind::Not(self.boxed(e)?),
            ExprKind::Neg(e) => ExprKind::Neg(self.boxed(e)?),
            ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op,
                lhs: self.boxed(lhs)?,
                rhs: self.boxed(rhs)?,
            },
            ExprKind::And(l, r) => ExprKind::And(self.boxed(l)?, self.boxed(r)?),
            ExprKind::Or(l, r) => ExprKind::Or(self.boxed(l)?, self.boxed(r)?),
            ExprKind::If {
                cond,
                then_body,
                else_body,
            } => ExprKind::If {
                cond: self.boxed(cond)?,
                then_body: self.body(then_body)?,
                else_body: self.body(else_body)?,
            },
            ExprKind::While { cond, body, until } => ExprKind::While {
                cond: self.boxed(cond)?,
                body: self.body(body)?,
                until,
            },
            ExprKind::Lambda(block) => ExprKind::Lambda(BlockExpr {
                params: self.params(block.params)?,
                body: self.body(block.body)?,
                span: block.span,
            }),
            other => other,
        };
        Ok(Expr::new(kind, span))
    }

    fn call(&self, call: Call) -> CompileResult<Expr> {
        let span = call.span;
        let origin = Origin {
            span,
            name: call.name.clone(),
        };
        let markup = |node: MarkupNode| Ok(Expr::new(ExprKind::Markup(Box::new(node)), span));

        if call.receiver.is_none() && call.name == "raise" {
            return self.passthrough(call);
        }
        let call = if call.receiver.is_none() {
            match self.builtin(call, &origin)? {
                Ok(node) => return markup(node),
                Err(call) => call,
            }
        } else {
            call
        };

        if let Some((key, helper)) = self.extension_target(&call) {
            return markup(MarkupNode::Extension(ExtensionNode {
                origin,
                key,
                helper,
                args: self.args(call.args)?,
                block: self.block(call.block)?,
            }));
        }

        if call.name.starts_with(|c: char| c.is_ascii_uppercase()) {
            let scope = match &call.receiver {
                None => Some(Vec::new()),
                Some(receiver) => receiver.const_path(),
            };
            if let Some(mut path) = scope {
                path.push(call.name);
                return markup(MarkupNode::ConstTag(InvokeNode {
                    origin,
                    path,
                    args: self.args(call.args)?,
                    block: self.block(call.block)?,
                }));
            }
        }

        if call.name == "call"
            && let Some(receiver) = call.receiver.as_ref().and_then(Expr::as_local)
            && self.block_param.as_deref() == Some(receiver)
        {
            if let Some(block) = &call.block {
                return Err(CompileError::new(CompileErrorKind::BlockInvocationWithBlock)
                    .with_context(&format!("{receiver}.call"))
                    .with_span(block.span)
                    .with_help("use `render_yield` arguments to pass values to the block"));
            }
            return markup(MarkupNode::BlockInvocation(BlockInvocationNode {
                origin,
                receiver: receiver.to_string(),
                args: self.args(call.args)?,
            }));
        }

        if call.receiver.is_none() {
            let (attributes, positional) = split_attributes(self.args(call.args)?);
            let mut positional = positional.into_iter().peekable();
            let inner_text = match positional.next_if(|a| matches!(a, Arg::Positional(_))) {
                Some(Arg::Positional(e)) => Some(e),
                _ => None,
            };
            let tag = tag_name(&call.name);
            return markup(MarkupNode::Tag(TagNode {
                origin,
                is_void: self.mode.is_void(&tag),
                tag,
                attributes,
                inner_text,
                extra: positional.collect(),
                block: self.block(call.block)?,
            }));
        }

        self.passthrough(call)
    }

    /// Rebuilds a call that is not markup with translated children.
    fn passthrough(&self, call: Call) -> CompileResult<Expr> {
        let span = call.span;
        Ok(Expr::new(
            ExprKind::Call(Box::new(Call {
                receiver: call.receiver.map(|r| self.expr(r)).transpose()?,
                name: call.name,
                args: self.args(call.args)?,
                block: self.block(call.block)?,
                safe_nav: call.safe_nav,
                span,
            })),
            span,
        ))
    }

    /// Builds the node for a builtin form, or hands the call back untouched.
    fn builtin(&self, call: Call, origin: &Origin) -> CompileResult<Result<MarkupNode, Call>> {
        let origin = origin.clone();
        let node = match call.name.as_str() {
            "render_yield" => MarkupNode::RenderYield(YieldNode {
                origin,
                args: self.args(call.args)?,
            }),
            "render_children" => MarkupNode::RenderChildren(YieldNode {
                origin,
                args: self.args(call.args)?,
            }),
            "render" => {
                let mut args = self.args(call.args)?.into_iter();
                let target = match args.next() {
                    Some(Arg::Positional(target)) => with_buffer_param(target),
                    // rendering nothing fails at runtime as a call on nil
                    _ => Expr::new(ExprKind::Nil, call.span),
                };
                MarkupNode::Render(RenderNode {
                    origin,
                    target,
                    args: args.collect(),
                    block: self.block(call.block)?,
                })
            }
            "text" | "raw" => {
                let expr = self
                    .args(call.args.clone())?
                    .into_iter()
                    .find_map(|a| match a {
                        Arg::Positional(e) => Some(e),
                        _ => None,
                    });
                let node = TextNode { origin, expr };
                if call.name == "text" {
                    MarkupNode::Text(node)
                } else {
                    MarkupNode::Raw(node)
                }
            }
            "defer" => MarkupNode::Defer(DeferNode {
                origin,
                block: self.block(call.block)?,
            }),
            "html" | "html5" | "markdown" | "tag" => {
                let kind = match call.name.as_str() {
                    "html" => BuiltinKind::Html,
                    "html5" => BuiltinKind::Html5,
                    "markdown" => BuiltinKind::Markdown,
                    _ => BuiltinKind::Tag,
                };
                MarkupNode::Builtin(BuiltinNode {
                    origin,
                    kind,
                    args: self.args(call.args)?,
                    block: self.block(call.block)?,
                })
            }
            _ => return Ok(Err(call)),
        };
        Ok(Ok(node))
    }

    fn extension_target(&self, call: &Call) -> Option<(String, Option<String>)> {
        match &call.receiver {
            None if self.extensions.has_unit(&call.name) => Some((call.name.clone(), None)),
            Some(Expr {
                kind: ExprKind::Call(module),
                ..
            }) if module.receiver.is_none()
                && module.args.is_empty()
                && module.block.is_none()
                && self.extensions.has_helper(&module.name, &call.name) =>
            {
                Some((module.name.clone(), Some(call.name.clone())))
            }
            _ => None,
        }
    }
}

/// Rebuilds a lambda literal with the synthetic leading buffer parameter so it can be
/// invoked like a compiled unit.
fn with_buffer_param(target: Expr) -> Expr {
    match target.kind {
        ExprKind::Lambda(block) => Expr::new(
            ExprKind::Lambda(BlockExpr {
                params: Params {
                    items: block.params.items,
                    buffer: true,
                },
                body: block.body,
                span: block.span,
            }),
            target.span,
        ),
        kind => Expr::new(kind, target.span),
    }
}

/// Splits call arguments into the attribute items and the remaining arguments. The
/// attributes are the trailing keyword group or, failing that, a trailing hash literal.
pub fn split_attributes(mut args: Vec<Arg>) -> (Option<Vec<HashItem>>, Vec<Arg>) {
    match args.pop() {
        Some(Arg::Keywords(items)) => (Some(items), args),
        Some(Arg::Positional(Expr {
            kind: ExprKind::Hash(items),
            ..
        })) => (Some(items), args),
        Some(other) => {
            args.push(other);
            (None, args)
        }
        None => (None, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse;

    fn translate(src: &str, mode: Mode, extensions: &Extensions) -> CompileResult<TemplateAst> {
        let ast = parse(src, []).unwrap_or_else(|e| panic!("{src:?}: {e}"));
        Translator::new(mode, extensions).translate(ast)
    }

    fn node(expr: &Expr) -> &MarkupNode {
        match &expr.kind {
            ExprKind::Markup(node) => node,
            other => panic!("expected markup, got {other:?}"),
        }
    }

    fn html(src: &str) -> TemplateAst {
        translate(src, Mode::Html, &Extensions::new()).unwrap()
    }

    #[test]
    fn test_tag_with_attributes_and_inner_text() {
        let ast = html(r#"a "Home", href: "/", data_id: 1"#);
        let MarkupNode::Tag(tag) = node(&ast.body[0]) else {
            panic!("expected tag");
        };
        assert_eq!(tag.tag, "a");
        assert_eq!(tag.attributes.as_ref().map(Vec::len), Some(2));
        assert!(tag.inner_text.is_some());
        assert!(tag.extra.is_empty());
    }

    #[test]
    fn test_trailing_hash_literal_is_attributes() {
        let ast = html(r#"span({class: "x"})"#);
        let MarkupNode::Tag(tag) = node(&ast.body[0]) else {
            panic!("expected tag");
        };
        assert!(tag.attributes.is_some());
        assert!(tag.inner_text.is_none());
    }

    #[test]
    fn test_underscore_tag_name_and_void_flag() {
        let ast = html("data_list\nbr");
        let MarkupNode::Tag(list) = node(&ast.body[0]) else {
            panic!()
        };
        assert_eq!(list.tag, "data-list");
        let MarkupNode::Tag(br) = node(&ast.body[1]) else {
            panic!()
        };
        assert!(br.is_void);

        let xml = translate("br", Mode::Xml, &Extensions::new()).unwrap();
        let MarkupNode::Tag(br) = node(&xml.body[0]) else {
            panic!()
        };
        assert!(!br.is_void, "void elements are HTML only");
    }

    #[test]
    fn test_builtins() {
        let ast = html("render_yield 1\nrender_children\ndefer { p 1 }\ntext 'x'\nraw 'y'\nhtml5 { }\nmarkdown 'z'\ntag :p, 'x'");
        let kinds: Vec<_> = ast.body.iter().map(|e| node(e).describe()).collect();
        assert_eq!(
            kinds,
            ["render_yield", "render_children", "defer", "text", "raw", "html5", "markdown", "tag"]
        );
    }

    #[test]
    fn test_raise_passes_through() {
        let ast = html("raise 'boom'");
        assert!(matches!(&ast.body[0].kind, ExprKind::Call(call) if call.name == "raise"));
    }

    #[test]
    fn test_render_lambda_gets_buffer_param() {
        let ast = html("render ->(x) { p x }, 1");
        let MarkupNode::Render(render) = node(&ast.body[0]) else {
            panic!()
        };
        let ExprKind::Lambda(block) = &render.target.kind else {
            panic!("expected lambda target");
        };
        assert!(block.params.buffer);
        assert_eq!(render.args.len(), 1);
    }

    #[test]
    fn test_const_tags() {
        let ast = html("Card(title: 1)\nLayouts::Page() { p 1 }");
        let MarkupNode::ConstTag(card) = node(&ast.body[0]) else {
            panic!()
        };
        assert_eq!(card.path, ["Card"]);
        let MarkupNode::ConstTag(page) = node(&ast.body[1]) else {
            panic!()
        };
        assert_eq!(page.path, ["Layouts", "Page"]);
        assert!(page.block.is_some());
    }

    #[test]
    fn test_extensions() {
        let extensions = Extensions::new();
        extensions.register("icon", crate::Template::html("|name| i name"));
        extensions.register_module(
            "ui",
            [("button", crate::Template::html("|label| button label"))],
        );
        let ast = translate("icon :star\nui.button 'Go'\nui", Mode::Html, &extensions).unwrap();
        let MarkupNode::Extension(icon) = node(&ast.body[0]) else {
            panic!()
        };
        assert_eq!((icon.key.as_str(), icon.helper.as_deref()), ("icon", None));
        let MarkupNode::Extension(button) = node(&ast.body[1]) else {
            panic!()
        };
        assert_eq!(button.helper.as_deref(), Some("button"));
        assert!(matches!(node(&ast.body[2]), MarkupNode::Tag(_)));
    }

    #[test]
    fn test_block_invocation() {
        let ast = html("|&content|\ncontent.call(1)\ncontent.(2)");
        assert!(matches!(node(&ast.body[0]), MarkupNode::BlockInvocation(n) if n.receiver == "content"));
        assert!(matches!(node(&ast.body[1]), MarkupNode::BlockInvocation(_)));
    }

    #[test]
    fn test_block_invocation_with_block_is_error() {
        let err = translate("|&b|\nb.call { p 1 }", Mode::Html, &Extensions::new()).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::BlockInvocationWithBlock);
    }

    #[test]
    fn test_method_calls_left_alone() {
        let ast = html("items = [1]\nitems.each { |i| li i }");
        let ExprKind::Call(each) = &ast.body[1].kind else {
            panic!("expected call");
        };
        let block = each.block.as_ref().unwrap();
        assert!(matches!(node(&block.body[0]), MarkupNode::Tag(t) if t.tag == "li"));
    }

    #[test]
    fn test_splat_is_not_inner_text() {
        let ast = html("items = []\np(*items)");
        let MarkupNode::Tag(p) = node(&ast.body[1]) else {
            panic!()
        };
        assert!(p.inner_text.is_none());
        assert_eq!(p.extra.len(), 1);
    }
}
