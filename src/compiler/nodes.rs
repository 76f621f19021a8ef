//! Specialized markup nodes produced by the translator.
//!
//! Each node records the span and name of the call it was recognized from, plus the
//! structured pieces the code generator needs. Child expressions have already been
//! translated.

use super::ast::{Arg, BlockExpr, Expr, ExprKind, HashItem, Span, StrPart};

/// The originating call: where it was written and under which name.
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    pub span: Span,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkupNode {
    /// `div(class: "x") { ... }`
    Tag(TagNode),
    /// `Card(title: "x")`, `Layouts::Page() { ... }`
    ConstTag(InvokeNode),
    /// `render target, args { ... }`
    Render(RenderNode),
    /// `icon(:star)`, `ui.button("Go")`
    Extension(ExtensionNode),
    RenderYield(YieldNode),
    RenderChildren(YieldNode),
    Defer(DeferNode),
    Text(TextNode),
    Raw(TextNode),
    Builtin(BuiltinNode),
    /// `block.call(args)` on the template's declared block parameter
    BlockInvocation(BlockInvocationNode),
}

impl MarkupNode {
    pub fn origin(&self) -> &Origin {
        match self {
            MarkupNode::Tag(n) => &n.origin,
            MarkupNode::ConstTag(n) => &n.origin,
            MarkupNode::Render(n) => &n.origin,
            MarkupNode::Extension(n) => &n.origin,
            MarkupNode::RenderYield(n) | MarkupNode::RenderChildren(n) => &n.origin,
            MarkupNode::Defer(n) => &n.origin,
            MarkupNode::Text(n) | MarkupNode::Raw(n) => &n.origin,
            MarkupNode::Builtin(n) => &n.origin,
            MarkupNode::BlockInvocation(n) => &n.origin,
        }
    }

    /// Node kind as written in error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            MarkupNode::Tag(_) => "tag",
            MarkupNode::ConstTag(_) => "template call",
            MarkupNode::Render(_) => "render",
            MarkupNode::Extension(_) => "extension call",
            MarkupNode::RenderYield(_) => "render_yield",
            MarkupNode::RenderChildren(_) => "render_children",
            MarkupNode::Defer(_) => "defer",
            MarkupNode::Text(_) => "text",
            MarkupNode::Raw(_) => "raw",
            MarkupNode::Builtin(node) => node.kind.name(),
            MarkupNode::BlockInvocation(_) => "block invocation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagNode {
    pub origin: Origin,
    /// Markup spelling of the tag (`data_list` → `data-list`).
    pub tag: String,
    pub attributes: Option<Vec<HashItem>>,
    pub inner_text: Option<Expr>,
    /// Positional arguments beyond the inner text; rejected by the generator.
    pub extra: Vec<Arg>,
    pub block: Option<BlockExpr>,
    pub is_void: bool,
}

/// Direct invocation of another template unit.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeNode {
    pub origin: Origin,
    pub path: Vec<String>,
    pub args: Vec<Arg>,
    pub block: Option<BlockExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderNode {
    pub origin: Origin,
    pub target: Expr,
    pub args: Vec<Arg>,
    pub block: Option<BlockExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionNode {
    pub origin: Origin,
    pub key: String,
    /// Helper name for module extensions.
    pub helper: Option<String>,
    pub args: Vec<Arg>,
    pub block: Option<BlockExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YieldNode {
    pub origin: Origin,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeferNode {
    pub origin: Origin,
    pub block: Option<BlockExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub origin: Origin,
    pub expr: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Html,
    Html5,
    Markdown,
    Tag,
}

impl BuiltinKind {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinKind::Html => "html",
            BuiltinKind::Html5 => "html5",
            BuiltinKind::Markdown => "markdown",
            BuiltinKind::Tag => "tag",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinNode {
    pub origin: Origin,
    pub kind: BuiltinKind,
    pub args: Vec<Arg>,
    pub block: Option<BlockExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockInvocationNode {
    pub origin: Origin,
    pub receiver: String,
    pub args: Vec<Arg>,
}

/// Returns true if any statement (at any depth) satisfies `pred`.
pub fn any_node(body: &[Expr], pred: &dyn Fn(&MarkupNode) -> bool) -> bool {
    body.iter().any(|e| expr_any(e, pred))
}

fn block_any(block: &Option<BlockExpr>, pred: &dyn Fn(&MarkupNode) -> bool) -> bool {
    block
        .as_ref()
        .is_some_and(|b| any_node(&b.body, pred) || params_any(&b.params, pred))
}

fn params_any(params: &super::ast::Params, pred: &dyn Fn(&MarkupNode) -> bool) -> bool {
    use super::ast::ParamKind;
    params.items.iter().any(|p| match &p.kind {
        ParamKind::Optional(e) | ParamKind::KeyOptional(e) => expr_any(e, pred),
        _ => false,
    })
}

fn args_any(args: &[Arg], pred: &dyn Fn(&MarkupNode) -> bool) -> bool {
    args.iter().any(|arg| match arg {
        Arg::Positional(e) | Arg::Splat(e) | Arg::BlockPass(e) => expr_any(e, pred),
        Arg::Keywords(items) => items_any(items, pred),
    })
}

fn items_any(items: &[HashItem], pred: &dyn Fn(&MarkupNode) -> bool) -> bool {
    items.iter().any(|item| match item {
        HashItem::Pair { key, value } => expr_any(key, pred) || expr_any(value, pred),
        HashItem::Splat(e) => expr_any(e, pred),
    })
}

fn expr_any(expr: &Expr, pred: &dyn Fn(&MarkupNode) -> bool) -> bool {
    match &expr.kind {
        ExprKind::Markup(node) => pred(node) || markup_children_any(node, pred),
        ExprKind::Interp(parts) => parts.iter().any(|p| match p {
            StrPart::Code(e) => expr_any(e, pred),
            StrPart::Lit(_) => false,
        }),
        ExprKind::Array(items) => args_any(items, pred),
        ExprKind::Hash(items) => items_any(items, pred),
        ExprKind::Range { start, end, .. } => expr_any(start, pred) || expr_any(end, pred),
        ExprKind::Const { scope, .. } => scope.as_ref().is_some_and(|s| expr_any(s, pred)),
        ExprKind::Assign { target, value } | ExprKind::OpAssign { target, value, .. } => {
            expr_any(target, pred) || expr_any(value, pred)
        }
        ExprKind::Call(call) => {
            call.receiver.as_ref().is_some_and(|r| expr_any(r, pred))
                || args_any(&call.args, pred)
                || block_any(&call.block, pred)
        }
        ExprKind::Not(e) | ExprKind::Neg(e) => expr_any(e, pred),
        ExprKind::Binary { lhs, rhs, .. } => expr_any(lhs, pred) || expr_any(rhs, pred),
        ExprKind::And(l, r) | ExprKind::Or(l, r) => expr_any(l, pred) || expr_any(r, pred),
        ExprKind::If {
            cond,
            then_body,
            else_body,
        } => expr_any(cond, pred) || any_node(then_body, pred) || any_node(else_body, pred),
        ExprKind::While { cond, body, .. } => expr_any(cond, pred) || any_node(body, pred),
        ExprKind::Lambda(block) => any_node(&block.body, pred) || params_any(&block.params, pred),
        ExprKind::Nil
        | ExprKind::Bool(_)
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Symbol(_)
        | ExprKind::Local(_)
        | ExprKind::Ivar(_) => false,
    }
}

fn markup_children_any(node: &MarkupNode, pred: &dyn Fn(&MarkupNode) -> bool) -> bool {
    match node {
        MarkupNode::Tag(n) => {
            n.attributes.as_ref().is_some_and(|a| items_any(a, pred))
                || n.inner_text.as_ref().is_some_and(|e| expr_any(e, pred))
                || args_any(&n.extra, pred)
                || block_any(&n.block, pred)
        }
        MarkupNode::ConstTag(n) => args_any(&n.args, pred) || block_any(&n.block, pred),
        MarkupNode::Render(n) => {
            expr_any(&n.target, pred) || args_any(&n.args, pred) || block_any(&n.block, pred)
        }
        MarkupNode::Extension(n) => args_any(&n.args, pred) || block_any(&n.block, pred),
        MarkupNode::RenderYield(n) | MarkupNode::RenderChildren(n) => args_any(&n.args, pred),
        MarkupNode::Defer(n) => block_any(&n.block, pred),
        MarkupNode::Text(n) | MarkupNode::Raw(n) => {
            n.expr.as_ref().is_some_and(|e| expr_any(e, pred))
        }
        MarkupNode::Builtin(n) => args_any(&n.args, pred) || block_any(&n.block, pred),
        MarkupNode::BlockInvocation(n) => args_any(&n.args, pred),
    }
}

/// True if the body uses `defer` anywhere.
pub fn contains_defer(body: &[Expr]) -> bool {
    any_node(body, &|node| matches!(node, MarkupNode::Defer(_)))
}

/// True if the body uses `render_yield` or `render_children` anywhere.
pub fn contains_yield(body: &[Expr]) -> bool {
    any_node(body, &|node| {
        matches!(node, MarkupNode::RenderYield(_) | MarkupNode::RenderChildren(_))
    })
}
