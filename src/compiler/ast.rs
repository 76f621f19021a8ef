//! Syntax tree for template sources.
//!
//! Nodes are plain immutable values. Passes that rewrite the tree (translation,
//! synthetic parameter injection) build new nodes from the fields of old ones.

use super::nodes::MarkupNode;

/// Byte range in the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// A parsed template: declared parameters and the body statements.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateAst {
    pub params: Params,
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Returns true for literals whose value is known at compile time.
    pub fn is_static(&self) -> bool {
        match &self.kind {
            ExprKind::Nil
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Symbol(_) => true,
            ExprKind::Array(items) => items.iter().all(|item| match item {
                Arg::Positional(e) => e.is_static(),
                _ => false,
            }),
            _ => false,
        }
    }

    pub fn as_local(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Local(name) => Some(name),
            _ => None,
        }
    }

    /// Returns the segments of a plain constant path (`Foo::Bar`).
    pub fn const_path(&self) -> Option<Vec<String>> {
        match &self.kind {
            ExprKind::Const { scope: None, name } => Some(vec![name.clone()]),
            ExprKind::Const {
                scope: Some(scope),
                name,
            } => {
                let mut path = scope.const_path()?;
                path.push(name.clone());
                Some(path)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// String with `#{...}` interpolations.
    Interp(Vec<StrPart>),
    Symbol(String),
    Array(Vec<Arg>),
    Hash(Vec<HashItem>),
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        exclusive: bool,
    },
    Local(String),
    Ivar(String),
    Const {
        scope: Option<Box<Expr>>,
        name: String,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    OpAssign {
        target: Box<Expr>,
        op: BinOp,
        value: Box<Expr>,
    },
    Call(Box<Call>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    If {
        cond: Box<Expr>,
        then_body: Vec<Expr>,
        else_body: Vec<Expr>,
    },
    While {
        cond: Box<Expr>,
        body: Vec<Expr>,
        until: bool,
    },
    Lambda(BlockExpr),
    /// A call recognized as markup by the translator.
    Markup(Box<MarkupNode>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Lit(String),
    Code(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    /// `||=`
    OrAssign,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Shl => "<<",
            BinOp::OrAssign => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub receiver: Option<Expr>,
    pub name: String,
    pub args: Vec<Arg>,
    pub block: Option<BlockExpr>,
    /// `&.` call: nil receiver short-circuits to nil.
    pub safe_nav: bool,
    pub span: Span,
}

impl Call {
    pub fn positional(&self) -> impl Iterator<Item = &Expr> {
        self.args.iter().filter_map(|arg| match arg {
            Arg::Positional(e) => Some(e),
            _ => None,
        })
    }

    pub fn keywords(&self) -> Option<&Vec<HashItem>> {
        self.args.iter().find_map(|arg| match arg {
            Arg::Keywords(items) => Some(items),
            _ => None,
        })
    }

    pub fn block_pass(&self) -> Option<&Expr> {
        self.args.iter().find_map(|arg| match arg {
            Arg::BlockPass(e) => Some(e),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(Expr),
    Splat(Expr),
    /// Trailing braceless hash: `key: v`, `"k" => v`, `**opts`.
    Keywords(Vec<HashItem>),
    BlockPass(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HashItem {
    Pair { key: Expr, value: Expr },
    Splat(Expr),
}

/// A block (`{ |x| ... }`, `do ... end`) or lambda body.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockExpr {
    pub params: Params,
    pub body: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub items: Vec<Param>,
    /// Set when the translator injects the synthetic leading buffer parameter.
    pub buffer: bool,
}

impl Params {
    pub fn block_param(&self) -> Option<&str> {
        self.items.iter().find_map(|p| match p.kind {
            ParamKind::Block => Some(p.name.as_str()),
            _ => None,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|p| p.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Required,
    Optional(Expr),
    Rest,
    Key,
    KeyOptional(Expr),
    KeyRest,
    Block,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(kind, Span::default())
    }

    #[test]
    fn test_const_path_collects_segments() {
        let path = expr(ExprKind::Const {
            scope: Some(Box::new(expr(ExprKind::Const {
                scope: None,
                name: "Layouts".into(),
            }))),
            name: "Page".into(),
        });
        assert_eq!(path.const_path(), Some(vec!["Layouts".into(), "Page".into()]));
        assert_eq!(expr(ExprKind::Local("x".into())).const_path(), None);
    }

    #[test]
    fn test_static_literals() {
        assert!(expr(ExprKind::Str("a".into())).is_static());
        assert!(
            expr(ExprKind::Array(vec![Arg::Positional(expr(ExprKind::Int(1)))])).is_static()
        );
        assert!(!expr(ExprKind::Local("a".into())).is_static());
    }
}
