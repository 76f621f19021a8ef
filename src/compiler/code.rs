//! Executable instruction tree produced by the code generator.
//!
//! Every [`Stmt`] records the line of the generated listing it was printed on, which
//! is the key into the unit's source map.

use std::rc::Rc;

use crate::markup::Escape;
use crate::value::Value;

use super::ast::BinOp;

pub type Body = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Line in the generated listing.
    pub line: usize,
    pub code: Code,
}

/// A block, lambda or compiled-unit body.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub params: Vec<ParamCode>,
    pub body: Body,
    /// Lambdas bind arguments strictly; blocks are lenient.
    pub lambda: bool,
    /// Takes the synthetic leading buffer parameter. Arity errors are reported with
    /// the buffer counted, to be hidden again by the backtrace translator.
    pub takes_buffer: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamCode {
    pub name: String,
    pub kind: ParamCodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamCodeKind {
    Required,
    Optional(Code),
    Rest,
    Key,
    KeyOptional(Code),
    KeyRest,
    Block,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgCode {
    Positional(Code),
    Splat(Code),
    Keywords(Vec<HashCode>),
    BlockPass(Code),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HashCode {
    Pair(Code, Code),
    Splat(Code),
}

/// Target of a direct invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Constant path resolved in the captured bindings.
    Const(Vec<String>),
    /// Any expression yielding a template or proc.
    Value(Box<Code>),
    /// Registered extension, optionally a helper of a module extension.
    Extension { key: String, helper: Option<String> },
    /// The template's child block parameter.
    BlockParam(String),
}

/// One piece of an output push.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Literal(String),
    /// A value converted with `to_s` and escaped.
    Escaped(Code, Escape),
    /// An attribute hash serialized at runtime.
    Attributes(Code, Escape),
    Markdown {
        text: Code,
        options: Option<Code>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Code {
    Lit(Value),
    /// String interpolation; each part is converted with `to_s`.
    Interp(Vec<Code>),
    Array(Vec<ArgCode>),
    Hash(Vec<HashCode>),
    Range {
        start: Box<Code>,
        end: Box<Code>,
        exclusive: bool,
    },
    Local(String),
    Ivar(String),
    Const(Vec<String>),
    SetLocal(String, Box<Code>),
    SetIvar(String, Box<Code>),
    /// `recv[args] = value` and `recv.name = value`
    SetIndex {
        recv: Box<Code>,
        args: Vec<ArgCode>,
        value: Box<Code>,
    },
    Call {
        recv: Option<Box<Code>>,
        name: String,
        args: Vec<ArgCode>,
        block: Option<Rc<Block>>,
        safe_nav: bool,
    },
    Not(Box<Code>),
    Neg(Box<Code>),
    Binary(BinOp, Box<Code>, Box<Code>),
    And(Box<Code>, Box<Code>),
    Or(Box<Code>, Box<Code>),
    If(Box<Code>, Body, Body),
    While {
        cond: Box<Code>,
        body: Body,
        until: bool,
    },
    Lambda(Rc<Block>),
    /// Statements evaluated for their output, in expression position.
    Do(Body),
    Push(Vec<Fragment>),
    Invoke {
        target: Target,
        args: Vec<ArgCode>,
        block: Option<Rc<Block>>,
    },
    /// Calls the child block; a missing block is an error when `required`.
    Yield {
        var: String,
        args: Vec<ArgCode>,
        required: bool,
    },
    BeginDefer,
    Defer(Rc<Block>),
    FlushDeferred,
    /// `tag(name, attrs, inner) { ... }` with a runtime tag name.
    DynamicTag {
        name: Box<Code>,
        attributes: Option<Box<Code>>,
        inner: Option<Box<Code>>,
        block: Option<Body>,
        escape: Escape,
        void_check: bool,
        self_close: bool,
    },
    /// JSON-mode tag: sets `key` on the current object, or appends when `key` is
    /// `None`. A block builds a nested value.
    JsonTag {
        key: Option<String>,
        value: Option<Box<Code>>,
        block: Option<Body>,
    },
}

impl Code {
    pub fn nil() -> Self {
        Code::Lit(Value::Nil)
    }

    pub fn boxed(self) -> Box<Code> {
        Box::new(self)
    }
}
