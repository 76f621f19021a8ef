//! Evaluator for the instruction tree.
//!
//! A [`Machine`] executes one block body: a compiled-unit entry, a lambda or a
//! block. Nested callables run on their own machine, sharing the output buffer.
//! When an error leaves a body, the machine appends a backtrace frame naming its
//! unit's synthetic identity and the listing line of the statement that failed, so
//! frames end up innermost first.

use std::rc::Rc;

use indexmap::IndexMap;

use super::buffer::Part;
use super::json::to_json;
use super::{Buffer, Closure, Env, Proc, methods};
use crate::compiler::code::{ArgCode, Block, Code, Fragment, HashCode, ParamCodeKind, Stmt, Target};
use crate::error::{Arity, Error, Frame, Result, RuntimeErrorKind};
use crate::extensions::Extensions;
use crate::markup::{self, Escape, Mode, format_attributes, tag_name};
use crate::value::{Args, Key, Value};

/// What a closure needs to know about the unit that created it.
#[derive(Debug)]
pub(crate) struct UnitInfo {
    /// Synthetic identity, the key into the source-map store.
    pub id: String,
    pub mode: Mode,
    pub extensions: Extensions,
    /// Captured bindings: locals and constants.
    pub bindings: Rc<IndexMap<String, Value>>,
}

/// How arguments are matched against parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    /// Compiled-unit entry: missing arguments are template errors, and arity counts
    /// include the buffer parameter.
    Unit,
    /// Strict, as for lambdas.
    Lambda { hidden_buffer: bool },
    /// Lenient, as for blocks: missing arguments are nil, extras are dropped and a
    /// single array argument is splatted across several parameters.
    Block,
}

pub(crate) struct Machine<'b> {
    buf: &'b mut Buffer,
    unit: Rc<UnitInfo>,
    env: Env,
    /// Listing line of the statement being executed; 0 before the body starts.
    line: usize,
}

/// Runs a compiled unit's entry block.
pub(crate) fn run_unit(
    buffer: &mut Buffer,
    unit: &Rc<UnitInfo>,
    entry: &Block,
    args: Args,
) -> Result<()> {
    let locals = unit
        .bindings
        .iter()
        .filter(|(name, _)| !starts_uppercase(name))
        .map(|(name, value)| (name.clone(), value.clone()));
    let mut machine = Machine {
        buf: buffer,
        unit: unit.clone(),
        env: Env::root(locals).child(),
        line: 0,
    };
    machine.bind(entry, args, Binding::Unit)?;
    let depth = machine.buf.defer_depth();
    match machine.exec(&entry.body) {
        Ok(_) => Ok(()),
        Err(err) => {
            machine.buf.abandon_defer(depth);
            Err(machine.framed(err, None))
        }
    }
}

/// Calls a closure with the caller's buffer.
pub(crate) fn call_closure(buffer: &mut Buffer, closure: &Closure, args: Args) -> Result<Value> {
    let block = &closure.block;
    let mut machine = Machine {
        buf: buffer,
        unit: closure.unit.clone(),
        env: closure.env.child(),
        line: 0,
    };
    let binding = if block.lambda {
        Binding::Lambda {
            hidden_buffer: block.takes_buffer,
        }
    } else {
        Binding::Block
    };
    machine.bind(block, args, binding)?;
    let label = if block.lambda { "lambda" } else { "block" };
    machine
        .exec(&block.body)
        .map_err(|err| machine.framed(err, Some(label)))
}

fn starts_uppercase(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn runtime(kind: RuntimeErrorKind) -> Error {
    Error::runtime(kind)
}

impl<'b> Machine<'b> {
    pub(super) fn buffer(&mut self) -> &mut Buffer {
        self.buf
    }

    /// Adds this machine's frame to a runtime error leaving its body.
    fn framed(&self, err: Error, label: Option<&str>) -> Error {
        match err {
            Error::Runtime(mut inner) if self.line > 0 => {
                inner.backtrace.push(Frame {
                    file: self.unit.id.clone(),
                    line: self.line,
                    label: label.map(str::to_string),
                });
                Error::Runtime(inner)
            }
            other => other,
        }
    }

    // =========================================================================
    // Argument binding
    // =========================================================================

    fn bind(&mut self, block: &Block, args: Args, binding: Binding) -> Result<()> {
        let params = &block.params;
        let Args {
            mut positional,
            mut keywords,
            block: child,
        } = args;

        let takes_keywords = params.iter().any(|p| {
            matches!(
                p.kind,
                ParamCodeKind::Key | ParamCodeKind::KeyOptional(_) | ParamCodeKind::KeyRest
            )
        });
        if !takes_keywords && !keywords.is_empty() {
            let hash = Value::hash(keywords.drain(..).map(|(k, v)| (Key::symbol(&k), v)));
            positional.push(hash);
        }

        let required = params
            .iter()
            .filter(|p| matches!(p.kind, ParamCodeKind::Required))
            .count();
        let optional = params
            .iter()
            .filter(|p| matches!(p.kind, ParamCodeKind::Optional(_)))
            .count();
        let rest = params.iter().any(|p| matches!(p.kind, ParamCodeKind::Rest));

        if binding == Binding::Block
            && required + optional > 1
            && let [Value::Array(items)] = positional.as_slice()
        {
            let items = items.borrow().clone();
            positional = items;
        }

        let given = positional.len();
        let max = (!rest).then_some(required + optional);
        let fits = given >= required && max.is_none_or(|m| given <= m);
        if !fits {
            match binding {
                Binding::Block => {}
                Binding::Unit if given < required => {
                    let name = params
                        .iter()
                        .filter(|p| matches!(p.kind, ParamCodeKind::Required))
                        .nth(given)
                        .map(|p| p.name.clone())
                        .unwrap_or_default();
                    return Err(Error::MissingArgument {
                        name,
                        keyword: false,
                    });
                }
                Binding::Unit => return Err(arity(given, required, max, true)),
                Binding::Lambda { hidden_buffer } => {
                    return Err(arity(given, required, max, hidden_buffer));
                }
            }
        }

        let mut optional_left = given.saturating_sub(required).min(optional);
        let mut values = positional.into_iter();
        for (index, param) in params.iter().enumerate() {
            let name = param.name.as_str();
            match &param.kind {
                ParamCodeKind::Required => {
                    self.env.declare(name, values.next().unwrap_or_default());
                }
                ParamCodeKind::Optional(default) => {
                    let value = if optional_left > 0 {
                        optional_left -= 1;
                        values.next().unwrap_or_default()
                    } else {
                        self.eval(default)?
                    };
                    self.env.declare(name, value);
                }
                ParamCodeKind::Rest => {
                    let after = params[index + 1..]
                        .iter()
                        .filter(|p| matches!(p.kind, ParamCodeKind::Required))
                        .count();
                    let remaining: Vec<Value> = values.by_ref().collect();
                    let split = remaining.len().saturating_sub(after);
                    let mut remaining = remaining.into_iter();
                    let taken: Vec<Value> = remaining.by_ref().take(split).collect();
                    self.env.declare(name, Value::array(taken));
                    values = remaining;
                }
                ParamCodeKind::Key => match keywords.shift_remove(name) {
                    Some(value) => self.env.declare(name, value),
                    None if binding == Binding::Unit => {
                        return Err(Error::MissingArgument {
                            name: name.to_string(),
                            keyword: true,
                        });
                    }
                    None => return Err(runtime(RuntimeErrorKind::MissingKeyword(name.into()))),
                },
                ParamCodeKind::KeyOptional(default) => {
                    let value = match keywords.shift_remove(name) {
                        Some(value) => value,
                        None => self.eval(default)?,
                    };
                    self.env.declare(name, value);
                }
                ParamCodeKind::KeyRest => {
                    let rest = Value::hash(keywords.drain(..).map(|(k, v)| (Key::symbol(&k), v)));
                    self.env.declare(name, rest);
                }
                ParamCodeKind::Block => {
                    self.env.declare(name, child.clone().unwrap_or_default());
                }
            }
        }

        if let Some(name) = keywords.keys().next() {
            return Err(runtime(RuntimeErrorKind::UnknownKeyword(format!(":{name}"))));
        }
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn exec(&mut self, body: &[Stmt]) -> Result<Value> {
        let mut last = Value::Nil;
        for stmt in body {
            self.line = stmt.line;
            last = self.eval(&stmt.code)?;
        }
        Ok(last)
    }

    fn eval(&mut self, code: &Code) -> Result<Value> {
        match code {
            Code::Lit(value) => Ok(value.clone()),
            Code::Interp(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&self.eval(part)?.to_s());
                }
                Ok(Value::from(out))
            }
            Code::Array(items) => Ok(Value::array(self.values(items)?)),
            Code::Hash(items) => self.hash(items),
            Code::Range {
                start,
                end,
                exclusive,
            } => match (self.eval(start)?, self.eval(end)?) {
                (Value::Int(start), Value::Int(end)) => Ok(Value::Range {
                    start,
                    end,
                    exclusive: *exclusive,
                }),
                _ => Err(runtime(RuntimeErrorKind::Type("bad value for range".into()))),
            },
            // Declared but not yet assigned.
            Code::Local(name) => Ok(self.env.get(name).unwrap_or_default()),
            Code::Ivar(name) => Ok(self.buf.ivar(name)),
            Code::Const(path) => self.constant(path),
            Code::SetLocal(name, value) => {
                let value = self.eval(value)?;
                self.env.set(name, value.clone());
                Ok(value)
            }
            Code::SetIvar(name, value) => {
                let value = self.eval(value)?;
                self.buf.set_ivar(name, value.clone());
                Ok(value)
            }
            Code::SetIndex { recv, args, value } => {
                let recv = self.eval(recv)?;
                let mut args = self.args(args)?;
                let value = self.eval(value)?;
                args.positional.push(value.clone());
                methods::call(self, recv, "[]=", args)?;
                Ok(value)
            }
            Code::Call {
                recv,
                name,
                args,
                block,
                safe_nav,
            } => {
                let recv = match recv {
                    Some(recv) => Some(self.eval(recv)?),
                    None => None,
                };
                if *safe_nav && recv.as_ref().is_some_and(Value::is_nil) {
                    return Ok(Value::Nil);
                }
                let mut args = self.args(args)?;
                if let Some(block) = block {
                    args.block = Some(Value::Proc(Rc::new(self.closure(block))));
                }
                match recv {
                    Some(recv) => methods::call(self, recv, name, args),
                    None => self.function(name, args),
                }
            }
            Code::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.truthy())),
            Code::Neg(inner) => methods::negate(self.eval(inner)?),
            Code::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                methods::binary(*op, lhs, rhs)
            }
            Code::And(lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                if lhs.truthy() { self.eval(rhs) } else { Ok(lhs) }
            }
            Code::Or(lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                if lhs.truthy() { Ok(lhs) } else { self.eval(rhs) }
            }
            Code::If(cond, then_body, else_body) => {
                if self.eval(cond)?.truthy() {
                    self.exec(then_body)
                } else {
                    self.exec(else_body)
                }
            }
            Code::While { cond, body, until } => {
                while self.eval(cond)?.truthy() != *until {
                    self.exec(body)?;
                }
                Ok(Value::Nil)
            }
            Code::Lambda(block) => Ok(Value::Proc(Rc::new(self.closure(block)))),
            Code::Do(body) => {
                self.exec(body)?;
                Ok(Value::Nil)
            }
            Code::Push(fragments) => {
                for fragment in fragments {
                    self.fragment(fragment)?;
                }
                Ok(Value::Nil)
            }
            Code::Invoke {
                target,
                args,
                block,
            } => {
                let callee = self.target(target)?;
                let mut args = self.args(args)?;
                if let Some(block) = block {
                    args.block = Some(Value::Proc(Rc::new(self.closure(block))));
                }
                self.invoke(callee, args)?;
                Ok(Value::Nil)
            }
            Code::Yield {
                var,
                args,
                required,
            } => {
                let block = self.env.get(var).unwrap_or_default();
                if block.is_nil() {
                    if *required {
                        return Err(runtime(RuntimeErrorKind::MissingBlock));
                    }
                    return Ok(Value::Nil);
                }
                let args = self.args(args)?;
                self.invoke(block, args)?;
                Ok(Value::Nil)
            }
            Code::BeginDefer => {
                self.buf.begin_defer();
                Ok(Value::Nil)
            }
            Code::Defer(block) => {
                let proc = Rc::new(self.closure(block));
                if self.buf.in_defer() {
                    self.buf.defer(proc);
                } else {
                    proc.call(self.buf, Args::new())?;
                }
                Ok(Value::Nil)
            }
            Code::FlushDeferred => {
                for part in self.buf.end_defer() {
                    match part {
                        Part::Text(text) => self.buf.push_str(&text),
                        Part::Deferred(proc) => {
                            proc.call(self.buf, Args::new())?;
                        }
                    }
                }
                Ok(Value::Nil)
            }
            Code::DynamicTag {
                name,
                attributes,
                inner,
                block,
                escape,
                void_check,
                self_close,
            } => {
                let name = match self.eval(name)? {
                    Value::Symbol(name) => tag_name(&name),
                    other => tag_name(&other.to_s()),
                };
                let attributes = match attributes {
                    Some(code) => format_attributes(&self.eval(code)?, *escape)?,
                    None => String::new(),
                };
                let inner = match inner {
                    Some(code) => Some(self.eval(code)?.to_s()),
                    None => None,
                };
                let has_block = block.as_ref().is_some_and(|b| !b.is_empty());
                let is_void = *void_check && markup::VOID_ELEMENTS.contains(&name.as_str());
                if is_void && (inner.is_some() || has_block) {
                    return Err(runtime(RuntimeErrorKind::VoidContent(name)));
                }
                self.buf.push_str(&format!("<{name}{attributes}"));
                if is_void {
                    self.buf.push_str(">");
                    return Ok(Value::Nil);
                }
                if *self_close && inner.is_none() && !has_block {
                    self.buf.push_str("/>");
                    return Ok(Value::Nil);
                }
                self.buf.push_str(">");
                if let Some(inner) = inner {
                    let escape = if self.unit.mode.is_raw_text(&name) {
                        Escape::None
                    } else {
                        *escape
                    };
                    self.buf.push_str(&escape.apply(&inner));
                }
                if let Some(body) = block {
                    self.exec(body)?;
                }
                self.buf.push_str(&format!("</{name}>"));
                Ok(Value::Nil)
            }
            Code::JsonTag { key, value, block } => {
                let value = match (block, value) {
                    (Some(body), _) => {
                        self.buf.json_begin();
                        let result = self.exec(body);
                        let nested = self.buf.json_end();
                        result?;
                        nested
                    }
                    (None, Some(code)) => to_json(&self.eval(code)?),
                    (None, None) => serde_json::Value::Null,
                };
                match key {
                    Some(key) => self.buf.json_set(key, value)?,
                    None => self.buf.json_push(value)?,
                }
                Ok(Value::Nil)
            }
        }
    }

    fn fragment(&mut self, fragment: &Fragment) -> Result<()> {
        match fragment {
            Fragment::Literal(text) => self.buf.push_str(text),
            Fragment::Escaped(code, escape) => {
                let text = self.eval(code)?.to_s();
                self.buf.push_str(&escape.apply(&text));
            }
            Fragment::Attributes(code, escape) => {
                let attributes = format_attributes(&self.eval(code)?, *escape)?;
                self.buf.push_str(&attributes);
            }
            Fragment::Markdown { text, options } => {
                let text = self.eval(text)?.to_s();
                let defaults = markup::markdown_defaults();
                let options = match options {
                    Some(code) => defaults.merged(&self.eval(code)?)?,
                    None => defaults,
                };
                let html = markup::markdown(&text, &options)?;
                self.buf.push_str(&html);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Values
    // =========================================================================

    fn closure(&self, block: &Rc<Block>) -> Proc {
        Proc::Closure(Closure {
            block: block.clone(),
            env: self.env.clone(),
            unit: self.unit.clone(),
        })
    }

    fn values(&mut self, items: &[ArgCode]) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                ArgCode::Positional(code) => out.push(self.eval(code)?),
                ArgCode::Splat(code) => splat_into(&mut out, self.eval(code)?),
                ArgCode::Keywords(items) => out.push(self.hash(items)?),
                ArgCode::BlockPass(_) => {}
            }
        }
        Ok(out)
    }

    fn hash(&mut self, items: &[HashCode]) -> Result<Value> {
        let mut map = IndexMap::with_capacity(items.len());
        for item in items {
            match item {
                HashCode::Pair(key, value) => {
                    let key = self.eval(key)?;
                    let key = Key::from_value(&key).ok_or_else(|| unhashable(&key))?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                HashCode::Splat(code) => match self.eval(code)? {
                    Value::Hash(other) => {
                        map.extend(other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    Value::Nil => {}
                    other => return Err(no_implicit_hash(&other)),
                },
            }
        }
        Ok(Value::hash(map))
    }

    fn args(&mut self, items: &[ArgCode]) -> Result<Args> {
        let mut args = Args::new();
        for item in items {
            match item {
                ArgCode::Positional(code) => args.positional.push(self.eval(code)?),
                ArgCode::Splat(code) => splat_into(&mut args.positional, self.eval(code)?),
                ArgCode::Keywords(items) => {
                    let Value::Hash(map) = self.hash(items)? else {
                        continue;
                    };
                    for (key, value) in map.borrow().iter() {
                        let name = match key.as_name() {
                            Some(name) => name.to_string(),
                            None => key.to_value().to_s(),
                        };
                        args.keywords.insert(name, value.clone());
                    }
                }
                ArgCode::BlockPass(code) => {
                    let block = self.eval(code)?;
                    args.block = (!block.is_nil()).then_some(block);
                }
            }
        }
        Ok(args)
    }

    /// Resolves a constant path in the captured bindings. `A::B` is looked up as a
    /// binding of that exact name first, then as key `:B` of the hash bound to `A`.
    fn constant(&self, path: &[String]) -> Result<Value> {
        let joined = path.join("::");
        if let Some(value) = self.unit.bindings.get(&joined) {
            return Ok(value.clone());
        }
        let undefined = || runtime(RuntimeErrorKind::UndefinedConstant(joined.clone()));
        let (first, rest) = path.split_first().ok_or_else(undefined)?;
        let mut value = self.unit.bindings.get(first).cloned().ok_or_else(undefined)?;
        for segment in rest {
            let next = match &value {
                Value::Hash(map) => {
                    let map = map.borrow();
                    map.get(&Key::symbol(segment))
                        .or_else(|| map.get(&Key::from(segment.as_str())))
                        .cloned()
                }
                _ => None,
            };
            value = next.ok_or_else(undefined)?;
        }
        Ok(value)
    }

    fn target(&mut self, target: &Target) -> Result<Value> {
        match target {
            Target::Const(path) => self.constant(path),
            Target::Value(code) => self.eval(code),
            Target::Extension { key, helper } => self
                .unit
                .extensions
                .resolve(key, helper.as_deref())
                .map(Value::Template)
                .ok_or_else(|| {
                    let name = match helper {
                        Some(helper) => format!("{key}.{helper}"),
                        None => key.clone(),
                    };
                    runtime(RuntimeErrorKind::UnknownExtension(name))
                }),
            Target::BlockParam(name) => match self.env.get(name).unwrap_or_default() {
                Value::Nil => Err(runtime(RuntimeErrorKind::NoMethod {
                    method: "call".into(),
                    receiver: "nil".into(),
                })),
                block => Ok(block),
            },
        }
    }

    /// Invokes a template or proc with the current buffer.
    pub(super) fn invoke(&mut self, callee: Value, args: Args) -> Result<Value> {
        match callee {
            Value::Template(template) => {
                template.invoke(self.buf, args)?;
                Ok(Value::Nil)
            }
            Value::Proc(proc) => proc.call(self.buf, args),
            other => Err(runtime(RuntimeErrorKind::NotCallable(other.describe()))),
        }
    }

    /// Receiverless calls that reach the evaluator.
    fn function(&mut self, name: &str, args: Args) -> Result<Value> {
        match name {
            "raise" => {
                let message = args
                    .positional
                    .first()
                    .map_or_else(|| "unhandled exception".to_string(), Value::to_s);
                Err(runtime(RuntimeErrorKind::Raised(message)))
            }
            _ => match self.env.get(name) {
                Some(callee) => self.invoke(callee, args),
                None => Err(runtime(RuntimeErrorKind::UndefinedVariable(name.into()))),
            },
        }
    }
}

fn splat_into(out: &mut Vec<Value>, value: Value) {
    match value {
        Value::Array(items) => out.extend(items.borrow().iter().cloned()),
        Value::Nil => {}
        other => out.push(other),
    }
}

fn arity(given: usize, required: usize, max: Option<usize>, hidden_buffer: bool) -> Error {
    let shift = usize::from(hidden_buffer);
    runtime(RuntimeErrorKind::Arity {
        given: given + shift,
        expected: Arity {
            min: required + shift,
            max: max.map(|m| m + shift),
        },
        hidden_buffer,
    })
}

fn unhashable(value: &Value) -> Error {
    runtime(RuntimeErrorKind::Type(format!(
        "{} cannot be used as a hash key",
        value.type_name()
    )))
}

fn no_implicit_hash(value: &Value) -> Error {
    runtime(RuntimeErrorKind::Type(format!(
        "no implicit conversion of {} into Hash",
        value.type_name()
    )))
}
