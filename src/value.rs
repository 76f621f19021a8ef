//! Dynamic values manipulated by templates.
//!
//! Strings and symbols are immutable shared text. Arrays and hashes are shared and
//! mutable (`<<`, `[]=`), so cloning a [`Value`] aliases the same container, as in
//! the template language itself.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::runtime::Proc;
use crate::template::Template;

/// A template-language value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Symbol(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Hash(Rc<RefCell<IndexMap<Key, Value>>>),
    Range {
        start: i64,
        end: i64,
        exclusive: bool,
    },
    Proc(Rc<Proc>),
    Template(Template),
}

/// A hash key. Floats, containers and procs cannot be keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Nil,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Symbol(Rc<str>),
}

impl Key {
    pub fn symbol(name: &str) -> Self {
        Key::Symbol(name.into())
    }

    /// Converts a value into a key, if it can be one.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Nil => Some(Key::Nil),
            Value::Bool(b) => Some(Key::Bool(*b)),
            Value::Int(n) => Some(Key::Int(*n)),
            Value::Str(s) => Some(Key::Str(s.clone())),
            Value::Symbol(s) => Some(Key::Symbol(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Nil => Value::Nil,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(n) => Value::Int(*n),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Symbol(s) => Value::Symbol(s.clone()),
        }
    }

    /// The key's text when it is a string or symbol.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Key::Str(s) | Key::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn inspect(&self) -> String {
        self.to_value().inspect()
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.into())
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn hash(entries: impl IntoIterator<Item = (Key, Value)>) -> Self {
        Value::Hash(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    pub fn symbol(name: &str) -> Self {
        Value::Symbol(name.into())
    }

    /// Wraps a Rust closure as a callable value. The closure receives the output
    /// buffer of whoever invokes it.
    pub fn native(
        f: impl Fn(&mut crate::Buffer, crate::Args) -> crate::Result<Value> + 'static,
    ) -> Self {
        Value::Proc(Rc::new(Proc::Native(Box::new(f))))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except `nil` and `false` is truthy.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Class name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "NilClass",
            Value::Bool(true) => "TrueClass",
            Value::Bool(false) => "FalseClass",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Str(_) => "String",
            Value::Symbol(_) => "Symbol",
            Value::Array(_) => "Array",
            Value::Hash(_) => "Hash",
            Value::Range { .. } => "Range",
            Value::Proc(_) => "Proc",
            Value::Template(_) => "Template",
        }
    }

    /// Receiver description for "undefined method" errors.
    pub fn describe(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            other => format!("an instance of {}", other.type_name()),
        }
    }

    /// String conversion used by interpolation and text output.
    pub fn to_s(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) | Value::Symbol(s) => s.to_string(),
            Value::Range {
                start,
                end,
                exclusive,
            } => format!("{start}{}{end}", if *exclusive { "..." } else { ".." }),
            _ => self.inspect(),
        }
    }

    /// Developer representation (`"a"`, `:sym`, `[1, 2]`, `{a: 1}`).
    pub fn inspect(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Str(s) => inspect_str(s),
            Value::Symbol(s) => format!(":{}", symbol_text(s)),
            Value::Array(items) => {
                let items = items.borrow();
                let parts: Vec<String> = items.iter().map(Value::inspect).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Hash(map) => {
                let map = map.borrow();
                if map.is_empty() {
                    return "{}".to_string();
                }
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| match k {
                        Key::Symbol(name) => format!("{}: {}", symbol_text(name), v.inspect()),
                        other => format!("{} => {}", other.inspect(), v.inspect()),
                    })
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Proc(_) => "#<Proc (lambda)>".to_string(),
            Value::Template(t) => format!("#<Template {}>", t.location()),
            other => other.to_s(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

fn symbol_text(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && name
            .trim_end_matches(['?', '!', '='])
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        inspect_str(name)
    }
}

fn inspect_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (
                Value::Range {
                    start: s1,
                    end: e1,
                    exclusive: x1,
                },
                Value::Range {
                    start: s2,
                    end: e2,
                    exclusive: x2,
                },
            ) => s1 == s2 && e1 == e2 && x1 == x2,
            (Value::Proc(a), Value::Proc(b)) => Rc::ptr_eq(a, b),
            (Value::Template(a), Value::Template(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_s())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<Template> for Value {
    fn from(t: Template) -> Self {
        Value::Template(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

/// Arguments for invoking a template, proc or child block.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: IndexMap<String, Value>,
    /// Child block, available to the callee's `render_yield`.
    pub block: Option<Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Sets a keyword argument.
    pub fn kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.keywords.insert(name.to_string(), value.into());
        self
    }

    /// Sets the child block.
    pub fn block(mut self, block: impl Into<Value>) -> Self {
        self.block = Some(block.into());
        self
    }

    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            ..Self::default()
        }
    }

    /// Layers call-time arguments on top of pre-applied ones: applied positionals
    /// come first, call-time keywords override applied ones, and a call-time block
    /// replaces an applied block.
    pub fn merge(applied: &Args, call: Args) -> Args {
        let mut positional = applied.positional.clone();
        positional.extend(call.positional);
        let mut keywords = applied.keywords.clone();
        keywords.extend(call.keywords);
        Args {
            positional,
            keywords,
            block: call.block.or_else(|| applied.block.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty() && self.block.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_s_follows_template_conventions() {
        assert_eq!(Value::Nil.to_s(), "");
        assert_eq!(Value::Float(1.0).to_s(), "1.0");
        assert_eq!(Value::Float(2.5).to_s(), "2.5");
        assert_eq!(Value::symbol("ok").to_s(), "ok");
        assert_eq!(
            Value::Range {
                start: 1,
                end: 3,
                exclusive: true
            }
            .to_s(),
            "1...3"
        );
    }

    #[test]
    fn test_inspect_uses_modern_hash_syntax() {
        let hash = Value::hash([
            (Key::symbol("a"), Value::Int(1)),
            (Key::from("b"), Value::array(vec![Value::Nil, Value::from("x")])),
        ]);
        assert_eq!(hash.inspect(), r#"{a: 1, "b" => [nil, "x"]}"#);
        assert_eq!(Value::symbol("data-x").inspect(), r#":"data-x""#);
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::from("1"));
    }

    #[test]
    fn test_arrays_alias_on_clone() {
        let a = Value::array(vec![]);
        let b = a.clone();
        if let Value::Array(items) = &b {
            items.borrow_mut().push(Value::Int(1));
        }
        assert_eq!(a.inspect(), "[1]");
    }

    #[test]
    fn test_merge_applied_arguments() {
        let applied = Args::new().arg(1).kwarg("a", 1).kwarg("b", 2);
        let merged = Args::merge(&applied, Args::new().arg(2).kwarg("a", 9));
        assert_eq!(merged.positional, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(merged.keywords["a"], Value::Int(9));
        assert_eq!(merged.keywords["b"], Value::Int(2));
    }
}
