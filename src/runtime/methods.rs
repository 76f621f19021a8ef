//! Methods and operators on template values.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

use super::vm::Machine;
use crate::compiler::ast::BinOp;
use crate::error::{Arity, Error, Result, RuntimeErrorKind};
use crate::value::{Args, Key, Value};

fn runtime(kind: RuntimeErrorKind) -> Error {
    Error::runtime(kind)
}

fn type_error(message: String) -> Error {
    runtime(RuntimeErrorKind::Type(message))
}

fn no_method(name: &str, recv: &Value) -> Error {
    runtime(RuntimeErrorKind::NoMethod {
        method: name.to_string(),
        receiver: recv.describe(),
    })
}

/// Checks a method's positional argument count.
fn expect(args: &Args, min: usize, max: usize) -> Result<()> {
    let given = args.positional.len();
    if given < min || given > max {
        return Err(runtime(RuntimeErrorKind::Arity {
            given,
            expected: Arity {
                min,
                max: Some(max),
            },
            hidden_buffer: false,
        }));
    }
    Ok(())
}

fn arg(args: &Args, index: usize) -> Value {
    args.positional.get(index).cloned().unwrap_or_default()
}

fn block(name: &str, args: &Args) -> Result<Value> {
    args.block
        .clone()
        .ok_or_else(|| type_error(format!("no block given ({name})")))
}

fn operator(name: &str) -> Option<BinOp> {
    Some(match name {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Rem,
        "==" => BinOp::Eq,
        "!=" => BinOp::NotEq,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "<<" => BinOp::Shl,
        _ => return None,
    })
}

/// Calls `name` on `recv`.
pub(super) fn call(m: &mut Machine<'_>, recv: Value, name: &str, args: Args) -> Result<Value> {
    if let Some(op) = operator(name) {
        expect(&args, 1, 1)?;
        return binary(op, recv, arg(&args, 0));
    }
    match name {
        "to_s" => return Ok(Value::from(recv.to_s())),
        "inspect" => return Ok(Value::from(recv.inspect())),
        "nil?" => return Ok(Value::Bool(recv.is_nil())),
        _ => {}
    }
    match &recv {
        Value::Str(s) => string_method(s, name, &args),
        Value::Symbol(s) => match name {
            "to_sym" => Ok(recv.clone()),
            "size" | "length" => Ok(Value::from(s.chars().count())),
            "upcase" => Ok(Value::symbol(&s.to_uppercase())),
            "downcase" => Ok(Value::symbol(&s.to_lowercase())),
            _ => Err(no_method(name, &recv)),
        },
        Value::Int(n) => int_method(m, *n, name, &args),
        Value::Float(f) => float_method(*f, name, &args),
        Value::Array(items) => array_method(m, items, name, args),
        Value::Hash(map) => hash_method(m, map, name, args),
        Value::Range { .. } => {
            let items = range_items(&recv)?;
            match name {
                "to_a" => Ok(Value::array(items)),
                "first" if args.positional.is_empty() => match &recv {
                    Value::Range { start, .. } => Ok(Value::Int(*start)),
                    _ => Ok(Value::Nil),
                },
                "each" => {
                    array_method(m, &Rc::new(RefCell::new(items)), name, args)?;
                    Ok(recv)
                }
                _ => array_method(m, &Rc::new(RefCell::new(items)), name, args),
            }
        }
        Value::Proc(proc) => match name {
            "call" => proc.call(m.buffer(), args),
            "lambda?" => Ok(Value::Bool(proc.is_lambda())),
            _ => Err(no_method(name, &recv)),
        },
        Value::Template(template) => match name {
            "render" => Ok(Value::from(template.render(args)?)),
            "apply" => Ok(Value::Template(template.apply(args))),
            "call" => {
                m.invoke(recv.clone(), args)?;
                Ok(Value::Nil)
            }
            _ => Err(no_method(name, &recv)),
        },
        Value::Nil => match name {
            "to_a" => Ok(Value::array(Vec::new())),
            "to_i" => Ok(Value::Int(0)),
            _ => Err(no_method(name, &recv)),
        },
        Value::Bool(_) => Err(no_method(name, &recv)),
    }
}

fn string_method(s: &str, name: &str, args: &Args) -> Result<Value> {
    Ok(match name {
        "size" | "length" => {
            expect(args, 0, 0)?;
            Value::from(s.chars().count())
        }
        "empty?" => Value::Bool(s.is_empty()),
        "upcase" => Value::from(s.to_uppercase()),
        "downcase" => Value::from(s.to_lowercase()),
        "capitalize" => {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => Value::from(
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                ),
                None => Value::from(""),
            }
        }
        "strip" => Value::from(s.trim()),
        "reverse" => Value::from(s.chars().rev().collect::<String>()),
        "include?" => {
            expect(args, 1, 1)?;
            Value::Bool(s.contains(&*arg(args, 0).to_s()))
        }
        "start_with?" => Value::Bool(
            args.positional
                .iter()
                .any(|prefix| s.starts_with(&*prefix.to_s())),
        ),
        "end_with?" => Value::Bool(
            args.positional
                .iter()
                .any(|suffix| s.ends_with(&*suffix.to_s())),
        ),
        "split" => {
            expect(args, 0, 1)?;
            let parts: Vec<Value> = match args.positional.first() {
                Some(sep) if !sep.is_nil() && sep.to_s() != " " => {
                    let sep = sep.to_s();
                    s.split(sep.as_str()).map(Value::from).collect()
                }
                _ => s.split_whitespace().map(Value::from).collect(),
            };
            Value::array(parts)
        }
        "to_i" => Value::Int(leading_int(s)),
        "to_f" => Value::Float(leading_float(s)),
        "to_sym" => Value::symbol(s),
        "[]" => {
            expect(args, 1, 1)?;
            let chars: Vec<char> = s.chars().collect();
            match arg(args, 0) {
                Value::Int(i) => index(chars.len(), i)
                    .map(|i| Value::from(chars[i].to_string()))
                    .unwrap_or_default(),
                other => return Err(type_error(format!(
                    "no implicit conversion of {} into Integer",
                    other.type_name()
                ))),
            }
        }
        _ => return Err(no_method(name, &Value::from(s))),
    })
}

fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    s[..end].parse().unwrap_or(0)
}

fn leading_float(s: &str) -> f64 {
    let s = s.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in s.char_indices() {
        let ok = c.is_ascii_digit()
            || (i == 0 && (c == '-' || c == '+'))
            || (c == '.' && !seen_dot && {
                seen_dot = true;
                true
            });
        if !ok {
            break;
        }
        end = i + c.len_utf8();
    }
    s[..end].trim_end_matches('.').parse().unwrap_or(0.0)
}

fn int_method(m: &mut Machine<'_>, n: i64, name: &str, args: &Args) -> Result<Value> {
    Ok(match name {
        "to_i" => Value::Int(n),
        "to_f" => Value::Float(n as f64),
        "even?" => Value::Bool(n % 2 == 0),
        "odd?" => Value::Bool(n % 2 != 0),
        "zero?" => Value::Bool(n == 0),
        "abs" => Value::Int(n.saturating_abs()),
        "times" => {
            let block = block(name, args)?;
            for i in 0..n {
                m.invoke(block.clone(), Args::new().arg(i))?;
            }
            Value::Int(n)
        }
        "upto" => {
            expect(args, 1, 1)?;
            let block = block(name, args)?;
            let Value::Int(limit) = arg(args, 0) else {
                return Err(type_error("upto expects an Integer".into()));
            };
            for i in n..=limit {
                m.invoke(block.clone(), Args::new().arg(i))?;
            }
            Value::Int(n)
        }
        _ => return Err(no_method(name, &Value::Int(n))),
    })
}

fn float_method(f: f64, name: &str, args: &Args) -> Result<Value> {
    Ok(match name {
        "to_i" => Value::Int(f.trunc() as i64),
        "to_f" => Value::Float(f),
        "zero?" => Value::Bool(f == 0.0),
        "abs" => Value::Float(f.abs()),
        "round" => {
            expect(args, 0, 1)?;
            match arg(args, 0) {
                Value::Int(digits) if digits > 0 => {
                    let scale = 10f64.powi(i32::try_from(digits).unwrap_or(i32::MAX));
                    Value::Float((f * scale).round() / scale)
                }
                _ => Value::Int(f.round() as i64),
            }
        }
        _ => return Err(no_method(name, &Value::Float(f))),
    })
}

/// Resolves a possibly negative index against a length.
fn index(len: usize, i: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let i = if i < 0 { len + i } else { i };
    (0..len).contains(&i).then(|| usize::try_from(i).ok()).flatten()
}

fn range_items(range: &Value) -> Result<Vec<Value>> {
    let Value::Range {
        start,
        end,
        exclusive,
    } = range
    else {
        return Ok(Vec::new());
    };
    let end = if *exclusive { *end } else { end.saturating_add(1) };
    Ok((*start..end).map(Value::Int).collect())
}

fn array_method(
    m: &mut Machine<'_>,
    items: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    args: Args,
) -> Result<Value> {
    let recv = Value::Array(items.clone());
    // Iterate over a snapshot so blocks may mutate the array.
    let snapshot = || items.borrow().clone();
    Ok(match name {
        "size" | "length" => Value::from(items.borrow().len()),
        "empty?" => Value::Bool(items.borrow().is_empty()),
        "first" | "last" => {
            expect(&args, 0, 1)?;
            let items = items.borrow();
            match arg(&args, 0) {
                Value::Int(n) => {
                    let n = usize::try_from(n).unwrap_or(0).min(items.len());
                    let slice = if name == "first" {
                        &items[..n]
                    } else {
                        &items[items.len() - n..]
                    };
                    Value::array(slice.to_vec())
                }
                _ if name == "first" => items.first().cloned().unwrap_or_default(),
                _ => items.last().cloned().unwrap_or_default(),
            }
        }
        "[]" => {
            expect(&args, 1, 1)?;
            let items = items.borrow();
            match arg(&args, 0) {
                Value::Int(i) => index(items.len(), i)
                    .map(|i| items[i].clone())
                    .unwrap_or_default(),
                other => {
                    return Err(type_error(format!(
                        "no implicit conversion of {} into Integer",
                        other.type_name()
                    )));
                }
            }
        }
        "[]=" => {
            expect(&args, 2, 2)?;
            let Value::Int(i) = arg(&args, 0) else {
                return Err(type_error("array index must be an Integer".into()));
            };
            let value = arg(&args, 1);
            let mut items = items.borrow_mut();
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let i = if i < 0 { len + i } else { i };
            let i = usize::try_from(i)
                .map_err(|_| runtime(RuntimeErrorKind::Raised(format!("index {i} too small for array"))))?;
            if i >= items.len() {
                items.resize(i + 1, Value::Nil);
            }
            items[i] = value.clone();
            value
        }
        "push" => {
            items.borrow_mut().extend(args.positional);
            recv
        }
        "include?" => {
            expect(&args, 1, 1)?;
            let needle = arg(&args, 0);
            Value::Bool(items.borrow().contains(&needle))
        }
        "reverse" => Value::array(snapshot().into_iter().rev().collect()),
        "compact" => Value::array(snapshot().into_iter().filter(|v| !v.is_nil()).collect()),
        "join" => {
            expect(&args, 0, 1)?;
            let sep = args.positional.first().map(Value::to_s).unwrap_or_default();
            let parts: Vec<String> = items.borrow().iter().map(join_part).collect();
            Value::from(parts.join(&sep))
        }
        "each" => {
            let block = block(name, &args)?;
            for item in snapshot() {
                m.invoke(block.clone(), Args::positional(vec![item]))?;
            }
            recv
        }
        "each_with_index" => {
            let block = block(name, &args)?;
            for (i, item) in snapshot().into_iter().enumerate() {
                m.invoke(block.clone(), Args::positional(vec![item, Value::from(i)]))?;
            }
            recv
        }
        "map" => {
            let block = block(name, &args)?;
            let mut out = Vec::with_capacity(items.borrow().len());
            for item in snapshot() {
                out.push(m.invoke(block.clone(), Args::positional(vec![item]))?);
            }
            Value::array(out)
        }
        "select" | "reject" => {
            let block = block(name, &args)?;
            let keep = name == "select";
            let mut out = Vec::new();
            for item in snapshot() {
                let verdict = m.invoke(block.clone(), Args::positional(vec![item.clone()]))?;
                if verdict.truthy() == keep {
                    out.push(item);
                }
            }
            Value::array(out)
        }
        "any?" => match args.block.clone() {
            Some(block) => {
                for item in snapshot() {
                    if m.invoke(block.clone(), Args::positional(vec![item]))?.truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Value::Bool(false)
            }
            None => Value::Bool(items.borrow().iter().any(Value::truthy)),
        },
        "sum" => {
            let mut total = args.positional.first().cloned().unwrap_or(Value::Int(0));
            for item in snapshot() {
                total = binary(BinOp::Add, total, item)?;
            }
            total
        }
        "sort" => {
            let mut sorted = snapshot();
            let mut failure = None;
            sorted.sort_by(|a, b| {
                compare(a, b).unwrap_or_else(|| {
                    failure.get_or_insert_with(|| comparison_failed(a, b));
                    Ordering::Equal
                })
            });
            if let Some(err) = failure {
                return Err(err);
            }
            Value::array(sorted)
        }
        "min" | "max" => {
            let mut best: Option<Value> = None;
            for item in snapshot() {
                best = Some(match best {
                    None => item,
                    Some(current) => {
                        let ord = compare(&item, &current)
                            .ok_or_else(|| comparison_failed(&item, &current))?;
                        let better = if name == "min" {
                            ord == Ordering::Less
                        } else {
                            ord == Ordering::Greater
                        };
                        if better { item } else { current }
                    }
                });
            }
            best.unwrap_or_default()
        }
        "to_a" => recv,
        _ => return Err(no_method(name, &recv)),
    })
}

fn join_part(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .borrow()
            .iter()
            .map(join_part)
            .collect::<Vec<_>>()
            .join(""),
        other => other.to_s(),
    }
}

fn hash_method(
    m: &mut Machine<'_>,
    map: &Rc<RefCell<IndexMap<Key, Value>>>,
    name: &str,
    args: Args,
) -> Result<Value> {
    let recv = Value::Hash(map.clone());
    let pairs = || -> Vec<Value> {
        map.borrow()
            .iter()
            .map(|(k, v)| Value::array(vec![k.to_value(), v.clone()]))
            .collect()
    };
    let key_arg = |args: &Args| -> Result<Key> {
        let key = arg(args, 0);
        Key::from_value(&key)
            .ok_or_else(|| type_error(format!("{} cannot be used as a hash key", key.type_name())))
    };
    Ok(match name {
        "size" | "length" => Value::from(map.borrow().len()),
        "empty?" => Value::Bool(map.borrow().is_empty()),
        "keys" => Value::array(map.borrow().keys().map(Key::to_value).collect()),
        "values" => Value::array(map.borrow().values().cloned().collect()),
        "[]" => {
            expect(&args, 1, 1)?;
            map.borrow().get(&key_arg(&args)?).cloned().unwrap_or_default()
        }
        "[]=" => {
            expect(&args, 2, 2)?;
            let key = key_arg(&args)?;
            let value = arg(&args, 1);
            map.borrow_mut().insert(key, value.clone());
            value
        }
        "key?" | "include?" => {
            expect(&args, 1, 1)?;
            Value::Bool(map.borrow().contains_key(&key_arg(&args)?))
        }
        "fetch" => {
            expect(&args, 1, 2)?;
            let key = key_arg(&args)?;
            match map.borrow().get(&key) {
                Some(value) => value.clone(),
                None if args.positional.len() == 2 => arg(&args, 1),
                None => {
                    return Err(runtime(RuntimeErrorKind::Raised(format!(
                        "key not found: {}",
                        key.inspect()
                    ))));
                }
            }
        }
        "merge" => {
            let mut merged = map.borrow().clone();
            for other in &args.positional {
                match other {
                    Value::Hash(other) => {
                        merged.extend(other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    other => {
                        return Err(type_error(format!(
                            "no implicit conversion of {} into Hash",
                            other.type_name()
                        )));
                    }
                }
            }
            Value::hash(merged)
        }
        "to_a" => Value::array(pairs()),
        "each" => {
            let block = block(name, &args)?;
            for pair in pairs() {
                m.invoke(block.clone(), Args::positional(vec![pair]))?;
            }
            recv
        }
        "map" | "any?" => array_method(m, &Rc::new(RefCell::new(pairs())), name, args)?,
        "select" | "reject" => {
            let block = block(name, &args)?;
            let keep = name == "select";
            let entries: Vec<(Key, Value)> = map
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut out = IndexMap::new();
            for (key, value) in entries {
                let pair = Value::array(vec![key.to_value(), value.clone()]);
                if m.invoke(block.clone(), Args::positional(vec![pair]))?.truthy() == keep {
                    out.insert(key, value);
                }
            }
            Value::hash(out)
        }
        _ => return Err(no_method(name, &recv)),
    })
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) | (Value::Symbol(x), Value::Symbol(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn comparison_failed(a: &Value, b: &Value) -> Error {
    type_error(format!(
        "comparison of {} with {} failed",
        a.type_name(),
        b.inspect()
    ))
}

fn coerce_failed(lhs: &Value, rhs: &Value) -> Error {
    match lhs {
        Value::Str(_) => type_error(format!(
            "no implicit conversion of {} into String",
            rhs.type_name()
        )),
        Value::Array(_) => type_error(format!(
            "no implicit conversion of {} into Array",
            rhs.type_name()
        )),
        _ => type_error(format!(
            "{} can't be coerced into {}",
            rhs.type_name(),
            lhs.type_name()
        )),
    }
}

fn overflow() -> Error {
    type_error("integer overflow".into())
}

/// Integer division rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

/// Remainder with the sign of the divisor.
fn floor_rem(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && (r < 0) != (b < 0) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn float_pair(lhs: &Value, rhs: &Value) -> Option<(f64, f64)> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Float(b)) => Some((*a as f64, *b)),
        (Value::Float(a), Value::Int(b)) => Some((*a, *b as f64)),
        (Value::Float(a), Value::Float(b)) => Some((*a, *b)),
        _ => None,
    }
}

/// Evaluates a binary operator.
pub(crate) fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinOp::NotEq => return Ok(Value::Bool(lhs != rhs)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = compare(&lhs, &rhs).ok_or_else(|| comparison_failed(&lhs, &rhs))?;
            return Ok(Value::Bool(match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }));
        }
        _ => {}
    }

    if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div | BinOp::Rem if b == 0 => {
                return Err(runtime(RuntimeErrorKind::ZeroDivision));
            }
            BinOp::Div => floor_div(a, b),
            BinOp::Rem => floor_rem(a, b),
            BinOp::Shl => u32::try_from(b).ok().and_then(|b| a.checked_shl(b)),
            _ => None,
        };
        return result.map(Value::Int).ok_or_else(overflow);
    }

    if let Some((a, b)) = float_pair(&lhs, &rhs) {
        return match op {
            BinOp::Add => Ok(Value::Float(a + b)),
            BinOp::Sub => Ok(Value::Float(a - b)),
            BinOp::Mul => Ok(Value::Float(a * b)),
            BinOp::Div => Ok(Value::Float(a / b)),
            BinOp::Rem => Ok(Value::Float(a - b * (a / b).floor())),
            _ => Err(no_method(op.symbol(), &lhs)),
        };
    }

    match (op, &lhs) {
        (BinOp::Add | BinOp::Shl, Value::Str(a)) => match &rhs {
            Value::Str(b) => Ok(Value::from(format!("{a}{b}"))),
            _ => Err(coerce_failed(&lhs, &rhs)),
        },
        (BinOp::Mul, Value::Str(a)) => match &rhs {
            Value::Int(n) if *n >= 0 => Ok(Value::from(a.repeat(usize::try_from(*n).unwrap_or(0)))),
            Value::Int(_) => Err(type_error("negative argument".into())),
            _ => Err(coerce_failed(&lhs, &rhs)),
        },
        (BinOp::Shl, Value::Array(items)) => {
            items.borrow_mut().push(rhs);
            Ok(lhs)
        }
        (BinOp::Add, Value::Array(a)) => match &rhs {
            Value::Array(b) => {
                let mut out = a.borrow().clone();
                out.extend(b.borrow().iter().cloned());
                Ok(Value::array(out))
            }
            _ => Err(coerce_failed(&lhs, &rhs)),
        },
        (BinOp::Sub, Value::Array(a)) => match &rhs {
            Value::Array(b) => {
                let b = b.borrow();
                Ok(Value::array(
                    a.borrow().iter().filter(|v| !b.contains(v)).cloned().collect(),
                ))
            }
            _ => Err(coerce_failed(&lhs, &rhs)),
        },
        (_, Value::Int(_) | Value::Float(_)) => Err(coerce_failed(&lhs, &rhs)),
        _ => Err(no_method(op.symbol(), &lhs)),
    }
}

/// Unary minus.
pub(crate) fn negate(value: Value) -> Result<Value> {
    match value {
        Value::Int(n) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(no_method("-@", &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    #[test]
    fn test_integer_arithmetic_floors() {
        assert_eq!(binary(BinOp::Div, int(-7), int(2)).unwrap(), int(-4));
        assert_eq!(binary(BinOp::Rem, int(-7), int(2)).unwrap(), int(1));
        assert_eq!(binary(BinOp::Div, int(7), int(2)).unwrap(), int(3));
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary(BinOp::Div, int(1), int(0)).unwrap_err();
        assert_eq!(err.to_string(), "divided by 0");
    }

    #[test]
    fn test_mixed_numbers_promote_to_float() {
        assert_eq!(binary(BinOp::Add, int(1), Value::Float(0.5)).unwrap(), Value::Float(1.5));
        assert_eq!(binary(BinOp::Lt, int(1), Value::Float(1.5)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_string_operators() {
        assert_eq!(
            binary(BinOp::Add, Value::from("a"), Value::from("b")).unwrap(),
            Value::from("ab")
        );
        assert_eq!(binary(BinOp::Mul, Value::from("ab"), int(2)).unwrap(), Value::from("abab"));
        let err = binary(BinOp::Add, Value::from("a"), int(1)).unwrap_err();
        assert_eq!(err.to_string(), "no implicit conversion of Integer into String");
        let err = binary(BinOp::Add, int(1), Value::from("a")).unwrap_err();
        assert_eq!(err.to_string(), "String can't be coerced into Integer");
    }

    #[test]
    fn test_shovel_mutates_arrays() {
        let list = Value::array(vec![int(1)]);
        binary(BinOp::Shl, list.clone(), int(2)).unwrap();
        assert_eq!(list.inspect(), "[1, 2]");
    }

    #[test]
    fn test_undefined_operator_on_nil() {
        let err = binary(BinOp::Add, Value::Nil, int(1)).unwrap_err();
        assert_eq!(err.to_string(), "undefined method `+` for nil");
    }

    #[test]
    fn test_comparison_of_mismatched_types_fails() {
        let err = binary(BinOp::Lt, int(1), Value::from("a")).unwrap_err();
        assert_eq!(err.to_string(), "comparison of Integer with \"a\" failed");
    }

    #[test]
    fn test_leading_number_parsing() {
        assert_eq!(leading_int("  42abc"), 42);
        assert_eq!(leading_int("-3"), -3);
        assert_eq!(leading_int("x"), 0);
        assert_eq!(leading_float("2.5kg"), 2.5);
        assert_eq!(leading_float("3."), 3.0);
    }

    #[test]
    fn test_negative_indexes() {
        assert_eq!(index(3, -1), Some(2));
        assert_eq!(index(3, 3), None);
        assert_eq!(index(3, -4), None);
    }
}
