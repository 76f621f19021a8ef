//! Runtime for compiled template units.
//!
//! - [`Buffer`]: the output sink passed to every invocation, with deferred-output
//!   scopes, the JSON document builder and the per-render instance variables.
//! - [`vm`]: evaluates the instruction tree produced by the code generator.
//! - [`methods`]: the methods and operators available on template values.
//! - [`json`]: conversion of template values into JSON.

mod buffer;
mod env;
mod json;
mod methods;
mod vm;

use std::fmt;
use std::rc::Rc;

pub use buffer::Buffer;
pub(crate) use env::Env;
pub(crate) use vm::{UnitInfo, run_unit};

use crate::compiler::code::Block;
use crate::error::Result;
use crate::value::{Args, Value};

/// A callable value: a closure created by template code, or a Rust function.
pub enum Proc {
    Closure(Closure),
    Native(Box<dyn Fn(&mut Buffer, Args) -> Result<Value>>),
}

/// A block or lambda together with the environment it was created in.
pub struct Closure {
    pub(crate) block: Rc<Block>,
    pub(crate) env: Env,
    pub(crate) unit: Rc<UnitInfo>,
}

impl Proc {
    /// Calls the proc, writing any output into `buffer`.
    pub fn call(&self, buffer: &mut Buffer, args: Args) -> Result<Value> {
        match self {
            Proc::Closure(closure) => vm::call_closure(buffer, closure, args),
            Proc::Native(f) => f(buffer, args),
        }
    }

    /// True for lambdas, which check their arguments strictly.
    pub fn is_lambda(&self) -> bool {
        match self {
            Proc::Closure(closure) => closure.block.lambda,
            Proc::Native(_) => true,
        }
    }
}

impl fmt::Debug for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proc::Closure(closure) => f
                .debug_struct("Closure")
                .field("params", &closure.block.params.len())
                .field("lambda", &closure.block.lambda)
                .field("unit", &closure.unit.id)
                .finish(),
            Proc::Native(_) => f.write_str("Native"),
        }
    }
}
