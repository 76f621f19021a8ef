//! Composable HTML, XML and JSON templates for tagcraft.
//!
//! A template is a small program written in a Ruby-flavoured expression language in
//! which unknown receiverless calls are tags:
//!
//! ```ignore
//! let card = Template::html(r#"
//! |title, items:|
//! div(class: "card") {
//!   h1 title
//!   ul { items.each { |i| li i } }
//! }
//! "#);
//! let html = card.render(Args::new().arg("Menu").kwarg("items", vec!["a", "b"]))?;
//! ```
//!
//! # Architecture
//!
//! Templates are compiled, not interpreted node by node. The compiler recognizes
//! markup-shaped calls (tags, sub-template invocations, `render_yield`, `defer`),
//! rewrites them into specialized nodes and generates an instruction list in which
//! adjacent static markup is folded into a single literal push. A source map ties
//! generated lines back to `file:line` so runtime errors point at the template.
//!
//! - [`compiler`] - lexer, parser, translator and code generator
//! - [`runtime`] - the output [`Buffer`] and the machine executing compiled units
//! - [`markup`] - escaping, attribute formatting and the Markdown bridge
//! - [`Template`] - the public unit: `render`, `apply`, `compile`
//!
//! # Composition
//!
//! Capitalized calls invoke other templates bound as constants, and registered
//! [`Extensions`] make templates callable by name:
//!
//! ```ignore
//! let page = Template::html("html { body { Card(\"Menu\", items: [1]) } }")
//!     .bind("Card", card);
//! ```

pub mod compiler;
mod error;
mod extensions;
pub mod markup;
pub mod runtime;
mod template;
mod value;

pub use compiler::{CodegenConfig, CompileError, CompileErrorKind};
pub use error::{Arity, Error, Frame, Result, RuntimeError, RuntimeErrorKind};
pub use extensions::Extensions;
pub use markup::{MarkdownOptions, Mode};
pub use runtime::{Buffer, Proc};
pub use template::{CompiledUnit, Template};
pub use value::{Args, Key, Value};
