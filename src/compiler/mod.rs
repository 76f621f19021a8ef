//! Compiler infrastructure for the template language.
//!
//! The pipeline runs in four stages:
//! - Lexer: tokenizes the source, tracking whitespace so command calls
//!   (`p -1`) can be told apart from binary operators (`p - 1`)
//! - Parser: builds the [`ast`] with lexical scope tracking
//! - Translator: rewrites markup-shaped calls into [`nodes::MarkupNode`]s
//! - Codegen: emits the listing, the [`code`] instruction tree and the source map

pub mod ast;
pub(crate) mod code;
mod codegen;
mod error_fmt;
mod lexer;
pub(crate) mod nodes;
mod parser;
pub mod source_map;
mod syntax;
#[cfg(test)]
mod tests;
mod translate;

use std::rc::Rc;
use std::sync::Arc;

pub use codegen::{CodegenConfig, CompileError, CompileErrorKind, CompileResult};
pub use parser::{ParseError, ParseErrorKind, parse};
pub use source_map::SourceMap;

use crate::error::{Error, Result};
use crate::extensions::Extensions;
use crate::markup::Mode;
use code::Block;
use translate::Translator;

/// Everything the compiler needs besides the source itself.
#[derive(Debug, Clone)]
pub struct CompileContext<'a> {
    /// File name recorded in the source map and in error excerpts.
    pub file: &'a str,
    /// Added to every template line number.
    pub line_offset: usize,
    pub mode: Mode,
    /// Names bound in the captured environment, readable as locals.
    pub locals: Vec<String>,
    pub extensions: &'a Extensions,
    pub codegen: &'a CodegenConfig,
}

/// A compiled template body.
#[derive(Debug)]
pub struct Compiled {
    pub listing: String,
    pub(crate) entry: Rc<Block>,
    pub source_map: Arc<SourceMap>,
}

/// Compiles a template source.
///
/// Syntax errors become [`Error::Uncompilable`] with a rendered excerpt; translation
/// and generation errors become [`Error::Compile`].
pub fn compile(source: &str, ctx: &CompileContext<'_>) -> Result<Compiled> {
    let ast = parse(source, ctx.locals.iter().map(String::as_str)).map_err(|err| {
        Error::Uncompilable {
            file: ctx.file.to_string(),
            message: err.format_with_source(source, ctx.file, ctx.line_offset),
        }
    })?;

    let generated = Translator::new(ctx.mode, ctx.extensions)
        .translate(ast)
        .and_then(|ast| {
            codegen::generate(&ast, source, ctx.file, ctx.line_offset, ctx.mode, ctx.codegen)
        })
        .map_err(|err| err.with_source(source, ctx.file, ctx.line_offset))?;

    let source_map = generated.source_map.register();
    tracing::debug!(
        id = %source_map.id,
        mode = ?ctx.mode,
        lines = generated.lines,
        "compiled template"
    );
    tracing::trace!(listing = %generated.listing, "generated listing");

    Ok(Compiled {
        listing: generated.listing,
        entry: generated.entry,
        source_map,
    })
}
