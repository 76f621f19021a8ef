//! Template units and their compiled form.
//!
//! A [`Template`] is an immutable handle to a source, its rendering mode and the
//! bindings it captured. It compiles lazily on first use and keeps the result for
//! the rest of its life. [`Template::apply`] derives a new unit that pre-binds
//! arguments without recompiling anything.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::compiler::code::Block;
use crate::compiler::source_map::translate_error;
use crate::compiler::{self, CodegenConfig, CompileContext, SourceMap};
use crate::error::Result;
use crate::extensions::Extensions;
use crate::markup::Mode;
use crate::runtime::{Buffer, UnitInfo, run_unit};
use crate::value::{Args, Value};

/// A template unit. Cloning is cheap and preserves identity.
#[derive(Clone)]
pub struct Template(Rc<Inner>);

struct Inner {
    body: Body,
    compiled: OnceCell<Rc<CompiledUnit>>,
}

enum Body {
    Source(Source),
    Applied { base: Template, args: Args },
}

#[derive(Clone)]
struct Source {
    text: String,
    mode: Mode,
    file: String,
    /// Line of the file on which the source starts.
    line: usize,
    bindings: IndexMap<String, Value>,
    extensions: Option<Extensions>,
    codegen: CodegenConfig,
}

impl Template {
    /// Creates a template. The file and line default to the caller's location.
    #[track_caller]
    pub fn new(mode: Mode, source: impl Into<String>) -> Self {
        let caller = std::panic::Location::caller();
        Self::from_source(Source {
            text: source.into(),
            mode,
            file: caller.file().to_string(),
            line: usize::try_from(caller.line()).unwrap_or(1),
            bindings: IndexMap::new(),
            extensions: None,
            codegen: CodegenConfig::default(),
        })
    }

    #[track_caller]
    pub fn html(source: impl Into<String>) -> Self {
        Self::new(Mode::Html, source)
    }

    #[track_caller]
    pub fn xml(source: impl Into<String>) -> Self {
        Self::new(Mode::Xml, source)
    }

    #[track_caller]
    pub fn json(source: impl Into<String>) -> Self {
        Self::new(Mode::Json, source)
    }

    fn from_source(source: Source) -> Self {
        Template(Rc::new(Inner {
            body: Body::Source(source),
            compiled: OnceCell::new(),
        }))
    }

    /// Rebuilds a source template with changed options. Applied templates are
    /// returned unchanged.
    fn with_source(self, f: impl FnOnce(&mut Source)) -> Self {
        match &self.0.body {
            Body::Source(source) => {
                let mut source = source.clone();
                f(&mut source);
                Self::from_source(source)
            }
            Body::Applied { .. } => self,
        }
    }

    /// Sets the file name reported in errors and backtraces. The source is taken to
    /// start on line 1 of that file.
    pub fn file(self, file: &str) -> Self {
        self.with_source(|s| {
            s.file = file.to_string();
            s.line = 1;
        })
    }

    /// Sets the line of the file on which the source starts.
    pub fn line(self, line: usize) -> Self {
        self.with_source(|s| s.line = line.max(1))
    }

    /// Captures a binding. Lowercase names are readable as locals; capitalized names
    /// are constants, usable as template tags (`Card(...)`).
    pub fn bind(self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.with_source(|s| {
            s.bindings.insert(name.to_string(), value);
        })
    }

    /// Uses `extensions` instead of the per-thread default registry.
    pub fn extensions(self, extensions: &Extensions) -> Self {
        self.with_source(|s| s.extensions = Some(extensions.clone()))
    }

    pub fn codegen(self, config: CodegenConfig) -> Self {
        self.with_source(|s| s.codegen = config)
    }

    pub fn mode(&self) -> Mode {
        match &self.0.body {
            Body::Source(source) => source.mode,
            Body::Applied { base, .. } => base.mode(),
        }
    }

    /// `file:line` where the source starts.
    pub fn location(&self) -> String {
        match &self.0.body {
            Body::Source(source) => format!("{}:{}", source.file, source.line),
            Body::Applied { base, .. } => base.location(),
        }
    }

    pub fn source(&self) -> &str {
        match &self.0.body {
            Body::Source(source) => &source.text,
            Body::Applied { base, .. } => base.source(),
        }
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Template) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Compiles the template, or returns the cached unit.
    pub fn compile(&self) -> Result<Rc<CompiledUnit>> {
        let source = match &self.0.body {
            Body::Applied { base, .. } => return base.compile(),
            Body::Source(source) => source,
        };
        if let Some(unit) = self.0.compiled.get() {
            return Ok(unit.clone());
        }
        let unit = Rc::new(CompiledUnit::compile(source)?);
        Ok(self.0.compiled.get_or_init(|| unit).clone())
    }

    /// The generated listing.
    pub fn compiled_code(&self) -> Result<String> {
        Ok(self.compile()?.listing().to_string())
    }

    /// Renders into a fresh buffer and returns the output. JSON templates return the
    /// serialized document.
    pub fn render(&self, args: Args) -> Result<String> {
        let mut buffer = Buffer::new();
        self.render_to_buffer(&mut buffer, args)?;
        Ok(match self.mode() {
            Mode::Json => buffer.json_output(),
            Mode::Html | Mode::Xml => buffer.into_string(),
        })
    }

    /// Renders with a child block, available to the template's `render_yield`.
    pub fn render_with_block(&self, args: Args, block: impl Into<Value>) -> Result<String> {
        self.render(args.block(block))
    }

    /// Renders into an existing buffer.
    pub fn render_to_buffer(&self, buffer: &mut Buffer, args: Args) -> Result<()> {
        self.invoke(buffer, args).map_err(translate_error)
    }

    /// Derives a unit with pre-bound arguments. Call-time positionals come after the
    /// applied ones, call-time keywords override applied ones.
    pub fn apply(&self, args: Args) -> Template {
        Template(Rc::new(Inner {
            body: Body::Applied {
                base: self.clone(),
                args,
            },
            compiled: OnceCell::new(),
        }))
    }

    pub(crate) fn invoke(&self, buffer: &mut Buffer, args: Args) -> Result<()> {
        match &self.0.body {
            Body::Applied {
                base,
                args: applied,
            } => base.invoke(buffer, Args::merge(applied, args)),
            Body::Source(_) => self.compile()?.invoke(buffer, args),
        }
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("location", &self.location())
            .field("mode", &self.mode())
            .field("applied", &matches!(self.0.body, Body::Applied { .. }))
            .finish()
    }
}

/// The executable form of a template.
pub struct CompiledUnit {
    entry: Rc<Block>,
    listing: String,
    source_map: Arc<SourceMap>,
    info: Rc<UnitInfo>,
    wrap: bool,
}

impl CompiledUnit {
    fn compile(source: &Source) -> Result<Self> {
        let extensions = source.extensions.clone().unwrap_or_else(Extensions::global);
        let ctx = CompileContext {
            file: &source.file,
            line_offset: source.line.saturating_sub(1),
            mode: source.mode,
            locals: source
                .bindings
                .keys()
                .filter(|name| !name.starts_with(char::is_uppercase))
                .cloned()
                .collect(),
            extensions: &extensions,
            codegen: &source.codegen,
        };
        let compiled = compiler::compile(&source.text, &ctx)?;
        let info = Rc::new(UnitInfo {
            id: compiled.source_map.id.clone(),
            mode: source.mode,
            extensions,
            bindings: Rc::new(source.bindings.clone()),
        });
        Ok(Self {
            entry: compiled.entry,
            listing: compiled.listing,
            source_map: compiled.source_map,
            info,
            wrap: source.codegen.wrap,
        })
    }

    /// Runs the unit, appending its output to `buffer`.
    pub fn invoke(&self, buffer: &mut Buffer, args: Args) -> Result<()> {
        let result = run_unit(buffer, &self.info, &self.entry, args);
        if self.wrap {
            result.map_err(translate_error)
        } else {
            result
        }
    }

    pub fn listing(&self) -> &str {
        &self.listing
    }

    /// Synthetic identity used in untranslated backtraces.
    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("id", &self.info.id)
            .field("mode", &self.info.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_is_cached() {
        let template = Template::html("p 1");
        let a = template.compile().unwrap();
        let b = template.compile().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_identical_sources_are_distinct_units() {
        let a = Template::html("p 1");
        let b = Template::html("p 1");
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
    }

    #[test]
    fn test_default_location_is_the_caller() {
        let template = Template::html("p 1");
        assert!(template.location().starts_with(file!()), "{}", template.location());
    }

    #[test]
    fn test_applied_templates_share_the_compiled_unit() {
        let base = Template::html("|a:| text a");
        let applied = base.apply(Args::new().kwarg("a", 1));
        assert!(Rc::ptr_eq(&base.compile().unwrap(), &applied.compile().unwrap()));
        assert_eq!(applied.location(), base.location());
    }

    #[test]
    fn test_builders_produce_new_units() {
        let template = Template::html("p x");
        let bound = template.clone().bind("x", 1);
        assert!(!template.ptr_eq(&bound));
        assert_eq!(bound.render(Args::new()).unwrap(), "<p>1</p>");
    }

    #[test]
    fn test_file_resets_the_start_line() {
        let template = Template::html("p 1").file("card.tpl");
        assert_eq!(template.location(), "card.tpl:1");
        assert_eq!(template.line(4).location(), "card.tpl:4");
    }
}
