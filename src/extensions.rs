//! Registry of template extensions.
//!
//! An extension is either a single template, called as `name(...)`, or a module of
//! named helper templates, called as `name.helper(...)`. The translator consults the
//! registry to recognize extension calls; the runtime resolves them when invoked.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::template::Template;

#[derive(Debug, Clone)]
enum Extension {
    Unit(Template),
    Module(IndexMap<String, Template>),
}

/// A shared, cheaply clonable extension registry.
#[derive(Debug, Clone, Default)]
pub struct Extensions(Rc<RefCell<IndexMap<String, Extension>>>);

thread_local! {
    static DEFAULT: Extensions = Extensions::new();
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry used by templates that were not given one explicitly.
    pub fn global() -> Self {
        DEFAULT.with(Clone::clone)
    }

    /// Registers a single-template extension, replacing any extension of that name.
    pub fn register(&self, name: &str, template: Template) {
        tracing::debug!(name, "registered extension");
        self.0
            .borrow_mut()
            .insert(name.to_string(), Extension::Unit(template));
    }

    /// Registers a module of helper templates.
    pub fn register_module<'a>(
        &self,
        name: &str,
        helpers: impl IntoIterator<Item = (&'a str, Template)>,
    ) {
        let helpers: IndexMap<String, Template> = helpers
            .into_iter()
            .map(|(helper, template)| (helper.to_string(), template))
            .collect();
        tracing::debug!(name, helpers = helpers.len(), "registered extension module");
        self.0
            .borrow_mut()
            .insert(name.to_string(), Extension::Module(helpers));
    }

    /// True if `name` is a single-template extension.
    pub fn has_unit(&self, name: &str) -> bool {
        matches!(self.0.borrow().get(name), Some(Extension::Unit(_)))
    }

    /// True if `module` is a module extension with a helper named `helper`.
    pub fn has_helper(&self, module: &str, helper: &str) -> bool {
        match self.0.borrow().get(module) {
            Some(Extension::Module(helpers)) => helpers.contains_key(helper),
            _ => false,
        }
    }

    /// Looks up an extension template.
    pub fn resolve(&self, name: &str, helper: Option<&str>) -> Option<Template> {
        match (self.0.borrow().get(name)?, helper) {
            (Extension::Unit(template), None) => Some(template.clone()),
            (Extension::Module(helpers), Some(helper)) => helpers.get(helper).cloned(),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &Extensions) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_and_modules() {
        let extensions = Extensions::new();
        extensions.register("icon", Template::html("|name| i name"));
        extensions.register_module("ui", [("button", Template::html("|label| button label"))]);

        assert!(extensions.has_unit("icon"));
        assert!(!extensions.has_unit("ui"));
        assert!(extensions.has_helper("ui", "button"));
        assert!(!extensions.has_helper("ui", "card"));
        assert!(!extensions.has_helper("icon", "button"));
        assert!(extensions.resolve("icon", None).is_some());
        assert!(extensions.resolve("icon", Some("x")).is_none());
        assert!(extensions.resolve("ui", Some("button")).is_some());
    }

    #[test]
    fn test_clones_share_registrations() {
        let extensions = Extensions::new();
        let alias = extensions.clone();
        alias.register("icon", Template::html("i"));
        assert!(extensions.has_unit("icon"));
        assert!(extensions.ptr_eq(&alias));
    }

    #[test]
    fn test_global_registry_is_shared_per_thread() {
        assert!(Extensions::global().ptr_eq(&Extensions::global()));
    }
}
