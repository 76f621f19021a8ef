//! Markup primitives shared by the code generator and the runtime.
//!
//! Escaping, the void-element and raw-text tables, tag-name conversion, attribute
//! serialization and the Markdown bridge. Everything here is a pure function except
//! the process-wide Markdown defaults.

use std::borrow::Cow;
use std::sync::{LazyLock, RwLock};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, RuntimeErrorKind};
use crate::value::{Key, Value};

/// HTML elements that never have content or a close tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// HTML elements whose inner text is emitted without escaping.
pub const RAW_TEXT_ELEMENTS: &[&str] = &["style", "script"];

/// Doctype emitted by the `html` and `html5` builtins.
pub const HTML_DOCTYPE: &str = "<!DOCTYPE html>";

const URI_RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Rendering mode of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Html,
    Xml,
    Json,
}

impl Mode {
    pub fn is_void(self, tag: &str) -> bool {
        self == Mode::Html && VOID_ELEMENTS.contains(&tag)
    }

    pub fn is_raw_text(self, tag: &str) -> bool {
        self == Mode::Html && RAW_TEXT_ELEMENTS.contains(&tag)
    }

    /// The escaping applied to text content in this mode.
    pub fn escape(self) -> Escape {
        match self {
            Mode::Xml => Escape::Xml,
            _ => Escape::Html,
        }
    }
}

/// An escaping function selected at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    Html,
    Xml,
    None,
}

impl Escape {
    pub fn apply<'a>(self, text: &'a str) -> Cow<'a, str> {
        match self {
            Escape::Html => escape_html(text),
            Escape::Xml => escape_xml(text),
            Escape::None => Cow::Borrowed(text),
        }
    }

    /// Name of the helper as it appears in generated listings.
    pub fn helper(self) -> Option<&'static str> {
        match self {
            Escape::Html => Some("escape_html"),
            Escape::Xml => Some("escape_xml"),
            Escape::None => None,
        }
    }
}

/// Escapes `&`, `<`, `>`, `"` and `'` for HTML text and attribute values.
pub fn escape_html(text: &str) -> Cow<'_, str> {
    html_escape::encode_quoted_attribute(text)
}

/// Escapes text for XML documents. XML shares the HTML entity set for these characters.
pub fn escape_xml(text: &str) -> Cow<'_, str> {
    html_escape::encode_quoted_attribute(text)
}

/// Percent-encodes everything except unreserved URI characters.
pub fn escape_uri(text: &str) -> String {
    utf8_percent_encode(text, URI_RESERVED).to_string()
}

/// Converts a tag or attribute symbol to its markup spelling (`data_foo` → `data-foo`).
pub fn tag_name(name: &str) -> String {
    name.replace('_', "-")
}

fn attribute_name(key: &Key) -> Option<String> {
    match key {
        Key::Symbol(name) => Some(tag_name(name)),
        Key::Str(name) => Some(name.to_string()),
        Key::Int(n) => Some(n.to_string()),
        Key::Bool(_) | Key::Nil => None,
    }
}

/// Serializes one attribute, with a leading space. Returns `None` when the attribute
/// must be omitted (`false` or `nil`).
pub fn format_attribute(name: &str, value: &Value, escape: Escape) -> Option<String> {
    match value {
        Value::Nil | Value::Bool(false) => None,
        Value::Bool(true) => Some(format!(" {name}")),
        Value::Array(items) => {
            let joined = items
                .borrow()
                .iter()
                .filter(|v| !matches!(v, Value::Nil))
                .map(Value::to_s)
                .collect::<Vec<_>>()
                .join(" ");
            Some(format!(" {name}=\"{}\"", escape.apply(&joined)))
        }
        other => Some(format!(" {name}=\"{}\"", escape.apply(&other.to_s()))),
    }
}

/// Serializes an attribute map evaluated at runtime.
pub fn format_attributes(attributes: &Value, escape: Escape) -> Result<String> {
    let Value::Hash(map) = attributes else {
        if matches!(attributes, Value::Nil) {
            return Ok(String::new());
        }
        return Err(Error::runtime(RuntimeErrorKind::Type(format!(
            "attributes must be a hash, got {}",
            attributes.type_name()
        ))));
    };
    let mut out = String::new();
    for (key, value) in map.borrow().iter() {
        let Some(name) = attribute_name(key) else {
            continue;
        };
        if let Some(attr) = format_attribute(&name, value, escape) {
            out.push_str(&attr);
        }
    }
    Ok(out)
}

/// Options for the Markdown builtin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkdownOptions {
    /// GitHub flavoured extensions (tables, strikethrough, autolinks, task lists).
    pub gfm: bool,
    pub allow_dangerous_html: bool,
    pub allow_dangerous_protocol: bool,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            gfm: true,
            allow_dangerous_html: true,
            allow_dangerous_protocol: false,
        }
    }
}

impl MarkdownOptions {
    /// Layers per-call overrides from a keyword hash on top of `self`.
    pub fn merged(&self, overrides: &Value) -> Result<Self> {
        let mut options = self.clone();
        let Value::Hash(map) = overrides else {
            return Ok(options);
        };
        for (key, value) in map.borrow().iter() {
            let flag = value.truthy();
            match key.as_name() {
                Some("gfm") => options.gfm = flag,
                Some("allow_dangerous_html") => options.allow_dangerous_html = flag,
                Some("allow_dangerous_protocol") => options.allow_dangerous_protocol = flag,
                _ => {
                    return Err(Error::runtime(RuntimeErrorKind::Type(format!(
                        "unknown markdown option {}",
                        key.inspect()
                    ))));
                }
            }
        }
        Ok(options)
    }

    fn to_markdown(&self) -> markdown::Options {
        let mut options = if self.gfm {
            markdown::Options::gfm()
        } else {
            markdown::Options::default()
        };
        options.compile.allow_dangerous_html = self.allow_dangerous_html;
        options.compile.allow_dangerous_protocol = self.allow_dangerous_protocol;
        options
    }
}

static MARKDOWN_DEFAULTS: LazyLock<RwLock<MarkdownOptions>> =
    LazyLock::new(|| RwLock::new(MarkdownOptions::default()));

/// Replaces the process-wide Markdown defaults.
pub fn set_markdown_defaults(options: MarkdownOptions) {
    match MARKDOWN_DEFAULTS.write() {
        Ok(mut guard) => *guard = options,
        Err(poisoned) => *poisoned.into_inner() = options,
    }
}

/// Returns a copy of the process-wide Markdown defaults.
pub fn markdown_defaults() -> MarkdownOptions {
    match MARKDOWN_DEFAULTS.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Converts Markdown to HTML.
pub fn markdown(text: &str, options: &MarkdownOptions) -> Result<String> {
    markdown::to_html_with_options(text, &options.to_markdown())
        .map_err(|msg| Error::runtime(RuntimeErrorKind::Markdown(msg.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escapes_markup_characters() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_escapes_uri_components() {
        assert_eq!(escape_uri("a b&c/d"), "a%20b%26c%2Fd");
        assert_eq!(escape_uri("safe-_.~"), "safe-_.~");
    }

    #[test]
    fn test_converts_tag_names() {
        assert_eq!(tag_name("data_foo"), "data-foo");
        assert_eq!(tag_name("div"), "div");
    }

    #[test]
    fn test_void_elements_only_in_html() {
        assert!(Mode::Html.is_void("br"));
        assert!(!Mode::Xml.is_void("br"));
        assert!(Mode::Html.is_raw_text("script"));
        assert!(!Mode::Xml.is_raw_text("script"));
    }

    #[test]
    fn test_boolean_attributes() {
        let attrs = Value::hash([
            (Key::symbol("checked"), Value::Bool(true)),
            (Key::symbol("disabled"), Value::Bool(false)),
            (Key::symbol("data_id"), Value::Nil),
        ]);
        assert_eq!(format_attributes(&attrs, Escape::Html).unwrap(), " checked");
    }

    #[test]
    fn test_array_attributes_are_space_joined() {
        let attrs = Value::hash([(
            Key::symbol("class"),
            Value::array(vec![Value::from("a"), Value::from("b")]),
        )]);
        assert_eq!(format_attributes(&attrs, Escape::Html).unwrap(), " class=\"a b\"");
    }

    #[test]
    fn test_string_keys_are_verbatim() {
        let attrs = Value::hash([(Key::from("aria_label"), Value::from("<x>"))]);
        assert_eq!(
            format_attributes(&attrs, Escape::Html).unwrap(),
            " aria_label=\"&lt;x&gt;\""
        );
    }

    #[test]
    fn test_markdown_overrides_merge_on_defaults() {
        let overrides = Value::hash([(Key::symbol("gfm"), Value::Bool(false))]);
        let options = MarkdownOptions::default().merged(&overrides).unwrap();
        assert!(!options.gfm);
        assert!(options.allow_dangerous_html);
    }

    #[test]
    fn test_markdown_renders_paragraphs() {
        let html = markdown("# Hi\n\n*there*", &MarkdownOptions::default()).unwrap();
        assert!(html.contains("<h1>Hi</h1>"), "got {html}");
        assert!(html.contains("<em>there</em>"), "got {html}");
    }

    #[test]
    fn test_markdown_options_deserialize_with_defaults() {
        let options: MarkdownOptions = serde_json::from_str(r#"{"gfm": false}"#).unwrap();
        assert!(!options.gfm);
        assert!(options.allow_dangerous_html);
    }
}
