//! Compile-level tests for the template patterns used across a typical site.
//!
//! Each test runs the full pipeline through [`compile`] and checks the listing,
//! the error surface or the registered source map.

use crate::compiler::source_map;
use crate::compiler::{CodegenConfig, CompileContext, CompileErrorKind, Compiled, compile};
use crate::error::{Error, Result};
use crate::extensions::Extensions;
use crate::markup::Mode;

fn compile_with(
    template: &str,
    mode: Mode,
    locals: &[&str],
    extensions: &Extensions,
) -> Result<Compiled> {
    let config = CodegenConfig::default();
    let ctx = CompileContext {
        file: "site.tpl",
        line_offset: 0,
        mode,
        locals: locals.iter().map(|l| l.to_string()).collect(),
        extensions,
        codegen: &config,
    };
    compile(template, &ctx)
}

fn test_template(name: &str, template: &str) -> Compiled {
    match compile_with(template, Mode::Html, &[], &Extensions::new()) {
        Ok(compiled) => {
            eprintln!("\n=== {name} ===\n{}", compiled.listing);
            compiled
        }
        Err(e) => panic!("{name} failed to compile: {e}"),
    }
}

// ==================== layouts ====================

#[test]
fn test_page_layout() {
    let compiled = test_template(
        "page_layout",
        r#"|heading, &content|
html5 {
  head {
    meta charset: "utf-8"
    title heading
  }
  body { render_children }
}"#,
    );
    assert!(
        compiled
            .listing
            .contains(r#"<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>"#),
        "{}",
        compiled.listing
    );
    assert!(compiled.listing.contains("content&.(__buffer__)"));
}

#[test]
fn test_card_partial() {
    let compiled = test_template(
        "card_partial",
        r#"|title, items:, active: nil|
div(class: ["card", active && "active"]) {
  h2 title
  ul {
    items.each_with_index { |item, i|
      li(class: i.even? ? "even" : "odd") { text item }
    }
  }
}"#,
    );
    assert!(compiled.listing.starts_with("->(__buffer__, title, items:, active: nil) do"));
    assert!(compiled.listing.contains("format_attributes"));
}

#[test]
fn test_static_page_is_a_single_push() {
    let compiled = test_template(
        "static_page",
        "div {\n  h1 \"Hello\"\n  p \"World\"\n  hr\n}",
    );
    let pushes = compiled
        .listing
        .lines()
        .filter(|line| line.contains("__buffer__ <<"))
        .count();
    assert_eq!(pushes, 1, "{}", compiled.listing);
    assert!(
        compiled
            .listing
            .contains(r#"__buffer__ << "<div><h1>Hello</h1><p>World</p><hr></div>""#)
    );
}

// ==================== composition ====================

#[test]
fn test_const_tag_invocation() {
    let compiled = test_template("const_tag", r#"Card("Menu", items: [1, 2]) { p "footer" }"#);
    assert!(compiled.listing.contains("Card.(__buffer__"), "{}", compiled.listing);
}

#[test]
fn test_render_lambda() {
    let compiled = test_template("render_lambda", "render ->(x) { p x }, 1");
    assert!(compiled.listing.contains("->(__buffer__, x) do"), "{}", compiled.listing);
}

#[test]
fn test_extension_calls() {
    let extensions = Extensions::new();
    extensions.register("icon", crate::Template::html("|name| i name"));
    extensions.register_module("ui", [("button", crate::Template::html("|label| button label"))]);

    let compiled = compile_with(
        "icon 'star'\nui.button 'Go'",
        Mode::Html,
        &[],
        &extensions,
    )
    .unwrap();
    assert!(compiled.listing.contains("__extensions__[:icon].(__buffer__"));
    assert!(compiled.listing.contains("__extensions__[:ui][:button].(__buffer__"));

    let plain = compile_with("icon 'star'", Mode::Html, &[], &Extensions::new()).unwrap();
    assert!(plain.listing.contains("<icon>star</icon>"), "{}", plain.listing);
}

#[test]
fn test_bound_locals_are_not_tags() {
    let compiled = compile_with("p greeting", Mode::Html, &["greeting"], &Extensions::new()).unwrap();
    assert!(compiled.listing.contains("escape_html(greeting)"), "{}", compiled.listing);

    let compiled = compile_with("greeting", Mode::Html, &[], &Extensions::new()).unwrap();
    assert!(compiled.listing.contains("<greeting></greeting>"), "{}", compiled.listing);
}

// ==================== modes ====================

#[test]
fn test_xml_feed() {
    let compiled = compile_with(
        "|entries|\nfeed(xmlns: \"http://www.w3.org/2005/Atom\") {\n  entries.each { |e| entry { title e } }\n  link {}\n}",
        Mode::Xml,
        &[],
        &Extensions::new(),
    )
    .unwrap();
    assert!(compiled.listing.contains("<link/>"), "{}", compiled.listing);
    assert!(compiled.listing.contains("escape_xml(e)"), "{}", compiled.listing);
}

#[test]
fn test_json_document() {
    let compiled = compile_with(
        "|user|\nname user[:name]\ntags { item 'a'\n item 'b' }",
        Mode::Json,
        &[],
        &Extensions::new(),
    )
    .unwrap();
    assert!(compiled.listing.contains("__buffer__.json_set(:name"), "{}", compiled.listing);
    assert!(compiled.listing.contains("__buffer__.json_push("));
}

// ==================== errors ====================

#[test]
fn test_syntax_error_is_uncompilable() {
    let err = compile_with("div {\n  p 1\n", Mode::Html, &[], &Extensions::new()).unwrap_err();
    match err {
        Error::Uncompilable { file, message } => {
            assert_eq!(file, "site.tpl");
            assert!(message.contains("--> site.tpl:"), "{message}");
        }
        other => panic!("expected Uncompilable, got {other:?}"),
    }
}

#[test]
fn test_void_content_error_has_excerpt() {
    let err = compile_with("div {\n  br 'x'\n}", Mode::Html, &[], &Extensions::new()).unwrap_err();
    let Error::Compile(err) = err else {
        panic!("expected a compile error");
    };
    assert_eq!(err.kind, CompileErrorKind::VoidElementContent);
    let rendered = err.to_string();
    assert!(rendered.contains("--> site.tpl:2:"), "{rendered}");
}

#[test]
fn test_block_invocation_with_block_is_error() {
    let err = compile_with("|&content|\ncontent.call { p 1 }", Mode::Html, &[], &Extensions::new())
        .unwrap_err();
    assert!(
        matches!(&err, Error::Compile(e) if e.kind == CompileErrorKind::BlockInvocationWithBlock),
        "{err:?}"
    );
}

#[test]
fn test_text_in_json_is_error() {
    let err = compile_with("text 'x'", Mode::Json, &[], &Extensions::new()).unwrap_err();
    assert!(matches!(&err, Error::Compile(e) if e.kind == CompileErrorKind::UnsupportedInMode));
}

// ==================== source maps ====================

#[test]
fn test_source_map_is_registered() {
    let compiled = test_template("source_map", "|items|\nul {\n  items.each { |i| li i }\n}");
    let registered = source_map::lookup(&compiled.source_map.id).expect("registered map");
    assert_eq!(*registered, *compiled.source_map);
    assert!(compiled.source_map.id.starts_with("compiled:"));
    assert!(compiled.source_map.id.ends_with(":site.tpl"));
    assert!(!compiled.source_map.is_empty());
}

#[test]
fn test_line_offset_shifts_locations() {
    let config = CodegenConfig::default();
    let extensions = Extensions::new();
    let ctx = CompileContext {
        file: "page.tpl",
        line_offset: 10,
        mode: Mode::Html,
        locals: Vec::new(),
        extensions: &extensions,
        codegen: &config,
    };
    let compiled = compile("|x|\nx.foo", &ctx).unwrap();
    let lines: Vec<usize> = (1..=compiled.listing.lines().count())
        .filter_map(|n| compiled.source_map.get(n).map(|loc| loc.line))
        .collect();
    assert!(lines.contains(&12), "{lines:?}");
}
