use serde_json::json;
use tagcraft::{Args, CompileErrorKind, Error, Key, Template, Value};

fn render_json(template: &Template, args: Args) -> serde_json::Value {
    let out = template
        .render(args)
        .unwrap_or_else(|e| panic!("render failed: {e}"));
    serde_json::from_str(&out).unwrap_or_else(|e| panic!("invalid JSON {out:?}: {e}"))
}

fn user() -> Value {
    Value::hash([
        (Key::symbol("name"), Value::from("Ann")),
        (Key::symbol("age"), Value::from(31)),
        (Key::symbol("admin"), Value::from(false)),
    ])
}

#[test]
fn keys_and_values() {
    let template = Template::json("|user|\nname user[:name]\nage user[:age]\nadmin user[:admin]");
    assert_eq!(
        render_json(&template, Args::new().arg(user())),
        json!({"name": "Ann", "age": 31, "admin": false})
    );
}

#[test]
fn keys_keep_insertion_order() {
    let out = Template::json("zeta 1\nalpha 2").render(Args::new()).unwrap();
    assert_eq!(out, r#"{"zeta":1,"alpha":2}"#);
}

#[test]
fn nested_objects_and_arrays() {
    let template = Template::json(
        "|labels|\npost {\n  title \"Hello\"\n  tags { labels.each { |t| item t } }\n}\ncount labels.size",
    );
    let labels = Value::from(vec![Value::from("a"), Value::from("b")]);
    assert_eq!(
        render_json(&template, Args::new().arg(labels)),
        json!({"post": {"title": "Hello", "tags": ["a", "b"]}, "count": 2})
    );
}

#[test]
fn top_level_arrays() {
    let template = Template::json("[1, 2].each { |i|\n  item { id i }\n}");
    assert_eq!(
        render_json(&template, Args::new()),
        json!([{"id": 1}, {"id": 2}])
    );
}

#[test]
fn host_values_serialize() {
    let template = Template::json("|user|\nprofile user\nnothing nil\nsym :ok");
    assert_eq!(
        render_json(&template, Args::new().arg(user())),
        json!({
            "profile": {"name": "Ann", "age": 31, "admin": false},
            "nothing": null,
            "sym": "ok"
        })
    );
}

#[test]
fn empty_blocks_are_null_values() {
    let out = Template::json("name {}\nage 3").render(Args::new()).unwrap();
    assert_eq!(out, r#"{"name":null,"age":3}"#);
}

#[test]
fn empty_document_is_null() {
    assert_eq!(Template::json("x = 1").render(Args::new()).unwrap(), "null");
}

#[test]
fn partials_write_into_the_same_document() {
    let author = Template::json("|u|\nname u[:name]\nage u[:age]");
    let post = Template::json("|u|\ntitle \"Hi\"\nauthor { Author(u) }").bind("Author", author);
    assert_eq!(
        render_json(&post, Args::new().arg(user())),
        json!({"title": "Hi", "author": {"name": "Ann", "age": 31}})
    );
}

#[test]
fn markup_builtins_do_not_compile() {
    for source in ["text \"x\"", "raw \"x\"", "html5 { }", "markdown \"# x\""] {
        let err = Template::json(source).compile().unwrap_err();
        assert!(
            matches!(&err, Error::Compile(e) if e.kind == CompileErrorKind::UnsupportedInMode),
            "{source}: {err:?}"
        );
    }
}

#[test]
fn mixing_objects_and_arrays_fails() {
    let err = Template::json("name 1\nitem 2").render(Args::new()).unwrap_err();
    assert!(err.as_runtime().is_some(), "{err:?}");
}
