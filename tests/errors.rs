use tagcraft::{Args, CompileErrorKind, Error, RuntimeError, RuntimeErrorKind, Template, Value};

fn runtime_error(result: tagcraft::Result<String>) -> RuntimeError {
    match result {
        Err(Error::Runtime(err)) => err,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn backtrace_points_at_template_line() {
    let template = Template::html("p 1\np 2\nraise \"boom\"").file("card.tpl");
    let err = runtime_error(template.render(Args::new()));
    assert_eq!(err.kind, RuntimeErrorKind::Raised("boom".into()));
    let frame = err.backtrace.first().expect("a frame");
    assert_eq!(frame.file, "card.tpl");
    assert_eq!(frame.line, 3);
}

#[test]
fn start_line_offsets_the_backtrace() {
    let template = Template::html("p 1\nraise \"boom\"").file("views.rs").line(40);
    let err = runtime_error(template.render(Args::new()));
    assert_eq!(err.backtrace[0].to_string(), "views.rs:41");
}

#[test]
fn nested_units_keep_every_frame() {
    let card = Template::html("|x|\nraise \"bad #{x}\"").file("card.tpl");
    let page = Template::html("div {\n  Card(1)\n}")
        .file("page.tpl")
        .bind("Card", card);
    let err = runtime_error(page.render(Args::new()));
    assert_eq!(err.kind.to_string(), "bad 1");
    let frames: Vec<String> = err.backtrace.iter().map(|f| format!("{}:{}", f.file, f.line)).collect();
    assert_eq!(frames, ["card.tpl:2", "page.tpl:2"]);
}

#[test]
fn errors_inside_blocks_are_translated() {
    let template = Template::html("|items|\nul {\n  items.each { |i|\n    li i.foo\n  }\n}").file("list.tpl");
    let err = runtime_error(template.render(Args::new().arg(vec![Value::from(1)])));
    assert!(
        matches!(&err.kind, RuntimeErrorKind::NoMethod { method, .. } if method == "foo"),
        "{err}"
    );
    assert!(
        err.backtrace.iter().all(|f| f.file == "list.tpl"),
        "{:?}",
        err.backtrace
    );
    assert_eq!(err.backtrace[0].line, 4);
}

#[test]
fn arity_errors_hide_the_buffer_parameter() {
    let template = Template::html("|a|\np a");
    let err = runtime_error(template.render(Args::new().arg(1).arg(2)));
    assert_eq!(
        err.kind.to_string(),
        "wrong number of arguments (given 2, expected 1)"
    );

    let page = Template::html("Card(1, 2)").bind("Card", template);
    let err = runtime_error(page.render(Args::new()));
    assert_eq!(
        err.kind.to_string(),
        "wrong number of arguments (given 2, expected 1)"
    );
}

#[test]
fn missing_arguments_are_reported_before_the_body_runs() {
    let template = Template::html("|title|\np title");
    let err = template.render(Args::new()).unwrap_err();
    assert!(
        matches!(&err, Error::MissingArgument { name, keyword: false } if name == "title"),
        "{err:?}"
    );
    assert!(err.is_template_error());

    let template = Template::html("|a:| text a");
    let err = template.render(Args::new()).unwrap_err();
    assert!(matches!(&err, Error::MissingArgument { name, keyword: true } if name == "a"));
}

#[test]
fn unknown_keywords_are_rejected() {
    let template = Template::html("|a:| text a");
    let err = runtime_error(template.render(Args::new().kwarg("a", 1).kwarg("b", 2)));
    assert_eq!(err.kind.to_string(), "unknown keyword: :b");
}

#[test]
fn render_yield_requires_a_block() {
    let template = Template::html("div { render_yield }");
    let err = runtime_error(template.render(Args::new()));
    assert_eq!(err.kind, RuntimeErrorKind::MissingBlock);
}

#[test]
fn syntax_errors_are_uncompilable() {
    let template = Template::html("div {\n  p 1\n").file("broken.tpl");
    let err = template.render(Args::new()).unwrap_err();
    match &err {
        Error::Uncompilable { file, message } => {
            assert_eq!(file, "broken.tpl");
            assert!(message.contains("broken.tpl:"), "{message}");
        }
        other => panic!("expected Uncompilable, got {other:?}"),
    }
    assert!(err.is_template_error());
    // Failures are not cached.
    assert!(template.compile().is_err());
}

#[test]
fn void_elements_with_content_do_not_compile() {
    for source in ["br \"x\"", "img { p 1 }"] {
        let err = Template::html(source).compile().unwrap_err();
        assert!(
            matches!(&err, Error::Compile(e) if e.kind == CompileErrorKind::VoidElementContent),
            "{source}: {err:?}"
        );
    }
}

#[test]
fn dynamic_void_tags_fail_at_runtime() {
    let template = Template::html("|name|\ntag name, \"x\"");
    let err = runtime_error(template.render(Args::new().arg("br")));
    assert_eq!(err.kind, RuntimeErrorKind::VoidContent("br".into()));
}

#[test]
fn undefined_constants_and_extensions() {
    let err = runtime_error(Template::html("Missing()").render(Args::new()));
    assert_eq!(err.kind, RuntimeErrorKind::UndefinedConstant("Missing".into()));
}

#[test]
fn render_of_nil_is_not_callable() {
    let err = runtime_error(Template::html("render nil").render(Args::new()));
    assert!(matches!(err.kind, RuntimeErrorKind::NotCallable(_)), "{err}");
}

#[test]
fn zero_division() {
    let err = runtime_error(Template::html("|n|\np 10 / n").render(Args::new().arg(0)));
    assert_eq!(err.kind, RuntimeErrorKind::ZeroDivision);
}

#[test]
fn untranslated_frames_without_wrapping() {
    let template = Template::html("raise \"boom\"").codegen(tagcraft::CodegenConfig {
        wrap: false,
        ..Default::default()
    });
    let unit = template.compile().unwrap();
    let mut buffer = tagcraft::Buffer::new();
    let err = unit.invoke(&mut buffer, Args::new()).unwrap_err();
    let frame = &err.as_runtime().expect("runtime error").backtrace[0];
    assert_eq!(frame.file, unit.id());

    // `render` translates regardless.
    let err = runtime_error(template.render(Args::new()));
    assert!(err.backtrace[0].file.ends_with(".rs"), "{:?}", err.backtrace);
}
