use super::*;

#[test]
fn parser_builds_a_tree_with_ids_text_and_void_tags() -> Result<()> {
    let page = Page::open(
        r#"
        <!doctype html>
        <!-- hero -->
        <div id="wrap">
          <img src="a.png">
          <p id="msg">hello <strong>world</strong></p>
        </div>
        "#,
    )?;

    page.assert_exists("#wrap")?;
    page.assert_text("#msg", "hello world")?;
    assert_eq!(page.count("img")?, 1);
    Ok(())
}

#[test]
fn parser_rejects_broken_markup() {
    match Page::open("<div><!-- never closed") {
        Err(Error::HtmlParse(message)) => assert!(message.contains("comment"), "{message}"),
        other => panic!("expected a parse error, got {other:?}"),
    }
    match Page::open("<div class='open") {
        Err(Error::HtmlParse(_)) => {}
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn script_and_style_bodies_stay_raw_and_inert() -> Result<()> {
    let page = Page::open(
        r#"
        <style>.x > .y { color: red; }</style>
        <script>if (a < b) { document.title = "no"; }</script>
        <p id="after">still parsed</p>
        "#,
    )?;

    page.assert_text("#after", "still parsed")?;
    assert_eq!(page.count("p")?, 1);
    Ok(())
}

#[test]
fn selector_engine_supports_the_page_contract() -> Result<()> {
    let page = Page::open(
        r##"
        <nav class="navbar dark">
          <ul class="navbar-menu">
            <li><a href="#top" data-kind="jump primary">Top</a></li>
            <li><a href="/about.html">About</a></li>
          </ul>
        </nav>
        <section lang="en-US"><div data-animate></div></section>
        "##,
    )?;

    assert_eq!(page.count(".navbar")?, 1);
    assert_eq!(page.count(".navbar.dark")?, 1);
    assert_eq!(page.count(".navbar-menu a")?, 2);
    assert_eq!(page.count("ul > li > a")?, 2);
    assert_eq!(page.count("a[href^=\"#\"]")?, 1);
    assert_eq!(page.count("a[href$=\".html\"]")?, 1);
    assert_eq!(page.count("a[href*=\"bout\"]")?, 1);
    assert_eq!(page.count("[data-animate]")?, 1);
    assert_eq!(page.count("[data-kind~=\"primary\"]")?, 1);
    assert_eq!(page.count("[lang|=\"en\"]")?, 1);
    assert_eq!(page.count("a, li")?, 4);
    assert_eq!(page.count("*")?, 8);
    Ok(())
}

#[test]
fn unsupported_selectors_error_instead_of_matching_nothing() -> Result<()> {
    let page = Page::open("<p>x</p>")?;

    for selector in ["p:hover", "p::before", "", "p >", "[href", "p + p"] {
        match page.count(selector) {
            Err(Error::UnsupportedSelector(_)) => {}
            other => panic!("expected unsupported selector for {selector:?}, got {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn missing_selectors_surface_as_not_found() -> Result<()> {
    let mut page = Page::open("<p>x</p>")?;

    match page.click("#absent") {
        Err(Error::SelectorNotFound(selector)) => assert_eq!(selector, "#absent"),
        other => panic!("expected selector-not-found, got {other:?}"),
    }
    Ok(())
}

#[test]
fn layout_stacks_blocks_and_honors_explicit_heights() -> Result<()> {
    let page = Page::open(
        r#"
        <header style="height: 100px;"></header>
        <main>
          <section style="height: 250px;"></section>
          <section style="height: 150px;"></section>
        </main>
        <footer style="height: 80px;"></footer>
        "#,
    )?;

    let header = page.document_rect("header")?;
    assert_close(header.top, 0.0);
    assert_close(header.height, 100.0);

    // `main` has no explicit height, so it is as tall as its children.
    let main = page.document_rect("main")?;
    assert_close(main.top, 100.0);
    assert_close(main.height, 400.0);

    let footer = page.document_rect("footer")?;
    assert_close(footer.top, 500.0);
    assert_close(page.document_height(), 580.0);
    Ok(())
}

#[test]
fn fixed_and_hidden_boxes_stay_out_of_the_flow() -> Result<()> {
    let page = Page::open(
        r#"
        <nav style="position: fixed; top: 0px; height: 64px;"></nav>
        <div style="display: none; height: 500px;"></div>
        <main style="height: 300px;"></main>
        "#,
    )?;

    let nav = page.document_rect("nav")?;
    assert_close(nav.top, 0.0);
    assert_close(nav.height, 64.0);

    let main = page.document_rect("main")?;
    assert_close(main.top, 0.0);
    assert_close(page.document_height(), 300.0);

    assert!(page.document_rect("div").is_err());
    Ok(())
}

#[test]
fn scrolling_clamps_to_the_document_bounds() -> Result<()> {
    let mut page = Page::open(r#"<main style="height: 2000px;"></main>"#)?;
    page.set_viewport(800.0, 600.0)?;

    page.scroll_to(99_999.0)?;
    assert_close(page.scroll_offset(), 1400.0);

    page.scroll_by(-50.0)?;
    assert_close(page.scroll_offset(), 1350.0);

    page.scroll_to(-10.0)?;
    assert_close(page.scroll_offset(), 0.0);

    match page.scroll_to(f64::NAN) {
        Err(Error::Runtime(_)) => {}
        other => panic!("expected a runtime error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn short_documents_cannot_scroll_at_all() -> Result<()> {
    let mut page = Page::open(r#"<main style="height: 100px;"></main>"#)?;

    page.scroll_to(500.0)?;
    assert_close(page.scroll_offset(), 0.0);
    Ok(())
}

#[test]
fn viewport_and_limit_setters_validate_their_inputs() -> Result<()> {
    let mut page = Page::open("<p>x</p>")?;

    assert!(page.set_viewport(0.0, 600.0).is_err());
    assert!(page.set_viewport(800.0, f64::INFINITY).is_err());
    assert!(page.set_frame_step_limit(0).is_err());
    assert!(page.set_trace_log_limit(0).is_err());

    page.set_viewport(800.0, 600.0)?;
    page.set_frame_step_limit(16)?;
    page.set_trace_log_limit(100)?;
    Ok(())
}

#[test]
fn settle_respects_the_frame_step_budget() -> Result<()> {
    let mut page = Page::open(
        r##"
        <a id="go" href="#end">go</a>
        <main style="height: 5000px;"></main>
        <section id="end" style="height: 400px;"></section>
        "##,
    )?;
    page.install_effects()?;
    page.set_frame_step_limit(2)?;

    page.click("#go")?;
    match page.settle() {
        Err(Error::Runtime(message)) => {
            assert!(message.contains("frame step limit"), "{message}");
        }
        other => panic!("expected the frame budget to trip, got {other:?}"),
    }
    Ok(())
}

#[test]
fn assertions_carry_a_dom_snippet() -> Result<()> {
    let page = Page::open(r#"<p id="msg">actual text</p>"#)?;

    match page.assert_text("#msg", "expected text") {
        Err(Error::AssertionFailed {
            selector,
            expected,
            actual,
            dom_snippet,
        }) => {
            assert_eq!(selector, "#msg");
            assert_eq!(expected, "expected text");
            assert_eq!(actual, "actual text");
            assert!(dom_snippet.contains("<p"), "{dom_snippet}");
        }
        other => panic!("expected an assertion failure, got {other:?}"),
    }
    Ok(())
}

#[test]
fn trace_log_records_events_and_frames() -> Result<()> {
    let mut page = open_landing_page()?;
    page.enable_trace(true);
    page.set_trace_stderr(false);

    page.scroll_to(120.0)?;
    page.run_frame()?;

    let logs = page.take_trace_logs();
    assert!(logs.iter().any(|line| line.starts_with("[event] scroll")));
    assert!(logs.iter().any(|line| line.starts_with("[frame]")));
    assert!(page.take_trace_logs().is_empty());
    Ok(())
}

#[test]
fn trace_log_is_bounded() -> Result<()> {
    let mut page = open_landing_page()?;
    page.enable_trace(true);
    page.set_trace_stderr(false);
    page.set_trace_log_limit(3)?;

    for offset in [60.0, 70.0, 80.0, 90.0, 100.0] {
        page.scroll_to(offset)?;
        page.run_frame()?;
    }

    assert_eq!(page.take_trace_logs().len(), 3);
    Ok(())
}

#[test]
fn typing_into_a_non_control_is_a_runtime_error() -> Result<()> {
    let mut page = Page::open(r#"<div id="box"></div>"#)?;

    match page.type_text("#box", "hello") {
        Err(Error::Runtime(message)) => {
            assert!(message.contains("form control"), "{message}");
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn disabled_controls_ignore_input_and_clicks() -> Result<()> {
    let mut page = Page::open(
        r#"
        <form id="contact-form">
          <div><input name="name" disabled></div>
          <div><input name="email"></div>
          <div><textarea name="message"></textarea></div>
          <button type="submit" disabled>Send</button>
        </form>
        <main style="height: 1000px;"></main>
        "#,
    )?;
    page.install_effects()?;

    page.type_text("[name=\"name\"]", "ignored")?;
    page.assert_value("[name=\"name\"]", "")?;

    // A disabled submit button never reaches the form.
    page.click("#contact-form button")?;
    assert_eq!(page.count(".form-error")?, 0);
    Ok(())
}
