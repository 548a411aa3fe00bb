use super::*;

fn parallax_page() -> Result<Page> {
    let mut page = Page::open(
        r#"
        <div id="spacer" style="height: 100px;"></div>
        <section class="parallax-section" style="height: 300px;">
          <div class="parallax-bg" style="height: 300px;"></div>
        </section>
        <div style="height: 100px;"></div>
        <img class="parallax-image" src="city.jpg" style="height: 300px;">
        <div style="height: 4000px;"></div>
        "#,
    )?;
    page.install_effects()?;
    Ok(page)
}

#[test]
fn background_translates_at_three_tenths_of_section_progress() -> Result<()> {
    let mut page = parallax_page()?;

    // Section spans [100, 400]; at scroll 150 the background has progressed
    // 50 device pixels into it.
    page.scroll_to(150.0)?;
    page.run_frame()?;
    assert_close(
        translate_y(&page.style(".parallax-bg", "transform")?),
        (150.0 - 100.0) * 0.3,
    );
    Ok(())
}

#[test]
fn image_translates_at_four_tenths_against_its_own_box() -> Result<()> {
    let mut page = parallax_page()?;

    // The image box spans [500, 800] independent of any section.
    page.scroll_to(600.0)?;
    page.run_frame()?;
    assert_close(
        translate_y(&page.style(".parallax-image", "transform")?),
        (600.0 - 500.0) * 0.4,
    );
    Ok(())
}

#[test]
fn scroll_bursts_coalesce_into_one_frame_task() -> Result<()> {
    let mut page = parallax_page()?;

    page.scroll_to(120.0)?;
    page.scroll_to(140.0)?;
    page.scroll_to(150.0)?;
    assert_eq!(page.pending_frames(), 1);

    page.run_frame()?;
    assert_eq!(page.pending_frames(), 0);
    // The recomputation sees the latest offset, not the first.
    assert_close(
        translate_y(&page.style(".parallax-bg", "transform")?),
        (150.0 - 100.0) * 0.3,
    );

    // The latch re-arms once the frame has run.
    page.scroll_to(180.0)?;
    assert_eq!(page.pending_frames(), 1);
    Ok(())
}

#[test]
fn out_of_view_elements_keep_their_last_transform() -> Result<()> {
    let mut page = parallax_page()?;

    page.scroll_to(200.0)?;
    page.run_frame()?;
    let in_view = translate_y(&page.style(".parallax-bg", "transform")?);
    assert_close(in_view, (200.0 - 100.0) * 0.3);

    // Scroll far past the section; its box [100, 400] is fully above the
    // visible range, so the stale transform is preserved.
    page.scroll_to(2000.0)?;
    page.run_frame()?;
    assert_close(
        translate_y(&page.style(".parallax-bg", "transform")?),
        in_view,
    );
    Ok(())
}

#[test]
fn initial_update_runs_at_install_time() -> Result<()> {
    let mut page = Page::open(
        r#"
        <section class="parallax-section" style="height: 300px;">
          <div class="parallax-bg" style="height: 300px;"></div>
        </section>
        <div style="height: 2000px;"></div>
        "#,
    )?;
    page.install_effects()?;

    // No scroll event has fired yet; the registration-time pass already
    // positioned the background for offset 0.
    assert_close(translate_y(&page.style(".parallax-bg", "transform")?), 0.0);
    Ok(())
}

#[test]
fn backgrounds_outside_a_parallax_section_are_skipped() -> Result<()> {
    let mut page = Page::open(
        r#"
        <div class="parallax-bg" style="height: 300px;"></div>
        <div style="height: 2000px;"></div>
        "#,
    )?;
    page.install_effects()?;

    page.scroll_to(150.0)?;
    page.run_frame()?;
    assert_eq!(page.style(".parallax-bg", "transform")?, "");
    Ok(())
}
