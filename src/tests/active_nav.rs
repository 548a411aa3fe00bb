use super::*;
use crate::effects::{normalize_pathname, resolve_link_path};

const NAV_PAGE: &str = r#"
    <nav class="navbar" style="position: fixed; height: 64px;">
      <ul class="navbar-menu">
        <li><a id="home" href="/index.html">Home</a></li>
        <li><a id="about" href="/about.html">About</a></li>
        <li><a id="services" href="services.html">Services</a></li>
        <li><a id="full" href="https://example.com/team.html">Team</a></li>
      </ul>
    </nav>
    <main style="height: 2000px;"></main>
"#;

fn open_nav_page(path: &str) -> Result<Page> {
    let mut page = Page::open_at(path, NAV_PAGE)?;
    page.install_effects()?;
    Ok(page)
}

#[test]
fn exact_path_match_marks_the_link_active() -> Result<()> {
    let page = open_nav_page("/about.html")?;

    page.assert_has_class("#about", "active", true)?;
    page.assert_has_class("#home", "active", false)?;
    page.assert_has_class("#full", "active", false)?;
    Ok(())
}

#[test]
fn site_root_activates_the_index_link() -> Result<()> {
    let page = open_nav_page("/")?;

    page.assert_has_class("#home", "active", true)?;
    page.assert_has_class("#about", "active", false)?;
    page.assert_has_class("#services", "active", false)?;
    Ok(())
}

#[test]
fn extension_stripped_containment_matches() -> Result<()> {
    // `/about` contains `/about` once `.html` is stripped from the link.
    let page = open_nav_page("/about")?;

    page.assert_has_class("#about", "active", true)?;
    page.assert_has_class("#home", "active", false)?;
    Ok(())
}

#[test]
fn containment_allows_multiple_simultaneous_matches() -> Result<()> {
    // `/about.html/services.html` is nonsense a router would reject, but the
    // substring heuristic happily lights up both links.
    let page = open_nav_page("/about.html/services.html")?;

    page.assert_has_class("#about", "active", true)?;
    page.assert_has_class("#services", "active", true)?;
    page.assert_has_class("#home", "active", false)?;
    Ok(())
}

#[test]
fn absolute_urls_compare_by_pathname_only() -> Result<()> {
    let page = open_nav_page("/team.html")?;

    page.assert_has_class("#full", "active", true)?;
    Ok(())
}

#[test]
fn relative_links_resolve_against_the_current_directory() -> Result<()> {
    let page = open_nav_page("/docs/intro.html")?;

    // `services.html` resolves to `/docs/services.html`, which the current
    // path does not contain.
    page.assert_has_class("#services", "active", false)?;
    Ok(())
}

#[test]
fn non_matching_links_lose_a_stale_active_class() -> Result<()> {
    let mut page = Page::open_at(
        "/about.html",
        r#"
        <nav class="navbar" style="position: fixed; height: 64px;">
          <ul class="navbar-menu">
            <li><a id="home" class="active" href="/index.html">Home</a></li>
            <li><a id="about" href="/about.html">About</a></li>
          </ul>
        </nav>
        <main style="height: 2000px;"></main>
        "#,
    )?;
    page.install_effects()?;

    page.assert_has_class("#home", "active", false)?;
    page.assert_has_class("#about", "active", true)?;
    Ok(())
}

#[test]
fn link_paths_resolve_like_document_urls() {
    assert_eq!(resolve_link_path("/about.html", "/"), "/about.html");
    assert_eq!(resolve_link_path("about.html", "/"), "/about.html");
    assert_eq!(
        resolve_link_path("about.html", "/docs/intro.html"),
        "/docs/about.html"
    );
    assert_eq!(
        resolve_link_path("../about.html", "/docs/intro.html"),
        "/about.html"
    );
    assert_eq!(
        resolve_link_path("https://example.com/a/b.html?q=1#frag", "/"),
        "/a/b.html"
    );
    assert_eq!(resolve_link_path("https://example.com", "/x.html"), "/");
    assert_eq!(resolve_link_path("#contact", "/about.html"), "/about.html");
    assert_eq!(resolve_link_path("", "/about.html"), "/about.html");
}

#[test]
fn pathnames_normalize_dots_and_duplicate_slashes() {
    assert_eq!(normalize_pathname("/a/./b/../c.html"), "/a/c.html");
    assert_eq!(normalize_pathname("//a///b/"), "/a/b/");
    assert_eq!(normalize_pathname("/.."), "/");
    assert_eq!(normalize_pathname(""), "/");
}
