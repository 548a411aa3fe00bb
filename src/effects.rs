use std::sync::OnceLock;

use unicode_normalization::UnicodeNormalization;

use super::*;

pub(crate) const NAVBAR_SCROLL_THRESHOLD: f64 = 50.0;
pub(crate) const PARALLAX_BG_RATE: f64 = 0.3;
pub(crate) const PARALLAX_IMAGE_RATE: f64 = 0.4;
pub(crate) const FADE_IN_THRESHOLD: f64 = 0.1;
pub(crate) const FADE_IN_BOTTOM_MARGIN: f64 = 50.0;
pub(crate) const ANCHOR_HEADER_CLEARANCE: f64 = 80.0;
pub(crate) const SMOOTH_SCROLL_FRAMES: u32 = 24;

pub(crate) const CONTACT_CONFIRMATION: &str =
    "Thank you for your message! I will get back to you soon.";

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Per-page enhancement state: the parallax node lists collected at install,
/// the frame-coalescing latch, and the last observed scroll offset.
#[derive(Debug, Default)]
pub(crate) struct EffectsState {
    pub(crate) installed: bool,
    pub(crate) navbar: Option<NodeId>,
    pub(crate) menu: Option<NodeId>,
    pub(crate) parallax_backgrounds: Vec<NodeId>,
    pub(crate) parallax_images: Vec<NodeId>,
    pub(crate) last_scroll: f64,
    pub(crate) ticking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Handler {
    NavbarScroll,
    MenuToggle,
    MenuLinkClose,
    ParallaxSchedule,
    ParallaxFrame,
    FadeInSetup,
    FadeInReveal,
    AnchorScroll,
    ContactSubmit,
    ActiveNavUpdate,
}

impl Page {
    /// Registers every enhancement the page's markup calls for, then fires
    /// the structural-ready event that runs the load-time behaviors.
    pub fn install_effects(&mut self) -> Result<()> {
        if self.effects.installed {
            return Err(Error::Runtime("page effects are already installed".into()));
        }
        self.effects.installed = true;
        let root = self.dom.root();

        if let Some(navbar) = self.dom.query_selector(".navbar")? {
            self.effects.navbar = Some(navbar);
            self.listeners.add(
                root,
                "scroll",
                Listener {
                    handler: Handler::NavbarScroll,
                },
            );
        }

        let toggle = self.dom.query_selector(".navbar-toggle")?;
        let menu = self.dom.query_selector(".navbar-menu")?;
        if let (Some(toggle), Some(menu)) = (toggle, menu) {
            self.effects.menu = Some(menu);
            self.listeners.add(
                toggle,
                "click",
                Listener {
                    handler: Handler::MenuToggle,
                },
            );
            for link in self.dom.query_selector_all_from(menu, "a")? {
                self.listeners.add(
                    link,
                    "click",
                    Listener {
                        handler: Handler::MenuLinkClose,
                    },
                );
            }
        }

        self.effects.parallax_backgrounds = self.dom.query_selector_all(".parallax-bg")?;
        self.effects.parallax_images = self.dom.query_selector_all(".parallax-image")?;
        if !self.effects.parallax_backgrounds.is_empty()
            || !self.effects.parallax_images.is_empty()
        {
            self.listeners.add(
                root,
                "scroll",
                Listener {
                    handler: Handler::ParallaxSchedule,
                },
            );
            self.update_parallax()?;
        }

        self.listeners.add(
            root,
            "DOMContentLoaded",
            Listener {
                handler: Handler::FadeInSetup,
            },
        );

        for anchor in self.dom.query_selector_all("a[href^=\"#\"]")? {
            self.listeners.add(
                anchor,
                "click",
                Listener {
                    handler: Handler::AnchorScroll,
                },
            );
        }

        if let Some(form) = self.dom.query_selector("#contact-form")? {
            self.listeners.add(
                form,
                "submit",
                Listener {
                    handler: Handler::ContactSubmit,
                },
            );
        }

        self.listeners.add(
            root,
            "DOMContentLoaded",
            Listener {
                handler: Handler::ActiveNavUpdate,
            },
        );

        self.dispatch_document_event("DOMContentLoaded")?;
        self.check_intersections()?;
        Ok(())
    }

    pub(crate) fn run_handler(
        &mut self,
        handler: Handler,
        node: NodeId,
        event: Option<&mut EventState>,
    ) -> Result<()> {
        match handler {
            Handler::NavbarScroll => self.update_navbar_state(),
            Handler::MenuToggle => self.toggle_menu(),
            Handler::MenuLinkClose => self.close_menu(),
            Handler::ParallaxSchedule => {
                if !self.effects.ticking {
                    self.request_frame(Handler::ParallaxFrame);
                    self.effects.ticking = true;
                }
                Ok(())
            }
            Handler::ParallaxFrame => self.update_parallax(),
            Handler::FadeInSetup => self.prepare_fade_in(),
            Handler::FadeInReveal => self.reveal_fade_in(node),
            Handler::AnchorScroll => self.anchor_scroll(node, event),
            Handler::ContactSubmit => {
                if let Some(event) = event {
                    event.prevent_default();
                }
                self.validate_contact_form(node)
            }
            Handler::ActiveNavUpdate => self.update_active_nav(),
        }
    }

    fn update_navbar_state(&mut self) -> Result<()> {
        let Some(navbar) = self.effects.navbar else {
            return Ok(());
        };
        let current_scroll = self.scroll_y;

        if current_scroll > NAVBAR_SCROLL_THRESHOLD {
            self.dom.class_add(navbar, "scrolled")?;
        } else {
            self.dom.class_remove(navbar, "scrolled")?;
        }

        self.effects.last_scroll = current_scroll;
        Ok(())
    }

    fn toggle_menu(&mut self) -> Result<()> {
        let Some(menu) = self.effects.menu else {
            return Ok(());
        };
        self.dom.class_toggle(menu, "active")?;
        Ok(())
    }

    fn close_menu(&mut self) -> Result<()> {
        let Some(menu) = self.effects.menu else {
            return Ok(());
        };
        self.dom.class_remove(menu, "active")
    }

    fn update_parallax(&mut self) -> Result<()> {
        let scroll_top = self.scroll_y;
        let window_height = self.viewport.height;

        for element in self.effects.parallax_backgrounds.clone() {
            let Some(section) = self.dom.closest(element, ".parallax-section")? else {
                continue;
            };
            let Some(rect) = self.rect(section) else {
                continue;
            };
            if scroll_top + window_height > rect.top && scroll_top < rect.bottom() {
                let rate = (scroll_top - rect.top) * PARALLAX_BG_RATE;
                self.dom
                    .style_set(element, "transform", &format!("translateY({rate}px)"))?;
            }
        }

        for image in self.effects.parallax_images.clone() {
            let Some(rect) = self.rect(image) else {
                continue;
            };
            if scroll_top + window_height > rect.top && scroll_top < rect.bottom() {
                let rate = (scroll_top - rect.top) * PARALLAX_IMAGE_RATE;
                self.dom
                    .style_set(image, "transform", &format!("translateY({rate}px)"))?;
            }
        }

        self.effects.ticking = false;
        Ok(())
    }

    fn prepare_fade_in(&mut self) -> Result<()> {
        let targets = self.dom.query_selector_all("[data-animate]")?;
        if targets.is_empty() {
            return Ok(());
        }

        for &target in &targets {
            self.dom.style_set(target, "opacity", "0")?;
            self.dom.style_set(target, "transform", "translateY(30px)")?;
            self.dom.style_set(
                target,
                "transition",
                "opacity 0.8s ease-out, transform 0.8s ease-out",
            )?;
        }

        self.watchers.push(IntersectionWatcher {
            threshold: FADE_IN_THRESHOLD,
            root_margin_bottom: FADE_IN_BOTTOM_MARGIN,
            targets,
            handler: Handler::FadeInReveal,
        });
        Ok(())
    }

    fn reveal_fade_in(&mut self, target: NodeId) -> Result<()> {
        self.dom.class_add(target, "fade-in")?;
        // Keep the element opaque after the transition finishes.
        self.dom.style_set(target, "opacity", "1")?;
        self.unobserve(target);
        Ok(())
    }

    fn anchor_scroll(&mut self, anchor: NodeId, event: Option<&mut EventState>) -> Result<()> {
        let Some(href) = self.dom.attr(anchor, "href") else {
            return Ok(());
        };
        if href == "#" || href.len() <= 1 {
            return Ok(());
        }
        if let Some(event) = event {
            event.prevent_default();
        }
        let Some(fragment) = href.strip_prefix('#') else {
            return Ok(());
        };
        let Some(target) = self.dom.by_id(fragment) else {
            return Ok(());
        };
        let Some(rect) = self.rect(target) else {
            return Ok(());
        };
        self.start_smooth_scroll(rect.top - ANCHOR_HEADER_CLEARANCE)
    }

    fn validate_contact_form(&mut self, form: NodeId) -> Result<()> {
        let name = self.contact_field(form, "name")?;
        let email = self.contact_field(form, "email")?;
        let message = self.contact_field(form, "message")?;

        let mut is_valid = true;

        let name_value = self.control_text(name)?;
        if name_value.trim().is_empty() {
            self.show_field_error(name, "Name is required")?;
            is_valid = false;
        } else {
            self.clear_field_error(name)?;
        }

        let email_value = self.control_text(email)?;
        if email_value.trim().is_empty() || !is_valid_email(&email_value)? {
            self.show_field_error(email, "Valid email is required")?;
            is_valid = false;
        } else {
            self.clear_field_error(email)?;
        }

        let message_value = self.control_text(message)?;
        if message_value.trim().is_empty() {
            self.show_field_error(message, "Message is required")?;
            is_valid = false;
        } else {
            self.clear_field_error(message)?;
        }

        if is_valid {
            // Submission is simulated; nothing leaves the page.
            self.alerts.push(CONTACT_CONFIRMATION.to_string());
            self.dom.reset_form(form)?;
        }

        self.relayout();
        Ok(())
    }

    fn contact_field(&self, form: NodeId, name: &str) -> Result<NodeId> {
        self.dom
            .query_selector_from(form, &format!("[name=\"{name}\"]"))?
            .ok_or_else(|| Error::Runtime(format!("contact form is missing a `{name}` field")))
    }

    fn control_text(&self, field: NodeId) -> Result<String> {
        // Typed input can arrive in any Unicode normalization; inspect NFC.
        Ok(self.dom.value(field)?.nfc().collect())
    }

    fn show_field_error(&mut self, field: NodeId, message: &str) -> Result<()> {
        self.clear_field_error(field)?;
        let Some(parent) = self.dom.parent(field) else {
            return Ok(());
        };
        let error = self.dom.create_detached_element("div");
        self.dom.class_add(error, "form-error")?;
        self.dom.set_text_content(error, message)?;
        self.dom.style_set(error, "color", "var(--color-accent-red)")?;
        self.dom.style_set(error, "font-size", "0.875rem")?;
        self.dom.style_set(error, "margin-top", "0.25rem")?;
        self.dom.append_child(parent, error)?;
        self.dom
            .style_set(field, "border-color", "var(--color-accent-red)")?;
        Ok(())
    }

    fn clear_field_error(&mut self, field: NodeId) -> Result<()> {
        let Some(parent) = self.dom.parent(field) else {
            return Ok(());
        };
        if let Some(error) = self.dom.query_selector_from(parent, ".form-error")? {
            self.dom.remove_node(error)?;
        }
        self.dom.style_set(field, "border-color", "")?;
        Ok(())
    }

    fn update_active_nav(&mut self) -> Result<()> {
        let current_path = self.location_path.clone();
        for link in self.dom.query_selector_all(".navbar-menu a")? {
            let Some(href) = self.dom.attr(link, "href") else {
                continue;
            };
            let link_path = resolve_link_path(&href, &current_path);
            let is_active = link_path == current_path
                || (current_path == "/" && link_path.contains("index.html"))
                || current_path.contains(&link_path.replacen(".html", "", 1));
            if is_active {
                self.dom.class_add(link, "active")?;
            } else {
                self.dom.class_remove(link, "active")?;
            }
        }
        Ok(())
    }
}

fn email_pattern() -> Result<&'static fancy_regex::Regex> {
    static PATTERN: OnceLock<fancy_regex::Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let pattern = fancy_regex::Regex::new(EMAIL_PATTERN)
        .map_err(|err| Error::Runtime(format!("email pattern failed to compile: {err}")))?;
    Ok(PATTERN.get_or_init(|| pattern))
}

fn is_valid_email(value: &str) -> Result<bool> {
    Ok(email_pattern()?.is_match(value).unwrap_or(false))
}

/// Resolves an anchor's `href` to the pathname a browser would report for it.
/// Query strings and fragments are dropped; fragment-only links resolve to
/// the document's own path.
pub(crate) fn resolve_link_path(href: &str, current_path: &str) -> String {
    let href = href.trim();
    let without_fragment = href.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();

    if without_query.is_empty() {
        return current_path.to_string();
    }

    if let Some(scheme_end) = without_query.find("://") {
        let rest = &without_query[scheme_end + 3..];
        return match rest.find('/') {
            Some(slash) => normalize_pathname(&rest[slash..]),
            None => "/".to_string(),
        };
    }

    if without_query.starts_with('/') {
        return normalize_pathname(without_query);
    }

    let base_dir = match current_path.rsplit_once('/') {
        Some((prefix, _)) if !prefix.is_empty() => format!("{prefix}/"),
        _ => "/".to_string(),
    };
    normalize_pathname(&format!("{base_dir}{without_query}"))
}

pub(crate) fn normalize_pathname(pathname: &str) -> String {
    let starts_with_slash = pathname.starts_with('/');
    let ends_with_slash = pathname.ends_with('/') && pathname.len() > 1;
    let mut parts = Vec::new();
    for segment in pathname.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            parts.pop();
            continue;
        }
        parts.push(segment);
    }
    let mut out = if starts_with_slash {
        format!("/{}", parts.join("/"))
    } else {
        parts.join("/")
    };
    if out.is_empty() {
        out.push('/');
    }
    if ends_with_slash && !out.ends_with('/') {
        out.push('/');
    }
    out
}
