use super::*;

/// Document-space rectangle for a laid-out element, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// Fixed-size viewport the page is laid out and scrolled against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Viewport {
    pub(crate) width: f64,
    pub(crate) height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1024.0,
            height: 768.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LayoutResult {
    pub(crate) rects: HashMap<NodeId, Rect>,
    pub(crate) document_height: f64,
}

const NON_RENDERED_TAGS: &[&str] = &["head", "link", "meta", "script", "style", "template", "title"];

/// Simplified vertical block layout: rendered elements stack top to bottom,
/// a block is as tall as its `height: <N>px` declaration or the sum of its
/// children, and `position: fixed`/`absolute` boxes contribute no flow height.
pub(crate) fn compute_layout(dom: &Dom, viewport: &Viewport) -> LayoutResult {
    let mut result = LayoutResult::default();
    let document_height = layout_children(dom, dom.root(), 0.0, viewport.width, &mut result);
    result.document_height = document_height;
    result
}

fn layout_children(
    dom: &Dom,
    parent: NodeId,
    top: f64,
    width: f64,
    result: &mut LayoutResult,
) -> f64 {
    let mut cursor = top;
    for &child in dom.children(parent) {
        cursor += layout_element(dom, child, cursor, width, result);
    }
    cursor - top
}

fn layout_element(
    dom: &Dom,
    node: NodeId,
    cursor: f64,
    width: f64,
    result: &mut LayoutResult,
) -> f64 {
    // Deep markup recurses once per tree level.
    stacker::maybe_grow(64 * 1024, 1024 * 1024, || {
        let Some(element) = dom.element(node) else {
            return 0.0;
        };
        if NON_RENDERED_TAGS.contains(&element.tag_name.as_str()) {
            return 0.0;
        }

        let style = element.attrs.get("style").map(String::as_str);
        if style_value(style, "display").as_deref() == Some("none") {
            return 0.0;
        }

        let out_of_flow = matches!(
            style_value(style, "position").as_deref(),
            Some("fixed") | Some("absolute")
        );
        let top = if out_of_flow {
            style_px(style, "top").unwrap_or(cursor)
        } else {
            cursor
        };

        let children_height = layout_children(dom, node, top, width, result);
        let height = style_px(style, "height").unwrap_or(children_height);

        result.rects.insert(
            node,
            Rect {
                top,
                left: 0.0,
                width,
                height,
            },
        );

        if out_of_flow { 0.0 } else { height }
    })
}

fn style_value(style_attr: Option<&str>, name: &str) -> Option<String> {
    parse_style_declarations(style_attr)
        .into_iter()
        .find(|(decl_name, _)| decl_name == name)
        .map(|(_, value)| value)
}

pub(crate) fn style_px(style_attr: Option<&str>, name: &str) -> Option<f64> {
    let value = style_value(style_attr, name)?;
    parse_px(&value)
}

pub(crate) fn parse_px(value: &str) -> Option<f64> {
    let raw = value.trim();
    let raw = raw.strip_suffix("px").unwrap_or(raw).trim();
    let parsed: f64 = raw.parse().ok()?;
    parsed.is_finite().then_some(parsed)
}
