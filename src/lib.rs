use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

mod effects;
mod layout;
mod selector;

pub use layout::Rect;

use effects::{EffectsState, Handler};
use layout::{LayoutResult, Viewport, compute_layout};
use selector::{
    SelectorAttrCondition, SelectorCombinator, SelectorPart, SelectorStep, parse_selector_groups,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    Runtime(String),
    SelectorNotFound(String),
    UnsupportedSelector(String),
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    node_type: NodeType,
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    pub(crate) attrs: HashMap<String, String>,
    pub(crate) value: String,
    pub(crate) disabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
    id_index: HashMap<String, NodeId>,
}

impl Dom {
    fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            id_index: HashMap::new(),
        }
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        let value = attrs.get("value").cloned().unwrap_or_default();
        let disabled = attrs.contains_key("disabled");
        let element = Element {
            tag_name,
            attrs,
            value,
            disabled,
        };
        let id = self.create_node(Some(parent), NodeType::Element(element));
        if let Some(id_attr) = self
            .element(id)
            .and_then(|element| element.attrs.get("id").cloned())
        {
            self.id_index.insert(id_attr, id);
        }
        id
    }

    pub(crate) fn create_detached_element(&mut self, tag_name: &str) -> NodeId {
        let element = Element {
            tag_name: tag_name.to_ascii_lowercase(),
            attrs: HashMap::new(),
            value: String::new(),
            disabled: false,
        };
        self.create_node(None, NodeType::Element(element))
    }

    fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    pub(crate) fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes.get(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(node_id.0)?.node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|element| element.tag_name.as_str())
    }

    pub(crate) fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes.get(node_id.0)?.parent
    }

    pub(crate) fn children(&self, node_id: NodeId) -> &[NodeId] {
        self.nodes
            .get(node_id.0)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn by_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    pub(crate) fn text_content(&self, node_id: NodeId) -> String {
        let Some(node) = self.nodes.get(node_id.0) else {
            return String::new();
        };
        match &node.node_type {
            NodeType::Text(text) => text.clone(),
            _ => node
                .children
                .clone()
                .into_iter()
                .map(|child| self.text_content(child))
                .collect(),
        }
    }

    pub(crate) fn set_text_content(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        if self.element(node_id).is_none() {
            return Err(Error::Runtime("textContent target is not an element".into()));
        }
        for child in std::mem::take(&mut self.nodes[node_id.0].children) {
            self.detach_subtree_ids(child);
            self.nodes[child.0].parent = None;
        }
        self.create_text(node_id, value.to_string());
        Ok(())
    }

    fn is_form_control(&self, node_id: NodeId) -> bool {
        matches!(
            self.tag_name(node_id),
            Some("input") | Some("textarea") | Some("select")
        )
    }

    pub(crate) fn value(&self, node_id: NodeId) -> Result<String> {
        if !self.is_form_control(node_id) {
            return Err(Error::Runtime("value target is not a form control".into()));
        }
        Ok(self
            .element(node_id)
            .map(|element| element.value.clone())
            .unwrap_or_default())
    }

    pub(crate) fn set_value(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        if !self.is_form_control(node_id) {
            return Err(Error::Runtime("value target is not a form control".into()));
        }
        if let Some(element) = self.element_mut(node_id) {
            element.value = value.to_string();
        }
        Ok(())
    }

    // Text typed into a textarea lives in `value`; its markup text is the
    // default the control resets back to.
    fn initialize_form_control_values(&mut self) {
        for node_id in self.all_element_nodes() {
            if self.tag_name(node_id) == Some("textarea") {
                let text = self.text_content(node_id);
                if let Some(element) = self.element_mut(node_id) {
                    element.value = text;
                }
            }
        }
    }

    pub(crate) fn reset_form(&mut self, form: NodeId) -> Result<()> {
        if self.tag_name(form) != Some("form") {
            return Err(Error::Runtime("reset target is not a form".into()));
        }
        let mut controls = Vec::new();
        self.collect_elements_descendants_dfs(form, &mut controls);
        let mut defaults = Vec::new();
        for node_id in controls {
            if !self.is_form_control(node_id) {
                continue;
            }
            let default = if self.tag_name(node_id) == Some("textarea") {
                self.text_content(node_id)
            } else {
                self.element(node_id)
                    .and_then(|element| element.attrs.get("value").cloned())
                    .unwrap_or_default()
            };
            defaults.push((node_id, default));
        }
        for (node_id, default) in defaults {
            self.set_value(node_id, &default)?;
        }
        Ok(())
    }

    pub(crate) fn disabled(&self, node_id: NodeId) -> bool {
        self.element(node_id)
            .map(|element| element.disabled)
            .unwrap_or(false)
    }

    pub(crate) fn attr(&self, node_id: NodeId, name: &str) -> Option<String> {
        self.element(node_id)?.attrs.get(name).cloned()
    }

    pub(crate) fn class_contains(&self, node_id: NodeId, class_name: &str) -> Result<bool> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::Runtime("classList target is not an element".into()))?;
        Ok(has_class(element, class_name))
    }

    pub(crate) fn class_add(&mut self, node_id: NodeId, class_name: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("classList target is not an element".into()))?;
        let mut classes = class_tokens(element.attrs.get("class").map(String::as_str));
        if !classes.iter().any(|name| name == class_name) {
            classes.push(class_name.to_string());
        }
        set_class_attr(element, &classes);
        Ok(())
    }

    pub(crate) fn class_remove(&mut self, node_id: NodeId, class_name: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("classList target is not an element".into()))?;
        let mut classes = class_tokens(element.attrs.get("class").map(String::as_str));
        classes.retain(|name| name != class_name);
        set_class_attr(element, &classes);
        Ok(())
    }

    pub(crate) fn class_toggle(&mut self, node_id: NodeId, class_name: &str) -> Result<bool> {
        let has = self.class_contains(node_id, class_name)?;
        if has {
            self.class_remove(node_id, class_name)?;
            Ok(false)
        } else {
            self.class_add(node_id, class_name)?;
            Ok(true)
        }
    }

    pub(crate) fn style_get(&self, node_id: NodeId, name: &str) -> Result<String> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::Runtime("style target is not an element".into()))?;
        let decls = parse_style_declarations(element.attrs.get("style").map(String::as_str));
        Ok(decls
            .into_iter()
            .find(|(decl_name, _)| decl_name == name)
            .map(|(_, value)| value)
            .unwrap_or_default())
    }

    pub(crate) fn style_set(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("style target is not an element".into()))?;
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        let mut decls = parse_style_declarations(element.attrs.get("style").map(String::as_str));
        if value.is_empty() {
            decls.retain(|(decl_name, _)| decl_name != &name);
        } else if let Some(pos) = decls.iter().position(|(decl_name, _)| decl_name == &name) {
            decls[pos].1 = value.to_string();
        } else {
            decls.push((name, value.to_string()));
        }
        if decls.is_empty() {
            element.attrs.remove("style");
        } else {
            element
                .attrs
                .insert("style".to_string(), serialize_style_declarations(&decls));
        }
        Ok(())
    }

    pub(crate) fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.nodes.get(parent.0).is_none() || self.nodes.get(child.0).is_none() {
            return Err(Error::Runtime("appendChild target does not exist".into()));
        }
        if child == parent || self.is_descendant_of(parent, child) {
            return Err(Error::Runtime(
                "appendChild would create a cycle in the tree".into(),
            ));
        }
        if let Some(old_parent) = self.nodes[child.0].parent {
            self.nodes[old_parent.0].children.retain(|c| *c != child);
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        if let Some(id_attr) = self
            .element(child)
            .and_then(|element| element.attrs.get("id").cloned())
        {
            self.id_index.insert(id_attr, child);
        }
        Ok(())
    }

    pub(crate) fn remove_node(&mut self, node_id: NodeId) -> Result<()> {
        if self.nodes.get(node_id.0).is_none() {
            return Err(Error::Runtime("remove target does not exist".into()));
        }
        if node_id == self.root {
            return Err(Error::Runtime("the document root cannot be removed".into()));
        }
        if let Some(parent) = self.nodes[node_id.0].parent {
            self.nodes[parent.0].children.retain(|c| *c != node_id);
        }
        self.nodes[node_id.0].parent = None;
        self.detach_subtree_ids(node_id);
        Ok(())
    }

    fn detach_subtree_ids(&mut self, node_id: NodeId) {
        let mut subtree = Vec::new();
        self.collect_elements_dfs(node_id, &mut subtree);
        for element_id in subtree {
            if let Some(id_attr) = self
                .element(element_id)
                .and_then(|element| element.attrs.get("id").cloned())
            {
                if self.id_index.get(&id_attr) == Some(&element_id) {
                    self.id_index.remove(&id_attr);
                }
            }
        }
    }

    fn is_descendant_of(&self, node_id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.parent(node_id);
        while let Some(node) = cursor {
            if node == ancestor {
                return true;
            }
            cursor = self.parent(node);
        }
        false
    }

    pub(crate) fn is_connected(&self, node_id: NodeId) -> bool {
        let mut cursor = Some(node_id);
        while let Some(node) = cursor {
            if node == self.root {
                return true;
            }
            cursor = self.parent(node);
        }
        false
    }

    pub(crate) fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        let all = self.query_selector_all(selector)?;
        Ok(all.into_iter().next())
    }

    pub(crate) fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let groups = parse_selector_groups(selector)?;

        if let [group] = groups.as_slice() {
            if let [part] = group.as_slice() {
                if let Some(id) = part.step.id_only() {
                    return Ok(self
                        .by_id(id)
                        .filter(|node| self.is_connected(*node))
                        .into_iter()
                        .collect());
                }
            }
        }

        let mut out = Vec::new();
        for node_id in self.all_element_nodes() {
            if groups
                .iter()
                .any(|group| self.matches_selector_chain(node_id, group))
            {
                out.push(node_id);
            }
        }
        Ok(out)
    }

    pub(crate) fn query_selector_from(
        &self,
        root: NodeId,
        selector: &str,
    ) -> Result<Option<NodeId>> {
        let all = self.query_selector_all_from(root, selector)?;
        Ok(all.into_iter().next())
    }

    pub(crate) fn query_selector_all_from(
        &self,
        root: NodeId,
        selector: &str,
    ) -> Result<Vec<NodeId>> {
        let groups = parse_selector_groups(selector)?;
        let mut candidates = Vec::new();
        self.collect_elements_descendants_dfs(root, &mut candidates);
        let mut out = Vec::new();
        for node_id in candidates {
            if groups
                .iter()
                .any(|group| self.matches_selector_chain(node_id, group))
            {
                out.push(node_id);
            }
        }
        Ok(out)
    }

    pub(crate) fn closest(&self, node_id: NodeId, selector: &str) -> Result<Option<NodeId>> {
        let groups = parse_selector_groups(selector)?;
        let mut cursor = Some(node_id);
        while let Some(node) = cursor {
            if self.element(node).is_some()
                && groups
                    .iter()
                    .any(|group| self.matches_selector_chain(node, group))
            {
                return Ok(Some(node));
            }
            cursor = self.parent(node);
        }
        Ok(None)
    }

    fn collect_elements_dfs(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        if self.element(node_id).is_some() {
            out.push(node_id);
        }
        for child in self.children(node_id).to_vec() {
            self.collect_elements_dfs(child, out);
        }
    }

    fn collect_elements_descendants_dfs(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        for child in self.children(node_id).to_vec() {
            self.collect_elements_dfs(child, out);
        }
    }

    fn all_element_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_elements_dfs(self.root, &mut out);
        out
    }

    fn matches_selector_chain(&self, node_id: NodeId, parts: &[SelectorPart]) -> bool {
        let Some((last, rest)) = parts.split_last() else {
            return false;
        };
        if !self.matches_step(node_id, &last.step) {
            return false;
        }
        if rest.is_empty() {
            return true;
        }
        match last.combinator {
            Some(SelectorCombinator::Child) => match self.parent(node_id) {
                Some(parent) if self.element(parent).is_some() => {
                    self.matches_selector_chain(parent, rest)
                }
                _ => false,
            },
            _ => {
                let mut cursor = self.parent(node_id);
                while let Some(ancestor) = cursor {
                    if self.element(ancestor).is_some()
                        && self.matches_selector_chain(ancestor, rest)
                    {
                        return true;
                    }
                    cursor = self.parent(ancestor);
                }
                false
            }
        }
    }

    fn matches_step(&self, node_id: NodeId, step: &SelectorStep) -> bool {
        let Some(element) = self.element(node_id) else {
            return false;
        };

        if let Some(tag) = &step.tag {
            if !element.tag_name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }

        if let Some(id) = &step.id {
            if element.attrs.get("id") != Some(id) {
                return false;
            }
        }

        for class_name in &step.classes {
            if !has_class(element, class_name) {
                return false;
            }
        }

        for attr in &step.attrs {
            if !matches_attr_condition(element, attr) {
                return false;
            }
        }

        true
    }

    fn dump_node(&self, node_id: NodeId) -> String {
        let Some(node) = self.nodes.get(node_id.0) else {
            return String::new();
        };
        match &node.node_type {
            NodeType::Text(text) => text.clone(),
            NodeType::Document => node
                .children
                .clone()
                .into_iter()
                .map(|child| self.dump_node(child))
                .collect(),
            NodeType::Element(element) => {
                stacker::maybe_grow(64 * 1024, 1024 * 1024, || {
                    let mut out = String::new();
                    out.push('<');
                    out.push_str(&element.tag_name);
                    let mut attrs: Vec<_> = element.attrs.iter().collect();
                    attrs.sort();
                    for (name, value) in attrs {
                        out.push_str(&format!(" {name}=\"{value}\""));
                    }
                    out.push('>');
                    if is_void_tag(&element.tag_name) {
                        return out;
                    }
                    for child in node.children.clone() {
                        out.push_str(&self.dump_node(child));
                    }
                    out.push_str(&format!("</{}>", element.tag_name));
                    out
                })
            }
        }
    }
}

fn matches_attr_condition(element: &Element, condition: &SelectorAttrCondition) -> bool {
    match condition {
        SelectorAttrCondition::Exists { key } => element.attrs.contains_key(key),
        SelectorAttrCondition::Eq { key, value } => {
            element.attrs.get(key).map(String::as_str) == Some(value.as_str())
        }
        SelectorAttrCondition::StartsWith { key, value } => !value.is_empty()
            && element
                .attrs
                .get(key)
                .is_some_and(|attr| attr.starts_with(value)),
        SelectorAttrCondition::EndsWith { key, value } => !value.is_empty()
            && element
                .attrs
                .get(key)
                .is_some_and(|attr| attr.ends_with(value)),
        SelectorAttrCondition::Contains { key, value } => !value.is_empty()
            && element
                .attrs
                .get(key)
                .is_some_and(|attr| attr.contains(value.as_str())),
        SelectorAttrCondition::Includes { key, value } => element
            .attrs
            .get(key)
            .is_some_and(|attr| attr.split_whitespace().any(|token| token == value)),
        SelectorAttrCondition::DashMatch { key, value } => {
            element.attrs.get(key).is_some_and(|attr| {
                attr == value || attr.starts_with(&format!("{value}-"))
            })
        }
    }
}

fn has_class(element: &Element, class_name: &str) -> bool {
    element
        .attrs
        .get("class")
        .map(|classes| classes.split_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}

fn class_tokens(class_attr: Option<&str>) -> Vec<String> {
    class_attr
        .map(|value| {
            value
                .split_whitespace()
                .filter(|token| !token.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn set_class_attr(element: &mut Element, classes: &[String]) {
    if classes.is_empty() {
        element.attrs.remove("class");
    } else {
        element.attrs.insert("class".to_string(), classes.join(" "));
    }
}

pub(crate) fn parse_style_declarations(style_attr: Option<&str>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let Some(style_attr) = style_attr else {
        return out;
    };

    for decl in style_attr.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let Some((name, value)) = decl.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().to_string();
        if let Some(pos) = out.iter().position(|(existing, _)| existing == &name) {
            out[pos].1 = value;
        } else {
            out.push((name, value));
        }
    }

    out
}

fn serialize_style_declarations(decls: &[(String, String)]) -> String {
    let mut out = String::new();
    for (idx, (name, value)) in decls.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push(';');
    }
    out
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut it = value.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = it.next() else {
            return out;
        };
        out.push(ch);
    }
    if it.next().is_some() {
        out.push_str("...");
    }
    out
}

fn parse_html(html: &str) -> Result<Dom> {
    let mut dom = Dom::new();

    let mut stack = vec![dom.root];
    let bytes = html.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            if let Some(end) = find_subslice(bytes, i + 4, b"-->") {
                i = end + 3;
            } else {
                return Err(Error::HtmlParse("unclosed HTML comment".into()));
            }
            continue;
        }

        if starts_with_at(bytes, i, b"<!") {
            // Doctype and friends.
            while i < bytes.len() && bytes[i] != b'>' {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(Error::HtmlParse("unclosed markup declaration".into()));
            }
            i += 1;
            continue;
        }

        if bytes[i] == b'<' {
            if starts_with_at(bytes, i, b"</") {
                let (tag, next) = parse_end_tag(html, i)?;
                i = next;

                while stack.len() > 1 {
                    let top = *stack
                        .last()
                        .ok_or_else(|| Error::HtmlParse("invalid stack state".into()))?;
                    let top_tag = dom.tag_name(top).unwrap_or("");
                    stack.pop();
                    if top_tag.eq_ignore_ascii_case(&tag) {
                        break;
                    }
                }
                continue;
            }

            let (tag, attrs, self_closing, next) = parse_start_tag(html, i)?;
            i = next;

            let parent = *stack
                .last()
                .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
            let node = dom.create_element(parent, tag.clone(), attrs);

            if tag.eq_ignore_ascii_case("script") || tag.eq_ignore_ascii_case("style") {
                let close = find_case_insensitive_end_tag(bytes, i, tag.as_bytes())
                    .ok_or_else(|| Error::HtmlParse(format!("unclosed <{tag}>")))?;
                if let Some(raw_body) = html.get(i..close) {
                    if !raw_body.is_empty() {
                        dom.create_text(node, raw_body.to_string());
                    }
                }
                i = close;
                let (_, after_end) = parse_end_tag(html, i)?;
                i = after_end;
                continue;
            }

            if !self_closing && !is_void_tag(&tag) {
                stack.push(node);
            }
            continue;
        }

        let text_start = i;
        while i < bytes.len() && bytes[i] != b'<' {
            i += 1;
        }

        if let Some(text) = html.get(text_start..i) {
            if !text.is_empty() {
                let parent = *stack
                    .last()
                    .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
                dom.create_text(parent, text.to_string());
            }
        }
    }

    dom.initialize_form_control_values();
    Ok(dom)
}

fn parse_start_tag(
    html: &str,
    at: usize,
) -> Result<(String, HashMap<String, String>, bool, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;
    if bytes.get(i) != Some(&b'<') {
        return Err(Error::HtmlParse("expected '<'".into()));
    }
    i += 1;

    skip_ws(bytes, &mut i);
    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid tag name".into()))?
        .to_ascii_lowercase();

    if tag.is_empty() {
        return Err(Error::HtmlParse("empty tag name".into()));
    }

    let mut attrs = HashMap::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed start tag".into()));
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'>' {
            self_closing = true;
            i += 2;
            break;
        }

        let name_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }

        let name = html
            .get(name_start..i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute name".into()))?
            .to_ascii_lowercase();

        if name.is_empty() {
            return Err(Error::HtmlParse("invalid attribute name".into()));
        }

        skip_ws(bytes, &mut i);

        let value = if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, bytes, &mut i)?
        } else {
            "true".to_string()
        };

        attrs.insert(name, value);
    }

    Ok((tag, attrs, self_closing, i))
}

fn parse_end_tag(html: &str, at: usize) -> Result<(String, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;

    if !(bytes.get(i) == Some(&b'<') && bytes.get(i + 1) == Some(&b'/')) {
        return Err(Error::HtmlParse("expected end tag".into()));
    }
    i += 2;
    skip_ws(bytes, &mut i);

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid end tag".into()))?
        .to_ascii_lowercase();

    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(Error::HtmlParse("unclosed end tag".into()));
    }

    Ok((tag, i + 1))
}

fn parse_attr_value(html: &str, bytes: &[u8], i: &mut usize) -> Result<String> {
    if *i >= bytes.len() {
        return Err(Error::HtmlParse("missing attribute value".into()));
    }

    if bytes[*i] == b'\'' || bytes[*i] == b'"' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        while *i < bytes.len() && bytes[*i] != quote {
            *i += 1;
        }
        if *i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed attribute value".into()));
        }
        let value = html
            .get(start..*i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
            .to_string();
        *i += 1;
        Ok(value)
    } else {
        let start = *i;
        while *i < bytes.len() && !bytes[*i].is_ascii_whitespace() && bytes[*i] != b'>' {
            *i += 1;
        }
        Ok(html
            .get(start..*i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
            .to_string())
    }
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-'
}

fn is_attr_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':'
}

fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes.len() >= at + needle.len() && &bytes[at..at + needle.len()] == needle
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || bytes.len() < needle.len() {
        return None;
    }
    (from..=bytes.len() - needle.len()).find(|&i| &bytes[i..i + needle.len()] == needle)
}

fn find_case_insensitive_end_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let mut i = from;
    while i + 2 + tag.len() <= bytes.len() {
        if bytes[i] == b'<' && bytes[i + 1] == b'/' {
            let candidate = &bytes[i + 2..i + 2 + tag.len()];
            if candidate.eq_ignore_ascii_case(tag) {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone)]
pub(crate) struct Listener {
    pub(crate) handler: Handler,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct ListenerStore {
    map: HashMap<NodeId, HashMap<String, Vec<Listener>>>,
}

impl ListenerStore {
    pub(crate) fn add(&mut self, node_id: NodeId, event: &str, listener: Listener) {
        self.map
            .entry(node_id)
            .or_default()
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    pub(crate) fn get(&self, node_id: NodeId, event: &str) -> Vec<Listener> {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EventState {
    pub(crate) event_type: String,
    pub(crate) target: NodeId,
    pub(crate) current_target: NodeId,
    pub(crate) default_prevented: bool,
}

impl EventState {
    fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            default_prevented: false,
        }
    }

    pub(crate) fn prevent_default(&mut self) {
        self.default_prevented = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ScrollAnimation {
    from: f64,
    to: f64,
    frame: u32,
    frames_total: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct IntersectionWatcher {
    pub(crate) threshold: f64,
    pub(crate) root_margin_bottom: f64,
    pub(crate) targets: Vec<NodeId>,
    pub(crate) handler: Handler,
}

#[derive(Debug)]
pub struct Page {
    dom: Dom,
    listeners: ListenerStore,
    layout: LayoutResult,
    viewport: Viewport,
    scroll_y: f64,
    location_path: String,
    effects: EffectsState,
    watchers: Vec<IntersectionWatcher>,
    frame_queue: Vec<Handler>,
    frame_count: u64,
    frame_step_limit: usize,
    scroll_animation: Option<ScrollAnimation>,
    alerts: Vec<String>,
    trace: bool,
    trace_events: bool,
    trace_frames: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_to_stderr: bool,
}

impl Page {
    pub fn open(html: &str) -> Result<Self> {
        Self::open_at("/", html)
    }

    pub fn open_at(path: &str, html: &str) -> Result<Self> {
        let dom = parse_html(html)?;
        let mut page = Self {
            dom,
            listeners: ListenerStore::default(),
            layout: LayoutResult::default(),
            viewport: Viewport::default(),
            scroll_y: 0.0,
            location_path: normalize_location(path),
            effects: EffectsState::default(),
            watchers: Vec::new(),
            frame_queue: Vec::new(),
            frame_count: 0,
            frame_step_limit: 10_000,
            scroll_animation: None,
            alerts: Vec::new(),
            trace: false,
            trace_events: true,
            trace_frames: true,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_to_stderr: true,
        };
        page.relayout();
        Ok(page)
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace_to_stderr = enabled;
    }

    pub fn set_trace_events(&mut self, enabled: bool) {
        self.trace_events = enabled;
    }

    pub fn set_trace_frames(&mut self, enabled: bool) {
        self.trace_frames = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Runtime(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
        Ok(())
    }

    pub fn set_frame_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::Runtime(
                "set_frame_step_limit requires at least 1 step".into(),
            ));
        }
        self.frame_step_limit = max_steps;
        Ok(())
    }

    pub fn set_viewport(&mut self, width: f64, height: f64) -> Result<()> {
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(Error::Runtime(
                "viewport dimensions must be positive and finite".into(),
            ));
        }
        self.viewport = Viewport { width, height };
        self.relayout();
        Ok(())
    }

    pub fn scroll_offset(&self) -> f64 {
        self.scroll_y
    }

    pub fn last_scroll_offset(&self) -> f64 {
        self.effects.last_scroll
    }

    pub fn document_height(&self) -> f64 {
        self.layout.document_height
    }

    pub fn pending_frames(&self) -> usize {
        self.frame_queue.len()
    }

    pub fn is_scroll_animating(&self) -> bool {
        self.scroll_animation.is_some()
    }

    pub fn take_alerts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.alerts)
    }

    pub fn scroll_to(&mut self, offset: f64) -> Result<()> {
        if !offset.is_finite() {
            return Err(Error::Runtime("scroll offset must be finite".into()));
        }
        self.scroll_animation = None;
        self.set_scroll_internal(offset)?;
        self.check_intersections()?;
        Ok(())
    }

    pub fn scroll_by(&mut self, delta: f64) -> Result<()> {
        self.scroll_to(self.scroll_y + delta)
    }

    pub fn click(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }

        let event = self.dispatch_event(target, "click")?;
        if event.default_prevented {
            return Ok(());
        }

        if self.dom.tag_name(target) == Some("a") {
            if let Some(href) = self.dom.attr(target, "href") {
                if let Some(fragment) = href.strip_prefix('#') {
                    if fragment.is_empty() {
                        self.scroll_to(0.0)?;
                    } else if let Some(node) = self.dom.by_id(fragment) {
                        let top = self.rect(node).map(|rect| rect.top).unwrap_or(0.0);
                        self.scroll_to(top)?;
                    }
                    return Ok(());
                }
            }
        }

        if self.is_submit_control(target) {
            if let Some(form) = self.form_owner(target) {
                self.dispatch_event(form, "submit")?;
            }
        }

        Ok(())
    }

    pub fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }
        self.dom.set_value(target, text)?;
        self.dispatch_event(target, "input")?;
        Ok(())
    }

    pub fn submit(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;

        let form = if self.dom.tag_name(target) == Some("form") {
            Some(target)
        } else {
            self.form_owner(target)
        };

        if let Some(form) = form {
            self.dispatch_event(form, "submit")?;
        }

        Ok(())
    }

    pub fn dispatch(&mut self, selector: &str, event: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dispatch_event(target, event)?;
        Ok(())
    }

    pub fn run_frame(&mut self) -> Result<()> {
        self.frame_count += 1;
        if self.trace && self.trace_frames {
            let line = format!(
                "[frame] n={} pending_tasks={} animating={}",
                self.frame_count,
                self.frame_queue.len(),
                self.scroll_animation.is_some()
            );
            self.trace_line(line);
        }
        self.step_scroll_animation()?;
        let tasks = std::mem::take(&mut self.frame_queue);
        for handler in tasks {
            let root = self.dom.root();
            self.run_handler(handler, root, None)?;
        }
        self.check_intersections()?;
        Ok(())
    }

    pub fn run_frames(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.run_frame()?;
        }
        Ok(())
    }

    /// Runs frames until no scroll animation or frame task remains.
    pub fn settle(&mut self) -> Result<()> {
        let mut steps = 0usize;
        while self.scroll_animation.is_some() || !self.frame_queue.is_empty() {
            if steps >= self.frame_step_limit {
                return Err(Error::Runtime(format!(
                    "frame step limit of {} exceeded while settling pending work",
                    self.frame_step_limit
                )));
            }
            steps += 1;
            self.run_frame()?;
        }
        Ok(())
    }

    pub fn text(&self, selector: &str) -> Result<String> {
        let node = self.select_one(selector)?;
        Ok(self.dom.text_content(node))
    }

    pub fn value(&self, selector: &str) -> Result<String> {
        let node = self.select_one(selector)?;
        self.dom.value(node)
    }

    pub fn attr(&self, selector: &str, name: &str) -> Result<Option<String>> {
        let node = self.select_one(selector)?;
        Ok(self.dom.attr(node, name))
    }

    pub fn style(&self, selector: &str, name: &str) -> Result<String> {
        let node = self.select_one(selector)?;
        self.dom.style_get(node, name)
    }

    pub fn has_class(&self, selector: &str, class_name: &str) -> Result<bool> {
        let node = self.select_one(selector)?;
        self.dom.class_contains(node, class_name)
    }

    pub fn count(&self, selector: &str) -> Result<usize> {
        Ok(self.dom.query_selector_all(selector)?.len())
    }

    pub fn document_rect(&self, selector: &str) -> Result<Rect> {
        let node = self.select_one(selector)?;
        self.rect(node)
            .ok_or_else(|| Error::Runtime(format!("no layout box for selector: {selector}")))
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let node = self.select_one(selector)?;
        let actual = self.dom.text_content(node);
        if actual == expected {
            Ok(())
        } else {
            Err(self.assertion_failed(selector, expected, &actual, node))
        }
    }

    pub fn assert_value(&self, selector: &str, expected: &str) -> Result<()> {
        let node = self.select_one(selector)?;
        let actual = self.dom.value(node)?;
        if actual == expected {
            Ok(())
        } else {
            Err(self.assertion_failed(selector, expected, &actual, node))
        }
    }

    pub fn assert_has_class(
        &self,
        selector: &str,
        class_name: &str,
        expected: bool,
    ) -> Result<()> {
        let node = self.select_one(selector)?;
        let actual = self.dom.class_contains(node, class_name)?;
        if actual == expected {
            Ok(())
        } else {
            Err(self.assertion_failed(
                selector,
                &format!("class `{class_name}` present: {expected}"),
                &format!("class `{class_name}` present: {actual}"),
                node,
            ))
        }
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        self.select_one(selector)?;
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let node = self.select_one(selector)?;
        Ok(self.dom.dump_node(node))
    }

    fn assertion_failed(
        &self,
        selector: &str,
        expected: &str,
        actual: &str,
        node: NodeId,
    ) -> Error {
        Error::AssertionFailed {
            selector: selector.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
            dom_snippet: self.node_snippet(node),
        }
    }

    fn node_snippet(&self, node: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node), 160)
    }

    fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    pub(crate) fn rect(&self, node: NodeId) -> Option<Rect> {
        self.layout.rects.get(&node).copied()
    }

    pub(crate) fn relayout(&mut self) {
        self.layout = compute_layout(&self.dom, &self.viewport);
        self.scroll_y = self.scroll_y.clamp(0.0, self.max_scroll());
    }

    fn max_scroll(&self) -> f64 {
        (self.layout.document_height - self.viewport.height).max(0.0)
    }

    fn set_scroll_internal(&mut self, offset: f64) -> Result<bool> {
        let clamped = offset.clamp(0.0, self.max_scroll());
        if (clamped - self.scroll_y).abs() < f64::EPSILON {
            return Ok(false);
        }
        self.scroll_y = clamped;
        self.dispatch_document_event("scroll")?;
        Ok(true)
    }

    pub(crate) fn start_smooth_scroll(&mut self, target: f64) -> Result<()> {
        let to = target.clamp(0.0, self.max_scroll());
        if (to - self.scroll_y).abs() < f64::EPSILON {
            self.scroll_animation = None;
            return Ok(());
        }
        self.scroll_animation = Some(ScrollAnimation {
            from: self.scroll_y,
            to,
            frame: 0,
            frames_total: effects::SMOOTH_SCROLL_FRAMES,
        });
        Ok(())
    }

    fn step_scroll_animation(&mut self) -> Result<()> {
        let Some(mut animation) = self.scroll_animation.take() else {
            return Ok(());
        };
        animation.frame += 1;
        let t = f64::from(animation.frame) / f64::from(animation.frames_total);
        let eased = ease_out_cubic(t);
        let offset = animation.from + (animation.to - animation.from) * eased;
        if animation.frame < animation.frames_total {
            self.scroll_animation = Some(animation);
        }
        self.set_scroll_internal(offset)?;
        Ok(())
    }

    pub(crate) fn request_frame(&mut self, handler: Handler) {
        self.frame_queue.push(handler);
    }

    pub(crate) fn dispatch_document_event(&mut self, event_type: &str) -> Result<EventState> {
        let root = self.dom.root();
        self.dispatch_event(root, event_type)
    }

    pub(crate) fn dispatch_event(
        &mut self,
        target: NodeId,
        event_type: &str,
    ) -> Result<EventState> {
        let mut event = EventState::new(event_type, target);

        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.dom.parent(node);
        }

        // Target first, then bubble toward the document root.
        for node in path {
            event.current_target = node;
            for listener in self.listeners.get(node, event_type) {
                if self.trace && self.trace_events {
                    let line = format!(
                        "[event] {} target={} current={} handler={:?} default_prevented={}",
                        event.event_type,
                        self.trace_node_label(event.target),
                        self.trace_node_label(node),
                        listener.handler,
                        event.default_prevented
                    );
                    self.trace_line(line);
                }
                self.run_handler(listener.handler, node, Some(&mut event))?;
            }
        }

        Ok(event)
    }

    fn is_submit_control(&self, node: NodeId) -> bool {
        match self.dom.tag_name(node) {
            Some("button") => {
                let button_type = self
                    .dom
                    .attr(node, "type")
                    .unwrap_or_else(|| "submit".to_string());
                button_type.eq_ignore_ascii_case("submit")
            }
            Some("input") => self
                .dom
                .attr(node, "type")
                .is_some_and(|t| t.eq_ignore_ascii_case("submit")),
            _ => false,
        }
    }

    fn form_owner(&self, node: NodeId) -> Option<NodeId> {
        let mut cursor = self.dom.parent(node);
        while let Some(ancestor) = cursor {
            if self.dom.tag_name(ancestor) == Some("form") {
                return Some(ancestor);
            }
            cursor = self.dom.parent(ancestor);
        }
        None
    }

    pub(crate) fn unobserve(&mut self, node: NodeId) {
        for watcher in &mut self.watchers {
            watcher.targets.retain(|target| *target != node);
        }
    }

    fn is_observed(&self, node: NodeId) -> bool {
        self.watchers
            .iter()
            .any(|watcher| watcher.targets.contains(&node))
    }

    pub(crate) fn check_intersections(&mut self) -> Result<()> {
        let mut fired = Vec::new();
        for watcher in &self.watchers {
            for &node in &watcher.targets {
                let Some(rect) = self.rect(node) else {
                    continue;
                };
                let ratio = intersection_ratio(
                    &rect,
                    self.scroll_y,
                    self.viewport.height,
                    watcher.root_margin_bottom,
                );
                if ratio >= watcher.threshold {
                    fired.push((watcher.handler.clone(), node));
                }
            }
        }
        for (handler, node) in fired {
            // An earlier delivery in this batch may have unobserved the node.
            if !self.is_observed(node) {
                continue;
            }
            self.run_handler(handler, node, None)?;
        }
        Ok(())
    }

    fn trace_node_label(&self, node: NodeId) -> String {
        match self.dom.tag_name(node) {
            Some(tag) => match self.dom.attr(node, "id") {
                Some(id) => format!("{tag}#{id}"),
                None => tag.to_string(),
            },
            None => "document".to_string(),
        }
    }

    pub(crate) fn trace_line(&mut self, line: String) {
        if !self.trace {
            return;
        }
        if self.trace_to_stderr {
            eprintln!("{line}");
        }
        self.trace_logs.push(line);
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
    }
}

fn intersection_ratio(
    rect: &Rect,
    scroll_y: f64,
    viewport_height: f64,
    margin_bottom: f64,
) -> f64 {
    let band_top = scroll_y;
    let band_bottom = scroll_y + viewport_height - margin_bottom;
    if band_bottom <= band_top {
        return 0.0;
    }
    if rect.height <= 0.0 {
        return if rect.top >= band_top && rect.top <= band_bottom {
            1.0
        } else {
            0.0
        };
    }
    let overlap = rect.bottom().min(band_bottom) - rect.top.max(band_top);
    (overlap / rect.height).clamp(0.0, 1.0)
}

fn ease_out_cubic(t: f64) -> f64 {
    let inverse = 1.0 - t.clamp(0.0, 1.0);
    1.0 - inverse * inverse * inverse
}

fn normalize_location(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        return "/".to_string();
    }
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
