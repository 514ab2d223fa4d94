//! In-process model of the live page: an element arena with inline and
//! stylesheet styles, a viewport and a computed layout rectangle per element.

pub mod guard;
pub mod markup;
pub mod selector;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::Viewport;
use markup::MarkupNode;
use selector::SelectorList;

pub use guard::ProtectedSet;

pub type ElementId = usize;

pub const TEXT_TAG: &str = "#text";

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

#[derive(Clone, Debug, Default)]
pub struct Element {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    /// Stylesheet defaults; inline `style` wins over them.
    pub base_style: BTreeMap<String, String>,
    pub style: BTreeMap<String, String>,
    pub text: String,
    pub disabled: bool,
    pub parent: Option<ElementId>,
    pub children: Vec<ElementId>,
    /// Static layout slot used when styles do not position the element.
    pub frame: Rect,
    /// Page clock at the last inline style change.
    pub style_changed_ms: u64,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn is_text(&self) -> bool {
        self.tag == TEXT_TAG
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn add_class(&mut self, class: &str) {
        if !class.is_empty() && !self.has_class(class) {
            self.classes.push(class.to_string());
        }
    }

    pub fn remove_class(&mut self, class: &str) {
        self.classes.retain(|c| c != class);
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "id" => self.id.clone(),
            "class" => (!self.classes.is_empty()).then(|| self.classes.join(" ")),
            "style" => (!self.style.is_empty()).then(|| style_text(&self.style)),
            "disabled" => self.disabled.then(String::new),
            _ => self.attrs.get(name).cloned(),
        }
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        match name {
            "id" => self.id = Some(value.to_string()).filter(|v| !v.is_empty()),
            "class" => {
                self.classes = value.split_whitespace().map(str::to_string).collect();
            }
            "style" => self.style = parse_style(value),
            "disabled" => self.disabled = true,
            _ => {
                self.attrs.insert(name.to_string(), value.to_string());
            }
        }
    }

    pub fn remove_attribute(&mut self, name: &str) {
        match name {
            "id" => self.id = None,
            "class" => self.classes.clear(),
            "style" => self.style.clear(),
            "disabled" => self.disabled = false,
            _ => {
                self.attrs.remove(name);
            }
        }
    }
}

/// Parse a `prop: value; prop: value` declaration block.
pub fn parse_style(css: &str) -> BTreeMap<String, String> {
    css.split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let prop = normalize_property(prop);
            let value = value.trim();
            (!prop.is_empty() && !value.is_empty()).then(|| (prop, value.to_string()))
        })
        .collect()
}

pub fn style_text(style: &BTreeMap<String, String>) -> String {
    style
        .iter()
        .map(|(k, v)| format!("{k}: {v};"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `fontSize` and `font-size` both address `font-size`.
pub fn normalize_property(prop: &str) -> String {
    let prop = prop.trim();
    if prop.starts_with("--") {
        return prop.to_string();
    }
    let mut out = String::with_capacity(prop.len() + 4);
    for ch in prop.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out.to_ascii_lowercase()
}

/// Parse a CSS length against the viewport; `None` for keywords and expressions.
pub fn parse_length(value: &str, viewport: &Viewport, relative_to: f64) -> Option<f64> {
    let v = value.trim();
    let (number, unit) = split_unit(v);
    let n: f64 = number.parse().ok()?;
    match unit {
        "" | "px" => Some(n),
        "vw" => Some(n * viewport.width / 100.0),
        "vh" => Some(n * viewport.height / 100.0),
        "%" => Some(n * relative_to / 100.0),
        "rem" | "em" => Some(n * 16.0),
        _ => None,
    }
}

fn split_unit(v: &str) -> (&str, &str) {
    let idx = v
        .char_indices()
        .find(|&(_, c)| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .map_or(v.len(), |(i, _)| i);
    (&v[..idx], &v[idx..])
}

#[derive(Clone, Debug, Serialize)]
pub struct NodeSnapshot {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub style: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PageSnapshot {
    pub title: String,
    pub favicon: String,
    pub cursor: String,
    pub viewport: Viewport,
    pub element_count: usize,
    pub root: NodeSnapshot,
}

pub struct Page {
    nodes: Vec<Option<Element>>,
    root: ElementId,
    body: ElementId,
    pub title: String,
    pub favicon: String,
    pub cursor: String,
    pub viewport: Viewport,
    /// Host time in ms, stamped onto style changes.
    pub clock_ms: u64,
}

impl Page {
    /// The standard ritual page: output surface, input area, overlays and render targets.
    pub fn new(viewport: Viewport) -> Self {
        let mut page = Self {
            nodes: Vec::new(),
            root: 0,
            body: 0,
            title: "void".to_string(),
            favicon: String::new(),
            cursor: "default".to_string(),
            viewport,
            clock_ms: 0,
        };
        let (w, h) = (viewport.width, viewport.height);
        page.root = page.alloc(Element::new("html"));
        let head = page.build(page.root, "head", None, &[]);
        page.build(head, "title", None, &[]);
        page.body = page.build(page.root, "body", None, &[("background", "#050507"), ("color", "#999")]);
        let body = page.body;
        page.set_frame(page.root, Rect::new(0.0, 0.0, w, h));
        page.set_frame(body, Rect::new(0.0, 0.0, w, h));

        let stage = page.build(body, "div", Some("stage"), &[("position", "relative")]);
        page.set_frame(stage, Rect::new(0.0, 0.0, w, h));
        let output = page.build(
            stage,
            "div",
            Some("output"),
            &[("font-size", "16px"), ("opacity", "1"), ("visibility", "visible"), ("display", "block")],
        );
        page.set_frame(output, Rect::new(w * 0.1, 40.0, w * 0.8, (h - 200.0).max(40.0)));
        let area = page.build(
            stage,
            "div",
            Some("input-area"),
            &[("position", "relative"), ("display", "block"), ("opacity", "1")],
        );
        page.set_frame(area, Rect::new(w * 0.1, (h - 120.0).max(0.0), w * 0.8, 60.0));
        let input = page.build(area, "input", Some("prompt-input"), &[("display", "block"), ("opacity", "1")]);
        page.set_frame(input, Rect::new(w * 0.1, (h - 110.0).max(0.0), w * 0.8, 40.0));
        let options = page.build(area, "div", Some("options"), &[("display", "none")]);
        page.set_frame(options, Rect::new(w * 0.1, (h - 120.0).max(0.0), w * 0.8, 60.0));

        for (id, position) in [
            ("overlay", "fixed"),
            ("spawned", "fixed"),
            ("crt", "fixed"),
            ("scene-3d", "fixed"),
            ("canvas-2d", "fixed"),
        ] {
            let el = page.build(body, "div", Some(id), &[("position", position), ("pointer-events", "none")]);
            page.set_frame(el, Rect::new(0.0, 0.0, w, h));
        }
        let crash = page.build(body, "div", Some("crash-screen"), &[("display", "none"), ("position", "fixed")]);
        page.set_frame(crash, Rect::new(0.0, 0.0, w, h));
        for class in ["ci", "ct", "cb", "cc", "cx"] {
            let part = page.build(crash, "div", None, &[]);
            if let Some(el) = page.get_mut(part) {
                el.add_class(class);
            }
        }
        let feed = page.build(body, "video", Some("capture-feed"), &[("display", "none")]);
        page.set_frame(feed, Rect::new(0.0, 0.0, 320.0, 240.0));
        page
    }

    fn alloc(&mut self, element: Element) -> ElementId {
        self.nodes.push(Some(element));
        self.nodes.len() - 1
    }

    fn build(
        &mut self,
        parent: ElementId,
        tag: &str,
        id: Option<&str>,
        base: &[(&str, &str)],
    ) -> ElementId {
        let mut el = Element::new(tag);
        el.id = id.map(str::to_string);
        el.base_style = base
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let idx = self.alloc(el);
        self.append_child(parent, idx);
        idx
    }

    fn set_frame(&mut self, id: ElementId, rect: Rect) {
        if let Some(el) = self.get_mut(id) {
            el.frame = rect;
        }
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn body(&self) -> ElementId {
        self.body
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.nodes.get_mut(id).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.get(id).is_some()
    }

    /// Attached to the document (reachable from the root).
    pub fn is_connected(&self, id: ElementId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == self.root {
                return true;
            }
            cursor = self.get(current).and_then(|el| el.parent);
        }
        false
    }

    pub fn element_count(&self) -> usize {
        self.nodes.iter().flatten().filter(|el| !el.is_text()).count()
    }

    pub fn by_id(&self, id: &str) -> Option<ElementId> {
        self.descendants(self.root)
            .into_iter()
            .find(|&idx| self.get(idx).and_then(|el| el.id.as_deref()) == Some(id))
    }

    pub fn create_element(&mut self, tag: &str) -> ElementId {
        self.alloc(Element::new(tag))
    }

    pub fn create_text(&mut self, text: &str) -> ElementId {
        let mut el = Element::new(TEXT_TAG);
        el.text = text.to_string();
        self.alloc(el)
    }

    pub fn append_child(&mut self, parent: ElementId, child: ElementId) {
        if parent == child || !self.contains(parent) || !self.contains(child) {
            return;
        }
        if self.ancestors(parent).contains(&child) {
            return;
        }
        self.detach(child);
        if let Some(el) = self.get_mut(child) {
            el.parent = Some(parent);
        }
        if let Some(p) = self.get_mut(parent) {
            p.children.push(child);
        }
    }

    fn detach(&mut self, id: ElementId) {
        let parent = self.get(id).and_then(|el| el.parent);
        if let Some(parent) = parent {
            if let Some(p) = self.get_mut(parent) {
                p.children.retain(|&c| c != id);
            }
        }
        if let Some(el) = self.get_mut(id) {
            el.parent = None;
        }
    }

    /// Detach and free an element with its subtree. The root cannot be removed.
    pub fn remove(&mut self, id: ElementId) -> bool {
        if id == self.root || !self.contains(id) {
            return false;
        }
        self.detach(id);
        for idx in self.descendants(id) {
            if let Some(slot) = self.nodes.get_mut(idx) {
                *slot = None;
            }
        }
        true
    }

    pub fn clear_children(&mut self, id: ElementId) {
        let children = self.get(id).map(|el| el.children.clone()).unwrap_or_default();
        for child in children {
            self.remove(child);
        }
    }

    pub fn ancestors(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut cursor = self.get(id).and_then(|el| el.parent);
        while let Some(current) = cursor {
            out.push(current);
            cursor = self.get(current).and_then(|el| el.parent);
        }
        out
    }

    /// `id` and everything below it, document order.
    pub fn descendants(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(el) = self.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(el.children.iter().rev().copied());
        }
        out
    }

    pub fn query(&self, selector: &str) -> Option<ElementId> {
        self.query_all(selector).into_iter().next()
    }

    pub fn query_all(&self, selector: &str) -> Vec<ElementId> {
        self.query_all_within(self.root, selector, true)
    }

    pub fn query_all_within(&self, scope: ElementId, selector: &str, inclusive: bool) -> Vec<ElementId> {
        let Some(list) = SelectorList::parse(selector) else {
            return Vec::new();
        };
        self.descendants(scope)
            .into_iter()
            .filter(|&idx| inclusive || idx != scope)
            .filter(|&idx| self.get(idx).map_or(false, |el| !el.is_text()))
            .filter(|&idx| list.matches(self, idx))
            .collect()
    }

    pub fn matches(&self, id: ElementId, selector: &str) -> bool {
        SelectorList::parse(selector).map_or(false, |list| list.matches(self, id))
    }

    pub fn computed_style(&self, id: ElementId, prop: &str) -> Option<String> {
        let el = self.get(id)?;
        let prop = normalize_property(prop);
        el.style
            .get(&prop)
            .or_else(|| el.base_style.get(&prop))
            .cloned()
    }

    pub fn set_style(&mut self, id: ElementId, prop: &str, value: &str) {
        let prop = normalize_property(prop);
        if prop.is_empty() {
            return;
        }
        let now = self.clock_ms;
        if let Some(el) = self.get_mut(id) {
            let value = value.trim();
            if value.is_empty() {
                el.style.remove(&prop);
            } else {
                el.style.insert(prop, value.to_string());
            }
            el.style_changed_ms = now;
        }
    }

    pub fn clear_style(&mut self, id: ElementId, prop: &str) {
        self.set_style(id, prop, "");
    }

    /// Replace the whole inline declaration block (`style.cssText = ...`).
    pub fn replace_style(&mut self, id: ElementId, css: &str) {
        let now = self.clock_ms;
        if let Some(el) = self.get_mut(id) {
            el.style = parse_style(css);
            el.style_changed_ms = now;
        }
    }

    /// `setAttribute`; a `style` write counts as a style change.
    pub fn set_attribute(&mut self, id: ElementId, name: &str, value: &str) {
        let now = self.clock_ms;
        if let Some(el) = self.get_mut(id) {
            el.set_attribute(name, value);
            if name == "style" {
                el.style_changed_ms = now;
            }
        }
    }

    pub fn remove_attribute(&mut self, id: ElementId, name: &str) {
        let now = self.clock_ms;
        if let Some(el) = self.get_mut(id) {
            el.remove_attribute(name);
            if name == "style" {
                el.style_changed_ms = now;
            }
        }
    }

    pub fn style_changed_ms(&self, id: ElementId) -> u64 {
        self.get(id).map_or(0, |el| el.style_changed_ms)
    }

    pub fn text_content(&self, id: ElementId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|idx| self.get(idx))
            .map(|el| el.text.as_str())
            .collect()
    }

    /// Replace an element's content with a single text run.
    pub fn set_text(&mut self, id: ElementId, text: &str) {
        self.clear_children(id);
        if let Some(el) = self.get_mut(id) {
            el.text = text.to_string();
        }
    }

    /// Parse markup and append the resulting nodes to `parent`.
    pub fn inject(&mut self, parent: ElementId, markup: &str) -> Vec<ElementId> {
        let nodes = markup::parse_fragment(markup);
        let mut created = Vec::new();
        for node in &nodes {
            if let Some(idx) = self.materialize(node) {
                self.append_child(parent, idx);
                created.push(idx);
            }
        }
        created
    }

    /// Replace an element's children with parsed markup (`innerHTML = ...`).
    pub fn set_inner_markup(&mut self, id: ElementId, markup: &str) -> Vec<ElementId> {
        self.clear_children(id);
        if let Some(el) = self.get_mut(id) {
            el.text.clear();
        }
        self.inject(id, markup)
    }

    fn materialize(&mut self, node: &MarkupNode) -> Option<ElementId> {
        match node {
            MarkupNode::Text(text) => {
                if text.is_empty() {
                    return None;
                }
                Some(self.create_text(text))
            }
            MarkupNode::Element {
                tag,
                attrs,
                children,
            } => {
                let mut el = Element::new(tag);
                for (name, value) in attrs {
                    el.set_attribute(name, value);
                }
                let idx = self.alloc(el);
                for child in children {
                    if let Some(child_idx) = self.materialize(child) {
                        self.append_child(idx, child_idx);
                    }
                }
                Some(idx)
            }
        }
    }

    /// Layout rectangle after inline positioning, sizing and `display: none`.
    pub fn rect(&self, id: ElementId) -> Rect {
        let Some(el) = self.get(id) else {
            return Rect::default();
        };
        let hidden = self
            .ancestors(id)
            .into_iter()
            .chain(std::iter::once(id))
            .any(|idx| self.computed_style(idx, "display").as_deref() == Some("none"));
        let mut rect = el.frame;
        if hidden {
            return Rect::new(rect.x, rect.y, 0.0, 0.0);
        }
        let vp = &self.viewport;
        let position = self.computed_style(id, "position").unwrap_or_default();
        let left = self
            .computed_style(id, "left")
            .and_then(|v| parse_length(&v, vp, vp.width));
        let top = self
            .computed_style(id, "top")
            .and_then(|v| parse_length(&v, vp, vp.height));
        match position.as_str() {
            "fixed" | "absolute" => {
                if let Some(left) = left {
                    rect.x = left;
                }
                if let Some(top) = top {
                    rect.y = top;
                }
            }
            "relative" => {
                rect.x += left.unwrap_or(0.0);
                rect.y += top.unwrap_or(0.0);
            }
            _ => {}
        }
        if let Some(width) = self
            .computed_style(id, "width")
            .and_then(|v| parse_length(&v, vp, vp.width))
        {
            rect.width = width.max(0.0);
        }
        if let Some(height) = self
            .computed_style(id, "height")
            .and_then(|v| parse_length(&v, vp, vp.height))
        {
            rect.height = height.max(0.0);
        }
        rect
    }

    pub fn snapshot(&self) -> PageSnapshot {
        PageSnapshot {
            title: self.title.clone(),
            favicon: self.favicon.clone(),
            cursor: self.cursor.clone(),
            viewport: self.viewport,
            element_count: self.element_count(),
            root: self.snapshot_node(self.root),
        }
    }

    fn snapshot_node(&self, id: ElementId) -> NodeSnapshot {
        let Some(el) = self.get(id) else {
            return NodeSnapshot {
                tag: String::new(),
                id: None,
                classes: Vec::new(),
                attrs: BTreeMap::new(),
                style: BTreeMap::new(),
                text: String::new(),
                disabled: false,
                children: Vec::new(),
            };
        };
        NodeSnapshot {
            tag: el.tag.clone(),
            id: el.id.clone(),
            classes: el.classes.clone(),
            attrs: el.attrs.clone(),
            style: el.style.clone(),
            text: el.text.clone(),
            disabled: el.disabled,
            children: el.children.iter().map(|&c| self.snapshot_node(c)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Page {
        Page::new(Viewport::default())
    }

    #[test]
    fn standard_layout_has_ritual_targets() {
        let page = page();
        for id in [
            "stage", "output", "input-area", "prompt-input", "options", "overlay", "spawned",
            "crt", "crash-screen", "scene-3d", "canvas-2d", "capture-feed",
        ] {
            assert!(page.by_id(id).is_some(), "missing #{id}");
        }
        assert_eq!(page.query_all("#crash-screen > div").len(), 5);
    }

    #[test]
    fn inline_style_overrides_base_style() {
        let mut page = page();
        let output = page.by_id("output").expect("output exists");
        assert_eq!(page.computed_style(output, "font-size").as_deref(), Some("16px"));
        page.set_style(output, "fontSize", "4px");
        assert_eq!(page.computed_style(output, "font-size").as_deref(), Some("4px"));
        page.clear_style(output, "font-size");
        assert_eq!(page.computed_style(output, "font-size").as_deref(), Some("16px"));
    }

    #[test]
    fn rect_follows_positioning_and_display() {
        let mut page = page();
        let area = page.by_id("input-area").expect("input area exists");
        let base = page.rect(area);
        assert!(base.width > 30.0 && base.height > 10.0);

        page.set_style(area, "position", "fixed");
        page.set_style(area, "left", "-5000px");
        page.set_style(area, "width", "50vw");
        let moved = page.rect(area);
        assert_eq!(moved.x, -5000.0);
        assert_eq!(moved.width, 640.0);

        page.set_style(area, "display", "none");
        assert_eq!(page.rect(area).width, 0.0);
    }

    #[test]
    fn inject_and_remove_subtree() {
        let mut page = page();
        let spawned = page.by_id("spawned").expect("spawned exists");
        let created = page.inject(spawned, "<div class=\"ghost\"><span>boo</span></div><p>hi</p>");
        assert_eq!(created.len(), 2);
        assert_eq!(page.query_all(".ghost span").len(), 1);
        assert_eq!(page.text_content(spawned), "boohi");

        let before = page.element_count();
        assert!(page.remove(created[0]));
        assert_eq!(page.element_count(), before - 2);
        assert!(page.query(".ghost").is_none());
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut page = page();
        let root = page.root();
        assert!(!page.remove(root));
        assert!(page.contains(root));
    }

    #[test]
    fn append_child_rejects_cycles() {
        let mut page = page();
        let stage = page.by_id("stage").expect("stage exists");
        let output = page.by_id("output").expect("output exists");
        page.append_child(output, stage);
        assert_eq!(page.get(output).and_then(|el| el.parent), Some(stage));
        assert!(page.is_connected(stage));
    }

    #[test]
    fn style_block_parsing() {
        let style = parse_style("color: red; font-size:12px;; bad");
        assert_eq!(style.get("color").map(String::as_str), Some("red"));
        assert_eq!(style.get("font-size").map(String::as_str), Some("12px"));
        assert_eq!(style.len(), 2);
    }
}
