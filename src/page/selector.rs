//! Minimal CSS selector engine: type, universal, `#id`, `.class`, `[attr]`,
//! `[attr=value]`, `:root`, comma lists, descendant and `>` combinators.

use super::{ElementId, Page};

#[derive(Clone, Debug, PartialEq)]
enum AttrMatch {
    Present(String),
    Equals(String, String),
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
    root: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

/// Compounds left to right; `links[i]` joins `parts[i]` to `parts[i + 1]`.
#[derive(Clone, Debug, PartialEq)]
struct Complex {
    parts: Vec<Compound>,
    links: Vec<Combinator>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectorList {
    alternatives: Vec<Complex>,
}

impl SelectorList {
    /// `None` for empty or unsupported selectors.
    pub fn parse(selector: &str) -> Option<Self> {
        let alternatives = selector
            .split(',')
            .map(parse_complex)
            .collect::<Option<Vec<_>>>()?;
        if alternatives.is_empty() {
            return None;
        }
        Some(Self { alternatives })
    }

    pub fn matches(&self, page: &Page, id: ElementId) -> bool {
        self.alternatives
            .iter()
            .any(|complex| matches_from(complex, complex.parts.len() - 1, page, id))
    }
}

fn parse_complex(text: &str) -> Option<Complex> {
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    let mut links = Vec::new();
    let mut i = 0usize;
    let mut pending: Option<Combinator> = None;
    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            if !parts.is_empty() && pending.is_none() {
                pending = Some(Combinator::Descendant);
            }
            i += 1;
            continue;
        }
        if ch == '>' {
            if parts.is_empty() {
                return None;
            }
            pending = Some(Combinator::Child);
            i += 1;
            continue;
        }
        let (compound, next) = parse_compound(&chars, i)?;
        if !parts.is_empty() {
            links.push(pending.take().unwrap_or(Combinator::Descendant));
        }
        pending = None;
        parts.push(compound);
        i = next;
    }
    if parts.is_empty() || pending == Some(Combinator::Child) {
        return None;
    }
    Some(Complex { parts, links })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

fn parse_compound(chars: &[char], start: usize) -> Option<(Compound, usize)> {
    let mut compound = Compound::default();
    let mut i = start;
    let mut consumed = false;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                i += 1;
            }
            '#' => {
                let (ident, next) = read_ident(chars, i + 1);
                if ident.is_empty() {
                    return None;
                }
                compound.id = Some(ident);
                i = next;
            }
            '.' => {
                let (ident, next) = read_ident(chars, i + 1);
                if ident.is_empty() {
                    return None;
                }
                compound.classes.push(ident);
                i = next;
            }
            '[' => {
                let close = chars[i..].iter().position(|&c| c == ']')? + i;
                let inner: String = chars[i + 1..close].iter().collect();
                compound.attrs.push(parse_attr(&inner)?);
                i = close + 1;
            }
            ':' => {
                let (ident, next) = read_ident(chars, i + 1);
                if !ident.eq_ignore_ascii_case("root") {
                    return None;
                }
                compound.root = true;
                i = next;
            }
            c if is_ident_char(c) && !consumed => {
                let (ident, next) = read_ident(chars, i);
                compound.tag = Some(ident.to_ascii_lowercase());
                i = next;
            }
            c if c.is_whitespace() || c == '>' => break,
            _ => return None,
        }
        consumed = true;
    }
    Some((compound, i))
}

fn parse_attr(inner: &str) -> Option<AttrMatch> {
    match inner.split_once('=') {
        Some((name, value)) => {
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string();
            Some(AttrMatch::Equals(name.to_ascii_lowercase(), value))
        }
        None => {
            let name = inner.trim();
            (!name.is_empty()).then(|| AttrMatch::Present(name.to_ascii_lowercase()))
        }
    }
}

fn compound_matches(compound: &Compound, page: &Page, id: ElementId) -> bool {
    let Some(el) = page.get(id) else {
        return false;
    };
    if el.is_text() {
        return false;
    }
    if compound.root && id != page.root() {
        return false;
    }
    if let Some(tag) = &compound.tag {
        if &el.tag != tag {
            return false;
        }
    }
    if let Some(wanted) = &compound.id {
        if el.id.as_ref() != Some(wanted) {
            return false;
        }
    }
    if !compound.classes.iter().all(|c| el.has_class(c)) {
        return false;
    }
    compound.attrs.iter().all(|attr| match attr {
        AttrMatch::Present(name) => el.attribute(name).is_some(),
        AttrMatch::Equals(name, value) => el.attribute(name).as_deref() == Some(value.as_str()),
    })
}

fn matches_from(complex: &Complex, idx: usize, page: &Page, id: ElementId) -> bool {
    if !compound_matches(&complex.parts[idx], page, id) {
        return false;
    }
    if idx == 0 {
        return true;
    }
    let parent = page.get(id).and_then(|el| el.parent);
    match complex.links[idx - 1] {
        Combinator::Child => parent.map_or(false, |p| matches_from(complex, idx - 1, page, p)),
        Combinator::Descendant => page
            .ancestors(id)
            .into_iter()
            .any(|ancestor| matches_from(complex, idx - 1, page, ancestor)),
    }
}
