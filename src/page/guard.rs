//! Structural targets that destructive capabilities must never touch.

use super::{ElementId, Page};

pub const PROTECTED_SELECTORS: [&str; 14] = [
    "body",
    "html",
    "*",
    ":root",
    "#stage",
    "#scene-3d",
    "#canvas-2d",
    "#overlay",
    "#spawned",
    "#crt",
    "#crash-screen",
    "script",
    "style",
    "head",
];

#[derive(Clone, Debug)]
pub struct ProtectedSet {
    entries: Vec<String>,
}

impl Default for ProtectedSet {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ProtectedSet {
    /// Built-in entries plus `extra`; configuration can only widen the set.
    pub fn new(extra: &[String]) -> Self {
        let mut entries: Vec<String> = PROTECTED_SELECTORS.iter().map(|s| s.to_string()).collect();
        for sel in extra {
            let sel = sel.trim().to_ascii_lowercase();
            if !sel.is_empty() && !entries.contains(&sel) {
                entries.push(sel);
            }
        }
        Self { entries }
    }

    /// Whether a selector string names a protected target (empty counts).
    pub fn is_dangerous(&self, selector: &str) -> bool {
        let sel = selector.trim().to_ascii_lowercase();
        sel.is_empty() || self.entries.iter().any(|entry| *entry == sel)
    }

    /// Whether a resolved element is itself a protected target.
    pub fn shields(&self, page: &Page, id: ElementId) -> bool {
        if id == page.root() || id == page.body() {
            return true;
        }
        self.entries
            .iter()
            .filter(|entry| entry.as_str() != "*")
            .any(|entry| page.matches(id, entry))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Viewport;

    #[test]
    fn selector_matching_is_trimmed_and_case_insensitive() {
        let set = ProtectedSet::default();
        assert!(set.is_dangerous("  BODY "));
        assert!(set.is_dangerous(""));
        assert!(set.is_dangerous("#Stage"));
        assert!(!set.is_dangerous("#output"));
    }

    #[test]
    fn extra_entries_extend_the_set() {
        let set = ProtectedSet::new(&["#Output".to_string()]);
        assert!(set.is_dangerous("#output"));
        assert!(set.is_dangerous("html"));
    }

    #[test]
    fn resolved_elements_are_shielded() {
        let page = Page::new(Viewport::default());
        let set = ProtectedSet::default();
        let stage = page.by_id("stage").expect("stage exists");
        let output = page.by_id("output").expect("output exists");
        assert!(set.shields(&page, stage));
        assert!(set.shields(&page, page.body()));
        assert!(!set.shields(&page, output));
    }
}
