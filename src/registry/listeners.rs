//! Script event listeners dispatched by the host.

use bevy::log::debug;

use crate::page::ElementId;

pub type ListenerId = u64;

#[derive(Clone, Debug)]
pub struct Listener<C> {
    pub id: ListenerId,
    pub event: String,
    /// `None` listens on the whole document.
    pub target: Option<ElementId>,
    pub callback: C,
}

pub struct ListenerRegistry<C> {
    listeners: Vec<Listener<C>>,
    next_id: ListenerId,
    capacity: usize,
    pub rejected: u64,
}

impl<C: Clone> ListenerRegistry<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
            capacity: capacity.max(1),
            rejected: 0,
        }
    }

    pub fn add(&mut self, event: &str, target: Option<ElementId>, callback: C) -> Option<ListenerId> {
        let event = event.trim();
        if event.is_empty() {
            return None;
        }
        if self.listeners.len() >= self.capacity {
            self.rejected = self.rejected.saturating_add(1);
            debug!("[Ritual listeners] Rejected '{}' listener: registry full", event);
            return None;
        }
        self.next_id += 1;
        self.listeners.push(Listener {
            id: self.next_id,
            event: event.to_string(),
            target,
            callback,
        });
        Some(self.next_id)
    }

    pub fn remove_where(&mut self, mut predicate: impl FnMut(&Listener<C>) -> bool) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|listener| !predicate(listener));
        before - self.listeners.len()
    }

    /// Callbacks for `event`, registration order. Element listeners are skipped
    /// when their element has been removed.
    pub fn matching(&self, event: &str, alive: impl Fn(ElementId) -> bool) -> Vec<C> {
        self.listeners
            .iter()
            .filter(|listener| listener.event == event)
            .filter(|listener| listener.target.map_or(true, &alive))
            .map(|listener| listener.callback.clone())
            .collect()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.listeners.len();
        self.listeners.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_filters_by_event_and_liveness() {
        let mut listeners = ListenerRegistry::new(8);
        listeners.add("click", None, "doc");
        listeners.add("click", Some(4), "dead-element");
        listeners.add("click", Some(5), "live-element");
        listeners.add("keydown", None, "key");
        let hits = listeners.matching("click", |id| id == 5);
        assert_eq!(hits, vec!["doc", "live-element"]);
    }

    #[test]
    fn capacity_and_removal() {
        let mut listeners = ListenerRegistry::new(2);
        assert!(listeners.add("a", None, 1).is_some());
        assert!(listeners.add("b", None, 2).is_some());
        assert!(listeners.add("c", None, 3).is_none());
        assert!(listeners.add("  ", None, 4).is_none());
        assert_eq!(listeners.remove_where(|l| l.event == "a"), 1);
        assert_eq!(listeners.clear(), 1);
        assert!(listeners.is_empty());
    }
}
