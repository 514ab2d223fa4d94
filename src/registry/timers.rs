//! Scheduled work: timeouts, intervals and multi-step effect sequences.

use bevy::log::debug;
use serde::Serialize;

pub type TaskId = u64;

/// Who scheduled a task; script-facing clears only reach script tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    Script,
    Effect,
}

#[derive(Clone, Debug)]
pub struct ScheduledTask<A> {
    pub id: TaskId,
    pub due_ms: u64,
    pub period_ms: Option<u64>,
    pub group: Option<String>,
    pub origin: TaskOrigin,
    pub action: A,
}

pub struct TimerRegistry<A> {
    tasks: Vec<ScheduledTask<A>>,
    next_id: TaskId,
    capacity: usize,
    pub rejected: u64,
}

impl<A: Clone> TimerRegistry<A> {
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 0,
            capacity: capacity.max(1),
            rejected: 0,
        }
    }

    /// `None` when the registry is full.
    pub fn schedule(
        &mut self,
        now_ms: u64,
        delay_ms: u64,
        period_ms: Option<u64>,
        group: Option<&str>,
        origin: TaskOrigin,
        action: A,
    ) -> Option<TaskId> {
        if self.tasks.len() >= self.capacity {
            self.rejected = self.rejected.saturating_add(1);
            debug!(
                "[Ritual timers] Rejected task: {} already scheduled",
                self.tasks.len()
            );
            return None;
        }
        self.next_id += 1;
        self.tasks.push(ScheduledTask {
            id: self.next_id,
            due_ms: now_ms.saturating_add(delay_ms),
            period_ms: period_ms.map(|p| p.max(1)),
            group: group.map(str::to_string),
            origin,
            action,
        });
        Some(self.next_id)
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id != id);
        self.tasks.len() != before
    }

    /// Cancel only if the task was scheduled by script code.
    pub fn cancel_script(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks
            .retain(|task| !(task.id == id && task.origin == TaskOrigin::Script));
        self.tasks.len() != before
    }

    pub fn cancel_group(&mut self, group: &str) -> usize {
        let before = self.tasks.len();
        self.tasks
            .retain(|task| task.group.as_deref() != Some(group));
        before - self.tasks.len()
    }

    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&ScheduledTask<A>) -> bool) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|task| !predicate(task));
        before - self.tasks.len()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.tasks
            .iter()
            .any(|task| task.group.as_deref() == Some(group))
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|task| task.id == id)
    }

    /// Earliest due task (ties broken by id). Periodic tasks stay registered
    /// and are pushed to `now + period`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<ScheduledTask<A>> {
        let idx = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.due_ms <= now_ms)
            .min_by_key(|(_, task)| (task.due_ms, task.id))
            .map(|(idx, _)| idx)?;
        match self.tasks[idx].period_ms {
            Some(period) => {
                let fired = self.tasks[idx].clone();
                self.tasks[idx].due_ms = now_ms.saturating_add(period);
                Some(fired)
            }
            None => Some(self.tasks.swap_remove(idx)),
        }
    }

    pub fn next_due(&self) -> Option<u64> {
        self.tasks.iter().map(|task| task.due_ms).min()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn count_origin(&self, origin: TaskOrigin) -> usize {
        self.tasks.iter().filter(|task| task.origin == origin).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_tasks_pop_in_time_order() {
        let mut timers = TimerRegistry::new(16);
        timers.schedule(0, 300, None, None, TaskOrigin::Script, "late");
        timers.schedule(0, 100, None, None, TaskOrigin::Script, "early");
        timers.schedule(0, 100, None, None, TaskOrigin::Effect, "early-second");
        assert!(timers.pop_due(50).is_none());
        let order: Vec<&str> = std::iter::from_fn(|| timers.pop_due(400))
            .map(|task| task.action)
            .collect();
        assert_eq!(order, vec!["early", "early-second", "late"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn periodic_tasks_reschedule() {
        let mut timers = TimerRegistry::new(16);
        let id = timers
            .schedule(0, 100, Some(100), None, TaskOrigin::Script, 1)
            .expect("scheduled");
        assert_eq!(timers.pop_due(100).map(|t| t.id), Some(id));
        assert!(timers.pop_due(150).is_none());
        assert_eq!(timers.pop_due(200).map(|t| t.id), Some(id));
        assert!(timers.cancel(id));
        assert!(timers.pop_due(10_000).is_none());
    }

    #[test]
    fn groups_and_origins_cancel_independently() {
        let mut timers = TimerRegistry::new(16);
        let effect = timers
            .schedule(0, 10, None, Some("strobe"), TaskOrigin::Effect, 0)
            .expect("scheduled");
        timers.schedule(0, 20, None, Some("strobe"), TaskOrigin::Effect, 0);
        let script = timers
            .schedule(0, 10, None, None, TaskOrigin::Script, 0)
            .expect("scheduled");

        assert!(!timers.cancel_script(effect));
        assert!(timers.cancel_script(script));
        assert!(timers.has_group("strobe"));
        assert_eq!(timers.cancel_group("strobe"), 2);
        assert!(timers.is_empty());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut timers = TimerRegistry::new(2);
        assert!(timers.schedule(0, 1, None, None, TaskOrigin::Script, ()).is_some());
        assert!(timers.schedule(0, 1, None, None, TaskOrigin::Script, ()).is_some());
        assert!(timers.schedule(0, 1, None, None, TaskOrigin::Script, ()).is_none());
        assert_eq!(timers.rejected, 1);
    }
}
