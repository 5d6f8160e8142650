//! Named one-shot event triggers.

use dashmap::DashMap;

/// Table of named event triggers backing event-guarded transitions.
///
/// A trigger is a pending flag: [`trigger`](Self::trigger) sets it,
/// [`is_triggered`](Self::is_triggered) peeks, and
/// [`consume`](Self::consume) reads and clears it in one step, so a single
/// trigger satisfies at most one consuming check.
#[derive(Debug, Default)]
pub struct EventTriggers {
    pending: DashMap<String, bool>,
}

impl EventTriggers {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `name` as pending.
    pub fn trigger(&self, name: &str) {
        self.pending.insert(name.to_string(), true);
    }

    /// Returns whether `name` is pending, without clearing it.
    #[must_use]
    pub fn is_triggered(&self, name: &str) -> bool {
        self.pending.get(name).is_some_and(|v| *v)
    }

    /// Clears `name` and returns whether it was pending.
    pub fn consume(&self, name: &str) -> bool {
        self.pending
            .get_mut(name)
            .is_some_and(|mut v| std::mem::replace(&mut *v, false))
    }

    /// Drops every pending trigger.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Names of the currently pending triggers, sorted.
    #[must_use]
    pub fn pending(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pending
            .iter()
            .filter(|e| *e.value())
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }
}
