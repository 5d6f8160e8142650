//! Bounded record of completed state changes.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::notify::Pipeline;
use super::state::StateId;

/// One completed state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    /// Previous state, `None` when the machine started
    pub from: Option<StateId>,
    /// New current state
    pub to: StateId,
    /// Wall-clock time the new state finished entering
    pub at: DateTime<Utc>,
    /// Execution path
    pub pipeline: Pipeline,
}

/// Ring buffer of the most recent changes, oldest first.
#[derive(Debug)]
pub(crate) struct History {
    limit: usize,
    entries: VecDeque<StateChange>,
}

impl History {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: VecDeque::with_capacity(limit.min(256)),
        }
    }

    pub(crate) fn push(&mut self, change: StateChange) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(change);
    }

    pub(crate) fn last(&self) -> Option<&StateChange> {
        self.entries.back()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &StateChange> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(to: &str) -> StateChange {
        StateChange {
            from: None,
            to: StateId::new(to),
            at: Utc::now(),
            pipeline: Pipeline::Sync,
        }
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = History::new(2);
        history.push(change("a"));
        history.push(change("b"));
        history.push(change("c"));

        let ids: Vec<&str> = history.iter().map(|c| c.to.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(history.last().unwrap().to, "c");
    }

    #[test]
    fn test_zero_limit_keeps_nothing() {
        let mut history = History::new(0);
        history.push(change("a"));
        assert!(history.last().is_none());
    }
}
