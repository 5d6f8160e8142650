//! Shared context for simulated machines.

use std::collections::BTreeMap;

use dashmap::DashMap;

/// Named boolean flags read by flag guards and written by the script.
#[derive(Debug, Default)]
pub struct SimContext {
    flags: DashMap<String, bool>,
}

impl SimContext {
    /// Creates a context with every flag cleared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or clears a flag.
    pub fn set_flag(&self, name: &str, value: bool) {
        self.flags.insert(name.to_string(), value);
    }

    /// Returns the flag value; unknown flags read as `false`.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).is_some_and(|v| *v)
    }

    /// Returns a sorted snapshot of every flag that has been written.
    #[must_use]
    pub fn flags(&self) -> BTreeMap<String, bool> {
        self.flags
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
