//! Guarded edges between states.
//!
//! A [`Transition`] is satisfiable only while enabled. Its [`Guard`]
//! decides how the rest of the check works: the condition list (AND of
//! every enabled condition, never satisfiable when empty), a single
//! predicate, or a one-shot event consumed from the machine's
//! [`EventTriggers`].

use serde::Serialize;

use super::condition::Condition;
use super::events::EventTriggers;
use super::notify::{Pipeline, TransitionRef};
use super::state::StateId;

/// Registry-assigned transition handle, unique per machine.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct TransitionId(pub u64);

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What decides whether an enabled transition is satisfied.
pub enum Guard {
    /// Every enabled condition in the list holds. An empty list never does.
    AllConditions,
    /// A single externally supplied predicate; the condition list is ignored.
    Predicate(Box<dyn Fn() -> bool + Send + Sync>),
    /// A one-shot named event; the condition list is ignored.
    Event(String),
}

impl Guard {
    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AllConditions => "conditions",
            Self::Predicate(_) => "predicate",
            Self::Event(_) => "event",
        }
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllConditions => write!(f, "AllConditions"),
            Self::Predicate(_) => f.debug_tuple("Predicate").finish_non_exhaustive(),
            Self::Event(name) => f.debug_tuple("Event").field(name).finish(),
        }
    }
}

/// A directed, guarded edge from one state to another.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tickstate::fsm::{Condition, Transition};
///
/// let patrol_to_chase: Transition<()> = Transition::new("patrol", "chase")
///     .with_condition(Condition::predicate("player_seen", || true))
///     .with_condition(Condition::elapsed("settle", Duration::from_millis(200)))
///     .with_priority(5);
///
/// let hit: Transition<()> = Transition::on_event("chase", "stagger", "hit");
/// assert_eq!(hit.event(), Some("hit"));
/// assert_eq!(patrol_to_chase.priority(), 5);
/// ```
pub struct Transition<C> {
    id: Option<TransitionId>,
    from: StateId,
    to: StateId,
    priority: i32,
    enabled: bool,
    conditions: Vec<Condition<C>>,
    guard: Guard,
}

impl<C> Transition<C> {
    /// Condition-list transition with no conditions yet.
    pub fn new(from: impl Into<StateId>, to: impl Into<StateId>) -> Self {
        Self {
            id: None,
            from: from.into(),
            to: to.into(),
            priority: 0,
            enabled: true,
            conditions: Vec::new(),
            guard: Guard::AllConditions,
        }
    }

    /// Predicate transition.
    pub fn when<F>(from: impl Into<StateId>, to: impl Into<StateId>, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            guard: Guard::Predicate(Box::new(predicate)),
            ..Self::new(from, to)
        }
    }

    /// Event-consuming transition.
    pub fn on_event(
        from: impl Into<StateId>,
        to: impl Into<StateId>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            guard: Guard::Event(event.into()),
            ..Self::new(from, to)
        }
    }

    /// Appends a condition to the AND chain.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition<C>) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets the informational priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Registry handle, `None` until the transition is added to a machine.
    #[must_use]
    pub const fn id(&self) -> Option<TransitionId> {
        self.id
    }

    /// Source state.
    #[must_use]
    pub const fn from(&self) -> &StateId {
        &self.from
    }

    /// Destination state.
    #[must_use]
    pub const fn to(&self) -> &StateId {
        &self.to
    }

    /// Stored priority. Evaluation order does not depend on it.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns whether the transition can be taken at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables the transition.
    pub const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Conditions in the AND chain.
    #[must_use]
    pub fn conditions(&self) -> &[Condition<C>] {
        &self.conditions
    }

    /// Mutable access to the conditions, e.g. to toggle one.
    pub fn conditions_mut(&mut self) -> &mut [Condition<C>] {
        &mut self.conditions
    }

    /// Guard kind.
    #[must_use]
    pub const fn guard(&self) -> &Guard {
        &self.guard
    }

    /// Event name for event-consuming transitions.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        match &self.guard {
            Guard::Event(name) => Some(name),
            _ => None,
        }
    }

    /// Returns whether either endpoint is `state`.
    #[must_use]
    pub fn references(&self, state: &str) -> bool {
        self.from == state || self.to == state
    }

    /// Evaluates the guard. Event guards consume their trigger on success.
    pub fn can_transition(&self, ctx: &C, events: &EventTriggers) -> bool {
        self.check(ctx, events, true)
    }

    /// Evaluates the guard without consuming event triggers.
    pub fn is_satisfied(&self, ctx: &C, events: &EventTriggers) -> bool {
        self.check(ctx, events, false)
    }

    fn check(&self, ctx: &C, events: &EventTriggers, consume: bool) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.guard {
            Guard::AllConditions => {
                !self.conditions.is_empty() && self.conditions.iter().all(|c| c.holds(ctx))
            }
            Guard::Predicate(predicate) => predicate(),
            Guard::Event(name) if consume => events.consume(name),
            Guard::Event(name) => events.is_triggered(name),
        }
    }

    /// Clears internal condition state, re-arming timers.
    pub fn reset_conditions(&self) {
        for condition in &self.conditions {
            condition.reset();
        }
    }

    pub(crate) fn bind(&mut self, id: TransitionId, ctx: &C) {
        self.id = Some(id);
        for condition in &self.conditions {
            condition.initialize(ctx);
        }
    }

    pub(crate) fn reference(&self, pipeline: Pipeline) -> TransitionRef {
        TransitionRef {
            id: self.id,
            from: Some(self.from.clone()),
            to: self.to.clone(),
            pipeline,
        }
    }
}

impl<C> std::fmt::Debug for Transition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("id", &self.id)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("conditions", &self.conditions)
            .field("guard", &self.guard)
            .finish()
    }
}
