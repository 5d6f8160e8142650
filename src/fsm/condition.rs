//! Transition conditions.
//!
//! A [`Condition`] wraps an [`Evaluate`] implementation with the flags every
//! condition shares (id, enabled, inverted). Conditions compose inside a
//! transition guard with AND semantics.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Boolean predicate evaluated against the machine context.
///
/// Implementations may keep internal state (behind interior mutability)
/// and must clear it in [`Evaluate::reset`].
pub trait Evaluate<C>: Send + Sync {
    /// Binds the predicate to the machine context; called once when the
    /// owning transition is registered.
    fn initialize(&self, _ctx: &C) {}

    /// Returns the current truth value.
    fn evaluate(&self, ctx: &C) -> bool;

    /// Clears internal state so the predicate can be reused.
    fn reset(&self) {}
}

/// Satisfied once `duration` has passed since the first evaluation.
///
/// The clock starts on the first check, not on construction, so the
/// condition measures time spent in the source state.
#[derive(Debug)]
pub struct Elapsed {
    duration: Duration,
    started: Mutex<Option<Instant>>,
}

impl Elapsed {
    /// Creates an elapsed-time predicate.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self {
            duration,
            started: Mutex::new(None),
        }
    }

    /// Returns the configured duration.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns whether the clock has been started by an evaluation.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<C> Evaluate<C> for Elapsed {
    fn evaluate(&self, _ctx: &C) -> bool {
        let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
        let start = *started.get_or_insert_with(Instant::now);
        start.elapsed() >= self.duration
    }

    fn reset(&self) {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Delegates to an externally supplied zero-argument function.
pub struct Predicate<F> {
    f: F,
}

impl<F> Predicate<F>
where
    F: Fn() -> bool + Send + Sync,
{
    /// Wraps a predicate function.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

impl<C, F> Evaluate<C> for Predicate<F>
where
    F: Fn() -> bool + Send + Sync,
{
    fn evaluate(&self, _ctx: &C) -> bool {
        (self.f)()
    }
}

impl<F> std::fmt::Debug for Predicate<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predicate").finish_non_exhaustive()
    }
}

/// A named, enableable, invertible predicate inside a transition guard.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tickstate::fsm::Condition;
///
/// let cooldown: Condition<()> = Condition::elapsed("cooldown", Duration::from_secs(2));
/// let not_stunned: Condition<()> = Condition::predicate("stunned", || false).inverted();
///
/// assert!(!cooldown.is_inverted());
/// assert!(not_stunned.holds(&()));
/// ```
pub struct Condition<C> {
    id: String,
    enabled: bool,
    inverted: bool,
    inner: Box<dyn Evaluate<C>>,
}

impl<C> Condition<C> {
    /// Wraps a custom predicate.
    pub fn new(id: impl Into<String>, inner: impl Evaluate<C> + 'static) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            inverted: false,
            inner: Box::new(inner),
        }
    }

    /// Elapsed-time condition.
    #[must_use]
    pub fn elapsed(id: impl Into<String>, duration: Duration) -> Self {
        Self::new(id, Elapsed::new(duration))
    }

    /// Predicate-wrapper condition.
    pub fn predicate<F>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self::new(id, Predicate::new(f))
    }

    /// Negates this condition's contribution to the guard.
    #[must_use]
    pub const fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    /// Returns the condition id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns whether the condition takes part in its guard.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables the condition. A disabled condition counts as
    /// satisfied and is not evaluated.
    pub const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns whether the condition is inverted.
    #[must_use]
    pub const fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Raw truth value, ignoring the enabled and inverted flags.
    pub fn evaluate(&self, ctx: &C) -> bool {
        self.inner.evaluate(ctx)
    }

    /// Contribution to the guard's AND chain.
    pub fn holds(&self, ctx: &C) -> bool {
        if !self.enabled {
            return true;
        }
        self.inner.evaluate(ctx) != self.inverted
    }

    /// Clears internal predicate state.
    pub fn reset(&self) {
        self.inner.reset();
    }

    pub(crate) fn initialize(&self, ctx: &C) {
        self.inner.initialize(ctx);
    }
}

impl<C> std::fmt::Debug for Condition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition")
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .field("inverted", &self.inverted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_predicate_condition() {
        let flag = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&flag);
        let cond: Condition<()> = Condition::predicate("flag", move || f.load(Ordering::SeqCst));

        assert!(!cond.holds(&()));
        flag.store(true, Ordering::SeqCst);
        assert!(cond.holds(&()));
    }

    #[test]
    fn test_inverted_condition() {
        let cond: Condition<()> = Condition::predicate("never", || false).inverted();
        assert!(cond.is_inverted());
        assert!(!cond.evaluate(&()));
        assert!(cond.holds(&()));
    }

    #[test]
    fn test_disabled_condition_holds_without_evaluating() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let mut cond: Condition<()> = Condition::predicate("counted", move || {
            c.fetch_add(1, Ordering::SeqCst);
            false
        });

        cond.set_enabled(false);
        assert!(cond.holds(&()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cond.set_enabled(true);
        assert!(!cond.holds(&()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_inverted_condition_still_holds() {
        let mut cond: Condition<()> = Condition::predicate("always", || true).inverted();
        assert!(!cond.holds(&()));
        cond.set_enabled(false);
        assert!(cond.holds(&()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_starts_on_first_evaluation() {
        let cond: Condition<()> = Condition::elapsed("cooldown", Duration::from_secs(1));

        // Time passing before the first check does not count.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!cond.holds(&()));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!cond.holds(&()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cond.holds(&()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_reset_rearms() {
        let elapsed = Elapsed::new(Duration::from_secs(1));
        assert!(!elapsed.is_armed());
        assert!(!Evaluate::<()>::evaluate(&elapsed, &()));
        assert!(elapsed.is_armed());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(Evaluate::<()>::evaluate(&elapsed, &()));

        Evaluate::<()>::reset(&elapsed);
        assert!(!elapsed.is_armed());
        assert!(!Evaluate::<()>::evaluate(&elapsed, &()));
    }

    #[test]
    fn test_custom_evaluate_reads_context() {
        struct HpBelow(u32);

        impl Evaluate<u32> for HpBelow {
            fn evaluate(&self, hp: &u32) -> bool {
                *hp < self.0
            }
        }

        let cond = Condition::new("low_hp", HpBelow(10));
        assert!(cond.holds(&5));
        assert!(!cond.holds(&50));
        assert_eq!(cond.id(), "low_hp");
    }

    #[test]
    fn test_debug_output() {
        let cond: Condition<()> = Condition::predicate("p", || true);
        let debug = format!("{cond:?}");
        assert!(debug.contains("Condition"));
        assert!(debug.contains("\"p\""));
    }
}
