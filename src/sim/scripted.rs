//! Data-driven state behavior.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::schema::StateDefinition;
use crate::fsm::{State, StateError, StateId, next_tick};

use super::context::SimContext;

/// A state whose async enter/exit suspend for a fixed number of ticks and
/// whose lifecycle can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct ScriptedState {
    id: StateId,
    enter_ticks: u32,
    exit_ticks: u32,
    fail_on_enter: bool,
    fail_on_exit: bool,
    message: Option<String>,
    time_in_state: Duration,
}

impl ScriptedState {
    /// Returns the time accumulated by `update` since the last entry.
    #[must_use]
    pub const fn time_in_state(&self) -> Duration {
        self.time_in_state
    }

    fn entered(&mut self) {
        self.time_in_state = Duration::ZERO;
        if let Some(message) = &self.message {
            info!(state = %self.id, "{message}");
        }
    }

    fn check(&self, fail: bool, phase: &str) -> Result<(), StateError> {
        if fail {
            Err(StateError::failed(format!(
                "state '{}' failed to {phase}",
                self.id
            )))
        } else {
            Ok(())
        }
    }
}

impl From<&StateDefinition> for ScriptedState {
    fn from(def: &StateDefinition) -> Self {
        Self {
            id: StateId::new(def.id.as_str()),
            enter_ticks: def.enter_ticks,
            exit_ticks: def.exit_ticks,
            fail_on_enter: def.fail_on_enter,
            fail_on_exit: def.fail_on_exit,
            message: def.message.clone(),
            time_in_state: Duration::ZERO,
        }
    }
}

/// Waits `ticks` ticks, bailing out as soon as `cancel` fires.
async fn suspend(ticks: u32, cancel: &CancellationToken) -> Result<(), StateError> {
    for _ in 0..ticks {
        if cancel.is_cancelled() {
            return Err(StateError::Cancelled);
        }
        next_tick().await;
    }
    if cancel.is_cancelled() {
        return Err(StateError::Cancelled);
    }
    Ok(())
}

#[async_trait]
impl State<SimContext> for ScriptedState {
    fn on_registered(&mut self, id: &StateId, _ctx: &SimContext) {
        self.id = id.clone();
    }

    fn enter(&mut self, _ctx: &SimContext) -> Result<(), StateError> {
        self.check(self.fail_on_enter, "enter")?;
        self.entered();
        Ok(())
    }

    async fn enter_async(
        &mut self,
        _ctx: &SimContext,
        cancel: &CancellationToken,
    ) -> Result<(), StateError> {
        debug!(state = %self.id, ticks = self.enter_ticks, "entering");
        suspend(self.enter_ticks, cancel).await?;
        self.check(self.fail_on_enter, "enter")?;
        self.entered();
        Ok(())
    }

    fn update(&mut self, _ctx: &SimContext, dt: Duration) {
        self.time_in_state += dt;
        trace!(state = %self.id, elapsed = ?self.time_in_state, "update");
    }

    fn exit(&mut self, _ctx: &SimContext) -> Result<(), StateError> {
        self.check(self.fail_on_exit, "exit")
    }

    async fn exit_async(
        &mut self,
        _ctx: &SimContext,
        cancel: &CancellationToken,
    ) -> Result<(), StateError> {
        debug!(state = %self.id, ticks = self.exit_ticks, "exiting");
        suspend(self.exit_ticks, cancel).await?;
        self.check(self.fail_on_exit, "exit")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn scripted(enter_ticks: u32, fail_on_enter: bool) -> ScriptedState {
        ScriptedState::from(&StateDefinition {
            id: "windup".to_string(),
            enter_ticks,
            fail_on_enter,
            ..StateDefinition::default()
        })
    }

    #[test]
    fn test_sync_enter_and_failure() {
        let ctx = SimContext::new();
        assert!(scripted(0, false).enter(&ctx).is_ok());
        let err = scripted(0, true).enter(&ctx).unwrap_err();
        assert_eq!(err, StateError::failed("state 'windup' failed to enter"));
    }

    #[test]
    fn test_async_enter_suspends_for_ticks() {
        let ctx = SimContext::new();
        let cancel = CancellationToken::new();
        let mut state = scripted(2, false);
        let mut fut = task::spawn(state.enter_async(&ctx, &cancel));
        assert_pending!(fut.poll());
        assert_pending!(fut.poll());
        assert!(assert_ready!(fut.poll()).is_ok());
    }

    #[test]
    fn test_async_enter_observes_cancellation() {
        let ctx = SimContext::new();
        let cancel = CancellationToken::new();
        let mut state = scripted(3, false);
        let mut fut = task::spawn(state.enter_async(&ctx, &cancel));
        assert_pending!(fut.poll());
        cancel.cancel();
        assert_eq!(assert_ready!(fut.poll()), Err(StateError::Cancelled));
    }

    #[test]
    fn test_update_accumulates_until_reentry() {
        let ctx = SimContext::new();
        let mut state = scripted(0, false);
        state.update(&ctx, Duration::from_millis(16));
        state.update(&ctx, Duration::from_millis(16));
        assert_eq!(state.time_in_state(), Duration::from_millis(32));
        state.enter(&ctx).unwrap();
        assert_eq!(state.time_in_state(), Duration::ZERO);
    }

    #[test]
    fn test_registration_sets_id() {
        let mut state = ScriptedState::default();
        state.on_registered(&StateId::new("outro"), &SimContext::new());
        let err = ScriptedState {
            fail_on_exit: true,
            ..state
        }
        .exit(&SimContext::new())
        .unwrap_err();
        assert!(err.to_string().contains("outro"));
    }
}
