//! State machine orchestration.
//!
//! The [`StateMachine`] owns the state registry, the transitions and the
//! event table, and runs two transition pipelines over a single `current`
//! field:
//!
//! - **sync**: [`force_transition_to`](StateMachine::force_transition_to)
//!   and [`try_transition_to`](StateMachine::try_transition_to) exit and
//!   enter inside one call;
//! - **async**: [`start`](StateMachine::start),
//!   [`force_transition_to_async`](StateMachine::force_transition_to_async)
//!   and transitions found by the per-tick scan run as a machine-owned
//!   future that may suspend across ticks.
//!
//! At most one async operation is in flight. The sync pipeline cancels and
//! drops it before touching `current`, and every mutation goes through
//! `&mut self`, so the pipelines never interleave.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{MachineError, StateError};
use crate::observability::metrics;

use super::events::EventTriggers;
use super::history::{History, StateChange};
use super::notify::{MachineEvent, Observers, Pipeline, TransitionRef};
use super::state::{State, StateId, StateInfo, StateSlot};
use super::transition::{Transition, TransitionId};

/// Default number of state changes kept by [`StateMachine::history`].
pub const DEFAULT_HISTORY_LIMIT: usize = 32;

/// Static machine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// Name used in logs, metrics and errors
    pub name: String,
    /// State entered by `start(None)`; falls back to the first registered
    pub default_state: Option<StateId>,
    /// Number of completed state changes retained
    pub history_limit: usize,
}

impl MachineConfig {
    /// Creates a config with the given name and defaults elsewhere.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the default initial state.
    #[must_use]
    pub fn with_default_state(mut self, state: impl Into<StateId>) -> Self {
        self.default_state = Some(state.into());
        self
    }

    /// Sets the history capacity.
    #[must_use]
    pub const fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: "machine".to_string(),
            default_state: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

type LifecycleFuture = BoxFuture<'static, Result<(), StateError>>;

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Enter,
    Exit,
}

/// What happens once an async exit completes.
enum AfterExit {
    Enter(StateId),
    /// Stop: leave the machine without a current state
    Settle,
}

enum Stage {
    Exit {
        state: StateId,
        then: AfterExit,
        fut: LifecycleFuture,
    },
    Enter {
        state: StateId,
        fut: LifecycleFuture,
    },
}

/// The single async operation a machine may have in progress.
struct InFlight {
    /// `None` for the best-effort exit started by `stop`
    transition: Option<TransitionRef>,
    stage: Stage,
    cancel: CancellationToken,
}

impl InFlight {
    fn involves(&self, id: &str) -> bool {
        let stage = match &self.stage {
            Stage::Exit { state, then, .. } => {
                state == id || matches!(then, AfterExit::Enter(target) if target == id)
            }
            Stage::Enter { state, .. } => state == id,
        };
        stage || self.transition.as_ref().is_some_and(|t| t.to == id)
    }
}

/// Tick-driven finite state machine over a shared context `C`.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use async_trait::async_trait;
/// use tickstate::fsm::{MachineConfig, State, StateMachine, Transition};
///
/// struct Idle;
/// struct Attack;
///
/// #[async_trait]
/// impl State<()> for Idle {}
/// #[async_trait]
/// impl State<()> for Attack {}
///
/// let mut machine = StateMachine::new(MachineConfig::new("enemy"), ());
/// machine.add_state("idle", Idle);
/// machine.add_state("attack", Attack);
/// machine
///     .add_event_transition("idle", "attack", "player_seen", 0)
///     .unwrap();
///
/// machine.start(Some("idle")).unwrap();
/// machine.trigger_event("player_seen");
/// machine.tick(Duration::from_millis(16));
///
/// assert_eq!(machine.current_state().unwrap(), "attack");
/// assert_eq!(machine.previous_state().unwrap(), "idle");
/// ```
pub struct StateMachine<C: Send + Sync + 'static> {
    config: MachineConfig,
    ctx: Arc<C>,
    states: IndexMap<StateId, StateSlot<C>>,
    transitions: Vec<Transition<C>>,
    next_transition_id: u64,
    events: Arc<EventTriggers>,
    current: Option<StateId>,
    previous: Option<StateId>,
    running: bool,
    session: CancellationToken,
    session_id: Option<Uuid>,
    in_flight: Option<InFlight>,
    observers: Observers,
    history: History,
    ticks: u64,
}

impl<C: Send + Sync + 'static> StateMachine<C> {
    /// Creates a stopped machine owning `ctx`.
    #[must_use]
    pub fn new(config: MachineConfig, ctx: C) -> Self {
        Self::with_shared_context(config, Arc::new(ctx))
    }

    /// Creates a stopped machine over a context shared with the caller.
    #[must_use]
    pub fn with_shared_context(config: MachineConfig, ctx: Arc<C>) -> Self {
        let history = History::new(config.history_limit);
        Self {
            config,
            ctx,
            states: IndexMap::new(),
            transitions: Vec::new(),
            next_transition_id: 1,
            events: Arc::new(EventTriggers::new()),
            current: None,
            previous: None,
            running: false,
            session: CancellationToken::new(),
            session_id: None,
            in_flight: None,
            observers: Observers::default(),
            history,
            ticks: 0,
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Registers `state` under `id`.
    ///
    /// An existing state with the same id is torn down first and replaced
    /// in place: async work involving it is cancelled and, if it is the
    /// current state, it is exited synchronously and the machine is left
    /// without a current state.
    pub fn add_state(&mut self, id: impl Into<StateId>, state: impl State<C> + 'static) {
        let id = id.into();
        if self.states.contains_key(&id) {
            self.teardown(&id);
        }

        let mut behavior: Box<dyn State<C>> = Box::new(state);
        behavior.on_registered(&id, &self.ctx);
        let replaced = self
            .states
            .insert(id.clone(), StateSlot::new(id.clone(), behavior))
            .is_some();

        debug!(machine = %self.config.name, state = %id, replaced, "state registered");
    }

    /// Unregisters a state and every transition referencing it.
    ///
    /// Stops the machine first when the state is current. Returns `false`
    /// if no such state is registered.
    pub fn remove_state(&mut self, id: &str) -> bool {
        if !self.states.contains_key(id) {
            debug!(machine = %self.config.name, state = id, "remove_state: not registered");
            return false;
        }

        if self.running && self.current.as_ref().is_some_and(|c| c == id) {
            self.stop();
        }
        if self.in_flight.as_ref().is_some_and(|op| op.involves(id)) {
            self.preempt();
        }
        if self.current.as_ref().is_some_and(|c| c == id) {
            self.current = None;
        }

        let before = self.transitions.len();
        self.transitions.retain(|t| !t.references(id));
        let transitions_removed = before - self.transitions.len();
        self.states.shift_remove(id);

        info!(
            machine = %self.config.name,
            state = id,
            transitions_removed,
            "state removed"
        );
        true
    }

    /// Returns whether `id` is registered.
    #[must_use]
    pub fn has_state(&self, id: &str) -> bool {
        self.states.contains_key(id)
    }

    /// Snapshot of a registered state.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<StateInfo> {
        self.states.get(id).map(StateSlot::info)
    }

    /// Snapshots of every state in registration order.
    pub fn states(&self) -> impl Iterator<Item = StateInfo> + '_ {
        self.states.values().map(StateSlot::info)
    }

    /// Registers a transition.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::UnknownState`] if either endpoint is not
    /// registered; the transition is discarded.
    pub fn add_transition(
        &mut self,
        mut transition: Transition<C>,
    ) -> Result<TransitionId, MachineError> {
        for endpoint in [transition.from(), transition.to()] {
            if !self.states.contains_key(endpoint) {
                let err = self.unknown_state(endpoint.as_str());
                warn!(
                    machine = %self.config.name,
                    from = %transition.from(),
                    to = %transition.to(),
                    error = %err,
                    "transition rejected"
                );
                return Err(err);
            }
        }

        let id = TransitionId(self.next_transition_id);
        self.next_transition_id += 1;
        transition.bind(id, &self.ctx);

        debug!(
            machine = %self.config.name,
            transition = %id,
            from = %transition.from(),
            to = %transition.to(),
            guard = transition.guard().kind(),
            "transition registered"
        );
        self.transitions.push(transition);
        Ok(id)
    }

    /// Registers an event-consuming transition.
    ///
    /// # Errors
    ///
    /// Same as [`add_transition`](Self::add_transition).
    pub fn add_event_transition(
        &mut self,
        from: impl Into<StateId>,
        to: impl Into<StateId>,
        event: impl Into<String>,
        priority: i32,
    ) -> Result<TransitionId, MachineError> {
        self.add_transition(Transition::on_event(from, to, event).with_priority(priority))
    }

    /// Unregisters a transition. Returns `false` if it was not registered.
    pub fn remove_transition(&mut self, id: TransitionId) -> bool {
        let before = self.transitions.len();
        self.transitions.retain(|t| t.id() != Some(id));
        let removed = self.transitions.len() < before;
        debug!(machine = %self.config.name, transition = %id, removed, "remove_transition");
        removed
    }

    /// Looks up a registered transition.
    #[must_use]
    pub fn transition(&self, id: TransitionId) -> Option<&Transition<C>> {
        self.transitions.iter().find(|t| t.id() == Some(id))
    }

    /// Mutable access to a registered transition.
    pub fn transition_mut(&mut self, id: TransitionId) -> Option<&mut Transition<C>> {
        self.transitions.iter_mut().find(|t| t.id() == Some(id))
    }

    /// Enables or disables a transition. Returns `false` if not registered.
    pub fn set_transition_enabled(&mut self, id: TransitionId, enabled: bool) -> bool {
        self.transition_mut(id)
            .map(|t| t.set_enabled(enabled))
            .is_some()
    }

    /// Registered transitions in registration order.
    #[must_use]
    pub fn transitions(&self) -> &[Transition<C>] {
        &self.transitions
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Starts a new session and enters the initial state asynchronously.
    ///
    /// The initial state is `initial`, else the configured default, else
    /// the first registered state. A pre-completed enter finishes before
    /// this returns; a suspending one continues on later ticks.
    ///
    /// # Errors
    ///
    /// [`MachineError::AlreadyRunning`], [`MachineError::NoStates`] or
    /// [`MachineError::UnknownState`]; the machine is left unchanged.
    pub fn start(&mut self, initial: Option<&str>) -> Result<(), MachineError> {
        if self.running {
            let err = MachineError::AlreadyRunning {
                machine: self.config.name.clone(),
            };
            warn!(machine = %self.config.name, error = %err, "start rejected");
            return Err(err);
        }

        let requested = initial
            .map(str::to_string)
            .or_else(|| self.config.default_state.as_ref().map(|s| s.0.clone()));
        let target = match requested {
            Some(id) => self.resolve(&id)?,
            None => match self.states.keys().next() {
                Some(first) => first.clone(),
                None => {
                    let err = MachineError::NoStates {
                        machine: self.config.name.clone(),
                    };
                    warn!(machine = %self.config.name, error = %err, "start rejected");
                    return Err(err);
                }
            },
        };

        self.preempt();
        self.session = CancellationToken::new();
        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.running = true;
        self.previous = None;

        info!(
            machine = %self.config.name,
            state = %target,
            session = %session_id,
            "machine started"
        );
        self.emit(MachineEvent::Started {
            state: target.clone(),
        });
        self.dispatch(TransitionRef::forced(None, target, Pipeline::Async));
        Ok(())
    }

    /// Stops the machine.
    ///
    /// `running` flips to `false` immediately and the session is cancelled.
    /// The current state then gets a best-effort async exit; `current`
    /// becomes `None` once it settles. Stopping a stopped machine is a
    /// no-op.
    pub fn stop(&mut self) {
        if !self.running {
            debug!(machine = %self.config.name, "stop ignored; machine not running");
            return;
        }

        self.running = false;
        self.preempt();
        self.session.cancel();
        self.previous = None;

        info!(
            machine = %self.config.name,
            state = ?self.current.as_ref().map(StateId::as_str),
            "machine stopped"
        );
        self.emit(MachineEvent::Stopped);

        if let Some(current) = self.current.clone() {
            if let Some(slot) = self.states.get(&current) {
                slot.set_active(false);
            }
            let cancel = CancellationToken::new();
            let fut = self.begin(&current, Lifecycle::Exit, cancel.clone());
            self.in_flight = Some(InFlight {
                transition: None,
                stage: Stage::Exit {
                    state: current,
                    then: AfterExit::Settle,
                    fut,
                },
                cancel,
            });
            self.drive();
        }
    }

    /// Transitions to `id` through the sync pipeline, ignoring guards.
    ///
    /// Any in-flight async operation is cancelled first; the state it was
    /// exiting or entering is then exited synchronously.
    ///
    /// # Errors
    ///
    /// [`MachineError::NotRunning`] or [`MachineError::UnknownState`] leave
    /// the machine unchanged. [`MachineError::LifecycleFault`] means the
    /// exit or enter failed and the machine halted.
    pub fn force_transition_to(&mut self, id: &str) -> Result<(), MachineError> {
        self.ensure_running("force_transition_to")?;
        let target = self.resolve(id)?;
        self.preempt_for_force();
        let transition = TransitionRef::forced(self.current.clone(), target, Pipeline::Sync);
        self.run_sync(transition)
    }

    /// Transitions to `id` through the async pipeline, ignoring guards.
    ///
    /// # Errors
    ///
    /// [`MachineError::NotRunning`] or [`MachineError::UnknownState`].
    /// Lifecycle faults halt the machine and surface as events.
    pub fn force_transition_to_async(&mut self, id: &str) -> Result<(), MachineError> {
        self.ensure_running("force_transition_to_async")?;
        let target = self.resolve(id)?;
        self.preempt_for_force();
        let transition = TransitionRef::forced(self.current.clone(), target, Pipeline::Async);
        self.dispatch(transition);
        Ok(())
    }

    /// Takes a registered transition from the current state to `id` through
    /// the sync pipeline if its guard is satisfied.
    ///
    /// Event guards consume their trigger. Returns `false` while stopped,
    /// halted, or in the middle of an async transition.
    pub fn try_transition_to(&mut self, id: &str) -> bool {
        if !self.running || self.in_flight.is_some() {
            return false;
        }
        let Some(current) = self.current.clone() else {
            return false;
        };

        let hit = self
            .transitions
            .iter()
            .rev()
            .filter(|t| t.from() == &current && t.to() == id)
            .find(|t| t.can_transition(&self.ctx, &self.events))
            .map(|t| t.reference(Pipeline::Sync));

        match hit {
            Some(transition) => self.run_sync(transition).is_ok(),
            None => {
                debug!(
                    machine = %self.config.name,
                    from = %current,
                    to = id,
                    "try_transition_to: no satisfied transition"
                );
                false
            }
        }
    }

    /// Returns whether [`try_transition_to`](Self::try_transition_to) would
    /// succeed. Does not consume event triggers.
    #[must_use]
    pub fn can_transition_to(&self, id: &str) -> bool {
        if !self.running || self.in_flight.is_some() {
            return false;
        }
        let Some(current) = self.current.as_ref() else {
            return false;
        };
        self.transitions
            .iter()
            .filter(|t| t.from() == current && t.to() == id)
            .any(|t| t.is_satisfied(&self.ctx, &self.events))
    }

    /// Advances the machine by one tick.
    ///
    /// Resumes the in-flight async operation, then (while running with a
    /// current state) updates that state and scans the transitions leaving
    /// it, last registered first. The first satisfied one is dispatched
    /// through the async pipeline. No scan happens while an operation is
    /// in flight.
    pub fn tick(&mut self, dt: Duration) {
        self.ticks += 1;
        self.drive();

        if !self.running {
            return;
        }
        let Some(current) = self.current.clone() else {
            return;
        };

        if let Err(err) = self.update(&current, dt) {
            self.fail(None, &current, err);
            return;
        }
        if self.in_flight.is_some() {
            return;
        }

        let hit = self
            .transitions
            .iter()
            .rev()
            .find(|t| t.from() == &current && t.can_transition(&self.ctx, &self.events))
            .map(|t| t.reference(Pipeline::Async));

        if let Some(transition) = hit {
            debug!(
                machine = %self.config.name,
                transition = ?transition.id,
                from = %current,
                to = %transition.to,
                "transition triggered"
            );
            self.dispatch(transition);
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Marks event `name` as pending.
    pub fn trigger_event(&self, name: &str) {
        debug!(machine = %self.config.name, event = name, "event triggered");
        self.events.trigger(name);
    }

    /// Returns whether event `name` is pending, without clearing it.
    #[must_use]
    pub fn is_event_triggered(&self, name: &str) -> bool {
        self.events.is_triggered(name)
    }

    /// Clears event `name` and returns whether it was pending.
    pub fn consume_event(&self, name: &str) -> bool {
        self.events.consume(name)
    }

    /// Shared handle to the event table, for collaborators that trigger
    /// events without holding the machine.
    #[must_use]
    pub fn event_triggers(&self) -> Arc<EventTriggers> {
        Arc::clone(&self.events)
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Subscribes to machine notifications.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<MachineEvent> {
        self.observers.subscribe()
    }

    /// Machine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Shared context.
    #[must_use]
    pub const fn context(&self) -> &Arc<C> {
        &self.ctx
    }

    /// Current state, `None` before start, after stop settles, or when
    /// halted.
    #[must_use]
    pub const fn current_state(&self) -> Option<&StateId> {
        self.current.as_ref()
    }

    /// State most recently exited during this session.
    #[must_use]
    pub const fn previous_state(&self) -> Option<&StateId> {
        self.previous.as_ref()
    }

    /// Returns whether the machine is running. A halted machine still
    /// reports `true`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Returns whether an async transition is in progress.
    #[must_use]
    pub const fn is_transitioning(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Returns whether the machine is running without a current state.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.running && self.current.is_none() && self.in_flight.is_none()
    }

    /// Id of the current session, if the machine has been started.
    #[must_use]
    pub const fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Number of ticks processed.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Recent state changes, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &StateChange> + '_ {
        self.history.iter()
    }

    /// Wall-clock time of the last completed state change.
    #[must_use]
    pub fn last_changed_at(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|c| c.at)
    }

    // ------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------

    fn run_sync(&mut self, transition: TransitionRef) -> Result<(), MachineError> {
        debug!(
            machine = %self.config.name,
            from = ?transition.from.as_ref().map(StateId::as_str),
            to = %transition.to,
            "sync transition"
        );
        self.emit(MachineEvent::TransitionStarted {
            transition: transition.clone(),
        });

        if let Some(old) = self.current.clone() {
            if let Some(slot) = self.states.get(&old) {
                slot.set_active(false);
            }
            if let Err(err) = self.call_sync(&old, Lifecycle::Exit) {
                return Err(self.fault(transition, old, err));
            }
            self.emit(MachineEvent::StateExited { state: old.clone() });
            self.previous = Some(old);
        }

        let target = transition.to.clone();
        self.activate(&target);
        if let Err(err) = self.call_sync(&target, Lifecycle::Enter) {
            return Err(self.fault(transition, target, err));
        }
        self.complete(transition);
        Ok(())
    }

    /// Starts an async transition; the caller has already pre-empted any
    /// previous operation.
    fn dispatch(&mut self, transition: TransitionRef) {
        let cancel = self.session.child_token();
        self.emit(MachineEvent::TransitionStarted {
            transition: transition.clone(),
        });

        let target = transition.to.clone();
        let stage = match self.current.clone() {
            Some(old) => {
                if let Some(slot) = self.states.get(&old) {
                    slot.set_active(false);
                }
                let fut = self.begin(&old, Lifecycle::Exit, cancel.clone());
                Stage::Exit {
                    state: old,
                    then: AfterExit::Enter(target),
                    fut,
                }
            }
            None => {
                self.activate(&target);
                let fut = self.begin(&target, Lifecycle::Enter, cancel.clone());
                Stage::Enter { state: target, fut }
            }
        };

        self.in_flight = Some(InFlight {
            transition: Some(transition),
            stage,
            cancel,
        });
        self.drive();
    }

    /// Polls the in-flight operation until it suspends or finishes.
    fn drive(&mut self) {
        let mut cx = Context::from_waker(Waker::noop());
        loop {
            let Some(op) = self.in_flight.as_mut() else {
                return;
            };
            let fut = match &mut op.stage {
                Stage::Exit { fut, .. } | Stage::Enter { fut, .. } => fut,
            };
            let Poll::Ready(result) = fut.poll_unpin(&mut cx) else {
                return;
            };
            let Some(op) = self.in_flight.take() else {
                return;
            };
            self.in_flight = self.advance(op, result);
        }
    }

    /// Applies a finished stage and returns the follow-up stage, if any.
    fn advance(&mut self, op: InFlight, result: Result<(), StateError>) -> Option<InFlight> {
        let InFlight {
            transition,
            stage,
            cancel,
        } = op;

        match stage {
            Stage::Exit { state, then, .. } => {
                if let Err(err) = result {
                    self.fail(transition, &state, err);
                    return None;
                }
                self.emit(MachineEvent::StateExited {
                    state: state.clone(),
                });
                match then {
                    AfterExit::Enter(target) => {
                        self.previous = Some(state);
                        self.activate(&target);
                        let fut = self.begin(&target, Lifecycle::Enter, cancel.clone());
                        Some(InFlight {
                            transition,
                            stage: Stage::Enter { state: target, fut },
                            cancel,
                        })
                    }
                    AfterExit::Settle => {
                        debug!(machine = %self.config.name, state = %state, "stop settled");
                        self.current = None;
                        metrics::set_current_state(&self.config.name, None, Some(state.as_str()));
                        None
                    }
                }
            }
            Stage::Enter { state, .. } => {
                match (result, transition) {
                    (Err(err), transition) => self.fail(transition, &state, err),
                    (Ok(()), Some(transition)) => self.complete(transition),
                    (Ok(()), None) => {}
                }
                None
            }
        }
    }

    /// Cancels and drops the in-flight operation.
    ///
    /// Returns the state the operation was exiting or entering.
    fn preempt(&mut self) -> Option<StateId> {
        let op = self.in_flight.take()?;
        op.cancel.cancel();

        let interrupted = match op.stage {
            Stage::Exit { state, then, .. } => {
                if matches!(then, AfterExit::Enter(_)) {
                    self.previous = Some(state.clone());
                }
                state
            }
            Stage::Enter { state, .. } => state,
        };
        if let Some(slot) = self.states.get(&interrupted) {
            slot.set_active(false);
        }
        self.current = None;

        info!(
            machine = %self.config.name,
            state = %interrupted,
            "in-flight transition pre-empted"
        );
        if let Some(transition) = op.transition {
            metrics::record_transition(&self.config.name, transition.pipeline, "cancelled");
            self.emit(MachineEvent::TransitionCancelled { transition });
        }
        Some(interrupted)
    }

    /// Pre-empts the in-flight operation ahead of a forced transition.
    ///
    /// The interrupted state becomes current again, inactive, so the forced
    /// transition exits it and records it as `previous`.
    fn preempt_for_force(&mut self) {
        if let Some(interrupted) = self.preempt()
            && self.states.contains_key(&interrupted)
        {
            self.current = Some(interrupted);
        }
    }

    /// Makes `target` the only active state and re-arms the conditions of
    /// the transitions leaving it.
    fn activate(&mut self, target: &StateId) {
        for slot in self.states.values() {
            slot.set_active(slot.id() == target);
        }
        self.current = Some(target.clone());
        for transition in self.transitions.iter().filter(|t| t.from() == target) {
            transition.reset_conditions();
        }
    }

    fn complete(&mut self, transition: TransitionRef) {
        let to = transition.to.clone();
        let from = transition.from.clone();
        self.emit(MachineEvent::StateEntered { state: to.clone() });

        self.history.push(StateChange {
            from: from.clone(),
            to: to.clone(),
            at: Utc::now(),
            pipeline: transition.pipeline,
        });
        metrics::record_state_change(
            &self.config.name,
            from.as_ref().map(StateId::as_str),
            to.as_str(),
        );
        metrics::record_transition(&self.config.name, transition.pipeline, "completed");
        metrics::set_current_state(
            &self.config.name,
            Some(to.as_str()),
            from.as_ref().map(StateId::as_str),
        );

        info!(
            machine = %self.config.name,
            from = ?from.as_ref().map(StateId::as_str),
            to = %to,
            pipeline = transition.pipeline.as_str(),
            "state changed"
        );
        self.emit(MachineEvent::StateChanged { from, to });
        self.emit(MachineEvent::TransitionCompleted { transition });
    }

    /// Settles a failed lifecycle call into `current = None`.
    fn fail(&mut self, transition: Option<TransitionRef>, state: &StateId, err: StateError) {
        if let Some(slot) = self.states.get(state) {
            slot.set_active(false);
        }
        self.current = None;

        if err.is_cancelled() {
            info!(machine = %self.config.name, state = %state, "lifecycle cancelled");
            if let Some(transition) = transition {
                metrics::record_transition(&self.config.name, transition.pipeline, "cancelled");
                self.emit(MachineEvent::TransitionCancelled { transition });
            }
            return;
        }
        if transition.is_none() && !self.running {
            warn!(
                machine = %self.config.name,
                state = %state,
                error = %err,
                "exit after stop failed"
            );
            metrics::set_current_state(&self.config.name, None, Some(state.as_str()));
            return;
        }

        error!(
            machine = %self.config.name,
            state = %state,
            error = %err,
            "state lifecycle failed; machine halted"
        );
        if let Some(transition) = &transition {
            metrics::record_transition(&self.config.name, transition.pipeline, "failed");
        }
        metrics::record_halt(&self.config.name, state.as_str());
        metrics::set_current_state(&self.config.name, None, Some(state.as_str()));
        self.emit(MachineEvent::Halted {
            state: state.clone(),
            reason: err.to_string(),
        });
    }

    fn fault(&mut self, transition: TransitionRef, state: StateId, err: StateError) -> MachineError {
        self.fail(Some(transition), &state, err.clone());
        MachineError::LifecycleFault { state, source: err }
    }

    // ------------------------------------------------------------------
    // Lifecycle calls
    // ------------------------------------------------------------------

    /// Builds the future for an async enter or exit of `id`.
    fn begin(&self, id: &StateId, kind: Lifecycle, cancel: CancellationToken) -> LifecycleFuture {
        let Some(slot) = self.states.get(id) else {
            let err = StateError::failed(format!("state '{id}' is not registered"));
            return Box::pin(futures_util::future::ready(Err(err)));
        };
        let behavior = Arc::clone(slot.behavior());
        let ctx = Arc::clone(&self.ctx);
        let id = id.clone();

        Box::pin(async move {
            let Ok(mut guard) = behavior.try_lock_owned() else {
                return Err(StateError::Busy(id));
            };
            let work = AssertUnwindSafe(async {
                match kind {
                    Lifecycle::Enter => guard.enter_async(&ctx, &cancel).await,
                    Lifecycle::Exit => guard.exit_async(&ctx, &cancel).await,
                }
            })
            .catch_unwind();

            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(StateError::Cancelled),
                outcome = work => outcome.unwrap_or_else(|payload| {
                    Err(StateError::Panicked(panic_message(&*payload)))
                }),
            }
        })
    }

    fn call_sync(&self, id: &StateId, kind: Lifecycle) -> Result<(), StateError> {
        let Some(slot) = self.states.get(id) else {
            return Err(StateError::failed(format!("state '{id}' is not registered")));
        };
        let Ok(mut guard) = slot.behavior().try_lock() else {
            return Err(StateError::Busy(id.clone()));
        };
        let ctx: &C = &self.ctx;
        std::panic::catch_unwind(AssertUnwindSafe(|| match kind {
            Lifecycle::Enter => guard.enter(ctx),
            Lifecycle::Exit => guard.exit(ctx),
        }))
        .unwrap_or_else(|payload| Err(StateError::Panicked(panic_message(&*payload))))
    }

    /// Runs `update` on the current state unless it is inactive or busy
    /// with a lifecycle call.
    fn update(&self, id: &StateId, dt: Duration) -> Result<(), StateError> {
        let Some(slot) = self.states.get(id) else {
            return Ok(());
        };
        if !slot.is_active() {
            return Ok(());
        }
        let Ok(mut guard) = slot.behavior().try_lock() else {
            return Ok(());
        };
        let ctx: &C = &self.ctx;
        std::panic::catch_unwind(AssertUnwindSafe(|| guard.update(ctx, dt)))
            .map_err(|payload| StateError::Panicked(panic_message(&*payload)))
    }

    /// Tears down the state registered under `id` before it is replaced.
    fn teardown(&mut self, id: &StateId) {
        if self.in_flight.as_ref().is_some_and(|op| op.involves(id.as_str())) {
            self.preempt();
        }
        if self.current.as_ref() != Some(id) {
            return;
        }

        if let Some(slot) = self.states.get(id) {
            slot.set_active(false);
        }
        match self.call_sync(id, Lifecycle::Exit) {
            Ok(()) => self.emit(MachineEvent::StateExited { state: id.clone() }),
            Err(err) => warn!(
                machine = %self.config.name,
                state = %id,
                error = %err,
                "exit of replaced state failed"
            ),
        }
        self.current = None;
        warn!(
            machine = %self.config.name,
            state = %id,
            "current state replaced; machine has no current state"
        );
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn emit(&mut self, event: MachineEvent) {
        self.observers.emit(&event);
    }

    fn ensure_running(&self, operation: &str) -> Result<(), MachineError> {
        if self.running {
            return Ok(());
        }
        let err = MachineError::NotRunning {
            machine: self.config.name.clone(),
        };
        warn!(machine = %self.config.name, operation, error = %err, "operation rejected");
        Err(err)
    }

    fn resolve(&self, id: &str) -> Result<StateId, MachineError> {
        if let Some((key, _)) = self.states.get_key_value(id) {
            return Ok(key.clone());
        }
        let err = self.unknown_state(id);
        warn!(machine = %self.config.name, error = %err, "unknown state");
        Err(err)
    }

    fn unknown_state(&self, id: &str) -> MachineError {
        MachineError::UnknownState {
            id: StateId::new(id),
            suggestion: suggest_state(id, self.states.keys()),
        }
    }
}

impl<C: Send + Sync + 'static> Drop for StateMachine<C> {
    fn drop(&mut self) {
        self.session.cancel();
        if let Some(op) = self.in_flight.take() {
            op.cancel.cancel();
        }
    }
}

impl<C: Send + Sync + 'static> std::fmt::Debug for StateMachine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.config.name)
            .field("states", &self.states.len())
            .field("transitions", &self.transitions.len())
            .field("current", &self.current)
            .field("previous", &self.previous)
            .field("running", &self.running)
            .field("transitioning", &self.in_flight.is_some())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Closest registered id within Damerau-Levenshtein distance 3.
pub(crate) fn suggest_state<'a>(
    input: &str,
    known: impl IntoIterator<Item = &'a StateId>,
) -> Option<StateId> {
    known
        .into_iter()
        .map(|id| (id, strsim::damerau_levenshtein(input, id.as_str())))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(id, _)| id.clone())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
