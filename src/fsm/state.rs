//! State identity and the state lifecycle contract.
//!
//! A [`State`] is user behavior; the machine wraps every registered state
//! in a [`StateSlot`] that owns the active flag and serializes lifecycle
//! calls, so the flag semantics are identical for every implementation.

use std::borrow::Borrow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::StateError;

/// Unique name of a state within one machine.
///
/// Doubles as the registry key and as the endpoint reference of
/// transitions.
#[derive(Debug, Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct StateId(pub String);

impl StateId {
    /// Creates a new `StateId` from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&Self> for StateId {
    fn from(id: &Self) -> Self {
        id.clone()
    }
}

impl Borrow<str> for StateId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for StateId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StateId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Behavior of a single state.
///
/// Every method has a no-op default, so a state implements only the path
/// its call sites use: the sync pair (`enter`/`exit`) for forced
/// transitions, the async pair (`enter_async`/`exit_async`) for automatic
/// and scripted ones. The async defaults complete immediately.
///
/// Async lifecycle code may suspend across ticks (see
/// [`crate::fsm::next_tick`]) and should return [`StateError::Cancelled`]
/// when `cancel` fires; the machine also stops polling a cancelled
/// operation on its own.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use async_trait::async_trait;
/// use tickstate::fsm::{State, StateError, wait_ticks};
/// use tokio_util::sync::CancellationToken;
///
/// struct Windup {
///     charge: Duration,
/// }
///
/// #[async_trait]
/// impl State<()> for Windup {
///     async fn enter_async(
///         &mut self,
///         _ctx: &(),
///         _cancel: &CancellationToken,
///     ) -> Result<(), StateError> {
///         wait_ticks(3).await;
///         Ok(())
///     }
///
///     fn update(&mut self, _ctx: &(), dt: Duration) {
///         self.charge += dt;
///     }
/// }
/// ```
#[async_trait]
pub trait State<C: Send + Sync + 'static>: Send {
    /// Called once when the state is added to a machine.
    fn on_registered(&mut self, _id: &StateId, _ctx: &C) {}

    /// Synchronous entry; must finish within the current tick.
    ///
    /// # Errors
    ///
    /// An error halts the machine.
    fn enter(&mut self, _ctx: &C) -> Result<(), StateError> {
        Ok(())
    }

    /// Asynchronous entry; may suspend across ticks.
    ///
    /// # Errors
    ///
    /// An error other than [`StateError::Cancelled`] halts the machine.
    async fn enter_async(&mut self, _ctx: &C, _cancel: &CancellationToken) -> Result<(), StateError> {
        Ok(())
    }

    /// Per-tick update, only while the state is active and not in the
    /// middle of a lifecycle call.
    fn update(&mut self, _ctx: &C, _dt: Duration) {}

    /// Synchronous exit; must finish within the current tick.
    ///
    /// # Errors
    ///
    /// An error halts the machine.
    fn exit(&mut self, _ctx: &C) -> Result<(), StateError> {
        Ok(())
    }

    /// Asynchronous exit; may suspend across ticks.
    ///
    /// # Errors
    ///
    /// An error other than [`StateError::Cancelled`] halts the machine.
    async fn exit_async(&mut self, _ctx: &C, _cancel: &CancellationToken) -> Result<(), StateError> {
        Ok(())
    }
}

/// Shared, lockable state behavior.
pub(crate) type Behavior<C> = Arc<Mutex<Box<dyn State<C>>>>;

/// Machine-owned wrapper around a registered state.
pub(crate) struct StateSlot<C: Send + Sync + 'static> {
    id: StateId,
    active: AtomicBool,
    behavior: Behavior<C>,
}

impl<C: Send + Sync + 'static> StateSlot<C> {
    pub(crate) fn new(id: StateId, behavior: Box<dyn State<C>>) -> Self {
        Self {
            id,
            active: AtomicBool::new(false),
            behavior: Arc::new(Mutex::new(behavior)),
        }
    }

    pub(crate) const fn id(&self) -> &StateId {
        &self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub(crate) const fn behavior(&self) -> &Behavior<C> {
        &self.behavior
    }

    pub(crate) fn info(&self) -> StateInfo {
        StateInfo {
            id: self.id.clone(),
            is_active: self.is_active(),
        }
    }
}

impl<C: Send + Sync + 'static> std::fmt::Debug for StateSlot<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSlot")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Read-only snapshot of a registered state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    /// Registered id
    pub id: StateId,
    /// Whether the state is currently active
    pub is_active: bool,
}
