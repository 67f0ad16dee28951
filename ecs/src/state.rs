//! Discrete world states backing the `run_in_state` / `run_not_in_state`
//! system options.
//!
//! A state type is a user enum implementing [`States`]. The current
//! value lives in the [`State<S>`] resource; transitions are queued in
//! [`NextState<S>`] and applied by the frame driver at the start of the
//! next frame, before the run-condition cache refreshes — so state
//! gating always observes a stable value for the whole frame.
//!
//! ```
//! use firethorn_ecs::States;
//!
//! #[derive(Clone, PartialEq, Eq, Hash)]
//! enum GameState { Menu, Playing, Paused }
//! impl States for GameState {}
//! ```

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::stores::Stores;

/// Marker trait for types usable as world states.
///
/// The bounds ensure states can be compared, hashed, cloned, and
/// shared across system tasks.
pub trait States: Clone + PartialEq + Eq + Hash + Send + Sync + 'static {}

/// Resource holding the current value of state type `S`.
///
/// Written only by the frame driver when it applies a queued
/// [`NextState`] transition.
#[derive(Debug, Clone)]
pub struct State<S: States> {
    current: S,
}

impl<S: States> State<S> {
    pub(crate) fn new(initial: S) -> Self {
        Self { current: initial }
    }

    /// Returns the current state value.
    pub fn current(&self) -> &S {
        &self.current
    }
}

/// Resource queuing a transition of state type `S`.
///
/// Set a pending transition with [`set()`](NextState::set); the driver
/// applies it at the start of the next frame. Setting again before the
/// frame boundary overwrites the previous request.
#[derive(Debug, Clone)]
pub struct NextState<S: States> {
    pending: Option<S>,
}

impl<S: States> NextState<S> {
    /// Queues a transition to the given state.
    pub fn set(&mut self, state: S) {
        self.pending = Some(state);
    }

    /// Returns whether a transition is queued.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn take(&mut self) -> Option<S> {
        self.pending.take()
    }
}

impl<S: States> Default for NextState<S> {
    fn default() -> Self {
        Self { pending: None }
    }
}

/// Deterministic hash of a state variant, used as the dedup identity
/// of state-based run conditions.
pub(crate) fn hash_state<S: Hash>(state: &S) -> u64 {
    let mut hasher = DefaultHasher::new();
    state.hash(&mut hasher);
    hasher.finish()
}

/// Type-erased driver hooks for one registered state type.
///
/// `init` seeds the [`State`] / [`NextState`] resources at world
/// start; `apply` moves a queued transition into `State` at each
/// frame start.
#[derive(Clone)]
pub(crate) struct StateHook {
    pub(crate) init: Arc<dyn Fn(&Stores) + Send + Sync>,
    pub(crate) apply: Arc<dyn Fn(&Stores) + Send + Sync>,
}

pub(crate) fn state_hook<S: States>(initial: S) -> StateHook {
    let init = Arc::new(move |stores: &Stores| {
        if !stores.has_resource::<State<S>>() {
            stores.insert_resource(State::new(initial.clone()));
            stores.insert_resource(NextState::<S>::default());
        }
    });
    let apply = Arc::new(|stores: &Stores| {
        let mut queued = None;
        stores.update_resource::<NextState<S>>(|next| queued = next.take());
        if let Some(next) = queued {
            stores.update_resource::<State<S>>(|state| state.current = next.clone());
        }
    });
    StateHook { init, apply }
}
