//! `scoot-kernel` – State machine engine
//!
//! Runs keyed, concurrent instances of table-driven finite state machines.
//! It knows nothing about scooters: every actor of the protocol is a
//! [`Logic`] implementation plus a [`TransitionTable`].
//!
//! # Modules
//!
//! - [`table`] – [`TransitionTable`][table::TransitionTable]: direct and
//!   choice transitions keyed by `(state, trigger)`, plus terminal states.
//! - [`machine`] – [`Machine`][machine::Machine]: one instance with its
//!   timers, the [`Context`][machine::Context] handed to transition effects,
//!   and the [`MachineHandle`][machine::MachineHandle] used to drive it.
//! - [`engine`] – [`Engine`][engine::Engine]: spawns one Tokio task and
//!   mailbox per instance, routes triggers by name and retires instances
//!   that reach a terminal state.

use std::fmt::Debug;
use std::hash::Hash;

pub mod engine;
pub mod machine;
pub mod table;

pub use engine::{Engine, Journal};
pub use machine::{Context, Machine, MachineHandle, TransitionRecord};
pub use table::{Branches, Effect, Guard, TransitionTable};

/// A signal a machine reacts to.  The name is the trigger half of the
/// transition table key.
pub trait Trigger: Clone + Debug + Send + 'static {
    fn name(&self) -> &'static str;
}

/// Instance data and type family of one machine kind.
pub trait Logic: Send + 'static {
    type State: Copy + Eq + Hash + Debug + Send + Sync + 'static;
    type Trigger: Trigger;
    /// Outcome type of the kind's choice transitions.
    type Choice: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Runs when the instance retires in a terminal state, while the engine
    /// still holds its registry lock.
    fn on_terminate(&mut self) {}
}

/// Choice type for machine kinds without choice transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoChoice {}
