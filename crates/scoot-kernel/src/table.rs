//! [`TransitionTable`] – the static shape of a state machine.
//!
//! A table maps `(state, trigger name)` to either a direct edge or a choice
//! edge.  A choice edge runs a pure [`Guard`] over the instance data and the
//! trigger and maps each outcome to its own target and effect.
//!
//! ```text
//!   (Idle, "coin")  ──────────────────────────────▶ Unlocked   + effect
//!   (Unlocked, "push") ─ guard ─┬─ Choice::Free ──▶ Idle
//!                               └─ Choice::Again ─▶ Unlocked   + effect
//! ```
//!
//! Tables are built once per machine kind and shared by every instance.

use std::collections::{HashMap, HashSet};

use crate::machine::Context;
use crate::{Logic, Trigger};

/// Transition effect.  Runs once, synchronously, before the target state is
/// entered.  It may mutate the instance data, raise further triggers and arm
/// or cancel timers through the [`Context`], and must not block.
pub type Effect<L> = fn(&mut L, &<L as Logic>::Trigger, &mut Context<L>);

/// Pure decision function of a choice transition.
pub type Guard<L> = fn(&L, &<L as Logic>::Trigger) -> <L as Logic>::Choice;

enum Edge<L: Logic> {
    Direct {
        target: L::State,
        effect: Option<Effect<L>>,
    },
    Choice {
        guard: Guard<L>,
        branches: HashMap<L::Choice, (L::State, Option<Effect<L>>)>,
    },
}

/// Outcomes of a choice transition, collected by [`TransitionTable::choice`].
pub struct Branches<L: Logic> {
    branches: HashMap<L::Choice, (L::State, Option<Effect<L>>)>,
}

impl<L: Logic> Branches<L> {
    /// Map `choice` to `target` with no effect.
    pub fn to(mut self, choice: L::Choice, target: L::State) -> Self {
        self.insert(choice, target, None);
        self
    }

    /// Map `choice` to `target`, running `effect` on the way.
    pub fn to_with(mut self, choice: L::Choice, target: L::State, effect: Effect<L>) -> Self {
        self.insert(choice, target, Some(effect));
        self
    }

    fn insert(&mut self, choice: L::Choice, target: L::State, effect: Option<Effect<L>>) {
        let previous = self.branches.insert(choice, (target, effect));
        debug_assert!(previous.is_none(), "choice {choice:?} mapped twice");
    }
}

/// Transition table of one machine kind.
pub struct TransitionTable<L: Logic> {
    initial: L::State,
    edges: HashMap<(L::State, &'static str), Edge<L>>,
    terminals: HashSet<L::State>,
}

impl<L: Logic> TransitionTable<L> {
    /// Start an empty table whose instances begin in `initial`.
    pub fn new(initial: L::State) -> Self {
        Self {
            initial,
            edges: HashMap::new(),
            terminals: HashSet::new(),
        }
    }

    /// `state --trigger--> target`.
    pub fn on(self, state: L::State, trigger: &'static str, target: L::State) -> Self {
        self.edge(state, trigger, Edge::Direct { target, effect: None })
    }

    /// `state --trigger/effect--> target`.
    pub fn on_with(
        self,
        state: L::State,
        trigger: &'static str,
        target: L::State,
        effect: Effect<L>,
    ) -> Self {
        self.edge(
            state,
            trigger,
            Edge::Direct {
                target,
                effect: Some(effect),
            },
        )
    }

    /// Choice transition: `guard` decides, `branches` maps every outcome.
    ///
    /// An outcome the guard returns but `branches` does not map is treated
    /// like a missing transition.
    pub fn choice(
        self,
        state: L::State,
        trigger: &'static str,
        guard: Guard<L>,
        branches: impl FnOnce(Branches<L>) -> Branches<L>,
    ) -> Self {
        let built = branches(Branches {
            branches: HashMap::new(),
        });
        self.edge(
            state,
            trigger,
            Edge::Choice {
                guard,
                branches: built.branches,
            },
        )
    }

    /// Mark `state` as terminal.  Reaching it retires the instance.
    pub fn terminal(mut self, state: L::State) -> Self {
        self.terminals.insert(state);
        self
    }

    fn edge(mut self, state: L::State, trigger: &'static str, edge: Edge<L>) -> Self {
        let previous = self.edges.insert((state, trigger), edge);
        debug_assert!(
            previous.is_none(),
            "duplicate transition for ({state:?}, {trigger})"
        );
        self
    }

    /// State every new instance starts in.
    pub fn initial(&self) -> L::State {
        self.initial
    }

    pub fn is_terminal(&self, state: L::State) -> bool {
        self.terminals.contains(&state)
    }

    /// `true` if some transition leaves `state` on `trigger`.
    pub fn accepts(&self, state: L::State, trigger: &str) -> bool {
        self.edges.keys().any(|(s, t)| *s == state && *t == trigger)
    }

    /// Resolve the transition for `trigger` in `state`.
    ///
    /// Returns the target state and the effect to run, or `None` when the
    /// table has no transition (or no branch for the guard's outcome).
    pub fn resolve(
        &self,
        state: L::State,
        logic: &L,
        trigger: &L::Trigger,
    ) -> Option<(L::State, Option<Effect<L>>)> {
        match self.edges.get(&(state, trigger.name()))? {
            Edge::Direct { target, effect } => Some((*target, *effect)),
            Edge::Choice { guard, branches } => {
                let outcome = guard(logic, trigger);
                branches.get(&outcome).copied()
            }
        }
    }
}
