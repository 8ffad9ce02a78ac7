//! A single state machine instance and the handles used to drive it.
//!
//! A [`Machine`] owns its current state, its instance data (the [`Logic`]
//! value) and its armed timers.  It is driven exclusively by the engine task
//! that owns it, so every method here runs without locking.
//!
//! # Timers
//!
//! Timers are trigger injections into the instance's own mailbox.  Each armed
//! timer gets a ticket `(id, epoch)`.  The epoch increases every time the
//! instance changes state, and every timer is cancelled when the state is
//! left, so a firing that raced with a transition carries either an unknown
//! id or an old epoch and is discarded.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use scoot_types::ScootError;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::table::TransitionTable;
use crate::{Logic, Trigger};

// ─────────────────────────────────────────────────────────────────────────────
// Mailbox
// ─────────────────────────────────────────────────────────────────────────────

/// What an instance's mailbox carries.
pub(crate) enum Signal<T> {
    Trigger(T),
    Timer {
        name: &'static str,
        id: u64,
        epoch: u64,
        trigger: T,
    },
    Stop,
}

/// One executed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord<S> {
    pub machine: String,
    pub from: S,
    pub trigger: &'static str,
    pub to: S,
}

// ─────────────────────────────────────────────────────────────────────────────
// MachineHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to a running instance.
///
/// Sending through a handle never blocks; the trigger is queued in the
/// instance's mailbox and processed in arrival order.
pub struct MachineHandle<L: Logic> {
    name: Arc<str>,
    mailbox: mpsc::UnboundedSender<Signal<L::Trigger>>,
    state: watch::Receiver<L::State>,
}

impl<L: Logic> Clone for MachineHandle<L> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            mailbox: self.mailbox.clone(),
            state: self.state.clone(),
        }
    }
}

impl<L: Logic> MachineHandle<L> {
    pub(crate) fn new(
        name: &str,
        mailbox: mpsc::UnboundedSender<Signal<L::Trigger>>,
        state: watch::Receiver<L::State>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            mailbox,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `trigger` for this instance.
    ///
    /// # Errors
    ///
    /// [`ScootError::UnknownInstance`] once the instance has retired.
    pub fn send(&self, trigger: L::Trigger) -> Result<(), ScootError> {
        self.mailbox
            .send(Signal::Trigger(trigger))
            .map_err(|_| ScootError::UnknownInstance(self.name.to_string()))
    }

    /// State after the last processed signal.
    pub fn state(&self) -> L::State {
        *self.state.borrow()
    }

    /// `true` once the instance task has finished.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Wait until the published state satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// [`ScootError::UnknownInstance`] if the instance stops before that
    /// happens.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&L::State) -> bool,
    ) -> Result<L::State, ScootError> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| predicate(s))
            .await
            .map(|state| *state)
            .map_err(|_| ScootError::UnknownInstance(self.name.to_string()))
    }

    pub(crate) fn stop(&self) {
        let _ = self.mailbox.send(Signal::Stop);
    }

    fn schedule(
        &self,
        name: &'static str,
        id: u64,
        epoch: u64,
        delay: Duration,
        trigger: L::Trigger,
    ) -> AbortHandle {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = mailbox.send(Signal::Timer {
                name,
                id,
                epoch,
                trigger,
            });
        })
        .abort_handle()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

enum TimerOp<T> {
    Start {
        name: &'static str,
        delay: Duration,
        trigger: T,
    },
    Stop(&'static str),
}

/// What a transition effect may do besides mutating instance data.
pub struct Context<L: Logic> {
    handle: MachineHandle<L>,
    raised: Vec<L::Trigger>,
    timer_ops: Vec<TimerOp<L::Trigger>>,
}

impl<L: Logic> Context<L> {
    fn new(handle: MachineHandle<L>) -> Self {
        Self {
            handle,
            raised: Vec::new(),
            timer_ops: Vec::new(),
        }
    }

    /// Name of the instance the effect runs on.
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Handle to the instance itself, for work that completes later (an
    /// async decision, for example) and reports back with a trigger.
    pub fn handle(&self) -> MachineHandle<L> {
        self.handle.clone()
    }

    /// Queue `trigger` to run right after this transition, before any other
    /// mailbox signal.
    pub fn raise(&mut self, trigger: L::Trigger) {
        self.raised.push(trigger);
    }

    /// Arm timer `name` to deliver `trigger` after `delay`.  Re-arming a
    /// running timer replaces it.
    pub fn start_timer(&mut self, name: &'static str, delay: Duration, trigger: L::Trigger) {
        self.timer_ops.push(TimerOp::Start {
            name,
            delay,
            trigger,
        });
    }

    pub fn stop_timer(&mut self, name: &'static str) {
        self.timer_ops.push(TimerOp::Stop(name));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Machine
// ─────────────────────────────────────────────────────────────────────────────

struct TimerTicket {
    id: u64,
    epoch: u64,
    task: AbortHandle,
}

/// One state machine instance.
pub struct Machine<L: Logic> {
    name: String,
    state: L::State,
    epoch: u64,
    logic: L,
    table: Arc<TransitionTable<L>>,
    timers: HashMap<&'static str, TimerTicket>,
    next_timer_id: u64,
}

impl<L: Logic> Machine<L> {
    pub fn new(name: impl Into<String>, logic: L, table: Arc<TransitionTable<L>>) -> Self {
        Self {
            name: name.into(),
            state: table.initial(),
            epoch: 0,
            logic,
            table,
            timers: HashMap::new(),
            next_timer_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> L::State {
        self.state
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    pub(crate) fn logic_mut(&mut self) -> &mut L {
        &mut self.logic
    }

    pub fn is_terminal(&self) -> bool {
        self.table.is_terminal(self.state)
    }

    /// Number of timers currently armed.
    pub fn armed_timers(&self) -> usize {
        self.timers.len()
    }

    /// Deliver `trigger` and run every trigger it raises to completion.
    ///
    /// Triggers without a transition in the current state are logged and
    /// leave the instance untouched.
    pub fn handle_trigger(
        &mut self,
        trigger: L::Trigger,
        handle: &MachineHandle<L>,
    ) -> Vec<TransitionRecord<L::State>> {
        let mut queue = VecDeque::from([trigger]);
        let mut records = Vec::new();

        while let Some(trigger) = queue.pop_front() {
            if self.is_terminal() {
                debug!(
                    machine = %self.name,
                    trigger = trigger.name(),
                    "instance finished, trigger dropped"
                );
                break;
            }
            match self.fire(trigger, handle) {
                Ok((record, raised)) => {
                    records.push(record);
                    queue.extend(raised);
                }
                Err(e) => warn!(machine = %self.name, error = %e, "trigger ignored"),
            }
        }
        records
    }

    /// Check a timer ticket.  A valid ticket is consumed.
    pub(crate) fn accept_timer(&mut self, name: &'static str, id: u64, epoch: u64) -> bool {
        let current = self.epoch;
        match self.timers.get(name) {
            Some(ticket) if ticket.id == id && ticket.epoch == epoch && epoch == current => {
                self.timers.remove(name);
                true
            }
            _ => {
                debug!(
                    machine = %self.name,
                    timer = name,
                    id,
                    epoch,
                    current,
                    "stale timer discarded"
                );
                false
            }
        }
    }

    /// Abort every armed timer.
    pub fn cancel_timers(&mut self) {
        for (_, ticket) in self.timers.drain() {
            ticket.task.abort();
        }
    }

    fn fire(
        &mut self,
        trigger: L::Trigger,
        handle: &MachineHandle<L>,
    ) -> Result<(TransitionRecord<L::State>, Vec<L::Trigger>), ScootError> {
        let from = self.state;
        let (target, effect) = self
            .table
            .resolve(from, &self.logic, &trigger)
            .ok_or_else(|| ScootError::InvalidTransition {
                machine: self.name.clone(),
                state: format!("{from:?}"),
                trigger: trigger.name().to_string(),
            })?;

        let mut ctx = Context::new(handle.clone());
        if let Some(effect) = effect {
            effect(&mut self.logic, &trigger, &mut ctx);
        }

        if target != from {
            self.cancel_timers();
            self.epoch += 1;
            self.state = target;
        }
        self.apply_timer_ops(ctx.timer_ops, handle);

        debug!(
            machine = %self.name,
            from = ?from,
            trigger = trigger.name(),
            to = ?target,
            "transition"
        );

        let record = TransitionRecord {
            machine: self.name.clone(),
            from,
            trigger: trigger.name(),
            to: target,
        };
        Ok((record, ctx.raised))
    }

    fn apply_timer_ops(&mut self, ops: Vec<TimerOp<L::Trigger>>, handle: &MachineHandle<L>) {
        for op in ops {
            match op {
                TimerOp::Start {
                    name,
                    delay,
                    trigger,
                } => {
                    if let Some(old) = self.timers.remove(name) {
                        old.task.abort();
                    }
                    self.next_timer_id += 1;
                    let id = self.next_timer_id;
                    let task = handle.schedule(name, id, self.epoch, delay, trigger);
                    self.timers.insert(
                        name,
                        TimerTicket {
                            id,
                            epoch: self.epoch,
                            task,
                        },
                    );
                }
                TimerOp::Stop(name) => {
                    if let Some(old) = self.timers.remove(name) {
                        old.task.abort();
                    }
                }
            }
        }
    }
}
