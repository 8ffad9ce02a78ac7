//! [`Engine`] – keyed registry of running state machine instances.
//!
//! Every instance runs on its own Tokio task with an unbounded mailbox, so
//! triggers for one instance are processed strictly one at a time while
//! different instances progress in parallel.  The engine only holds the
//! mailbox senders; the instance data lives on the task.
//!
//! When an instance reaches a terminal state it retires: the task takes the
//! registry lock, removes its own entry and runs [`Logic::on_terminate`]
//! before releasing the lock, so no other caller can observe the instance as
//! both gone and not yet cleaned up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use scoot_types::ScootError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::Logic;
use crate::machine::{Machine, MachineHandle, Signal, TransitionRecord};
use crate::table::TransitionTable;

type Instances<L> = Arc<Mutex<HashMap<String, MachineHandle<L>>>>;

/// Sink receiving every executed transition, in per-instance order.
pub type Journal<S> = mpsc::UnboundedSender<TransitionRecord<S>>;

fn lock<L: Logic>(instances: &Instances<L>) -> MutexGuard<'_, HashMap<String, MachineHandle<L>>> {
    instances.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives every instance of one machine kind.
pub struct Engine<L: Logic> {
    kind: &'static str,
    table: Arc<TransitionTable<L>>,
    instances: Instances<L>,
    journal: Option<Journal<L::State>>,
}

impl<L: Logic> Clone for Engine<L> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            table: Arc::clone(&self.table),
            instances: Arc::clone(&self.instances),
            journal: self.journal.clone(),
        }
    }
}

impl<L: Logic> Engine<L> {
    /// Create an engine for instances of `table`.  `kind` names the machine
    /// kind in logs (`"dispatch"`, `"rider"`, …).
    pub fn new(kind: &'static str, table: TransitionTable<L>) -> Self {
        Self {
            kind,
            table: Arc::new(table),
            instances: Arc::new(Mutex::new(HashMap::new())),
            journal: None,
        }
    }

    /// Report every executed transition to `journal`.
    pub fn with_journal(mut self, journal: Journal<L::State>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Create instance `name` in the table's initial state and start its task.
    ///
    /// # Errors
    ///
    /// [`ScootError::DuplicateInstance`] if `name` is already running.
    pub fn spawn(&self, name: &str, logic: L) -> Result<MachineHandle<L>, ScootError> {
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(self.table.initial());
        let handle = MachineHandle::new(name, mailbox_tx, state_rx);

        {
            let mut instances = lock(&self.instances);
            if instances.contains_key(name) {
                return Err(ScootError::DuplicateInstance(name.to_string()));
            }
            instances.insert(name.to_string(), handle.clone());
        }

        let machine = Machine::new(name, logic, Arc::clone(&self.table));
        info!(kind = self.kind, machine = name, state = ?machine.state(), "instance created");
        tokio::spawn(run(
            machine,
            mailbox_rx,
            handle.clone(),
            state_tx,
            Arc::clone(&self.instances),
            self.journal.clone(),
        ));
        Ok(handle)
    }

    /// Queue `trigger` for instance `name`.
    ///
    /// # Errors
    ///
    /// [`ScootError::UnknownInstance`] if no such instance is running.
    pub fn send(&self, name: &str, trigger: L::Trigger) -> Result<(), ScootError> {
        let handle = self
            .handle(name)
            .ok_or_else(|| ScootError::UnknownInstance(name.to_string()))?;
        handle.send(trigger)
    }

    pub fn handle(&self, name: &str) -> Option<MachineHandle<L>> {
        lock(&self.instances).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.instances).contains_key(name)
    }

    /// Names of the running instances, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.instances).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        lock(&self.instances).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every instance without running termination hooks.
    pub fn shutdown(&self) {
        let drained: Vec<_> = lock(&self.instances).drain().collect();
        for (name, handle) in drained {
            debug!(kind = self.kind, machine = %name, "stopping instance");
            handle.stop();
        }
    }
}

async fn run<L: Logic>(
    mut machine: Machine<L>,
    mut mailbox: mpsc::UnboundedReceiver<Signal<L::Trigger>>,
    handle: MachineHandle<L>,
    state_tx: watch::Sender<L::State>,
    instances: Instances<L>,
    journal: Option<Journal<L::State>>,
) {
    while let Some(signal) = mailbox.recv().await {
        let records = match signal {
            Signal::Trigger(trigger) => machine.handle_trigger(trigger, &handle),
            Signal::Timer {
                name,
                id,
                epoch,
                trigger,
            } => {
                if !machine.accept_timer(name, id, epoch) {
                    continue;
                }
                machine.handle_trigger(trigger, &handle)
            }
            Signal::Stop => break,
        };

        if let Some(journal) = &journal {
            for record in records {
                let _ = journal.send(record);
            }
        }
        // A terminal state becomes visible only after the instance is gone.
        if machine.is_terminal() {
            retire(&mut machine, &instances);
            state_tx.send_replace(machine.state());
            break;
        }
        state_tx.send_replace(machine.state());
    }

    machine.cancel_timers();
    let mut dropped = 0usize;
    while mailbox.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!(machine = machine.name(), dropped, "instance stopped with queued signals");
    }
}

fn retire<L: Logic>(machine: &mut Machine<L>, instances: &Instances<L>) {
    let mut guard = lock(instances);
    guard.remove(machine.name());
    machine.logic_mut().on_terminate();
    drop(guard);
    info!(machine = machine.name(), state = ?machine.state(), "instance retired");
}
