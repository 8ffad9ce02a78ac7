//! Dispatch server: the `toServer` subscriber.
//!
//! Every decoded command is mapped to `(session key, trigger)`.  A
//! `phone_location` opens a session; everything else goes to the session of
//! its key or is logged and dropped.

use scoot_kernel::{Engine, Journal};
use scoot_middleware::{CommandHandler, EventBus, Topic, pump};
use scoot_types::{Command, FleetMemberId};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dispatch::{DispatchSession, DispatchState, DispatchTrigger, dispatch_table};
use crate::pricing::Pricing;
use crate::registry::{FleetBook, SessionRegistry};

#[derive(Clone)]
pub struct DispatchServer {
    bus: EventBus,
    book: FleetBook,
    registry: SessionRegistry,
    pricing: Pricing,
}

impl DispatchServer {
    pub fn new(
        bus: EventBus,
        roster: impl IntoIterator<Item = FleetMemberId>,
        pricing: Pricing,
    ) -> Self {
        Self {
            bus,
            book: FleetBook::new(roster),
            registry: SessionRegistry::new(Engine::new("dispatch", dispatch_table())),
            pricing,
        }
    }

    /// Record every session transition into `journal`.  Call before any
    /// session is opened.
    pub fn with_journal(mut self, journal: Journal<DispatchState>) -> Self {
        let engine = Engine::new("dispatch", dispatch_table()).with_journal(journal);
        self.registry = SessionRegistry::new(engine);
        self
    }

    pub fn book(&self) -> &FleetBook {
        &self.book
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Apply one inbound command.
    pub fn handle_command(&self, command: Command) {
        let name = command.name();
        let Some((key, trigger)) = DispatchTrigger::from_command(command) else {
            debug!(command = name, "not addressed to the server, ignored");
            return;
        };

        if matches!(trigger, DispatchTrigger::PhoneLocation { .. }) {
            let session =
                DispatchSession::new(
                    key.as_str(),
                    self.bus.clone(),
                    self.book.clone(),
                    self.pricing,
                );
            if let Err(e) = self.registry.open(&key, session) {
                warn!(session = %key, error = %e, "trip start rejected");
                return;
            }
        }

        if let Err(e) = self.registry.deliver(&key, trigger) {
            warn!(session = %key, command = name, error = %e, "command dropped");
        }
    }

    /// Subscribe to `toServer` and serve it on a background task.
    ///
    /// The subscription exists when this returns, so commands published
    /// afterwards are never missed.
    pub fn listen(&self) -> JoinHandle<()> {
        let receiver = self.bus.subscribe_to(Topic::ToServer);
        let mut server = self.clone();
        tokio::spawn(async move { pump(receiver, &mut server).await })
    }

    /// Stop every live session.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

impl CommandHandler for DispatchServer {
    fn handle(&mut self, _topic: Topic, command: Command) {
        self.handle_command(command);
    }
}
