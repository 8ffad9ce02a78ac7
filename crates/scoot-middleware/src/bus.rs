//! Headless, topic-based publish/subscribe event bus.
//!
//! Every subscriber owns an unbounded [`tokio::sync::mpsc`] lane, and a
//! publish clones the frame into each live lane.  Publishing never blocks and
//! never drops a frame for a slow subscriber: an effect may publish one query
//! per fleet member in a single burst and every member still sees it.
//!
//! # Topics
//!
//! Traffic is partitioned into the two [`Topic`] lanes of the protocol:
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::ToServer`] | rider → server and fleet → server commands |
//! | [`Topic::ToClients`] | server → rider and server → fleet commands |
//!
//! Frames carry raw bytes; decoding is done by the receiving actor through
//! [`crate::router`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use scoot_types::{Command, Event, ScootError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default backlog (frames queued for one subscriber) above which the bus
/// warns about a slow consumer.
const DEFAULT_CAPACITY: usize = 256;

/// The two logical channels every actor publishes to or subscribes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Commands addressed to the dispatch server.
    ToServer,
    /// Commands addressed to riders and fleet members.
    ToClients,
}

impl Topic {
    /// Wire name of the topic, as used by external transports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ToServer => "toServer",
            Topic::ToClients => "toClients",
        }
    }

    /// Parse a wire name.  Returns `None` for anything but the two channels.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "toServer" => Some(Topic::ToServer),
            "toClients" => Some(Topic::ToClients),
            _ => None,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Lane {
    tx: mpsc::UnboundedSender<Event>,
    backlog: Arc<AtomicUsize>,
}

type Lanes = Arc<Mutex<Vec<Lane>>>;

/// Shared event bus. Clone it cheaply – all clones share the same
/// subscriber lists.
#[derive(Clone)]
pub struct EventBus {
    to_server: Lanes,
    to_clients: Lanes,
    capacity: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("to_server", &self.receiver_count(Topic::ToServer))
            .field("to_clients", &self.receiver_count(Topic::ToClients))
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl EventBus {
    /// Create a new bus.
    ///
    /// `capacity` is the per-subscriber backlog that triggers a slow-consumer
    /// warning.  Frames beyond it are still queued.
    pub fn new(capacity: usize) -> Self {
        Self {
            to_server: Lanes::default(),
            to_clients: Lanes::default(),
            capacity: capacity.max(1),
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of subscribers that were handed the event, or
    /// [`ScootError::Channel`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, ScootError> {
        let mut lanes = self.lanes(topic).lock().unwrap_or_else(PoisonError::into_inner);
        lanes.retain(|lane| !lane.tx.is_closed());

        let mut delivered = 0;
        for lane in lanes.iter() {
            let queued = lane.backlog.fetch_add(1, Ordering::Relaxed) + 1;
            if lane.tx.send(event.clone()).is_err() {
                lane.backlog.fetch_sub(1, Ordering::Relaxed);
                continue;
            }
            if queued == self.capacity {
                warn!(topic = %topic, backlog = queued, "subscriber falling behind");
            }
            delivered += 1;
        }

        if delivered == 0 {
            return Err(ScootError::Channel(format!("No subscribers for topic {topic}")));
        }
        Ok(delivered)
    }

    /// Encode `command` and publish it to `topic`.
    ///
    /// Best-effort: a missing subscriber is logged at debug level and not
    /// reported, because a command nobody listens to is a normal condition
    /// while actors start up or shut down.
    pub fn send_command(
        &self,
        topic: Topic,
        source: &str,
        command: &Command,
    ) -> Result<(), ScootError> {
        let event = Event::command(source, command)?;
        if let Err(e) = self.publish_to(topic, event) {
            debug!(topic = %topic, command = command.name(), error = %e, "command dropped");
        }
        Ok(())
    }

    /// Subscribe to a specific [`Topic`] channel.
    ///
    /// The receiver sees every frame published after this call.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        let (tx, receiver) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        self.lanes(topic)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Lane { tx, backlog: backlog.clone() });
        TopicReceiver {
            topic,
            receiver,
            backlog,
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn receiver_count(&self, topic: Topic) -> usize {
        self.lanes(topic)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|lane| !lane.tx.is_closed())
            .count()
    }

    fn lanes(&self, topic: Topic) -> &Lanes {
        match topic {
            Topic::ToServer => &self.to_server,
            Topic::ToClients => &self.to_clients,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].  Dropping it unsubscribes.
pub struct TopicReceiver {
    topic: Topic,
    receiver: mpsc::UnboundedReceiver<Event>,
    backlog: Arc<AtomicUsize>,
}

impl TopicReceiver {
    /// Wait for the next frame on this topic.
    ///
    /// Returns [`ScootError::Channel`] once every [`EventBus`] clone has been
    /// dropped and the queued frames are drained.
    pub async fn recv(&mut self) -> Result<Event, ScootError> {
        match self.receiver.recv().await {
            Some(event) => {
                self.backlog.fetch_sub(1, Ordering::Relaxed);
                Ok(event)
            }
            None => Err(ScootError::Channel(format!("topic {} closed", self.topic))),
        }
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, mpsc::error::TryRecvError> {
        let event = self.receiver.try_recv()?;
        self.backlog.fetch_sub(1, Ordering::Relaxed);
        Ok(event)
    }

    /// Frames queued for this receiver and not yet taken.
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
