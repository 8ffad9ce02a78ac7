//! `scoot-middleware` – message plumbing
//!
//! Moves protocol frames between the dispatch server, riders and fleet
//! members without caring about what the commands mean.
//!
//! # Modules
//!
//! - [`bus`] – Two-topic (`toServer` / `toClients`) publish/subscribe bus
//!   built on Tokio broadcast channels.
//! - [`router`] – Frame decoding, error classification and the
//!   [`CommandHandler`] pump every actor runs.
//! - [`ws_bridge`] – WebSocket adapter that exposes both topics to external
//!   clients as JSON.

pub mod bus;
pub mod router;
pub mod ws_bridge;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use router::{CommandHandler, decode, pump, route};
pub use ws_bridge::WsBridge;
