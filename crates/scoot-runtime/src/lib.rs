//! `scoot-runtime` – The scooter dispatch protocol
//!
//! Every actor of the protocol is a state machine hosted by
//! [`scoot_kernel::Engine`] and fed from the [`scoot_middleware`] bus.
//!
//! # Modules
//!
//! - [`dispatch`] – [`DispatchSession`][dispatch::DispatchSession]: the
//!   server's per-rider machine.  Fans `get_location` out to the fleet,
//!   collects exactly one reply per member, publishes the candidate list,
//!   claims the chosen scooter, quotes the route and closes the trip.
//! - [`server`] – [`DispatchServer`][server::DispatchServer]: the `toServer`
//!   subscriber that opens sessions and routes commands to them by key.
//! - [`registry`] – [`FleetBook`][registry::FleetBook] (which session holds
//!   which scooter) and [`SessionRegistry`][registry::SessionRegistry].
//! - [`fleet`] – [`FleetMember`][fleet::FleetMember] and the
//!   [`FleetService`][fleet::FleetService] hosting one machine per scooter.
//! - [`rider`] – [`RiderSession`][rider::RiderSession] and the
//!   [`RiderApp`][rider::RiderApp] hosting one machine per phone.
//! - [`decision`] – [`DecisionSource`][decision::DecisionSource]: the
//!   questions a rider answers, plus a scripted implementation.
//! - [`pricing`] – half-Manhattan distance and flat-rate fares.
//! - [`simulation`] – [`Simulation`][simulation::Simulation]: everything
//!   above wired onto one bus.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod decision;
pub mod dispatch;
pub mod fleet;
pub mod pricing;
pub mod registry;
pub mod rider;
pub mod server;
pub mod simulation;
pub mod telemetry;

pub use decision::{CandidateOffer, DecisionSource, MemberPick, ScriptedDecisions};
pub use dispatch::{DispatchSession, DispatchState, DispatchTrigger};
pub use fleet::{FleetService, FleetState, FleetTiming};
pub use pricing::{PRICE_RATE, Pricing, Quote};
pub use registry::{Claim, FleetBook, SessionRegistry};
pub use rider::{RiderApp, RiderDisplay, RiderHandle, RiderState, RiderTiming};
pub use server::DispatchServer;
pub use simulation::{Journals, Simulation, SimulationConfig};
