//! `scoot-hal` – positioning hardware abstraction
//!
//! Everything the protocol needs to know about the physical world is a
//! [`Location`][scoot_types::Location] reading.
//!
//! # Modules
//!
//! - [`positioning`] – the [`LocationSource`] trait with fixed, random and
//!   linear-trajectory implementations.
//! - [`sim`] – [`SimFleet`], a builder for simulated scooter rosters.

pub mod positioning;
pub mod sim;

pub use positioning::{FixedLocation, LinearTrajectory, LocationSource, RandomArea};
pub use sim::{SimFleet, SimMember};
