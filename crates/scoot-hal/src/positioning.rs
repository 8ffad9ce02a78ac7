//! Generic [`LocationSource`] trait for anything that can report where a
//! rider or a scooter currently is.
//!
//! The state machines only ever talk to the trait, so a GPS driver, a replay
//! file or one of the simulated sources below can be swapped in without
//! touching protocol logic.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scoot_types::Location;

/// A producer of [`Location`] readings.
pub trait LocationSource: Send {
    /// Take a fresh reading.  Readings are immutable values; the source may
    /// move between two calls.
    fn read(&mut self) -> Location;

    /// Inform the source that its carrier is now travelling to
    /// `destination`.  Stationary and random sources ignore this.
    fn head_to(&mut self, _destination: Location) {}
}

impl LocationSource for Box<dyn LocationSource> {
    fn read(&mut self) -> Location {
        (**self).read()
    }

    fn head_to(&mut self, destination: Location) {
        (**self).head_to(destination)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fixed
// ────────────────────────────────────────────────────────────────────────────

/// Always reports the same location.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Location);

impl LocationSource for FixedLocation {
    fn read(&mut self) -> Location {
        self.0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Random area
// ────────────────────────────────────────────────────────────────────────────

/// Reports a uniformly random point of the square `[0, size) × [0, size)` on
/// every read.
pub struct RandomArea {
    rng: StdRng,
    size: f64,
}

impl RandomArea {
    /// `seed = None` draws from OS entropy.
    pub fn new(seed: Option<u64>, size: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            size: size.max(f64::MIN_POSITIVE),
        }
    }
}

impl LocationSource for RandomArea {
    fn read(&mut self) -> Location {
        Location::new(
            self.rng.gen_range(0.0..self.size),
            self.rng.gen_range(0.0..self.size),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Linear trajectory
// ────────────────────────────────────────────────────────────────────────────

/// Moves toward a target by at most `step` per axis on every read, landing
/// exactly on the target.
///
/// Without a target the position stays put.
#[derive(Debug, Clone)]
pub struct LinearTrajectory {
    current: Location,
    target: Option<Location>,
    step: f64,
}

impl LinearTrajectory {
    pub fn new(start: Location, step: f64) -> Self {
        Self {
            current: start,
            target: None,
            step: step.abs(),
        }
    }

    /// Builder form of [`LocationSource::head_to`].
    pub fn toward(mut self, target: Location) -> Self {
        self.target = Some(target);
        self
    }

    fn advance(from: f64, to: f64, step: f64) -> f64 {
        let delta = to - from;
        if delta.abs() <= step { to } else { from + step * delta.signum() }
    }
}

impl LocationSource for LinearTrajectory {
    fn read(&mut self) -> Location {
        let reading = self.current;
        if let Some(target) = self.target {
            self.current = Location::new(
                Self::advance(self.current.x(), target.x(), self.step),
                Self::advance(self.current.y(), target.y(), self.step),
            );
        }
        reading
    }

    fn head_to(&mut self, destination: Location) {
        self.target = Some(destination);
    }
}
