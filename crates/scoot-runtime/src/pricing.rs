//! Placeholder route and fare computation.
//!
//! Distance: `(|dx| + |dy|) / 2` between two locations.
//! Fare: `distance * rate`.

use scoot_types::Location;

/// Default price per distance unit.
pub const PRICE_RATE: f64 = 0.05;

/// A quoted route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub distance: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub rate: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self { rate: PRICE_RATE }
    }
}

impl Pricing {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }

    pub fn distance(from: Location, to: Location) -> f64 {
        from.half_manhattan(&to)
    }

    pub fn fare(&self, distance: f64) -> f64 {
        distance * self.rate
    }

    /// Quote the route `from → to`.  Also used for the remaining part of a
    /// trip, with the rider's current location as `from`.
    pub fn quote(&self, from: Location, to: Location) -> Quote {
        let distance = Self::distance(from, to);
        Quote {
            distance,
            price: self.fare(distance),
        }
    }
}
