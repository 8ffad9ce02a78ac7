//! In-process simulated fleet for tests and demos without real scooters.
//!
//! [`SimFleet`] builds the roster a fleet service starts with: one stable
//! identifier plus one [`LocationSource`] per scooter.
//!
//! # Example
//!
//! ```rust
//! use scoot_hal::sim::SimFleet;
//! use scoot_hal::positioning::FixedLocation;
//! use scoot_types::Location;
//!
//! let roster = SimFleet::builder()
//!     .with_random_members(3, 20.0, Some(1))
//!     .with_member("escooter_depot", FixedLocation(Location::new(0.0, 0.0)))
//!     .build();
//!
//! assert_eq!(roster.len(), 4);
//! assert_eq!(roster[0].id, "escooter_0");
//! ```

use scoot_types::FleetMemberId;

use crate::positioning::{LocationSource, RandomArea};

/// Prefix of generated member identifiers.
pub const MEMBER_PREFIX: &str = "escooter_";

/// One simulated scooter.
pub struct SimMember {
    pub id: FleetMemberId,
    pub source: Box<dyn LocationSource>,
}

impl std::fmt::Debug for SimMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimMember").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Builder for a simulated fleet roster.
#[derive(Default)]
pub struct SimFleet {
    members: Vec<SimMember>,
}

impl SimFleet {
    pub fn builder() -> Self {
        Self::default()
    }

    /// Add a scooter with an explicit location source.
    pub fn with_member(
        mut self,
        id: impl Into<FleetMemberId>,
        source: impl LocationSource + 'static,
    ) -> Self {
        self.members.push(SimMember {
            id: id.into(),
            source: Box::new(source),
        });
        self
    }

    /// Add `count` scooters named `escooter_{i}` that report random points of
    /// a `size × size` area.  Member `i` is seeded with `seed + i`.
    pub fn with_random_members(mut self, count: usize, size: f64, seed: Option<u64>) -> Self {
        let offset = self.members.len();
        for i in 0..count {
            let index = offset + i;
            let member_seed = seed.map(|s| s.wrapping_add(index as u64));
            self.members.push(SimMember {
                id: format!("{MEMBER_PREFIX}{index}"),
                source: Box::new(RandomArea::new(member_seed, size)),
            });
        }
        self
    }

    /// Finish the roster.  Later entries with an already used identifier are
    /// dropped.
    pub fn build(self) -> Vec<SimMember> {
        let mut seen = std::collections::HashSet::new();
        self.members
            .into_iter()
            .filter(|m| {
                let fresh = seen.insert(m.id.clone());
                if !fresh {
                    tracing::warn!(member = %m.id, "duplicate fleet member dropped");
                }
                fresh
            })
            .collect()
    }
}
