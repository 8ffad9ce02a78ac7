//! Rider decision sources.
//!
//! The rider's screen is reduced to a [`DecisionSource`]: whenever the rider
//! state machine needs the user, it spawns one of these calls and feeds the
//! answer back into the instance as a trigger.  The CLI implements the trait
//! with terminal prompts; tests and simulations use [`ScriptedDecisions`].

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use scoot_types::{FleetMemberId, Location};

/// One scooter as offered to the rider.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateOffer {
    pub id: FleetMemberId,
    pub location: Location,
    pub busy: bool,
    /// Distance to the rider as computed by the server.
    pub distance: f64,
}

/// Answers the questions a rider would answer on their phone.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// Pick one of `offers`, presented in server order.  `None` leaves the
    /// rider waiting for a new offer.
    async fn choose_member(&self, offers: &[CandidateOffer]) -> Option<FleetMemberId>;

    /// Where the rider wants to go from `from`.
    async fn choose_destination(&self, from: Location) -> Location;

    /// Accept or decline a quoted route.
    async fn confirm_route(&self, distance: f64, price: f64) -> bool;
}

// ────────────────────────────────────────────────────────────────────────────
// Scripted
// ────────────────────────────────────────────────────────────────────────────

/// How [`ScriptedDecisions`] picks a scooter.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberPick {
    /// First offer in server order.
    First,
    /// Smallest distance; ties keep server order.
    Nearest,
    /// A specific scooter, if offered.
    Named(FleetMemberId),
    /// Never pick.
    Nobody,
}

/// Deterministic decisions for tests and simulations.
///
/// Route confirmations are taken from a script; once it runs out every
/// route is confirmed.
#[derive(Debug)]
pub struct ScriptedDecisions {
    pick: MemberPick,
    destination: Location,
    confirmations: Mutex<VecDeque<bool>>,
}

impl ScriptedDecisions {
    pub fn new(destination: Location) -> Self {
        Self {
            pick: MemberPick::Nearest,
            destination,
            confirmations: Mutex::new(VecDeque::new()),
        }
    }

    pub fn picking(mut self, pick: MemberPick) -> Self {
        self.pick = pick;
        self
    }

    /// Decline the first `count` quotes.
    pub fn declining(self, count: usize) -> Self {
        self.with_confirmations(std::iter::repeat_n(false, count))
    }

    /// Answer the next quotes with `answers`, in order.
    pub fn with_confirmations(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.confirmations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(answers);
        self
    }
}

#[async_trait]
impl DecisionSource for ScriptedDecisions {
    async fn choose_member(&self, offers: &[CandidateOffer]) -> Option<FleetMemberId> {
        match &self.pick {
            MemberPick::First => offers.first().map(|o| o.id.clone()),
            MemberPick::Nearest => offers
                .iter()
                .enumerate()
                .min_by(|(ia, a), (ib, b)| a.distance.total_cmp(&b.distance).then(ia.cmp(ib)))
                .map(|(_, o)| o.id.clone()),
            MemberPick::Named(id) => offers.iter().find(|o| &o.id == id).map(|o| o.id.clone()),
            MemberPick::Nobody => None,
        }
    }

    async fn choose_destination(&self, _from: Location) -> Location {
        self.destination
    }

    async fn confirm_route(&self, _distance: f64, _price: f64) -> bool {
        self.confirmations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(true)
    }
}
