//! Server-side ownership: the [`FleetBook`] and the [`SessionRegistry`].
//!
//! The Fleet Book is the only state shared between dispatch sessions.  It
//! records, per fleet member, which session (if any) has claimed it.  Every
//! access takes one mutex and never awaits while holding it.
//!
//! The Session Registry maps a rider's session key to its running dispatch
//! session.  Sessions are created on first contact and removed by the
//! engine when they reach `Final`; the removal and the release of the
//! session's claims happen in the same critical section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use scoot_kernel::{Engine, MachineHandle};
use scoot_types::{FleetMemberId, ScootError, SessionKey};
use tracing::{info, warn};

use crate::dispatch::{DispatchSession, DispatchTrigger};

// ────────────────────────────────────────────────────────────────────────────
// Fleet Book
// ────────────────────────────────────────────────────────────────────────────

/// Result of [`FleetBook::try_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The member is now (or already was) held by the requesting session.
    Granted,
    /// Another session holds the member.
    HeldBy(SessionKey),
    /// The member is not part of the roster.
    NotInRoster,
}

/// Busy flags of every fleet member the server knows about.
#[derive(Clone, Default)]
pub struct FleetBook {
    claims: Arc<Mutex<HashMap<FleetMemberId, Option<SessionKey>>>>,
}

impl FleetBook {
    pub fn new(roster: impl IntoIterator<Item = FleetMemberId>) -> Self {
        let claims = roster.into_iter().map(|id| (id, None)).collect();
        Self {
            claims: Arc::new(Mutex::new(claims)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FleetMemberId, Option<SessionKey>>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every member id, sorted.
    pub fn roster(&self) -> Vec<FleetMemberId> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, member: &str) -> bool {
        self.lock().contains_key(member)
    }

    /// Session currently holding `member`.
    pub fn holder(&self, member: &str) -> Option<SessionKey> {
        self.lock().get(member).cloned().flatten()
    }

    pub fn is_busy(&self, member: &str) -> bool {
        self.holder(member).is_some()
    }

    /// Claim `member` for session `key`.
    pub fn try_claim(&self, member: &str, key: &str) -> Claim {
        let mut claims = self.lock();
        let Some(slot) = claims.get_mut(member) else {
            return Claim::NotInRoster;
        };
        if let Some(holder) = slot.as_ref().filter(|h| h.as_str() != key) {
            return Claim::HeldBy(holder.clone());
        }
        *slot = Some(key.to_string());
        Claim::Granted
    }

    /// Release every member held by `key`.  Returns the released ids.
    pub fn release_all(&self, key: &str) -> Vec<FleetMemberId> {
        let mut released = Vec::new();
        for (member, slot) in self.lock().iter_mut() {
            if slot.as_deref() == Some(key) {
                *slot = None;
                released.push(member.clone());
            }
        }
        released.sort();
        released
    }

    /// `(member, holder)` pairs, sorted by member.
    pub fn snapshot(&self) -> Vec<(FleetMemberId, Option<SessionKey>)> {
        let mut rows: Vec<_> = self.lock().iter().map(|(m, h)| (m.clone(), h.clone())).collect();
        rows.sort();
        rows
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session Registry
// ────────────────────────────────────────────────────────────────────────────

/// Live dispatch sessions, keyed by rider name.
#[derive(Clone)]
pub struct SessionRegistry {
    engine: Engine<DispatchSession>,
}

impl SessionRegistry {
    pub fn new(engine: Engine<DispatchSession>) -> Self {
        Self { engine }
    }

    /// Create the session for `key`.
    ///
    /// # Errors
    ///
    /// [`ScootError::DuplicateSessionStart`] while a session for `key` is
    /// still active.
    pub fn open(
        &self,
        key: &str,
        session: DispatchSession,
    ) -> Result<MachineHandle<DispatchSession>, ScootError> {
        match self.engine.spawn(key, session) {
            Ok(handle) => {
                info!(session = key, "dispatch session opened");
                Ok(handle)
            }
            Err(ScootError::DuplicateInstance(key)) => Err(ScootError::DuplicateSessionStart(key)),
            Err(e) => Err(e),
        }
    }

    /// Deliver `trigger` to the session of `key`.
    ///
    /// # Errors
    ///
    /// [`ScootError::UnknownInstance`] if no such session is active.
    pub fn deliver(&self, key: &str, trigger: DispatchTrigger) -> Result<(), ScootError> {
        self.engine.send(key, trigger)
    }

    pub fn handle(&self, key: &str) -> Option<MachineHandle<DispatchSession>> {
        self.engine.handle(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.engine.contains(key)
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.engine.names()
    }

    pub fn len(&self) -> usize {
        self.engine.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    /// Stop every session without releasing claims.
    pub fn shutdown(&self) {
        if !self.engine.is_empty() {
            warn!(sessions = self.engine.len(), "stopping active dispatch sessions");
        }
        self.engine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> FleetBook {
        FleetBook::new(["escooter_0".to_string(), "escooter_1".to_string()])
    }

    #[test]
    fn claim_is_exclusive() {
        let book = book();
        assert_eq!(book.try_claim("escooter_0", "alice"), Claim::Granted);
        assert_eq!(book.try_claim("escooter_0", "bob"), Claim::HeldBy("alice".into()));
        assert_eq!(book.holder("escooter_0").as_deref(), Some("alice"));
        assert!(!book.is_busy("escooter_1"));
    }

    #[test]
    fn reclaim_by_the_holder_is_granted() {
        let book = book();
        assert_eq!(book.try_claim("escooter_1", "alice"), Claim::Granted);
        assert_eq!(book.try_claim("escooter_1", "alice"), Claim::Granted);
    }

    #[test]
    fn unknown_member_cannot_be_claimed() {
        assert_eq!(book().try_claim("escooter_9", "alice"), Claim::NotInRoster);
    }

    #[test]
    fn release_all_frees_only_the_sessions_members() {
        let book = book();
        book.try_claim("escooter_0", "alice");
        book.try_claim("escooter_1", "bob");

        assert_eq!(book.release_all("alice"), vec!["escooter_0".to_string()]);
        assert_eq!(book.holder("escooter_0"), None);
        assert_eq!(book.holder("escooter_1").as_deref(), Some("bob"));
        assert!(book.release_all("alice").is_empty());
    }

    #[test]
    fn roster_and_snapshot_are_sorted() {
        let book = FleetBook::new(["b".to_string(), "a".to_string()]);
        book.try_claim("b", "k");
        assert_eq!(book.roster(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            book.snapshot(),
            vec![("a".to_string(), None), ("b".to_string(), Some("k".to_string()))]
        );
    }
}
