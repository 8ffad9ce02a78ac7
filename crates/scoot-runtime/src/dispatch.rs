//! Dispatch session: the server's side of one rider's trip.
//!
//! ```text
//! WaitPhoneRequest ──phone_location──▶ WaitingFleetLocations ──(all replies)──▶ SearchingNearby
//!        │ (empty fleet)                    ▲  receive_escooter_location          │ publish_candidates
//!        └──────────────────────────────────┼─────────────────────────────────────▶ AwaitingSelection
//!                                                                                 │ selected_escooter + claim
//! AwaitingRouteConfirmation ◀──exchange_destination── AwaitingDestination ◀──member_claimed
//!        │ route_confirmed(true)                          ▲
//!        │                     route_confirmed(false) ────┘
//!        ▼
//!    Traveling ──destination_reached / user_out_of_bounds──▶ Final
//! ```
//!
//! `user_out_of_bounds` also ends the session from any waiting state before
//! `Traveling`, so a rider who gives up frees its key and any claimed member.
//!
//! One instance per session key.  The fan-in counter is private to the
//! instance; the only shared state it touches is the [`FleetBook`].

use std::collections::HashSet;

use scoot_kernel::{Context, Logic, TransitionTable, Trigger};
use scoot_middleware::{EventBus, Topic};
use scoot_types::{Command, EscooterInfo, FleetMemberId, Location, SessionKey};
use tracing::{debug, error, info, warn};

use crate::decision::CandidateOffer;
use crate::pricing::{Pricing, Quote};
use crate::registry::{Claim, FleetBook};

const SOURCE: &str = "scoot-runtime::dispatch";

type Ctx = Context<DispatchSession>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchState {
    WaitPhoneRequest,
    WaitingFleetLocations,
    SearchingNearby,
    AwaitingSelection,
    AwaitingDestination,
    AwaitingRouteConfirmation,
    Traveling,
    Final,
}

/// Everything a dispatch session reacts to.  All but the two raised
/// triggers (`publish_candidates`, `member_claimed`) come off `toServer`.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchTrigger {
    PhoneLocation {
        location: Location,
    },
    FleetLocation {
        member: FleetMemberId,
        location: Location,
        busy: bool,
    },
    PublishCandidates,
    SelectedEscooter {
        member: FleetMemberId,
    },
    MemberClaimed,
    ExchangeDestination {
        location: Location,
        destination: Location,
    },
    RouteConfirmed {
        confirm: bool,
        price: Option<f64>,
    },
    AskPrice {
        location: Location,
    },
    AskDistance {
        location: Location,
    },
    EscooterArrived {
        member: FleetMemberId,
    },
    DestinationReached {
        member: Option<FleetMemberId>,
    },
    UserOutOfBounds,
}

impl Trigger for DispatchTrigger {
    fn name(&self) -> &'static str {
        match self {
            DispatchTrigger::PhoneLocation { .. } => "phone_location",
            DispatchTrigger::FleetLocation { .. } => "receive_escooter_location",
            DispatchTrigger::PublishCandidates => "publish_candidates",
            DispatchTrigger::SelectedEscooter { .. } => "selected_escooter",
            DispatchTrigger::MemberClaimed => "member_claimed",
            DispatchTrigger::ExchangeDestination { .. } => "exchange_destination",
            DispatchTrigger::RouteConfirmed { .. } => "route_confirmed",
            DispatchTrigger::AskPrice { .. } => "ask_price",
            DispatchTrigger::AskDistance { .. } => "ask_distance",
            DispatchTrigger::EscooterArrived { .. } => "escooter_arrived",
            DispatchTrigger::DestinationReached { .. } => "destination_reached",
            DispatchTrigger::UserOutOfBounds => "user_out_of_bounds",
        }
    }
}

impl DispatchTrigger {
    /// Split a `toServer` command into its session key and trigger.
    ///
    /// Returns `None` for commands the server never receives.
    pub fn from_command(command: Command) -> Option<(SessionKey, DispatchTrigger)> {
        let routed = match command {
            Command::PhoneLocation {
                phone_name,
                location,
            } => (phone_name, DispatchTrigger::PhoneLocation { location }),
            Command::ReceiveEscooterLocation {
                escooter_id,
                server_name,
                location,
                escooter_busy,
            } => (
                server_name,
                DispatchTrigger::FleetLocation {
                    member: escooter_id,
                    location,
                    busy: escooter_busy,
                },
            ),
            Command::SelectedEscooter {
                phone_name,
                escooter,
            } => (phone_name, DispatchTrigger::SelectedEscooter { member: escooter }),
            Command::ExchangeDestination {
                phone_name,
                location,
                destination,
            } => (
                phone_name,
                DispatchTrigger::ExchangeDestination {
                    location,
                    destination,
                },
            ),
            Command::RouteConfirmed {
                phone_name,
                confirm,
                price,
            } => (phone_name, DispatchTrigger::RouteConfirmed { confirm, price }),
            Command::AskPrice {
                phone_name,
                location,
            } => (phone_name, DispatchTrigger::AskPrice { location }),
            Command::AskDistance {
                phone_name,
                location,
            } => (phone_name, DispatchTrigger::AskDistance { location }),
            Command::EscooterArrived {
                escooter_name,
                server_name,
            } => (
                server_name,
                DispatchTrigger::EscooterArrived {
                    member: escooter_name,
                },
            ),
            Command::UserOutOfBounds { phone_name } => {
                (phone_name, DispatchTrigger::UserOutOfBounds)
            }
            Command::DestinationReached {
                phone_name,
                escooter,
            } => (phone_name, DispatchTrigger::DestinationReached { member: escooter }),
            Command::GetLocation { .. }
            | Command::EscootersList { .. }
            | Command::SuggestRoute { .. }
            | Command::ReceiveRouteDetails { .. }
            | Command::PriceRemaining { .. }
            | Command::DistanceRemaining { .. } => return None,
        };
        Some(routed)
    }
}

/// Outcomes of the dispatch session's choice transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchChoice {
    FanOut,
    EmptyFleet,
    Pending,
    Complete,
    Ignored,
    Confirm,
    Decline,
}

/// A fleet member's reply collected during fan-in.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: FleetMemberId,
    pub location: Location,
    pub busy: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Session data
// ────────────────────────────────────────────────────────────────────────────

pub struct DispatchSession {
    key: SessionKey,
    bus: EventBus,
    book: FleetBook,
    pricing: Pricing,
    roster: Vec<FleetMemberId>,
    rider_location: Option<Location>,
    candidates: Vec<Candidate>,
    responded: HashSet<FleetMemberId>,
    responses_expected: usize,
    responses_received: usize,
    selected: Option<FleetMemberId>,
    destination: Option<Location>,
    quote: Option<Quote>,
    declines: u32,
}

impl DispatchSession {
    /// New session for `key`.  The fan-out targets every member of `book`.
    pub fn new(
        key: impl Into<SessionKey>,
        bus: EventBus,
        book: FleetBook,
        pricing: Pricing,
    ) -> Self {
        let roster = book.roster();
        Self {
            key: key.into(),
            bus,
            book,
            pricing,
            roster,
            rider_location: None,
            candidates: Vec::new(),
            responded: HashSet::new(),
            responses_expected: 0,
            responses_received: 0,
            selected: None,
            destination: None,
            quote: None,
            declines: 0,
        }
    }

    fn publish(&self, command: Command) {
        if let Err(e) = self.bus.send_command(Topic::ToClients, SOURCE, &command) {
            error!(session = %self.key, command = command.name(), error = %e, "publish failed");
        }
    }

    /// Non-busy candidates with their distance to the rider, in reply order.
    fn offers(&self) -> Vec<CandidateOffer> {
        let Some(rider) = self.rider_location else {
            return Vec::new();
        };
        self.candidates
            .iter()
            .filter(|c| !c.busy && !self.book.is_busy(&c.id))
            .map(|c| CandidateOffer {
                id: c.id.clone(),
                location: c.location,
                busy: false,
                distance: Pricing::distance(rider, c.location),
            })
            .collect()
    }

    fn publish_offers(&self) {
        let offers = self.offers();
        info!(
            session = %self.key,
            offered = offers.len(),
            candidates = self.candidates.len(),
            "publishing candidate list"
        );
        let (escooters, distance) = offers
            .into_iter()
            .map(|o| {
                (
                    EscooterInfo {
                        id: o.id,
                        location: o.location,
                        busy: o.busy,
                    },
                    o.distance,
                )
            })
            .unzip();
        self.publish(Command::EscootersList {
            phone_name: self.key.clone(),
            escooters,
            distance,
        });
    }

    fn acknowledge_member(&self, reported: Option<&FleetMemberId>) {
        let Some(member) = self.selected.as_ref().or(reported) else {
            debug!(session = %self.key, "no fleet member to acknowledge");
            return;
        };
        self.publish(Command::DestinationReached {
            phone_name: self.key.clone(),
            escooter: Some(member.clone()),
        });
    }
}

impl Logic for DispatchSession {
    type State = DispatchState;
    type Trigger = DispatchTrigger;
    type Choice = DispatchChoice;

    fn on_terminate(&mut self) {
        let released = self.book.release_all(&self.key);
        info!(session = %self.key, released = ?released, "dispatch session closed");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Guards
// ────────────────────────────────────────────────────────────────────────────

fn fleet_size(s: &DispatchSession, _: &DispatchTrigger) -> DispatchChoice {
    if s.roster.is_empty() {
        DispatchChoice::EmptyFleet
    } else {
        DispatchChoice::FanOut
    }
}

fn fan_in(s: &DispatchSession, trigger: &DispatchTrigger) -> DispatchChoice {
    let DispatchTrigger::FleetLocation { member, .. } = trigger else {
        return DispatchChoice::Ignored;
    };
    if !s.roster.contains(member) || s.responded.contains(member) {
        DispatchChoice::Ignored
    } else if s.responses_received + 1 >= s.responses_expected {
        DispatchChoice::Complete
    } else {
        DispatchChoice::Pending
    }
}

fn confirmation(_: &DispatchSession, trigger: &DispatchTrigger) -> DispatchChoice {
    match trigger {
        DispatchTrigger::RouteConfirmed { confirm: true, .. } => DispatchChoice::Confirm,
        _ => DispatchChoice::Decline,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Effects
// ────────────────────────────────────────────────────────────────────────────

fn fan_out(s: &mut DispatchSession, trigger: &DispatchTrigger, _: &mut Ctx) {
    let DispatchTrigger::PhoneLocation { location } = trigger else {
        return;
    };
    s.rider_location = Some(*location);
    s.responses_expected = s.roster.len();
    s.responses_received = 0;
    info!(session = %s.key, location = %location, fleet = s.responses_expected, "querying fleet");
    for member in &s.roster {
        s.publish(Command::GetLocation {
            escooter_name: member.clone(),
            server_name: s.key.clone(),
            phone_location: *location,
        });
    }
}

fn skip_fan_out(s: &mut DispatchSession, trigger: &DispatchTrigger, ctx: &mut Ctx) {
    if let DispatchTrigger::PhoneLocation { location } = trigger {
        s.rider_location = Some(*location);
    }
    warn!(session = %s.key, "no fleet members known");
    ctx.raise(DispatchTrigger::PublishCandidates);
}

fn record_reply(s: &mut DispatchSession, trigger: &DispatchTrigger, _: &mut Ctx) {
    let DispatchTrigger::FleetLocation {
        member,
        location,
        busy,
    } = trigger
    else {
        return;
    };
    assert!(
        s.responses_received < s.responses_expected,
        "fan-in overflow in session {}",
        s.key
    );
    s.responded.insert(member.clone());
    s.candidates.push(Candidate {
        id: member.clone(),
        location: *location,
        busy: *busy,
    });
    s.responses_received += 1;
    debug!(
        session = %s.key,
        member = %member,
        received = s.responses_received,
        expected = s.responses_expected,
        "fleet reply"
    );
}

fn record_last_reply(s: &mut DispatchSession, trigger: &DispatchTrigger, ctx: &mut Ctx) {
    record_reply(s, trigger, ctx);
    ctx.raise(DispatchTrigger::PublishCandidates);
}

fn ignore_reply(s: &mut DispatchSession, trigger: &DispatchTrigger, _: &mut Ctx) {
    if let DispatchTrigger::FleetLocation { member, .. } = trigger {
        debug!(session = %s.key, member = %member, "duplicate or foreign fleet reply ignored");
    }
}

fn publish_candidates(s: &mut DispatchSession, _: &DispatchTrigger, _: &mut Ctx) {
    s.publish_offers();
}

fn claim_member(s: &mut DispatchSession, trigger: &DispatchTrigger, ctx: &mut Ctx) {
    let DispatchTrigger::SelectedEscooter { member } = trigger else {
        return;
    };
    match s.book.try_claim(member, &s.key) {
        Claim::Granted => {
            info!(session = %s.key, member = %member, "fleet member claimed");
            s.selected = Some(member.clone());
            ctx.raise(DispatchTrigger::MemberClaimed);
        }
        Claim::HeldBy(holder) => {
            warn!(
                session = %s.key,
                member = %member,
                holder = %holder,
                "fleet member already claimed"
            );
            s.publish_offers();
        }
        Claim::NotInRoster => {
            warn!(session = %s.key, member = %member, "selected fleet member is not in the roster");
            s.publish_offers();
        }
    }
}

fn quote_route(s: &mut DispatchSession, trigger: &DispatchTrigger, _: &mut Ctx) {
    let DispatchTrigger::ExchangeDestination {
        location,
        destination,
    } = trigger
    else {
        return;
    };
    let quote = s.pricing.quote(*location, *destination);
    s.rider_location = Some(*location);
    s.destination = Some(*destination);
    s.quote = Some(quote);
    info!(session = %s.key, distance = quote.distance, price = quote.price, "route quoted");
    s.publish(Command::SuggestRoute {
        phone_name: s.key.clone(),
        distance: quote.distance,
        price: quote.price,
    });
}

fn dispatch_member(s: &mut DispatchSession, trigger: &DispatchTrigger, _: &mut Ctx) {
    let (Some(member), Some(destination), Some(quote)) =
        (s.selected.clone(), s.destination, s.quote)
    else {
        error!(session = %s.key, "route confirmed without a claimed member and a quote");
        return;
    };
    if let DispatchTrigger::RouteConfirmed { price: Some(echoed), .. } = trigger {
        if (echoed - quote.price).abs() > f64::EPSILON {
            debug!(
                session = %s.key,
                echoed,
                quoted = quote.price,
                "rider echoed a different price"
            );
        }
    }
    info!(session = %s.key, member = %member, destination = %destination, "trip started");
    s.publish(Command::ReceiveRouteDetails {
        escooter_name: member,
        server_name: s.key.clone(),
        destination,
        price: quote.price,
    });
}

fn route_declined(s: &mut DispatchSession, _: &DispatchTrigger, _: &mut Ctx) {
    s.declines += 1;
    s.destination = None;
    s.quote = None;
    info!(session = %s.key, declines = s.declines, "route declined");
}

fn report_price(s: &mut DispatchSession, trigger: &DispatchTrigger, _: &mut Ctx) {
    let (DispatchTrigger::AskPrice { location }, Some(destination)) = (trigger, s.destination)
    else {
        return;
    };
    let remaining = s.pricing.quote(*location, destination);
    s.publish(Command::PriceRemaining {
        phone_name: s.key.clone(),
        price: remaining.price,
    });
}

fn report_distance(s: &mut DispatchSession, trigger: &DispatchTrigger, _: &mut Ctx) {
    let (DispatchTrigger::AskDistance { location }, Some(destination)) =
        (trigger, s.destination)
    else {
        return;
    };
    let remaining = s.pricing.quote(*location, destination);
    s.publish(Command::DistanceRemaining {
        phone_name: s.key.clone(),
        distance: remaining.distance,
    });
}

fn note_arrival(s: &mut DispatchSession, trigger: &DispatchTrigger, _: &mut Ctx) {
    if let DispatchTrigger::EscooterArrived { member } = trigger {
        if s.selected.as_ref() == Some(member) {
            info!(session = %s.key, member = %member, "fleet member reports arrival");
        } else {
            warn!(
                session = %s.key,
                member = %member,
                "arrival from a member this session does not hold"
            );
        }
    }
}

fn finish_trip(s: &mut DispatchSession, trigger: &DispatchTrigger, _: &mut Ctx) {
    let reported = match trigger {
        DispatchTrigger::DestinationReached { member } => member.as_ref(),
        _ => None,
    };
    info!(session = %s.key, "destination reached");
    s.acknowledge_member(reported);
}

fn abort_trip(s: &mut DispatchSession, _: &DispatchTrigger, _: &mut Ctx) {
    warn!(session = %s.key, "rider left the service area, ending trip");
    s.acknowledge_member(None);
}

fn cancel_session(s: &mut DispatchSession, _: &DispatchTrigger, _: &mut Ctx) {
    warn!(
        session = %s.key,
        member = ?s.selected,
        received = s.responses_received,
        expected = s.responses_expected,
        "rider left before the trip started"
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Table
// ────────────────────────────────────────────────────────────────────────────

/// Transition table shared by every dispatch session.
pub fn dispatch_table() -> TransitionTable<DispatchSession> {
    use DispatchChoice as C;
    use DispatchState as S;

    TransitionTable::new(S::WaitPhoneRequest)
        .choice(S::WaitPhoneRequest, "phone_location", fleet_size, |b| {
            b.to_with(C::FanOut, S::WaitingFleetLocations, fan_out)
                .to_with(C::EmptyFleet, S::SearchingNearby, skip_fan_out)
        })
        .choice(S::WaitingFleetLocations, "receive_escooter_location", fan_in, |b| {
            b.to_with(C::Pending, S::WaitingFleetLocations, record_reply)
                .to_with(C::Complete, S::SearchingNearby, record_last_reply)
                .to_with(C::Ignored, S::WaitingFleetLocations, ignore_reply)
        })
        .on_with(S::SearchingNearby, "publish_candidates", S::AwaitingSelection, publish_candidates)
        .on_with(S::AwaitingSelection, "selected_escooter", S::AwaitingSelection, claim_member)
        .on(S::AwaitingSelection, "member_claimed", S::AwaitingDestination)
        .on_with(
            S::AwaitingDestination,
            "exchange_destination",
            S::AwaitingRouteConfirmation,
            quote_route,
        )
        .choice(S::AwaitingRouteConfirmation, "route_confirmed", confirmation, |b| {
            b.to_with(C::Confirm, S::Traveling, dispatch_member)
                .to_with(C::Decline, S::AwaitingDestination, route_declined)
        })
        .on_with(S::Traveling, "ask_price", S::Traveling, report_price)
        .on_with(S::Traveling, "ask_distance", S::Traveling, report_distance)
        .on_with(S::Traveling, "escooter_arrived", S::Traveling, note_arrival)
        .on_with(S::Traveling, "destination_reached", S::Final, finish_trip)
        .on_with(S::Traveling, "user_out_of_bounds", S::Final, abort_trip)
        .on_with(S::WaitingFleetLocations, "user_out_of_bounds", S::Final, cancel_session)
        .on_with(S::AwaitingSelection, "user_out_of_bounds", S::Final, cancel_session)
        .on_with(S::AwaitingDestination, "user_out_of_bounds", S::Final, cancel_session)
        .on_with(S::AwaitingRouteConfirmation, "user_out_of_bounds", S::Final, cancel_session)
        .terminal(S::Final)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoot_kernel::{Engine, MachineHandle};
    use scoot_middleware::{TopicReceiver, decode};
    use std::time::Duration;

    fn setup(members: &[&str]) -> (EventBus, FleetBook, Engine<DispatchSession>, TopicReceiver) {
        let bus = EventBus::default();
        let book = FleetBook::new(members.iter().map(|m| m.to_string()));
        let engine = Engine::new("dispatch", dispatch_table());
        let rx = bus.subscribe_to(Topic::ToClients);
        (bus, book, engine, rx)
    }

    async fn next_command(rx: &mut TopicReceiver) -> Command {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("frame in time")
            .expect("bus open");
        decode(&event.payload).expect("valid command")
    }

    async fn settle(handle: &MachineHandle<DispatchSession>, want: DispatchState) {
        tokio::time::timeout(Duration::from_secs(5), handle.wait_for(|s| *s == want))
            .await
            .expect("state reached in time")
            .expect("instance alive");
    }

    fn reply(member: &str, x: f64, busy: bool) -> DispatchTrigger {
        DispatchTrigger::FleetLocation {
            member: member.into(),
            location: Location::new(x, 0.0),
            busy,
        }
    }

    #[test]
    fn from_command_routes_by_correlation_key() {
        let (key, trigger) = DispatchTrigger::from_command(Command::ReceiveEscooterLocation {
            escooter_id: "escooter_1".into(),
            server_name: "alice".into(),
            location: Location::new(1.0, 2.0),
            escooter_busy: false,
        })
        .unwrap();
        assert_eq!(key, "alice");
        assert_eq!(trigger.name(), "receive_escooter_location");

        let (key, trigger) = DispatchTrigger::from_command(Command::EscooterArrived {
            escooter_name: "escooter_1".into(),
            server_name: "bob".into(),
        })
        .unwrap();
        assert_eq!(key, "bob");
        assert_eq!(trigger.name(), "escooter_arrived");

        assert!(
            DispatchTrigger::from_command(Command::SuggestRoute {
                phone_name: "alice".into(),
                distance: 1.0,
                price: 0.05
            })
            .is_none()
        );
    }

    #[tokio::test]
    async fn fan_out_queries_every_member() {
        let (bus, book, engine, mut rx) = setup(&["escooter_0", "escooter_1"]);
        let handle = engine
            .spawn("alice", DispatchSession::new("alice", bus, book, Pricing::default()))
            .unwrap();
        handle
            .send(DispatchTrigger::PhoneLocation {
                location: Location::new(0.0, 0.0),
            })
            .unwrap();

        let mut queried = Vec::new();
        for _ in 0..2 {
            match next_command(&mut rx).await {
                Command::GetLocation {
                    escooter_name,
                    server_name,
                    ..
                } => {
                    assert_eq!(server_name, "alice");
                    queried.push(escooter_name);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        queried.sort();
        assert_eq!(queried, vec!["escooter_0".to_string(), "escooter_1".to_string()]);
        settle(&handle, DispatchState::WaitingFleetLocations).await;
    }

    #[tokio::test]
    async fn list_is_published_once_after_all_replies_and_skips_busy_members() {
        let (bus, book, engine, mut rx) = setup(&["escooter_0", "escooter_1", "escooter_2"]);
        let handle = engine
            .spawn("alice", DispatchSession::new("alice", bus, book, Pricing::default()))
            .unwrap();
        handle
            .send(DispatchTrigger::PhoneLocation {
                location: Location::new(0.0, 0.0),
            })
            .unwrap();
        for _ in 0..3 {
            next_command(&mut rx).await;
        }

        // Out-of-order replies, a duplicate, and a stranger.
        handle.send(reply("escooter_2", 4.0, false)).unwrap();
        handle.send(reply("escooter_2", 4.0, false)).unwrap();
        handle.send(reply("escooter_9", 1.0, false)).unwrap();
        handle.send(reply("escooter_0", 2.0, true)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.state(), DispatchState::WaitingFleetLocations);
        assert!(rx.try_recv().is_err(), "no list before the last reply");

        handle.send(reply("escooter_1", 6.0, false)).unwrap();
        settle(&handle, DispatchState::AwaitingSelection).await;

        match next_command(&mut rx).await {
            Command::EscootersList {
                phone_name,
                escooters,
                distance,
            } => {
                assert_eq!(phone_name, "alice");
                let ids: Vec<_> = escooters.iter().map(|e| e.id.as_str()).collect();
                assert_eq!(ids, vec!["escooter_2", "escooter_1"]);
                assert_eq!(distance, vec![2.0, 3.0]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "list published exactly once");
    }

    #[tokio::test]
    async fn empty_fleet_publishes_an_empty_list() {
        let (bus, book, engine, mut rx) = setup(&[]);
        let handle = engine
            .spawn("alice", DispatchSession::new("alice", bus, book, Pricing::default()))
            .unwrap();
        handle
            .send(DispatchTrigger::PhoneLocation {
                location: Location::new(0.0, 0.0),
            })
            .unwrap();

        match next_command(&mut rx).await {
            Command::EscootersList { escooters, .. } => assert!(escooters.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
        settle(&handle, DispatchState::AwaitingSelection).await;
    }

    #[tokio::test]
    async fn claim_conflict_republishes_and_stays() {
        let (bus, book, engine, mut rx) = setup(&["escooter_0"]);
        let handle = engine
            .spawn(
                "alice",
                DispatchSession::new("alice", bus, book.clone(), Pricing::default()),
            )
            .unwrap();
        handle
            .send(DispatchTrigger::PhoneLocation {
                location: Location::new(0.0, 0.0),
            })
            .unwrap();
        handle.send(reply("escooter_0", 2.0, false)).unwrap();
        settle(&handle, DispatchState::AwaitingSelection).await;
        next_command(&mut rx).await; // get_location
        next_command(&mut rx).await; // first list

        assert_eq!(book.try_claim("escooter_0", "bob"), Claim::Granted);
        handle
            .send(DispatchTrigger::SelectedEscooter {
                member: "escooter_0".into(),
            })
            .unwrap();

        match next_command(&mut rx).await {
            Command::EscootersList { escooters, .. } => assert!(escooters.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(handle.state(), DispatchState::AwaitingSelection);
        assert_eq!(book.holder("escooter_0").as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn out_of_bounds_ends_the_trip_and_releases_the_member() {
        let (bus, book, engine, mut rx) = setup(&["escooter_0"]);
        let handle = engine
            .spawn(
                "alice",
                DispatchSession::new("alice", bus, book.clone(), Pricing::default()),
            )
            .unwrap();
        let steps = [
            DispatchTrigger::PhoneLocation {
                location: Location::new(0.0, 0.0),
            },
            reply("escooter_0", 2.0, false),
            DispatchTrigger::SelectedEscooter {
                member: "escooter_0".into(),
            },
            DispatchTrigger::ExchangeDestination {
                location: Location::new(0.0, 0.0),
                destination: Location::new(4.0, 4.0),
            },
            DispatchTrigger::RouteConfirmed {
                confirm: true,
                price: Some(0.2),
            },
        ];
        for step in steps {
            handle.send(step).unwrap();
        }
        settle(&handle, DispatchState::Traveling).await;
        assert!(book.is_busy("escooter_0"));

        handle.send(DispatchTrigger::UserOutOfBounds).unwrap();
        settle(&handle, DispatchState::Final).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.contains("alice") {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!book.is_busy("escooter_0"));

        let mut acked = false;
        while let Ok(event) = rx.try_recv() {
            if let Ok(Command::DestinationReached { escooter, .. }) = decode(&event.payload) {
                acked = escooter.as_deref() == Some("escooter_0");
            }
        }
        assert!(acked, "fleet member receives the end-of-trip acknowledgement");
    }

    #[tokio::test]
    async fn leaving_before_travel_frees_the_key_and_the_member() {
        let (bus, book, engine, mut rx) = setup(&["escooter_0"]);
        let handle = engine
            .spawn(
                "alice",
                DispatchSession::new("alice", bus, book.clone(), Pricing::default()),
            )
            .unwrap();
        let steps = [
            DispatchTrigger::PhoneLocation {
                location: Location::new(0.0, 0.0),
            },
            reply("escooter_0", 2.0, false),
            DispatchTrigger::SelectedEscooter {
                member: "escooter_0".into(),
            },
        ];
        for step in steps {
            handle.send(step).unwrap();
        }
        settle(&handle, DispatchState::AwaitingDestination).await;
        assert_eq!(book.holder("escooter_0").as_deref(), Some("alice"));

        handle.send(DispatchTrigger::UserOutOfBounds).unwrap();
        settle(&handle, DispatchState::Final).await;
        assert!(!engine.contains("alice"));
        assert!(!book.is_busy("escooter_0"));

        // The member never started a trip, so it gets no end-of-trip ack.
        while let Ok(event) = rx.try_recv() {
            let command = decode(&event.payload).expect("valid command");
            assert!(!matches!(command, Command::DestinationReached { .. }));
        }
    }

    #[tokio::test]
    async fn remaining_price_uses_the_quote_rate() {
        let (bus, book, engine, mut rx) = setup(&["escooter_0"]);
        let handle = engine
            .spawn("alice", DispatchSession::new("alice", bus, book, Pricing::default()))
            .unwrap();
        let steps = [
            DispatchTrigger::PhoneLocation {
                location: Location::new(0.0, 0.0),
            },
            reply("escooter_0", 2.0, false),
            DispatchTrigger::SelectedEscooter {
                member: "escooter_0".into(),
            },
            DispatchTrigger::ExchangeDestination {
                location: Location::new(0.0, 0.0),
                destination: Location::new(10.0, 0.0),
            },
            DispatchTrigger::RouteConfirmed {
                confirm: true,
                price: None,
            },
            DispatchTrigger::AskPrice {
                location: Location::new(6.0, 0.0),
            },
            DispatchTrigger::AskDistance {
                location: Location::new(6.0, 0.0),
            },
        ];
        for step in steps {
            handle.send(step).unwrap();
        }

        let mut price = None;
        let mut distance = None;
        while price.is_none() || distance.is_none() {
            match next_command(&mut rx).await {
                Command::PriceRemaining { price: p, .. } => price = Some(p),
                Command::DistanceRemaining { distance: d, .. } => distance = Some(d),
                _ => {}
            }
        }
        assert_eq!(distance, Some(2.0));
        assert!((price.unwrap() - 0.1).abs() < 1e-12);
    }

    #[tokio::test]
    async fn triggers_out_of_order_do_not_change_state() {
        let (bus, book, engine, _rx) = setup(&["escooter_0"]);
        let handle = engine
            .spawn("alice", DispatchSession::new("alice", bus, book, Pricing::default()))
            .unwrap();
        handle
            .send(DispatchTrigger::RouteConfirmed {
                confirm: true,
                price: None,
            })
            .unwrap();
        handle
            .send(DispatchTrigger::DestinationReached { member: None })
            .unwrap();
        handle.send(reply("escooter_0", 1.0, false)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.state(), DispatchState::WaitPhoneRequest);
    }
}
