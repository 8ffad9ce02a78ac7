//! Rider client: one state machine per phone.
//!
//! The rider drives a trip from its side: send the location, pick a scooter
//! from the offered list, choose a destination, accept or decline the quote,
//! then travel until the destination is reached (or the trip cap elapses).
//! User decisions come from a [`DecisionSource`] and are answered
//! asynchronously, so the instance keeps reacting to server messages while a
//! decision is pending.

use std::sync::Arc;
use std::time::Duration;

use scoot_hal::positioning::LocationSource;
use scoot_kernel::{Context, Engine, Journal, Logic, MachineHandle, TransitionTable, Trigger};
use scoot_middleware::{CommandHandler, EventBus, Topic, pump};
use scoot_types::{Command, FleetMemberId, Location, ScootError, SessionKey};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::decision::{CandidateOffer, DecisionSource};
use crate::pricing::Quote;

const SOURCE: &str = "scoot-runtime::rider";

type Ctx = Context<RiderSession>;

/// Default rider position.
pub const DEFAULT_RIDER_LOCATION: Location = Location(6.5, 10.0);
/// Default destination offered to the rider.
pub const DEFAULT_DESTINATION: Location = Location(63.45, 10.38);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiderState {
    Idle,
    AwaitingLocationAck,
    AwaitingCandidates,
    SelectingMember,
    AwaitingDestinationAck,
    AwaitingRouteDecision,
    Traveling,
    Arrived,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiderTrigger {
    Start,
    LocationSent,
    Candidates { offers: Vec<CandidateOffer> },
    MemberChosen { member: FleetMemberId },
    DestinationChosen { destination: Location },
    RouteSuggested { distance: f64, price: f64 },
    RouteDecided { confirm: bool },
    AskPrice,
    AskDistance,
    PriceRemaining { price: f64 },
    DistanceRemaining { distance: f64 },
    ArrivalTick,
    CheckArrival,
    LeaveArea,
}

impl Trigger for RiderTrigger {
    fn name(&self) -> &'static str {
        match self {
            RiderTrigger::Start => "start_trip",
            RiderTrigger::LocationSent => "location_sent",
            RiderTrigger::Candidates { .. } => "escooters_list",
            RiderTrigger::MemberChosen { .. } => "member_chosen",
            RiderTrigger::DestinationChosen { .. } => "destination_chosen",
            RiderTrigger::RouteSuggested { .. } => "suggest_route",
            RiderTrigger::RouteDecided { .. } => "route_decided",
            RiderTrigger::AskPrice => "ask_price",
            RiderTrigger::AskDistance => "ask_distance",
            RiderTrigger::PriceRemaining { .. } => "price_remaining",
            RiderTrigger::DistanceRemaining { .. } => "distance_remaining",
            RiderTrigger::ArrivalTick => "arrival_tick",
            RiderTrigger::CheckArrival => "check_arrival",
            RiderTrigger::LeaveArea => "leave_area",
        }
    }
}

impl RiderTrigger {
    /// Split a `toClients` command into the addressed rider and its trigger.
    pub fn from_command(command: Command) -> Option<(SessionKey, RiderTrigger)> {
        match command {
            Command::EscootersList {
                phone_name,
                escooters,
                distance,
            } => {
                if escooters.len() != distance.len() {
                    warn!(
                        rider = %phone_name,
                        escooters = escooters.len(),
                        distances = distance.len(),
                        "candidate list and distances differ in length"
                    );
                }
                let offers = escooters
                    .into_iter()
                    .zip(distance)
                    .map(|(info, distance)| CandidateOffer {
                        id: info.id,
                        location: info.location,
                        busy: info.busy,
                        distance,
                    })
                    .collect();
                Some((phone_name, RiderTrigger::Candidates { offers }))
            }
            Command::SuggestRoute {
                phone_name,
                distance,
                price,
            } => Some((phone_name, RiderTrigger::RouteSuggested { distance, price })),
            Command::PriceRemaining { phone_name, price } => {
                Some((phone_name, RiderTrigger::PriceRemaining { price }))
            }
            Command::DistanceRemaining { phone_name, distance } => {
                Some((phone_name, RiderTrigger::DistanceRemaining { distance }))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiderChoice {
    Confirm,
    Decline,
    Arrived,
    StillTraveling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiderTiming {
    /// Interval between arrival checks while traveling.
    pub arrival_check: Duration,
    /// Trip length after which the rider considers the destination reached.
    pub max_trip: Duration,
}

impl Default for RiderTiming {
    fn default() -> Self {
        Self {
            arrival_check: Duration::from_secs(1),
            max_trip: Duration::from_secs(10),
        }
    }
}

/// What the rider's screen shows: a read-only copy of the session's trip
/// data, refreshed after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiderDisplay {
    pub location: Option<Location>,
    pub offers: Vec<CandidateOffer>,
    pub selected: Option<FleetMemberId>,
    pub destination: Option<Location>,
    pub quote: Option<Quote>,
    pub price_remaining: Option<f64>,
    pub distance_remaining: Option<f64>,
}

pub struct RiderSession {
    name: SessionKey,
    bus: EventBus,
    source: Box<dyn LocationSource>,
    decisions: Arc<dyn DecisionSource>,
    timing: RiderTiming,
    location: Location,
    offers: Vec<CandidateOffer>,
    selected: Option<FleetMemberId>,
    destination: Option<Location>,
    quote: Option<Quote>,
    trip_started: Option<Instant>,
    price_remaining: Option<f64>,
    distance_remaining: Option<f64>,
    display: watch::Sender<RiderDisplay>,
}

impl RiderSession {
    pub fn new(
        name: impl Into<SessionKey>,
        bus: EventBus,
        mut source: Box<dyn LocationSource>,
        decisions: Arc<dyn DecisionSource>,
        timing: RiderTiming,
    ) -> (Self, watch::Receiver<RiderDisplay>) {
        let location = source.read();
        let (display, rx) = watch::channel(RiderDisplay::default());
        let session = Self {
            name: name.into(),
            bus,
            source,
            decisions,
            timing,
            location,
            offers: Vec::new(),
            selected: None,
            destination: None,
            quote: None,
            trip_started: None,
            price_remaining: None,
            distance_remaining: None,
            display,
        };
        (session, rx)
    }

    /// Push the current trip data to the screen.
    fn show(&self) {
        self.display.send_replace(RiderDisplay {
            location: Some(self.location),
            offers: self.offers.clone(),
            selected: self.selected.clone(),
            destination: self.destination,
            quote: self.quote,
            price_remaining: self.price_remaining,
            distance_remaining: self.distance_remaining,
        });
    }

    fn publish(&self, command: Command) {
        if let Err(e) = self.bus.send_command(Topic::ToServer, SOURCE, &command) {
            error!(rider = %self.name, command = command.name(), error = %e, "publish failed");
        }
    }

    fn refresh_location(&mut self) -> Location {
        self.location = self.source.read();
        self.location
    }

    fn ask_for_destination(&self, ctx: &Ctx) {
        let decisions = Arc::clone(&self.decisions);
        let handle = ctx.handle();
        let from = self.location;
        tokio::spawn(async move {
            let destination = decisions.choose_destination(from).await;
            let _ = handle.send(RiderTrigger::DestinationChosen { destination });
        });
    }
}

impl Logic for RiderSession {
    type State = RiderState;
    type Trigger = RiderTrigger;
    type Choice = RiderChoice;
}

// ────────────────────────────────────────────────────────────────────────────
// Guards
// ────────────────────────────────────────────────────────────────────────────

fn route_decision(_: &RiderSession, trigger: &RiderTrigger) -> RiderChoice {
    match trigger {
        RiderTrigger::RouteDecided { confirm: true } => RiderChoice::Confirm,
        _ => RiderChoice::Decline,
    }
}

fn arrival(r: &RiderSession, _: &RiderTrigger) -> RiderChoice {
    let at_destination = r.destination == Some(r.location);
    let elapsed = r.trip_started.map(|t| t.elapsed()).unwrap_or_default();
    if at_destination || elapsed >= r.timing.max_trip {
        RiderChoice::Arrived
    } else {
        RiderChoice::StillTraveling
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Effects
// ────────────────────────────────────────────────────────────────────────────

fn send_location(r: &mut RiderSession, _: &RiderTrigger, ctx: &mut Ctx) {
    let location = r.refresh_location();
    r.show();
    info!(rider = %r.name, location = %location, "requesting a scooter");
    r.publish(Command::PhoneLocation {
        phone_name: r.name.clone(),
        location,
    });
    ctx.raise(RiderTrigger::LocationSent);
}

/// Show a (possibly re-offered) list and ask the user to pick from it.
fn present_candidates(r: &mut RiderSession, trigger: &RiderTrigger, ctx: &mut Ctx) {
    let RiderTrigger::Candidates { offers } = trigger else {
        return;
    };
    info!(rider = %r.name, offers = offers.len(), "scooters offered");
    r.offers = offers.clone();
    r.selected = None;
    r.destination = None;
    r.quote = None;
    r.show();

    let decisions = Arc::clone(&r.decisions);
    let handle = ctx.handle();
    let offers = offers.clone();
    tokio::spawn(async move {
        match decisions.choose_member(&offers).await {
            Some(member) => {
                let _ = handle.send(RiderTrigger::MemberChosen { member });
            }
            None => debug!(rider = handle.name(), "no scooter picked, waiting for a new offer"),
        }
    });
}

fn select_member(r: &mut RiderSession, trigger: &RiderTrigger, ctx: &mut Ctx) {
    let RiderTrigger::MemberChosen { member } = trigger else {
        return;
    };
    info!(rider = %r.name, member = %member, "scooter selected");
    r.selected = Some(member.clone());
    r.show();
    r.publish(Command::SelectedEscooter {
        phone_name: r.name.clone(),
        escooter: member.clone(),
    });
    r.ask_for_destination(ctx);
}

fn send_destination(r: &mut RiderSession, trigger: &RiderTrigger, _: &mut Ctx) {
    let RiderTrigger::DestinationChosen { destination } = trigger else {
        return;
    };
    let location = r.refresh_location();
    r.destination = Some(*destination);
    r.show();
    r.publish(Command::ExchangeDestination {
        phone_name: r.name.clone(),
        location,
        destination: *destination,
    });
}

fn consider_route(r: &mut RiderSession, trigger: &RiderTrigger, ctx: &mut Ctx) {
    let RiderTrigger::RouteSuggested { distance, price } = trigger else {
        return;
    };
    let (distance, price) = (*distance, *price);
    info!(rider = %r.name, distance, price, "route quoted");
    r.quote = Some(Quote { distance, price });
    r.show();

    let decisions = Arc::clone(&r.decisions);
    let handle = ctx.handle();
    tokio::spawn(async move {
        let confirm = decisions.confirm_route(distance, price).await;
        let _ = handle.send(RiderTrigger::RouteDecided { confirm });
    });
}

fn begin_trip(r: &mut RiderSession, _: &RiderTrigger, ctx: &mut Ctx) {
    r.publish(Command::RouteConfirmed {
        phone_name: r.name.clone(),
        confirm: true,
        price: r.quote.map(|q| q.price),
    });
    r.trip_started = Some(Instant::now());
    if let Some(destination) = r.destination {
        r.source.head_to(destination);
    }
    info!(rider = %r.name, "trip confirmed");
    ctx.start_timer("arrival_check", r.timing.arrival_check, RiderTrigger::ArrivalTick);
}

fn decline_route(r: &mut RiderSession, _: &RiderTrigger, ctx: &mut Ctx) {
    info!(rider = %r.name, "route declined");
    r.publish(Command::RouteConfirmed {
        phone_name: r.name.clone(),
        confirm: false,
        price: None,
    });
    r.quote = None;
    r.destination = None;
    r.show();
    r.ask_for_destination(ctx);
}

fn request_price(r: &mut RiderSession, _: &RiderTrigger, _: &mut Ctx) {
    let location = r.refresh_location();
    r.show();
    r.publish(Command::AskPrice {
        phone_name: r.name.clone(),
        location,
    });
}

fn request_distance(r: &mut RiderSession, _: &RiderTrigger, _: &mut Ctx) {
    let location = r.refresh_location();
    r.show();
    r.publish(Command::AskDistance {
        phone_name: r.name.clone(),
        location,
    });
}

fn show_remaining(r: &mut RiderSession, trigger: &RiderTrigger, _: &mut Ctx) {
    match *trigger {
        RiderTrigger::PriceRemaining { price } => {
            info!(rider = %r.name, price, "price remaining");
            r.price_remaining = Some(price);
        }
        RiderTrigger::DistanceRemaining { distance } => {
            info!(rider = %r.name, distance, "distance remaining");
            r.distance_remaining = Some(distance);
        }
        _ => return,
    }
    r.show();
}

fn arrival_tick(r: &mut RiderSession, _: &RiderTrigger, ctx: &mut Ctx) {
    r.refresh_location();
    r.show();
    ctx.raise(RiderTrigger::CheckArrival);
}

fn rearm_arrival_check(r: &mut RiderSession, _: &RiderTrigger, ctx: &mut Ctx) {
    ctx.start_timer("arrival_check", r.timing.arrival_check, RiderTrigger::ArrivalTick);
}

fn finish_trip(r: &mut RiderSession, _: &RiderTrigger, _: &mut Ctx) {
    info!(rider = %r.name, location = %r.location, "destination reached");
    r.publish(Command::DestinationReached {
        phone_name: r.name.clone(),
        escooter: r.selected.clone(),
    });
}

fn leave_area(r: &mut RiderSession, _: &RiderTrigger, _: &mut Ctx) {
    warn!(rider = %r.name, member = ?r.selected, "leaving the service area");
    r.publish(Command::UserOutOfBounds {
        phone_name: r.name.clone(),
    });
}

/// Transition table shared by every rider.
pub fn rider_table() -> TransitionTable<RiderSession> {
    use RiderChoice as C;
    use RiderState as S;

    TransitionTable::new(S::Idle)
        .on_with(S::Idle, "start_trip", S::AwaitingLocationAck, send_location)
        .on(S::AwaitingLocationAck, "location_sent", S::AwaitingCandidates)
        .on_with(S::AwaitingCandidates, "escooters_list", S::SelectingMember, present_candidates)
        .on_with(S::SelectingMember, "escooters_list", S::SelectingMember, present_candidates)
        .on_with(S::SelectingMember, "member_chosen", S::AwaitingDestinationAck, select_member)
        .on_with(
            S::AwaitingDestinationAck,
            "destination_chosen",
            S::AwaitingRouteDecision,
            send_destination,
        )
        .on_with(
            S::AwaitingDestinationAck,
            "escooters_list",
            S::SelectingMember,
            present_candidates,
        )
        .on_with(
            S::AwaitingRouteDecision,
            "suggest_route",
            S::AwaitingRouteDecision,
            consider_route,
        )
        .on_with(S::AwaitingRouteDecision, "escooters_list", S::SelectingMember, present_candidates)
        .choice(S::AwaitingRouteDecision, "route_decided", route_decision, |b| {
            b.to_with(C::Confirm, S::Traveling, begin_trip)
                .to_with(C::Decline, S::AwaitingDestinationAck, decline_route)
        })
        .on_with(S::Traveling, "ask_price", S::Traveling, request_price)
        .on_with(S::Traveling, "ask_distance", S::Traveling, request_distance)
        .on_with(S::Traveling, "price_remaining", S::Traveling, show_remaining)
        .on_with(S::Traveling, "distance_remaining", S::Traveling, show_remaining)
        .on_with(S::Traveling, "arrival_tick", S::Traveling, arrival_tick)
        .choice(S::Traveling, "check_arrival", arrival, |b| {
            b.to_with(C::Arrived, S::Arrived, finish_trip)
                .to_with(C::StillTraveling, S::Traveling, rearm_arrival_check)
        })
        .on_with(S::AwaitingCandidates, "leave_area", S::Arrived, leave_area)
        .on_with(S::SelectingMember, "leave_area", S::Arrived, leave_area)
        .on_with(S::AwaitingDestinationAck, "leave_area", S::Arrived, leave_area)
        .on_with(S::AwaitingRouteDecision, "leave_area", S::Arrived, leave_area)
        .on_with(S::Traveling, "leave_area", S::Arrived, leave_area)
        .terminal(S::Arrived)
}

// ────────────────────────────────────────────────────────────────────────────
// App
// ────────────────────────────────────────────────────────────────────────────

/// A running rider as seen from outside.
pub struct RiderHandle {
    machine: MachineHandle<RiderSession>,
    display: watch::Receiver<RiderDisplay>,
}

impl RiderHandle {
    pub fn name(&self) -> &str {
        self.machine.name()
    }

    pub fn state(&self) -> RiderState {
        self.machine.state()
    }

    /// Latest screen contents.
    pub fn display(&self) -> RiderDisplay {
        self.display.borrow().clone()
    }

    /// Wait until the rider reaches a state matching `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&RiderState) -> bool,
    ) -> Result<RiderState, ScootError> {
        self.machine.wait_for(predicate).await
    }

    /// Wait for the trip to end.
    pub async fn finished(&self) -> Result<RiderState, ScootError> {
        self.wait_for(|s| *s == RiderState::Arrived).await
    }
}

/// Hosts rider instances and feeds them from `toClients`.
#[derive(Clone)]
pub struct RiderApp {
    bus: EventBus,
    engine: Engine<RiderSession>,
    timing: RiderTiming,
}

impl RiderApp {
    pub fn new(bus: EventBus, timing: RiderTiming) -> Self {
        Self {
            bus,
            engine: Engine::new("rider", rider_table()),
            timing,
        }
    }

    pub fn with_journal(mut self, journal: Journal<RiderState>) -> Self {
        self.engine = Engine::new("rider", rider_table()).with_journal(journal);
        self
    }

    /// Spawn rider `name` and kick off its trip.
    ///
    /// # Errors
    ///
    /// [`ScootError::DuplicateInstance`] while a rider of that name is still
    /// on a trip.
    pub fn start_trip(
        &self,
        name: &str,
        source: Box<dyn LocationSource>,
        decisions: Arc<dyn DecisionSource>,
    ) -> Result<RiderHandle, ScootError> {
        let (session, display) =
            RiderSession::new(name, self.bus.clone(), source, decisions, self.timing);
        let machine = self.engine.spawn(name, session)?;
        machine.send(RiderTrigger::Start)?;
        Ok(RiderHandle { machine, display })
    }

    pub fn ask_price(&self, name: &str) -> Result<(), ScootError> {
        self.engine.send(name, RiderTrigger::AskPrice)
    }

    pub fn ask_distance(&self, name: &str) -> Result<(), ScootError> {
        self.engine.send(name, RiderTrigger::AskDistance)
    }

    /// Abandon rider `name`'s trip from any state before arrival.  The
    /// server ends the session and frees the scooter.
    pub fn leave_area(&self, name: &str) -> Result<(), ScootError> {
        self.engine.send(name, RiderTrigger::LeaveArea)
    }

    pub fn riders(&self) -> Vec<SessionKey> {
        self.engine.names()
    }

    pub fn handle_command(&self, command: Command) {
        let Some((name, trigger)) = RiderTrigger::from_command(command) else {
            return;
        };
        if let Err(e) = self.engine.send(&name, trigger) {
            debug!(rider = %name, error = %e, "no such rider here");
        }
    }

    /// Subscribe to `toClients` and serve it on a background task.
    pub fn listen(&self) -> JoinHandle<()> {
        let receiver = self.bus.subscribe_to(Topic::ToClients);
        let mut app = self.clone();
        tokio::spawn(async move { pump(receiver, &mut app).await })
    }

    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}

impl CommandHandler for RiderApp {
    fn handle(&mut self, _topic: Topic, command: Command) {
        self.handle_command(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{MemberPick, ScriptedDecisions};
    use scoot_hal::positioning::FixedLocation;
    use scoot_middleware::{TopicReceiver, decode};
    use scoot_types::EscooterInfo;

    async fn next_server_command(rx: &mut TopicReceiver) -> Command {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("frame in time")
            .expect("bus open");
        decode(&event.payload).expect("valid command")
    }

    fn list(name: &str, ids: &[&str]) -> Command {
        Command::EscootersList {
            phone_name: name.into(),
            escooters: ids
                .iter()
                .map(|id| EscooterInfo {
                    id: id.to_string(),
                    location: Location::new(1.0, 1.0),
                    busy: false,
                })
                .collect(),
            distance: ids.iter().map(|_| 1.0).collect(),
        }
    }

    fn start(app: &RiderApp, decisions: ScriptedDecisions) -> RiderHandle {
        app.start_trip(
            "alice",
            Box::new(FixedLocation(Location::new(0.0, 0.0))),
            Arc::new(decisions),
        )
        .unwrap()
    }

    #[test]
    fn from_command_builds_offers() {
        let (name, trigger) =
            RiderTrigger::from_command(list("alice", &["escooter_0", "escooter_1"])).unwrap();
        assert_eq!(name, "alice");
        match trigger {
            RiderTrigger::Candidates { offers } => {
                assert_eq!(offers.len(), 2);
                assert_eq!(offers[1].id, "escooter_1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(
            RiderTrigger::from_command(Command::UserOutOfBounds {
                phone_name: "alice".into()
            })
            .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_against_a_scripted_server() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::ToServer);
        let app = RiderApp::new(bus, RiderTiming::default());
        let rider = start(&app, ScriptedDecisions::new(Location::new(10.0, 0.0)));

        assert!(matches!(next_server_command(&mut rx).await, Command::PhoneLocation { .. }));
        rider.wait_for(|s| *s == RiderState::AwaitingCandidates).await?;

        app.handle_command(list("alice", &["escooter_0"]));
        match next_server_command(&mut rx).await {
            Command::SelectedEscooter { escooter, .. } => assert_eq!(escooter, "escooter_0"),
            other => panic!("unexpected {other:?}"),
        }
        match next_server_command(&mut rx).await {
            Command::ExchangeDestination { destination, .. } => {
                assert_eq!(destination, Location::new(10.0, 0.0))
            }
            other => panic!("unexpected {other:?}"),
        }

        app.handle_command(Command::SuggestRoute {
            phone_name: "alice".into(),
            distance: 5.0,
            price: 0.25,
        });
        match next_server_command(&mut rx).await {
            Command::RouteConfirmed { confirm, price, .. } => {
                assert!(confirm);
                assert_eq!(price, Some(0.25));
            }
            other => panic!("unexpected {other:?}"),
        }
        rider.wait_for(|s| *s == RiderState::Traveling).await?;

        app.ask_price("alice")?;
        assert!(matches!(next_server_command(&mut rx).await, Command::AskPrice { .. }));
        app.handle_command(Command::PriceRemaining {
            phone_name: "alice".into(),
            price: 0.1,
        });

        // Fixed source never reaches (10, 0); the trip cap ends it.
        match next_server_command(&mut rx).await {
            Command::DestinationReached { escooter, .. } => {
                assert_eq!(escooter.as_deref(), Some("escooter_0"))
            }
            other => panic!("unexpected {other:?}"),
        }
        rider.finished().await?;
        assert_eq!(rider.display().price_remaining, Some(0.1));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn declined_quote_asks_for_a_new_destination() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::ToServer);
        let app = RiderApp::new(bus, RiderTiming::default());
        let rider = start(&app, ScriptedDecisions::new(Location::new(4.0, 0.0)).declining(1));

        next_server_command(&mut rx).await; // phone_location
        rider.wait_for(|s| *s == RiderState::AwaitingCandidates).await?;
        app.handle_command(list("alice", &["escooter_0"]));
        next_server_command(&mut rx).await; // selected_escooter
        next_server_command(&mut rx).await; // exchange_destination

        app.handle_command(Command::SuggestRoute {
            phone_name: "alice".into(),
            distance: 2.0,
            price: 0.1,
        });
        match next_server_command(&mut rx).await {
            Command::RouteConfirmed { confirm, price, .. } => {
                assert!(!confirm);
                assert_eq!(price, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            next_server_command(&mut rx).await,
            Command::ExchangeDestination { .. }
        ));
        assert_eq!(rider.state(), RiderState::AwaitingRouteDecision);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn no_pick_leaves_the_rider_waiting() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::ToServer);
        let app = RiderApp::new(bus, RiderTiming::default());
        let rider = start(
            &app,
            ScriptedDecisions::new(Location::new(4.0, 0.0)).picking(MemberPick::Nobody),
        );
        next_server_command(&mut rx).await;
        rider.wait_for(|s| *s == RiderState::AwaitingCandidates).await?;

        app.handle_command(list("alice", &[]));
        rider.wait_for(|s| *s == RiderState::SelectingMember).await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rider.state(), RiderState::SelectingMember);
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_the_area_ends_the_trip() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::ToServer);
        let app = RiderApp::new(
            bus,
            RiderTiming {
                arrival_check: Duration::from_secs(1),
                max_trip: Duration::from_secs(3600),
            },
        );
        let rider = start(&app, ScriptedDecisions::new(Location::new(40.0, 0.0)));
        next_server_command(&mut rx).await;
        rider.wait_for(|s| *s == RiderState::AwaitingCandidates).await?;
        app.handle_command(list("alice", &["escooter_0"]));
        next_server_command(&mut rx).await;
        next_server_command(&mut rx).await;
        app.handle_command(Command::SuggestRoute {
            phone_name: "alice".into(),
            distance: 20.0,
            price: 1.0,
        });
        rider.wait_for(|s| *s == RiderState::Traveling).await?;
        next_server_command(&mut rx).await; // route_confirmed

        app.leave_area("alice")?;
        assert!(matches!(
            next_server_command(&mut rx).await,
            Command::UserOutOfBounds { .. }
        ));
        rider.finished().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn new_offer_while_selecting_asks_again() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::ToServer);
        let app = RiderApp::new(bus, RiderTiming::default());
        let rider = start(
            &app,
            ScriptedDecisions::new(Location::new(4.0, 0.0))
                .picking(MemberPick::Named("escooter_1".into())),
        );
        next_server_command(&mut rx).await;
        rider.wait_for(|s| *s == RiderState::AwaitingCandidates).await?;

        app.handle_command(list("alice", &["escooter_0"]));
        rider.wait_for(|s| *s == RiderState::SelectingMember).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        app.handle_command(list("alice", &["escooter_0", "escooter_1"]));
        match next_server_command(&mut rx).await {
            Command::SelectedEscooter { escooter, .. } => assert_eq!(escooter, "escooter_1"),
            other => panic!("unexpected {other:?}"),
        }
        rider.wait_for(|s| *s == RiderState::AwaitingRouteDecision).await?;
        let display = rider.display();
        assert_eq!(display.offers.len(), 2);
        assert_eq!(display.selected.as_deref(), Some("escooter_1"));
        assert_eq!(display.destination, Some(Location::new(4.0, 0.0)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_before_travel_ends_the_rider() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::ToServer);
        let app = RiderApp::new(bus, RiderTiming::default());
        let rider = start(
            &app,
            ScriptedDecisions::new(Location::new(4.0, 0.0)).picking(MemberPick::Nobody),
        );
        next_server_command(&mut rx).await;
        rider.wait_for(|s| *s == RiderState::AwaitingCandidates).await?;
        app.handle_command(list("alice", &[]));
        rider.wait_for(|s| *s == RiderState::SelectingMember).await?;

        app.leave_area("alice")?;
        assert!(matches!(
            next_server_command(&mut rx).await,
            Command::UserOutOfBounds { .. }
        ));
        rider.finished().await?;
        assert!(app.riders().is_empty());
        Ok(())
    }
}
