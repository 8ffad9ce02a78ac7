//! Fleet member state machine and the `toClients` fleet service.
//!
//! A member answers every `get_location` addressed to it, whatever it is
//! doing, and reports itself busy while it holds a trip.  Once route details
//! arrive it travels until its sensor reaches the destination or the travel
//! timer elapses, announces `escooter_arrived`, and goes back to waiting when
//! the server acknowledges the end of the trip.

use std::time::Duration;

use scoot_hal::positioning::LocationSource;
use scoot_hal::sim::SimMember;
use scoot_kernel::{Context, Engine, Journal, Logic, MachineHandle, TransitionTable, Trigger};
use scoot_middleware::{CommandHandler, EventBus, Topic, pump};
use scoot_types::{Command, FleetMemberId, Location, ScootError, SessionKey};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SOURCE: &str = "scoot-runtime::fleet";

type Ctx = Context<FleetMember>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FleetState {
    AwaitServerRequest,
    AwaitRouteDetails,
    Traveling,
    Arrived,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FleetTrigger {
    GetLocation {
        session: SessionKey,
        phone_location: Location,
    },
    RouteDetails {
        session: SessionKey,
        destination: Location,
        price: f64,
    },
    PositionTick,
    CheckArrival,
    TravelElapsed,
    DestinationReached {
        session: SessionKey,
    },
}

impl Trigger for FleetTrigger {
    fn name(&self) -> &'static str {
        match self {
            FleetTrigger::GetLocation { .. } => "get_location",
            FleetTrigger::RouteDetails { .. } => "receive_route_details",
            FleetTrigger::PositionTick => "position_tick",
            FleetTrigger::CheckArrival => "check_arrival",
            FleetTrigger::TravelElapsed => "travel_elapsed",
            FleetTrigger::DestinationReached { .. } => "destination_reached",
        }
    }
}

impl FleetTrigger {
    /// Split a `toClients` command into the addressed member and its trigger.
    pub fn from_command(command: Command) -> Option<(FleetMemberId, FleetTrigger)> {
        match command {
            Command::GetLocation {
                escooter_name,
                server_name,
                phone_location,
            } => Some((
                escooter_name,
                FleetTrigger::GetLocation {
                    session: server_name,
                    phone_location,
                },
            )),
            Command::ReceiveRouteDetails {
                escooter_name,
                server_name,
                destination,
                price,
            } => Some((
                escooter_name,
                FleetTrigger::RouteDetails {
                    session: server_name,
                    destination,
                    price,
                },
            )),
            Command::DestinationReached {
                phone_name,
                escooter: Some(member),
            } => Some((member, FleetTrigger::DestinationReached { session: phone_name })),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FleetChoice {
    AtDestination,
    NotYet,
    OwnTrip,
    ForeignTrip,
}

/// Timer settings of a fleet member.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FleetTiming {
    /// Upper bound on a trip; the member declares arrival when it elapses.
    pub travel: Duration,
    /// Interval between sensor reads while traveling.
    pub position_check: Duration,
}

impl Default for FleetTiming {
    fn default() -> Self {
        Self {
            travel: Duration::from_secs(10),
            position_check: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Trip {
    session: SessionKey,
    destination: Location,
    price: f64,
}

pub struct FleetMember {
    id: FleetMemberId,
    bus: EventBus,
    source: Box<dyn LocationSource>,
    timing: FleetTiming,
    location: Location,
    trip: Option<Trip>,
    trips_completed: u32,
}

impl FleetMember {
    pub fn new(
        id: impl Into<FleetMemberId>,
        bus: EventBus,
        mut source: Box<dyn LocationSource>,
        timing: FleetTiming,
    ) -> Self {
        let location = source.read();
        Self {
            id: id.into(),
            bus,
            source,
            timing,
            location,
            trip: None,
            trips_completed: 0,
        }
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn trips_completed(&self) -> u32 {
        self.trips_completed
    }

    fn publish(&self, command: Command) {
        if let Err(e) = self.bus.send_command(Topic::ToServer, SOURCE, &command) {
            error!(member = %self.id, command = command.name(), error = %e, "publish failed");
        }
    }
}

impl Logic for FleetMember {
    type State = FleetState;
    type Trigger = FleetTrigger;
    type Choice = FleetChoice;
}

// ---------------------------------------------------------------------------
// Guards and effects
// ---------------------------------------------------------------------------

fn arrival(m: &FleetMember, _: &FleetTrigger) -> FleetChoice {
    match &m.trip {
        Some(trip) if trip.destination == m.location => FleetChoice::AtDestination,
        _ => FleetChoice::NotYet,
    }
}

fn trip_owner(m: &FleetMember, trigger: &FleetTrigger) -> FleetChoice {
    match (trigger, &m.trip) {
        (FleetTrigger::DestinationReached { session }, Some(trip)) if &trip.session == session => {
            FleetChoice::OwnTrip
        }
        _ => FleetChoice::ForeignTrip,
    }
}

fn report_location(m: &mut FleetMember, trigger: &FleetTrigger, _: &mut Ctx) {
    let FleetTrigger::GetLocation { session, .. } = trigger else {
        return;
    };
    m.location = m.source.read();
    let busy = m.trip.is_some();
    debug!(member = %m.id, session = %session, location = %m.location, busy, "reporting location");
    m.publish(Command::ReceiveEscooterLocation {
        escooter_id: m.id.clone(),
        server_name: session.clone(),
        location: m.location,
        escooter_busy: busy,
    });
}

fn start_trip(m: &mut FleetMember, trigger: &FleetTrigger, ctx: &mut Ctx) {
    let FleetTrigger::RouteDetails {
        session,
        destination,
        price,
    } = trigger
    else {
        return;
    };
    info!(member = %m.id, session = %session, destination = %destination, price, "trip assigned");
    m.trip = Some(Trip {
        session: session.clone(),
        destination: *destination,
        price: *price,
    });
    m.source.head_to(*destination);
    ctx.start_timer("travel", m.timing.travel, FleetTrigger::TravelElapsed);
    ctx.start_timer("position_check", m.timing.position_check, FleetTrigger::PositionTick);
}

fn read_position(m: &mut FleetMember, _: &FleetTrigger, ctx: &mut Ctx) {
    m.location = m.source.read();
    ctx.raise(FleetTrigger::CheckArrival);
}

fn rearm_check(m: &mut FleetMember, _: &FleetTrigger, ctx: &mut Ctx) {
    ctx.start_timer("position_check", m.timing.position_check, FleetTrigger::PositionTick);
}

fn announce_arrival(m: &mut FleetMember, _: &FleetTrigger, _: &mut Ctx) {
    let Some(trip) = &m.trip else {
        return;
    };
    info!(member = %m.id, session = %trip.session, location = %m.location, "arrived");
    m.publish(Command::EscooterArrived {
        escooter_name: m.id.clone(),
        server_name: trip.session.clone(),
    });
}

fn end_trip(m: &mut FleetMember, _: &FleetTrigger, _: &mut Ctx) {
    if let Some(trip) = m.trip.take() {
        m.trips_completed += 1;
        info!(member = %m.id, session = %trip.session, price = trip.price, "trip closed");
    }
}

fn ignore_foreign_ack(m: &mut FleetMember, trigger: &FleetTrigger, _: &mut Ctx) {
    if let FleetTrigger::DestinationReached { session } = trigger {
        warn!(
            member = %m.id,
            session = %session,
            "end-of-trip acknowledgement for another session ignored"
        );
    }
}

/// Transition table shared by every fleet member.
pub fn fleet_table() -> TransitionTable<FleetMember> {
    use FleetChoice as C;
    use FleetState as S;

    TransitionTable::new(S::AwaitServerRequest)
        .on_with(S::AwaitServerRequest, "get_location", S::AwaitRouteDetails, report_location)
        .on_with(S::AwaitServerRequest, "receive_route_details", S::Traveling, start_trip)
        .on_with(S::AwaitRouteDetails, "get_location", S::AwaitRouteDetails, report_location)
        .on_with(S::AwaitRouteDetails, "receive_route_details", S::Traveling, start_trip)
        .on_with(S::Traveling, "get_location", S::Traveling, report_location)
        .on_with(S::Traveling, "position_tick", S::Traveling, read_position)
        .choice(S::Traveling, "check_arrival", arrival, |b| {
            b.to_with(C::AtDestination, S::Arrived, announce_arrival)
                .to_with(C::NotYet, S::Traveling, rearm_check)
        })
        .on_with(S::Traveling, "travel_elapsed", S::Arrived, announce_arrival)
        .choice(S::Traveling, "destination_reached", trip_owner, |b| {
            b.to_with(C::OwnTrip, S::AwaitServerRequest, end_trip)
                .to_with(C::ForeignTrip, S::Traveling, ignore_foreign_ack)
        })
        .on_with(S::Arrived, "get_location", S::Arrived, report_location)
        .choice(S::Arrived, "destination_reached", trip_owner, |b| {
            b.to_with(C::OwnTrip, S::AwaitServerRequest, end_trip)
                .to_with(C::ForeignTrip, S::Arrived, ignore_foreign_ack)
        })
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Runs one [`FleetMember`] per roster entry and feeds them from `toClients`.
#[derive(Clone)]
pub struct FleetService {
    bus: EventBus,
    engine: Engine<FleetMember>,
}

impl FleetService {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            engine: Engine::new("fleet", fleet_table()),
        }
    }

    /// Record every member transition into `journal`.  Call before
    /// [`add_member`](Self::add_member).
    pub fn with_journal(mut self, journal: Journal<FleetState>) -> Self {
        self.engine = Engine::new("fleet", fleet_table()).with_journal(journal);
        self
    }

    /// Start one member.
    ///
    /// # Errors
    ///
    /// [`ScootError::DuplicateInstance`] if the id is already running.
    pub fn add_member(
        &self,
        member: SimMember,
        timing: FleetTiming,
    ) -> Result<MachineHandle<FleetMember>, ScootError> {
        let logic = FleetMember::new(member.id.as_str(), self.bus.clone(), member.source, timing);
        self.engine.spawn(&member.id, logic)
    }

    /// Start every member of `roster`.
    pub fn add_roster(
        &self,
        roster: Vec<SimMember>,
        timing: FleetTiming,
    ) -> Result<(), ScootError> {
        for member in roster {
            self.add_member(member, timing)?;
        }
        Ok(())
    }

    pub fn member(&self, id: &str) -> Option<MachineHandle<FleetMember>> {
        self.engine.handle(id)
    }

    /// Ids of the running members, sorted.
    pub fn members(&self) -> Vec<FleetMemberId> {
        self.engine.names()
    }

    pub fn handle_command(&self, command: Command) {
        let Some((member, trigger)) = FleetTrigger::from_command(command) else {
            return;
        };
        if let Err(e) = self.engine.send(&member, trigger) {
            debug!(member = %member, error = %e, "no such fleet member here");
        }
    }

    /// Subscribe to `toClients` and serve it on a background task.
    pub fn listen(&self) -> JoinHandle<()> {
        let receiver = self.bus.subscribe_to(Topic::ToClients);
        let mut service = self.clone();
        tokio::spawn(async move { pump(receiver, &mut service).await })
    }

    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}

impl CommandHandler for FleetService {
    fn handle(&mut self, _topic: Topic, command: Command) {
        self.handle_command(command);
    }
}
