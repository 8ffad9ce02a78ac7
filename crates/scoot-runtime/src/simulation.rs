//! In-process wiring of the whole system on one bus: the dispatch server, a
//! simulated fleet and any number of riders.
//!
//! Every machine kind records its transitions into a [`Journals`] channel,
//! so callers can replay a run after the fact.

use std::sync::Arc;

use scoot_hal::positioning::LocationSource;
use scoot_hal::sim::{SimFleet, SimMember};
use scoot_kernel::TransitionRecord;
use scoot_middleware::EventBus;
use scoot_types::{FleetMemberId, ScootError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::decision::DecisionSource;
use crate::dispatch::DispatchState;
use crate::fleet::{FleetService, FleetState, FleetTiming};
use crate::pricing::Pricing;
use crate::rider::{RiderApp, RiderHandle, RiderState, RiderTiming};
use crate::server::DispatchServer;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub fleet_size: usize,
    /// Side of the square area random scooters are placed in.
    pub area_size: f64,
    /// `None` seeds scooter positions from OS entropy.
    pub seed: Option<u64>,
    pub pricing: Pricing,
    pub rider: RiderTiming,
    pub fleet: FleetTiming,
    pub bus_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fleet_size: 3,
            area_size: 100.0,
            seed: None,
            pricing: Pricing::default(),
            rider: RiderTiming::default(),
            fleet: FleetTiming::default(),
            bus_capacity: 256,
        }
    }
}

impl SimulationConfig {
    /// Random roster of `fleet_size` scooters.
    pub fn roster(&self) -> Vec<SimMember> {
        SimFleet::builder()
            .with_random_members(self.fleet_size, self.area_size, self.seed)
            .build()
    }
}

/// Transition logs of one run.
pub struct Journals {
    pub dispatch: mpsc::UnboundedReceiver<TransitionRecord<DispatchState>>,
    pub fleet: mpsc::UnboundedReceiver<TransitionRecord<FleetState>>,
    pub rider: mpsc::UnboundedReceiver<TransitionRecord<RiderState>>,
}

pub struct Simulation {
    bus: EventBus,
    server: DispatchServer,
    fleet: FleetService,
    riders: RiderApp,
    listeners: Vec<JoinHandle<()>>,
}

impl Simulation {
    /// Start the server for `server_roster`, run `members` as the fleet and
    /// open the rider app.
    ///
    /// The server's roster and the running fleet are separate so a run can
    /// model scooters that never answer.
    pub fn start_with(
        config: &SimulationConfig,
        server_roster: Vec<FleetMemberId>,
        members: Vec<SimMember>,
    ) -> Result<(Self, Journals), ScootError> {
        let bus = EventBus::new(config.bus_capacity);
        let (dispatch_tx, dispatch) = mpsc::unbounded_channel();
        let (fleet_tx, fleet_rx) = mpsc::unbounded_channel();
        let (rider_tx, rider) = mpsc::unbounded_channel();

        let server =
            DispatchServer::new(bus.clone(), server_roster, config.pricing)
                .with_journal(dispatch_tx);
        let fleet = FleetService::new(bus.clone()).with_journal(fleet_tx);
        fleet.add_roster(members, config.fleet)?;
        let riders = RiderApp::new(bus.clone(), config.rider).with_journal(rider_tx);

        let listeners = vec![server.listen(), fleet.listen(), riders.listen()];
        info!(fleet = fleet.members().len(), roster = server.book().len(), "simulation started");

        let simulation = Self {
            bus,
            server,
            fleet,
            riders,
            listeners,
        };
        let journals = Journals {
            dispatch,
            fleet: fleet_rx,
            rider,
        };
        Ok((simulation, journals))
    }

    /// Start with the roster built from `config`; every scooter is known to
    /// the server.
    pub fn start(config: &SimulationConfig) -> Result<(Self, Journals), ScootError> {
        let members = config.roster();
        let roster = members.iter().map(|m| m.id.clone()).collect();
        Self::start_with(config, roster, members)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn server(&self) -> &DispatchServer {
        &self.server
    }

    pub fn fleet(&self) -> &FleetService {
        &self.fleet
    }

    pub fn riders(&self) -> &RiderApp {
        &self.riders
    }

    /// Start a trip for rider `name`.
    pub fn ride(
        &self,
        name: &str,
        source: Box<dyn LocationSource>,
        decisions: Arc<dyn DecisionSource>,
    ) -> Result<RiderHandle, ScootError> {
        self.riders.start_trip(name, source, decisions)
    }

    /// Stop every machine and listener.
    pub fn shutdown(self) {
        for listener in &self.listeners {
            listener.abort();
        }
        self.riders.shutdown();
        self.server.shutdown();
        self.fleet.shutdown();
        info!("simulation stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roster_has_fleet_size_members() {
        let config = SimulationConfig {
            fleet_size: 4,
            seed: Some(3),
            ..SimulationConfig::default()
        };
        let ids: Vec<_> = config.roster().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["escooter_0", "escooter_1", "escooter_2", "escooter_3"]);
    }

    #[tokio::test]
    async fn start_registers_the_fleet_with_the_server() -> Result<(), Box<dyn std::error::Error>> {
        let config = SimulationConfig {
            fleet_size: 2,
            seed: Some(1),
            ..SimulationConfig::default()
        };
        let (simulation, _journals) = Simulation::start(&config)?;
        assert_eq!(simulation.server().book().roster(), simulation.fleet().members());
        assert_eq!(simulation.fleet().members().len(), 2);
        simulation.shutdown();
        Ok(())
    }
}
