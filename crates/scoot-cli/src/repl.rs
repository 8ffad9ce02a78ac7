//! REPL – Read-Eval-Print Loop for the scoot interactive shell.
//!
//! Supported slash-commands:
//!   /help            – show this list
//!   /simulate [n]    – run `n` scripted riders against a simulated fleet
//!   /ride            – take a trip yourself, answering on the terminal
//!   /serve           – serve the protocol over WebSocket with a simulated fleet
//!   /fleet           – show who holds which scooter on the running server
//!   /schema          – print the JSON schema of the wire commands
//!   /settings        – interactively edit `~/.scoot/config.toml`
//!   /quit | /exit    – gracefully exit the CLI

use colored::Colorize;
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use scoot_hal::positioning::LinearTrajectory;
use scoot_middleware::{EventBus, WsBridge};
use scoot_runtime::rider::{DEFAULT_DESTINATION, DEFAULT_RIDER_LOCATION};
use scoot_runtime::{
    DispatchServer, FleetService, RiderHandle, RiderState, ScriptedDecisions, Simulation,
    SimulationConfig,
};
use scoot_types::{Command, ScootError};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::error;

use crate::config::{self, Config};
use crate::prompt::{PromptDecisions, parse_location};

/// Distance a simulated rider covers per arrival check.
const RIDER_STEP: f64 = 5.0;

/// A protocol server started by `/serve`.
struct Service {
    port: u16,
    server: DispatchServer,
    fleet: FleetService,
    tasks: Vec<JoinHandle<()>>,
}

impl Service {
    fn stop(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.server.shutdown();
        self.fleet.shutdown();
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(shutdown: Arc<AtomicBool>) {
    let runtime = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start the async runtime".red(), e);
            return;
        }
    };
    let mut service: Option<Service> = None;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "scoot>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            continue;
        };

        let outcome = match cmd {
            "/help" => {
                cmd_help();
                Ok(())
            }
            "/simulate" => {
                let riders = words.next().and_then(|n| n.parse::<usize>().ok()).unwrap_or(1);
                cmd_simulate(&runtime, riders)
            }
            "/ride" => cmd_ride(&runtime, &shutdown),
            "/serve" => cmd_serve(&runtime, &mut service),
            "/fleet" => {
                cmd_fleet(service.as_ref());
                Ok(())
            }
            "/schema" => {
                cmd_schema();
                Ok(())
            }
            "/settings" => {
                cmd_settings();
                Ok(())
            }
            "/quit" | "/exit" => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            other => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
                Ok(())
            }
        };

        if let Err(e) = outcome {
            println!("{}: {}", "Error".red(), e);
        }
    }

    if let Some(service) = service.take() {
        service.stop();
    }
    // Pending terminal prompts sit on the blocking pool; do not wait for them.
    runtime.shutdown_timeout(Duration::from_millis(500));
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "scoot Commands".bold().underline());
    println!("  {}  – run n scripted riders (default 1)", "/simulate [n]".bold().cyan());
    println!("  {}          – take a trip yourself", "/ride".bold().cyan());
    println!("  {}         – serve the protocol over WebSocket", "/serve".bold().cyan());
    println!("  {}         – show scooter claims on the server", "/fleet".bold().cyan());
    println!("  {}        – print the wire command schema", "/schema".bold().cyan());
    println!("  {}      – edit ~/.scoot/config.toml", "/settings".bold().cyan());
    println!("  {}   – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_simulate(runtime: &Runtime, riders: usize) -> Result<(), ScootError> {
    let settings = load_config_or_default().simulation();
    println!(
        "  Simulating {} rider(s) against {} scooter(s) …",
        riders.to_string().bold(),
        settings.fleet_size.to_string().bold()
    );

    runtime.block_on(async {
        let (sim, mut journals) = Simulation::start(&settings)?;
        let mut handles = Vec::with_capacity(riders);
        for i in 0..riders {
            let source = LinearTrajectory::new(DEFAULT_RIDER_LOCATION, RIDER_STEP);
            let decisions = ScriptedDecisions::new(DEFAULT_DESTINATION);
            handles.push(sim.ride(&format!("phone_{i}"), Box::new(source), Arc::new(decisions))?);
        }

        let deadline = tokio::time::Instant::now() + trip_budget(&settings);
        for handle in &handles {
            let _ = tokio::time::timeout_at(deadline, handle.finished()).await;
            print_rider(handle);
        }

        println!();
        println!("{}", "  Dispatch transitions".bold().underline());
        while let Ok(record) = journals.dispatch.try_recv() {
            println!(
                "    {:<10} {:?} {} {:?}",
                record.machine.dimmed(),
                record.from,
                format!("--{}-->", record.trigger).cyan(),
                record.to
            );
        }
        println!();

        sim.shutdown();
        Ok::<(), ScootError>(())
    })
}

fn cmd_ride(runtime: &Runtime, shutdown: &AtomicBool) -> Result<(), ScootError> {
    let cfg = load_config_or_default();
    let settings = cfg.simulation();

    runtime.block_on(async {
        let (sim, _journals) = Simulation::start(&settings)?;
        let source = LinearTrajectory::new(DEFAULT_RIDER_LOCATION, RIDER_STEP);
        let rider = sim.ride(
            &cfg.rider_name,
            Box::new(source),
            Arc::new(PromptDecisions::new(DEFAULT_DESTINATION)),
        )?;

        let traveling = until_done(rider.wait_for(|s| *s == RiderState::Traveling), shutdown).await;
        if !matches!(traveling, Some(Ok(_))) {
            println!("  {}", "Trip abandoned.".yellow());
            sim.shutdown();
            return Ok::<(), ScootError>(());
        }
        println!("  {} Trip started.", "✓".green().bold());

        sim.riders().ask_price(&cfg.rider_name)?;
        sim.riders().ask_distance(&cfg.rider_name)?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let display = rider.display();
        if let (Some(price), Some(distance)) =
            (display.price_remaining, display.distance_remaining)
        {
            println!("  Remaining: {distance:.2} distance units, {price:.2} to pay");
        }

        let _ = until_done(rider.finished(), shutdown).await;
        print_rider(&rider);
        sim.shutdown();
        Ok::<(), ScootError>(())
    })
}

fn cmd_serve(runtime: &Runtime, service: &mut Option<Service>) -> Result<(), ScootError> {
    if let Some(running) = service {
        println!("  Already serving on port {}.", running.port.to_string().bold());
        return Ok(());
    }

    let cfg = load_config_or_default();
    let settings = cfg.simulation();
    let members = settings.roster();
    let roster: Vec<_> = members.iter().map(|m| m.id.clone()).collect();

    let _guard = runtime.enter();
    let bus = EventBus::new(settings.bus_capacity);
    let server = DispatchServer::new(bus.clone(), roster, settings.pricing);
    let fleet = FleetService::new(bus.clone());
    fleet.add_roster(members, settings.fleet)?;

    let addr = SocketAddr::from(([127, 0, 0, 1], cfg.bridge_port));
    let bridge = WsBridge::new(bus);
    let bridge_task = runtime.spawn(async move {
        if let Err(e) = bridge.run_ws_server(addr).await {
            error!(error = %e, "WebSocket bridge stopped");
        }
    });

    let tasks = vec![server.listen(), fleet.listen(), bridge_task];
    println!(
        "  {} Serving {} scooter(s) on {}",
        "✓".green().bold(),
        fleet.members().len().to_string().bold(),
        format!("ws://{addr}").yellow()
    );
    *service = Some(Service {
        port: cfg.bridge_port,
        server,
        fleet,
        tasks,
    });
    Ok(())
}

fn cmd_fleet(service: Option<&Service>) {
    let Some(service) = service else {
        println!("  No server running.  Start one with {}.", "/serve".bold());
        return;
    };

    println!("{}", "Fleet".bold().underline());
    for (member, holder) in service.server.book().snapshot() {
        let state = service
            .fleet
            .member(&member)
            .map(|m| format!("{:?}", m.state()))
            .unwrap_or_else(|| "offline".to_string());
        let holder = match holder {
            Some(key) => key.yellow().to_string(),
            None => "free".green().to_string(),
        };
        println!("  {:<14} {:<20} {}", member.bold(), state.dimmed(), holder);
    }

    let sessions = service.server.registry().keys();
    if !sessions.is_empty() {
        println!("  Active sessions: {}", sessions.join(", ").bold());
    }
}

fn cmd_schema() {
    let schema = schemars::schema_for!(Command);
    match serde_json::to_string_pretty(&schema) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{}: {}", "Error rendering schema".red(), e),
    }
}

fn cmd_settings() {
    let mut cfg = match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {}", "Error loading config".red(), e);
            return;
        }
    };

    println!("{}", "Settings Editor".bold().underline());
    cfg.rider_name = prompt_str(
        &format!("  Rider name     [{}]: ", cfg.rider_name),
        &cfg.rider_name,
    );
    cfg.fleet_size = prompt_parsed(
        &format!("  Fleet size     [{}]: ", cfg.fleet_size),
        cfg.fleet_size,
    );
    cfg.bridge_port = prompt_parsed(
        &format!("  Bridge port    [{}]: ", cfg.bridge_port),
        cfg.bridge_port,
    );
    cfg.price_rate = prompt_parsed(
        &format!("  Price rate     [{}]: ", cfg.price_rate),
        cfg.price_rate,
    );
    cfg.max_trip_secs = prompt_parsed(
        &format!("  Max trip (s)   [{}]: ", cfg.max_trip_secs),
        cfg.max_trip_secs,
    );

    let origin = prompt_str("  Check a destination x,y (Enter to skip): ", "");
    if let Some(destination) = parse_location(&origin) {
        let quote = cfg.simulation().pricing.quote(DEFAULT_RIDER_LOCATION, destination);
        println!(
            "  From {} that is {:.2} units for {:.2}",
            DEFAULT_RIDER_LOCATION, quote.distance, quote.price
        );
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Settings saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn trip_budget(settings: &SimulationConfig) -> Duration {
    settings.rider.max_trip + Duration::from_secs(5)
}

/// Drive `fut` to completion unless `shutdown` is raised first.
async fn until_done<F: Future>(fut: F, shutdown: &AtomicBool) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if shutdown.load(Ordering::SeqCst) {
                    return None;
                }
            }
        }
    }
}

fn print_rider(handle: &RiderHandle) {
    let display = handle.display();
    let state = handle.state();
    let marker = if state == RiderState::Arrived { "✓".green().bold() } else { "✗".red().bold() };
    let scooter = display.selected.as_deref().unwrap_or("-");
    let fare = display
        .quote
        .map(|q| format!("{:.2} units, {:.2}", q.distance, q.price))
        .unwrap_or_else(|| "no quote".to_string());
    println!(
        "  {} {:<10} {:<12} {:<24} {:?}",
        marker,
        handle.name().bold(),
        scooter,
        fare,
        state
    );
}

fn load_config_or_default() -> Config {
    match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {} – using defaults", "Config error".red(), e);
            Config::default()
        }
    }
}

/// Prompt for a value of type `T`.  Returns `default` on Enter or bad input.
fn prompt_parsed<T: std::str::FromStr + std::fmt::Display + Copy>(msg: &str, default: T) -> T {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            println!("  {} '{}' is not valid, keeping {}", "Warning:".yellow(), raw, default);
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() { default.to_string() } else { trimmed }
        }
        Err(_) => default.to_string(),
    }
}
