//! `scoot-cli` – scooter dispatch command line interface
//!
//! This binary is the entry point for the scooter dispatch stack.  It:
//!
//! 1. Checks for `~/.scoot/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Drops the user into an **interactive REPL** with slash-commands
//!    (`/simulate`, `/ride`, `/serve`, `/fleet`, `/schema`, `/settings`,
//!    `/help`).
//! 3. Intercepts **Ctrl-C** to abandon any running trip and exit.

mod config;
mod prompt;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

fn main() {
    // RUST_LOG filters, SCOOT_LOG_FORMAT=json switches to JSON lines and
    // OTEL_EXPORTER_OTLP_ENDPOINT enables span export.  User-facing output
    // still goes through println!.
    let _telemetry = scoot_runtime::telemetry::init_tracing("scoot");

    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – abandoning running trips …".yellow().bold());
        println!("{}", "  ✓ Exiting scoot.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(
            error = %e,
            "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available"
        );
    }

    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    println!(
        "  Fleet of {} scooter(s), fare {} per unit, bridge port {}",
        cfg.fleet_size.to_string().bold(),
        cfg.price_rate.to_string().bold(),
        cfg.bridge_port.to_string().bold()
    );
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(shutdown);
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        scoot First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up scoot.\n");

    let mut cfg = config::Config::default();

    let name = prompt_line(&format!("  Rider name [{}]: ", cfg.rider_name), &cfg.rider_name);
    cfg.rider_name = name;

    let size = prompt_line(
        &format!("  Simulated fleet size [{}]: ", cfg.fleet_size),
        &cfg.fleet_size.to_string(),
    );
    if let Ok(n) = size.trim().parse::<usize>() {
        cfg.fleet_size = n;
    }

    let port = prompt_line(
        &format!("  WebSocket bridge port [{}]: ", cfg.bridge_port),
        &cfg.bridge_port.to_string(),
    );
    if let Ok(p) = port.trim().parse::<u16>() {
        cfg.bridge_port = p;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___________  ____  ______"#.bold().cyan());
    println!("{}", r#"  / __/ ___/ __ \/ __ \/_  __/"#.bold().cyan());
    println!("{}", r#" _\ \/ /__/ /_/ / /_/ / / /   "#.bold().cyan());
    println!("{}", r#"/___/\___/\____/\____/ /_/    "#.bold().cyan());
    println!();
    println!("  {} {}", "scoot".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Scooter dispatch over a pub/sub bus");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
