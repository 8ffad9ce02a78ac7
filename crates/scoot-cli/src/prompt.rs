//! Terminal-backed rider decisions for `/ride`.

use async_trait::async_trait;
use colored::Colorize;
use std::io::{self, BufRead, Write};

use scoot_runtime::{CandidateOffer, DecisionSource};
use scoot_types::{FleetMemberId, Location};

/// Asks the user on stdin.  Reads run on the blocking pool so the rider's
/// machine keeps processing server messages meanwhile.
pub struct PromptDecisions {
    default_destination: Location,
}

impl PromptDecisions {
    pub fn new(default_destination: Location) -> Self {
        Self { default_destination }
    }
}

#[async_trait]
impl DecisionSource for PromptDecisions {
    async fn choose_member(&self, offers: &[CandidateOffer]) -> Option<FleetMemberId> {
        if offers.is_empty() {
            println!("  {}", "No scooter available right now.".yellow());
            return None;
        }
        println!();
        println!("{}", "  Scooters nearby".bold().underline());
        for (i, offer) in offers.iter().enumerate() {
            println!(
                "    {}) {}  at {}  ({} away)",
                i + 1,
                offer.id.bold(),
                offer.location,
                format!("{:.2}", offer.distance).yellow()
            );
        }
        let answer = read_line("  Pick a scooter [1]: ".to_string(), "1").await;
        pick_offer(offers, &answer)
    }

    async fn choose_destination(&self, from: Location) -> Location {
        let default = self.default_destination;
        println!("  You are at {}.", from.to_string().bold());
        let prompt = format!("  Destination x,y [{},{}]: ", default.x(), default.y());
        let answer = read_line(prompt, "").await;
        parse_location(&answer).unwrap_or(default)
    }

    async fn confirm_route(&self, distance: f64, price: f64) -> bool {
        println!(
            "  Route: {} distance units for {}",
            format!("{distance:.2}").bold(),
            format!("{price:.2}").green().bold()
        );
        let answer = read_line("  Confirm? [Y/n]: ".to_string(), "y").await;
        !answer.eq_ignore_ascii_case("n") && !answer.eq_ignore_ascii_case("no")
    }
}

async fn read_line(prompt: String, default: &'static str) -> String {
    tokio::task::spawn_blocking(move || {
        print!("{prompt}");
        io::stdout().flush().ok();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) if !line.trim().is_empty() => line.trim().to_string(),
            _ => default.to_string(),
        }
    })
    .await
    .unwrap_or_else(|_| default.to_string())
}

/// `answer` is a 1-based index or a scooter id.
fn pick_offer(offers: &[CandidateOffer], answer: &str) -> Option<FleetMemberId> {
    if let Ok(index) = answer.parse::<usize>() {
        return index.checked_sub(1).and_then(|i| offers.get(i)).map(|o| o.id.clone());
    }
    offers.iter().find(|o| o.id == answer).map(|o| o.id.clone())
}

/// Parse `x,y` (spaces allowed).
pub(crate) fn parse_location(raw: &str) -> Option<Location> {
    let (x, y) = raw.split_once(',')?;
    let x = x.trim().parse::<f64>().ok()?;
    let y = y.trim().parse::<f64>().ok()?;
    (x.is_finite() && y.is_finite()).then(|| Location::new(x, y))
}
