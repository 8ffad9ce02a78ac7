//! `scoot-types` – shared vocabulary of the Scoot workspace.
//!
//! Every actor (rider device, fleet member, dispatch server) speaks the same
//! wire protocol: a JSON object carrying a `command` discriminator plus the
//! command-specific fields, one of which is always the correlation key
//! (`phone_name`, `server_name` or `escooter_name`) used to route the message
//! to the right state machine instance.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Rider identity; selects exactly one dispatch session while it is active.
pub type SessionKey = String;

/// Stable identifier of a scooter.
pub type FleetMemberId = String;

// ─────────────────────────────────────────────────────────────────────────────
// Location
// ─────────────────────────────────────────────────────────────────────────────

/// A 2-D coordinate.  Serialised as a two-element array `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Location(pub f64, pub f64);

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self(x, y)
    }

    pub fn x(&self) -> f64 {
        self.0
    }

    pub fn y(&self) -> f64 {
        self.1
    }

    /// Manhattan distance scaled by one half.
    ///
    /// This is the placeholder metric used for every distance the server
    /// reports: candidate distance, route distance and remaining distance.
    pub fn half_manhattan(&self, other: &Location) -> f64 {
        ((other.0 - self.0).abs() + (other.1 - self.1).abs()) / 2.0
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire commands
// ─────────────────────────────────────────────────────────────────────────────

/// One scooter as reported in an `escooters_list` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EscooterInfo {
    pub id: FleetMemberId,
    pub location: Location,
    pub busy: bool,
}

/// Every message exchanged over the `toServer` and `toClients` channels.
///
/// The enum is internally tagged by the `command` field so the JSON shape is
/// flat: `{"command": "phone_location", "location": [0, 0], "phone_name": "p1"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// rider → server: start of a trip.
    PhoneLocation {
        phone_name: SessionKey,
        location: Location,
    },
    /// server → fleet: location query, one per fleet member.
    GetLocation {
        escooter_name: FleetMemberId,
        server_name: SessionKey,
        phone_location: Location,
    },
    /// fleet → server: reply to `get_location`.
    ReceiveEscooterLocation {
        escooter_id: FleetMemberId,
        server_name: SessionKey,
        location: Location,
        escooter_busy: bool,
    },
    /// server → rider: available scooters with their distance to the rider.
    /// `distance[i]` belongs to `escooters[i]`.
    EscootersList {
        phone_name: SessionKey,
        escooters: Vec<EscooterInfo>,
        distance: Vec<f64>,
    },
    /// rider → server: the rider picked a scooter.
    SelectedEscooter {
        phone_name: SessionKey,
        escooter: FleetMemberId,
    },
    /// rider → server: trip destination.
    ExchangeDestination {
        phone_name: SessionKey,
        location: Location,
        destination: Location,
    },
    /// server → rider: quoted route.
    SuggestRoute {
        phone_name: SessionKey,
        distance: f64,
        price: f64,
    },
    /// rider → server: answer to `suggest_route`.
    RouteConfirmed {
        phone_name: SessionKey,
        confirm: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        price: Option<f64>,
    },
    /// server → fleet: the confirmed trip for a claimed scooter.
    ReceiveRouteDetails {
        escooter_name: FleetMemberId,
        server_name: SessionKey,
        destination: Location,
        price: f64,
    },
    /// rider → server: remaining price query while traveling.
    AskPrice {
        phone_name: SessionKey,
        location: Location,
    },
    /// rider → server: remaining distance query while traveling.
    AskDistance {
        phone_name: SessionKey,
        location: Location,
    },
    /// server → rider.
    PriceRemaining { phone_name: SessionKey, price: f64 },
    /// server → rider.
    DistanceRemaining { phone_name: SessionKey, distance: f64 },
    /// fleet → server: the scooter considers its trip finished.
    EscooterArrived {
        escooter_name: FleetMemberId,
        server_name: SessionKey,
    },
    /// rider → server: the rider left the service area mid-trip.
    UserOutOfBounds { phone_name: SessionKey },
    /// rider → server on `toServer`; server → fleet acknowledgement on
    /// `toClients`.
    DestinationReached {
        phone_name: SessionKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        escooter: Option<FleetMemberId>,
    },
}

/// Every `command` discriminator the protocol knows about.
pub const COMMAND_NAMES: &[&str] = &[
    "phone_location",
    "get_location",
    "receive_escooter_location",
    "escooters_list",
    "selected_escooter",
    "exchange_destination",
    "suggest_route",
    "route_confirmed",
    "receive_route_details",
    "ask_price",
    "ask_distance",
    "price_remaining",
    "distance_remaining",
    "escooter_arrived",
    "user_out_of_bounds",
    "destination_reached",
];

impl Command {
    /// The wire discriminator of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::PhoneLocation { .. } => "phone_location",
            Command::GetLocation { .. } => "get_location",
            Command::ReceiveEscooterLocation { .. } => "receive_escooter_location",
            Command::EscootersList { .. } => "escooters_list",
            Command::SelectedEscooter { .. } => "selected_escooter",
            Command::ExchangeDestination { .. } => "exchange_destination",
            Command::SuggestRoute { .. } => "suggest_route",
            Command::RouteConfirmed { .. } => "route_confirmed",
            Command::ReceiveRouteDetails { .. } => "receive_route_details",
            Command::AskPrice { .. } => "ask_price",
            Command::AskDistance { .. } => "ask_distance",
            Command::PriceRemaining { .. } => "price_remaining",
            Command::DistanceRemaining { .. } => "distance_remaining",
            Command::EscooterArrived { .. } => "escooter_arrived",
            Command::UserOutOfBounds { .. } => "user_out_of_bounds",
            Command::DestinationReached { .. } => "destination_reached",
        }
    }

    /// `true` if `name` is a discriminator this protocol defines.
    pub fn is_known(name: &str) -> bool {
        COMMAND_NAMES.contains(&name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus frame
// ─────────────────────────────────────────────────────────────────────────────

/// A raw frame travelling over the event bus.
///
/// The payload is kept as bytes so that decoding (and its failure modes) is
/// the receiving actor's concern, exactly as it would be behind a real broker.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "scoot-runtime::dispatch"
    pub source: String,
    pub payload: Vec<u8>,
}

impl Event {
    /// Wrap an already-encoded payload.
    pub fn raw(source: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload: payload.into(),
        }
    }

    /// Encode `command` as JSON and wrap it.
    pub fn command(source: impl Into<String>, command: &Command) -> Result<Self, ScootError> {
        let payload =
            serde_json::to_vec(command).map_err(|e| ScootError::Serialization(e.to_string()))?;
        Ok(Self::raw(source, payload))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type shared by every crate in the workspace.
///
/// None of these is fatal: the runtime loops log them and carry on.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScootError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Missing or invalid field for '{command}': {details}")]
    MissingField { command: String, details: String },

    #[error("No transition for '{trigger}' in state {state} of machine '{machine}'")]
    InvalidTransition {
        machine: String,
        state: String,
        trigger: String,
    },

    #[error("Unknown instance '{0}'")]
    UnknownInstance(String),

    #[error("Instance '{0}' already exists")]
    DuplicateInstance(String),

    #[error("Session '{0}' is already active")]
    DuplicateSessionStart(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_serialises_as_pair() {
        let json = serde_json::to_string(&Location::new(6.5, 10.0)).unwrap();
        assert_eq!(json, "[6.5,10.0]");
        let back: Location = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(back, Location::new(1.0, 2.0));
    }

    #[test]
    fn half_manhattan_matches_placeholder_formula() {
        let origin = Location::new(0.0, 0.0);
        assert_eq!(origin.half_manhattan(&Location::new(10.0, 0.0)), 5.0);
        assert_eq!(origin.half_manhattan(&Location::new(-3.0, 5.0)), 4.0);
        assert_eq!(origin.half_manhattan(&origin), 0.0);
    }

    #[test]
    fn command_uses_flat_command_tag() {
        let cmd = Command::PhoneLocation {
            phone_name: "phone".into(),
            location: Location::new(0.0, 0.0),
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["command"], "phone_location");
        assert_eq!(value["phone_name"], "phone");
        assert_eq!(value["location"], serde_json::json!([0.0, 0.0]));
    }

    #[test]
    fn command_name_matches_serde_tag() {
        let samples = vec![
            Command::GetLocation {
                escooter_name: "escooter_1".into(),
                server_name: "phone".into(),
                phone_location: Location::new(1.0, 1.0),
            },
            Command::RouteConfirmed {
                phone_name: "phone".into(),
                confirm: false,
                price: None,
            },
            Command::DestinationReached {
                phone_name: "phone".into(),
                escooter: Some("escooter_2".into()),
            },
            Command::UserOutOfBounds {
                phone_name: "phone".into(),
            },
        ];
        for cmd in samples {
            let value = serde_json::to_value(&cmd).unwrap();
            assert_eq!(value["command"], cmd.name());
            assert!(Command::is_known(cmd.name()));
        }
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let raw = r#"{"command":"route_confirmed","phone_name":"p","confirm":true}"#;
        let cmd: Command = serde_json::from_str(raw).unwrap();
        assert_eq!(
            cmd,
            Command::RouteConfirmed {
                phone_name: "p".into(),
                confirm: true,
                price: None
            }
        );
    }

    #[test]
    fn event_command_encodes_json_payload() {
        let cmd = Command::AskPrice {
            phone_name: "p".into(),
            location: Location::new(2.0, 3.0),
        };
        let event = Event::command("test", &cmd).unwrap();
        let back: Command = serde_json::from_slice(&event.payload).unwrap();
        assert_eq!(back, cmd);
        assert_eq!(event.source, "test");
    }

    #[test]
    fn scoot_error_display() {
        let err = ScootError::DuplicateSessionStart("phone".into());
        assert!(err.to_string().contains("already active"));

        let err = ScootError::InvalidTransition {
            machine: "phone".into(),
            state: "Idle".into(),
            trigger: "suggest_route".into(),
        };
        assert!(err.to_string().contains("suggest_route"));
    }
}
