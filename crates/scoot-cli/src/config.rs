//! Configuration – reads/writes `~/.scoot/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scoot_runtime::{FleetTiming, Pricing, RiderTiming, SimulationConfig};

/// Persisted user configuration stored in `~/.scoot/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Session key used by `/ride`.
    #[serde(default = "default_rider_name")]
    pub rider_name: String,

    /// Number of simulated scooters.
    #[serde(default = "default_fleet_size")]
    pub fleet_size: usize,

    /// Side of the square area simulated scooters are scattered over.
    #[serde(default = "default_area_size")]
    pub area_size: f64,

    /// Fixed seed for scooter positions; random when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// WebSocket port used by `/serve`.
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,

    /// Price per distance unit.
    #[serde(default = "default_price_rate")]
    pub price_rate: f64,

    #[serde(default = "default_arrival_check_ms")]
    pub arrival_check_ms: u64,

    /// Trip length after which a rider considers the destination reached.
    #[serde(default = "default_max_trip_secs")]
    pub max_trip_secs: u64,

    /// Trip length after which a scooter declares arrival.
    #[serde(default = "default_fleet_travel_secs")]
    pub fleet_travel_secs: u64,

    #[serde(default = "default_position_check_ms")]
    pub position_check_ms: u64,

    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_rider_name() -> String {
    "phone_0".to_string()
}
fn default_fleet_size() -> usize {
    3
}
fn default_area_size() -> f64 {
    100.0
}
fn default_bridge_port() -> u16 {
    9090
}
fn default_price_rate() -> f64 {
    scoot_runtime::PRICE_RATE
}
fn default_arrival_check_ms() -> u64 {
    1000
}
fn default_max_trip_secs() -> u64 {
    10
}
fn default_fleet_travel_secs() -> u64 {
    10
}
fn default_position_check_ms() -> u64 {
    1000
}
fn default_bus_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rider_name: default_rider_name(),
            fleet_size: default_fleet_size(),
            area_size: default_area_size(),
            seed: None,
            bridge_port: default_bridge_port(),
            price_rate: default_price_rate(),
            arrival_check_ms: default_arrival_check_ms(),
            max_trip_secs: default_max_trip_secs(),
            fleet_travel_secs: default_fleet_travel_secs(),
            position_check_ms: default_position_check_ms(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl Config {
    /// Runtime settings derived from this config.
    pub fn simulation(&self) -> SimulationConfig {
        SimulationConfig {
            fleet_size: self.fleet_size,
            area_size: self.area_size,
            seed: self.seed,
            pricing: Pricing::new(self.price_rate),
            rider: RiderTiming {
                arrival_check: Duration::from_millis(self.arrival_check_ms.max(1)),
                max_trip: Duration::from_secs(self.max_trip_secs),
            },
            fleet: FleetTiming {
                travel: Duration::from_secs(self.fleet_travel_secs),
                position_check: Duration::from_millis(self.position_check_ms.max(1)),
            },
            bus_capacity: self.bus_capacity.max(1),
        }
    }
}

/// Return the path to `~/.scoot/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".scoot").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `SCOOT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SCOOT_RIDER_NAME` | `rider_name` |
/// | `SCOOT_FLEET_SIZE` | `fleet_size` |
/// | `SCOOT_BRIDGE_PORT` | `bridge_port` |
/// | `SCOOT_PRICE_RATE` | `price_rate` |
/// | `SCOOT_SEED` | `seed` |
/// | `SCOOT_AREA_SIZE` | `area_size` |
/// | `SCOOT_ARRIVAL_CHECK_MS` | `arrival_check_ms` |
/// | `SCOOT_MAX_TRIP_SECS` | `max_trip_secs` |
/// | `SCOOT_FLEET_TRAVEL_SECS` | `fleet_travel_secs` |
/// | `SCOOT_BUS_CAPACITY` | `bus_capacity` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SCOOT_RIDER_NAME")
        && !v.trim().is_empty()
    {
        cfg.rider_name = v;
    }
    if let Ok(v) = std::env::var("SCOOT_FLEET_SIZE")
        && let Ok(size) = v.parse::<usize>()
    {
        cfg.fleet_size = size;
    }
    if let Ok(v) = std::env::var("SCOOT_BRIDGE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.bridge_port = port;
    }
    if let Ok(v) = std::env::var("SCOOT_PRICE_RATE")
        && let Ok(rate) = v.parse::<f64>()
        && rate.is_finite()
        && rate >= 0.0
    {
        cfg.price_rate = rate;
    }
    if let Ok(v) = std::env::var("SCOOT_SEED")
        && let Ok(seed) = v.parse::<u64>()
    {
        cfg.seed = Some(seed);
    }
    if let Ok(v) = std::env::var("SCOOT_AREA_SIZE")
        && let Ok(size) = v.parse::<f64>()
        && size.is_finite()
        && size > 0.0
    {
        cfg.area_size = size;
    }
    if let Some(ms) = env_u64("SCOOT_ARRIVAL_CHECK_MS") {
        cfg.arrival_check_ms = ms;
    }
    if let Some(secs) = env_u64("SCOOT_MAX_TRIP_SECS") {
        cfg.max_trip_secs = secs;
    }
    if let Some(secs) = env_u64("SCOOT_FLEET_TRAVEL_SECS") {
        cfg.fleet_travel_secs = secs;
    }
    if let Ok(v) = std::env::var("SCOOT_BUS_CAPACITY")
        && let Ok(capacity) = v.parse::<usize>()
        && capacity > 0
    {
        cfg.bus_capacity = capacity;
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

/// Save the config to disk, creating `~/.scoot/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode =
            std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.seed = Some(42);
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.fleet_size, 3);
        assert_eq!(loaded.bridge_port, 9090);
        assert_eq!(loaded.seed, Some(42));
        assert_eq!(loaded.price_rate, 0.05);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: Config = toml::from_str("fleet_size = 7\n").expect("parse");
        assert_eq!(cfg.fleet_size, 7);
        assert_eq!(cfg.rider_name, "phone_0");
        assert_eq!(cfg.max_trip_secs, 10);
    }

    #[test]
    fn config_path_points_to_scoot_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".scoot"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn simulation_settings_follow_the_config() {
        let cfg = Config {
            fleet_size: 5,
            price_rate: 0.1,
            max_trip_secs: 30,
            ..Config::default()
        };
        let sim = cfg.simulation();
        assert_eq!(sim.fleet_size, 5);
        assert_eq!(sim.pricing.rate, 0.1);
        assert_eq!(sim.rider.max_trip, Duration::from_secs(30));
        assert_eq!(sim.fleet.travel, Duration::from_secs(10));
    }

    #[test]
    fn apply_env_overrides_changes_fleet_size() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("SCOOT_FLEET_SIZE", "12") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.fleet_size, 12);
        unsafe { std::env::remove_var("SCOOT_FLEET_SIZE") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("SCOOT_BRIDGE_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bridge_port, 9090);
        unsafe { std::env::remove_var("SCOOT_BRIDGE_PORT") };
    }

    #[test]
    fn apply_env_overrides_rejects_negative_rate() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("SCOOT_PRICE_RATE", "-1") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.price_rate, 0.05);
        unsafe { std::env::remove_var("SCOOT_PRICE_RATE") };
    }

    #[test]
    fn apply_env_overrides_sets_trip_timing() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("SCOOT_MAX_TRIP_SECS", "45") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.max_trip_secs, 45);
        assert_eq!(cfg.simulation().rider.max_trip, Duration::from_secs(45));
        unsafe { std::env::remove_var("SCOOT_MAX_TRIP_SECS") };
    }
}
