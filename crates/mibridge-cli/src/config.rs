//! Configuration – reads/writes `~/.mibridge/config.toml`.
//!
//! ```toml
//! failover_delay_ms = 1000
//! bus_capacity = 256
//!
//! [[gateways]]
//! id = "gw-kitchen"
//!
//! [[gateways]]
//! id = "gw-hall"
//! available = false
//!
//! [[devices]]
//! did = "lumi.158d0001"
//! model = "lumi.plug.mmeu01"
//! gateways = ["gw-kitchen", "gw-hall"]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mibridge_middleware::LinkConfig;

/// A gateway of the configured topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub id: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

/// A device and the gateways that reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub did: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub gateways: Vec<String>,
}

/// Persisted configuration stored in `~/.mibridge/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// How long a command waits for a confirming report before failover.
    #[serde(default = "default_failover_delay_ms")]
    pub failover_delay_ms: u64,

    /// Buffered messages per loopback bus.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    #[serde(default)]
    pub gateways: Vec<GatewayConfig>,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

fn default_failover_delay_ms() -> u64 {
    1000
}
fn default_bus_capacity() -> usize {
    256
}
fn default_available() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failover_delay_ms: default_failover_delay_ms(),
            bus_capacity: default_bus_capacity(),
            gateways: Vec::new(),
            devices: Vec::new(),
        }
    }
}

impl Config {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            failover_delay: Duration::from_millis(self.failover_delay_ms),
        }
    }
}

/// Return the path to `~/.mibridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mibridge").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `MIBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MIBRIDGE_FAILOVER_DELAY_MS` | `failover_delay_ms` |
/// | `MIBRIDGE_BUS_CAPACITY` | `bus_capacity` |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MIBRIDGE_FAILOVER_DELAY_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.failover_delay_ms = ms;
    }
    if let Ok(v) = std::env::var("MIBRIDGE_BUS_CAPACITY")
        && let Ok(capacity) = v.parse::<usize>()
        && capacity > 0
    {
        cfg.bus_capacity = capacity;
    }
}

/// Save the config to a specific path, creating its directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
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
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
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
