use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Complete retinue configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetinueConfig {
    #[serde(default)]
    pub spawn: SpawnConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub tick: TickConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where companions appear around their owner
#[derive(Debug, Clone, Deserialize)]
pub struct SpawnConfig {
    /// Horizontal offset range in blocks (`-radius..=radius` on x and z)
    #[serde(default = "default_spawn_radius")]
    pub radius: i32,
    /// Blocks above the owner's feet
    #[serde(default = "default_spawn_height")]
    pub height: i32,
}

fn default_spawn_radius() -> i32 {
    1
}

fn default_spawn_height() -> i32 {
    1
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            radius: default_spawn_radius(),
            height: default_spawn_height(),
        }
    }
}

/// Character directory connection
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_directory_url")]
    pub base_url: String,
    /// Game tag sent with every roster lookup
    #[serde(default = "default_game_tag")]
    pub game_tag: String,
    #[serde(default = "default_directory_timeout")]
    pub timeout_seconds: u64,
}

fn default_directory_url() -> String {
    std::env::var("RETINUE_DIRECTORY_URL").unwrap_or_else(|_| "http://127.0.0.1:4315".to_string())
}

fn default_game_tag() -> String {
    "retinue-companions".to_string()
}

fn default_directory_timeout() -> u64 {
    10
}

impl DirectoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_directory_url(),
            game_tag: default_game_tag(),
            timeout_seconds: default_directory_timeout(),
        }
    }
}

/// Simulation tick cadence
#[derive(Debug, Clone, Deserialize)]
pub struct TickConfig {
    #[serde(default = "default_tick_rate")]
    pub rate_hz: u32,
}

fn default_tick_rate() -> u32 {
    20
}

impl TickConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.rate_hz.max(1)))
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_tick_rate(),
        }
    }
}

/// Owner record persistence
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,
    #[serde(default = "default_persistence_directory")]
    pub directory: PathBuf,
}

fn default_persistence_enabled() -> bool {
    true
}

fn default_persistence_directory() -> PathBuf {
    PathBuf::from("/var/lib/retinue/owners")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            directory: default_persistence_directory(),
        }
    }
}

/// WebSocket server
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
    /// Outbound frames buffered per lagging connection
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3400))
}

fn default_broadcast_capacity() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<RetinueConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path))?;
    let config: RetinueConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
