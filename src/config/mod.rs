//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::map::MapParams;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Route serving player sessions
    pub ws_path: String,
    /// Route serving read-only map viewers
    pub map_ws_path: String,

    /// Map width in cells
    pub map_width: u32,
    /// Map height in cells
    pub map_height: u32,
    /// Fixed generator seed; random when absent
    pub map_seed: Option<u64>,

    /// Simulation loop interval in milliseconds
    pub sim_interval_ms: u64,
    /// Broadcast loop interval in milliseconds
    pub broadcast_interval_ms: u64,
    /// Overall deadline for a client to register a handle
    pub handshake_timeout_secs: u64,

    /// Seconds a vehicle waits between shots
    pub reload_seconds: u32,
    /// Reload units removed per simulation tick
    pub reload_step: u32,
    /// Half-width of a vehicle's square footprint (1 = 3x3)
    pub footprint_radius: u32,
    /// Random placement attempts after the fixed spawn points are exhausted
    pub spawn_attempts: u32,

    /// Inbound messages allowed per session per second
    pub input_rate_limit: u32,
    /// Allowed client origins for CORS (comma-separated); permissive when unset
    pub client_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8889)),
            log_level: "info".to_string(),
            ws_path: "/ws".to_string(),
            map_ws_path: "/mapws".to_string(),
            map_width: 1542,
            map_height: 512,
            map_seed: None,
            sim_interval_ms: 1000,
            broadcast_interval_ms: 1000,
            handshake_timeout_secs: 60,
            reload_seconds: 3,
            reload_step: 5,
            footprint_radius: 1,
            spawn_attempts: 2000,
            input_rate_limit: 30,
            client_origin: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Render-style PORT takes precedence over SERVER_ADDR
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| defaults.server_addr.to_string())
        };

        let map_seed = match env::var("MAP_SEED") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid("MAP_SEED"))?),
            Err(_) => None,
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),

            ws_path: env::var("WS_PATH").unwrap_or(defaults.ws_path),
            map_ws_path: env::var("MAP_WS_PATH").unwrap_or(defaults.map_ws_path),

            map_width: parse_or("MAP_WIDTH", defaults.map_width)?,
            map_height: parse_or("MAP_HEIGHT", defaults.map_height)?,
            map_seed,

            sim_interval_ms: parse_or("SIM_INTERVAL_MS", defaults.sim_interval_ms)?,
            broadcast_interval_ms: parse_or("BROADCAST_INTERVAL_MS", defaults.broadcast_interval_ms)?,
            handshake_timeout_secs: parse_or("HANDSHAKE_TIMEOUT_SECS", defaults.handshake_timeout_secs)?,

            reload_seconds: parse_or("RELOAD_SECONDS", defaults.reload_seconds)?,
            reload_step: parse_or("RELOAD_STEP", defaults.reload_step)?,
            footprint_radius: parse_or("FOOTPRINT_RADIUS", defaults.footprint_radius)?,
            spawn_attempts: parse_or("SPAWN_ATTEMPTS", defaults.spawn_attempts)?,

            input_rate_limit: parse_or("INPUT_RATE_LIMIT", defaults.input_rate_limit)?,
            client_origin: env::var("CLIENT_ORIGIN").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sim_interval_ms == 0 {
            return Err(ConfigError::Invalid("SIM_INTERVAL_MS"));
        }
        if self.broadcast_interval_ms == 0 {
            return Err(ConfigError::Invalid("BROADCAST_INTERVAL_MS"));
        }
        if self.reload_step == 0 {
            return Err(ConfigError::Invalid("RELOAD_STEP"));
        }
        if self.reload_units().is_none() {
            return Err(ConfigError::Invalid("RELOAD_SECONDS"));
        }
        // The fixed spawn points need room for a footprint on every edge
        let min_side = self
            .footprint_radius
            .checked_mul(2)
            .and_then(|side| side.checked_add(3))
            .ok_or(ConfigError::Invalid("FOOTPRINT_RADIUS"))?;
        if self.map_width < min_side {
            return Err(ConfigError::Invalid("MAP_WIDTH"));
        }
        if self.map_height < min_side {
            return Err(ConfigError::Invalid("MAP_HEIGHT"));
        }
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid("WS_PATH"));
        }
        if !self.map_ws_path.starts_with('/') || self.map_ws_path == self.ws_path {
            return Err(ConfigError::Invalid("MAP_WS_PATH"));
        }
        Ok(())
    }

    pub fn sim_interval(&self) -> Duration {
        Duration::from_millis(self.sim_interval_ms)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Reload units assigned to a vehicle when it fires.
    ///
    /// Counted in the same units the simulation loop removes each tick, so a
    /// vehicle can fire again after roughly `reload_seconds` of wall time.
    pub fn reload_budget(&self) -> u32 {
        self.reload_units().unwrap_or(u32::MAX)
    }

    /// Reload budget, or `None` when it does not fit a `u32`
    fn reload_units(&self) -> Option<u32> {
        let ticks = u64::from(self.reload_seconds) * 1000 / self.sim_interval_ms.max(1);
        let units = ticks.checked_mul(u64::from(self.reload_step))?;
        u32::try_from(units.max(u64::from(self.reload_step))).ok()
    }

    /// Generator parameters for the configured map size
    pub fn map_params(&self) -> MapParams {
        MapParams {
            width: self.map_width,
            height: self.map_height,
            ..MapParams::default()
        }
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
