//! Server configuration, read from the environment.
//!
//! | Variable                 | Default             |
//! |--------------------------|---------------------|
//! | `BIND_ADDR`              | `0.0.0.0:$PORT`     |
//! | `PORT`                   | `8080`              |
//! | `DATA_DIR`               | `./data/sessions`   |
//! | `MAX_RESIDENT_SESSIONS`  | `1024`              |
//! | `RECONNECT_POLICY`       | `supersede`         |
//! | `IDLE_EVICT_SECS`        | unset (off)         |
//! | `HANDSHAKE_TIMEOUT_SECS` | `5`                 |
//! | `READ_IDLE_TIMEOUT_SECS` | `30`                |
//!
//! Empty values count as unset.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use geobattle_session::{ReconnectPolicy, RegistryConfig};

/// A configuration variable holds a value that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Everything needed to start a server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Directory of the session documents read by `JsonDirStore`.
    pub data_dir: PathBuf,
    pub registry: RegistryConfig,
    /// Evict sessions that have had no connections for this long.
    /// `None` disables the idle sweeper.
    pub idle_evict_after: Option<Duration>,
    /// How long a new connection may take to send its handshake.
    pub handshake_timeout: Duration,
    /// How long an attached connection may stay silent before it is
    /// detached. Clients heartbeat well inside this window.
    pub read_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("./data/sessions"),
            registry: RegistryConfig::default(),
            idle_evict_after: None,
            handshake_timeout: Duration::from_secs(5),
            read_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, which returns the raw
    /// value of a variable if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr.trim().to_string();
        } else if let Some(port) = get("PORT") {
            let port: u16 = parse("PORT", &port)?;
            config.bind_addr = format!("0.0.0.0:{port}");
        }

        if let Some(dir) = get("DATA_DIR") {
            config.data_dir = PathBuf::from(dir.trim());
        }

        if let Some(max) = get("MAX_RESIDENT_SESSIONS") {
            let max: usize = parse("MAX_RESIDENT_SESSIONS", &max)?;
            if max == 0 {
                return Err(ConfigError {
                    var: "MAX_RESIDENT_SESSIONS",
                    value: max.to_string(),
                    reason: "must be at least 1".into(),
                });
            }
            config.registry.max_resident_sessions = max;
        }

        if let Some(policy) = get("RECONNECT_POLICY") {
            config.registry.reconnect_policy = parse::<ReconnectPolicy>("RECONNECT_POLICY", &policy)?;
        }

        if let Some(secs) = get("IDLE_EVICT_SECS") {
            config.idle_evict_after = Some(parse_secs("IDLE_EVICT_SECS", &secs)?);
        }
        if let Some(secs) = get("HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout = parse_secs("HANDSHAKE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = get("READ_IDLE_TIMEOUT_SECS") {
            config.read_idle_timeout = parse_secs("READ_IDLE_TIMEOUT_SECS", &secs)?;
        }

        Ok(config)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse(var, value)?;
    if secs == 0 {
        return Err(ConfigError {
            var,
            value: value.to_string(),
            reason: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}
