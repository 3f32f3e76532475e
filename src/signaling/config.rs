use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_SIGNALING_PORT: u16 = 8080;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_QUEUE: usize = 256;

/// Listen port override
pub const PORT_ENV: &str = "PORT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PORT value {0:?}")]
    InvalidPort(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// How often idle connections are pinged
    pub ping_interval: Duration,
    /// How long to wait for the pong before dropping the connection
    pub pong_timeout: Duration,
    /// Messages buffered per connection before new ones are dropped
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::with_port(DEFAULT_SIGNALING_PORT)
    }
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", port),
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
            outbound_queue: OUTBOUND_QUEUE,
        }
    }

    /// Defaults, with the port taken from `PORT` when set
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_port_var(std::env::var(PORT_ENV).ok())
    }

    fn from_port_var(value: Option<String>) -> Result<Self, ConfigError> {
        match value {
            None => Ok(Self::default()),
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map(Self::with_port)
                .map_err(|_| ConfigError::InvalidPort(raw)),
        }
    }
}
