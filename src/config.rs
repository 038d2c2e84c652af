//! Connection settings from the process environment.
//!
//! `SCP_HOST`, `SCP_PORT`, `SCP_USERNAME` and `SCP_PASSWORD` map onto a
//! [`ConnectionConfig`]. An unset port means 22; everything else left unset
//! stays empty so that [`missing_env_vars`] can name it.

use scpdrop_sftp::ConnectionConfig;
use std::fmt;
use tracing::info;

pub const ENV_HOST: &str = "SCP_HOST";
pub const ENV_PORT: &str = "SCP_PORT";
pub const ENV_USERNAME: &str = "SCP_USERNAME";
pub const ENV_PASSWORD: &str = "SCP_PASSWORD";

const DEFAULT_PORT: u16 = 22;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SCP_PORT must be a port number between 1 and 65535, got '{0}'")]
    InvalidPort(String),
}

/// Read the connection settings from the process environment.
pub fn connection_from_env() -> Result<ConnectionConfig, ConfigError> {
    connection_from_lookup(|key| std::env::var(key).ok())
}

/// Same as [`connection_from_env`] with an injectable variable source.
pub fn connection_from_lookup<F>(lookup: F) -> Result<ConnectionConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let port = match lookup(ENV_PORT).map(|p| p.trim().to_string()) {
        None => DEFAULT_PORT,
        Some(p) if p.is_empty() => DEFAULT_PORT,
        Some(p) => match p.parse::<u16>() {
            Ok(0) | Err(_) => return Err(ConfigError::InvalidPort(p)),
            Ok(n) => n,
        },
    };
    Ok(ConnectionConfig::new(
        lookup(ENV_HOST).unwrap_or_default(),
        lookup(ENV_USERNAME).unwrap_or_default(),
        lookup(ENV_PASSWORD).unwrap_or_default(),
    )
    .with_port(port))
}

/// Environment variable names for the fields `config` is missing.
pub fn missing_env_vars(config: &ConnectionConfig) -> Vec<&'static str> {
    config
        .missing_fields()
        .into_iter()
        .map(|field| match field {
            "host" => ENV_HOST,
            "port" => ENV_PORT,
            "username" => ENV_USERNAME,
            _ => ENV_PASSWORD,
        })
        .collect()
}

/// Printable view of a config with the password masked.
pub struct Redacted<'a>(pub &'a ConnectionConfig);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.0;
        let or_unset = |v: &str| if v.trim().is_empty() { "NOT SET".to_string() } else { v.to_string() };
        write!(
            f,
            "host={} port={} username={} password={}",
            or_unset(&c.host),
            c.port,
            or_unset(&c.username),
            c.masked_password()
        )
    }
}

pub fn log_summary(config: &ConnectionConfig) {
    info!(
        config = %Redacted(config),
        complete = config.is_complete(),
        "SCP configuration"
    );
}
