//! Client configuration and address inference.

use core::fmt;

use clubby_core::{CallOptions, SessionConfig};
use url::Url;

/// Backend used when neither a backend nor a server address is given.
pub const DEFAULT_BACKEND: &str = "//api.cesanta.com";

/// Port appended to the backend when the server address is inferred.
pub const DEFAULT_PORT: u16 = 443;

pub const ENV_SERVER: &str = "CLUBBY_SERVER";
pub const ENV_BACKEND: &str = "CLUBBY_BACKEND";
pub const ENV_DEVICE_ID: &str = "CLUBBY_DEVICE_ID";
pub const ENV_DEVICE_PSK: &str = "CLUBBY_DEVICE_PSK";
pub const ENV_TIMEOUT_SECS: &str = "CLUBBY_TIMEOUT_SECS";

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// The server address is not a valid URL.
    InvalidServer { address: String, source: url::ParseError },
    /// The server address has no host to derive a backend from.
    MissingHost(String),
    /// An environment variable holds a value that cannot be used.
    InvalidEnv { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidServer { address, source } => {
                write!(f, "invalid server address {address:?}: {source}")
            }
            Self::MissingHost(address) => write!(f, "server address {address:?} has no host"),
            Self::InvalidEnv { key, value } => write!(f, "invalid value {value:?} for {key}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidServer { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Resolved client configuration. Build one with [`ClubbyBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClubbyConfig {
    pub device_id: String,
    pub device_psk: String,
    /// Destination of backend calls, e.g. `//api.cesanta.com`.
    pub backend: String,
    /// WebSocket URL to connect to, e.g. `wss://api.cesanta.com:443`.
    pub server_address: String,
    pub default_options: CallOptions,
}

impl ClubbyConfig {
    pub fn builder() -> ClubbyBuilder {
        ClubbyBuilder::new()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            device_id: self.device_id.clone(),
            device_psk: self.device_psk.clone(),
            backend: self.backend.clone(),
            default_options: self.default_options,
        }
    }
}

/// Builder for [`ClubbyConfig`].
///
/// Unset addresses are inferred from each other: the backend defaults to
/// `//<host>` of the server address (or [`DEFAULT_BACKEND`] without one), and
/// the server address defaults to `wss:<backend>:443`.
#[derive(Debug, Clone, Default)]
pub struct ClubbyBuilder {
    device_id: String,
    device_psk: String,
    backend: Option<String>,
    server_address: Option<String>,
    default_options: CallOptions,
}

impl ClubbyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the `CLUBBY_*` environment variables.
    ///
    /// Unset or empty variables leave the corresponding setting alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut builder = Self::new();
        if let Some(id) = get(ENV_DEVICE_ID) {
            builder.device_id = id;
        }
        if let Some(psk) = get(ENV_DEVICE_PSK) {
            builder.device_psk = psk;
        }
        builder.backend = get(ENV_BACKEND);
        builder.server_address = get(ENV_SERVER);
        if let Some(value) = get(ENV_TIMEOUT_SECS) {
            let secs = value.parse::<u32>().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_TIMEOUT_SECS,
                value: value.clone(),
            })?;
            builder.default_options = CallOptions::with_timeout(secs);
        }
        Ok(builder)
    }

    /// Device id and pre-shared key. Both default to empty strings.
    pub fn device(mut self, id: impl Into<String>, psk: impl Into<String>) -> Self {
        self.device_id = id.into();
        self.device_psk = psk.into();
        self
    }

    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = id.into();
        self
    }

    pub fn device_psk(mut self, psk: impl Into<String>) -> Self {
        self.device_psk = psk.into();
        self
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.server_address = Some(address.into());
        self
    }

    /// Default deadline for calls, in seconds. Zero means none.
    pub fn timeout_secs(mut self, secs: u32) -> Self {
        self.default_options = CallOptions::with_timeout(secs);
        self
    }

    pub fn build(self) -> Result<ClubbyConfig, ConfigError> {
        let backend = match (self.backend, &self.server_address) {
            (Some(backend), _) => backend,
            (None, Some(server)) => backend_from_server(server)?,
            (None, None) => DEFAULT_BACKEND.to_string(),
        };
        let server_address = match self.server_address {
            Some(server) => {
                Url::parse(&server).map_err(|source| ConfigError::InvalidServer {
                    address: server.clone(),
                    source,
                })?;
                server
            }
            None => format!("wss:{backend}:{DEFAULT_PORT}"),
        };
        tracing::debug!(%backend, %server_address, "clubby configuration resolved");
        Ok(ClubbyConfig {
            device_id: self.device_id,
            device_psk: self.device_psk,
            backend,
            server_address,
            default_options: self.default_options,
        })
    }
}

fn backend_from_server(server: &str) -> Result<String, ConfigError> {
    let url = Url::parse(server).map_err(|source| ConfigError::InvalidServer {
        address: server.to_string(),
        source,
    })?;
    match url.host_str() {
        Some(host) => Ok(format!("//{host}")),
        None => Err(ConfigError::MissingHost(server.to_string())),
    }
}
