//! Process configuration and runtime feature flags.

use crate::relay::{RelayConfig, TurnApiConfig};
use dashmap::DashMap;
use std::{
    env,
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

/// Key of the runtime override advertising SFU transport to joining players.
pub const SFU_TRANSPORT_FLAG: &str = "feature:voice:transport:sfu";

/// Port used when the environment provides none.
const DEFAULT_PORT: u16 = 8787;

/// Configuration loaded from the process environment.
///
/// | Variable | Effect |
/// |---|---|
/// | `PORT` | Listen port, default 8787. |
/// | `FEATURE_SFU_ENABLED` | Advertise `sfu` transport at admission. |
/// | `ICE_SERVERS_JSON` | Static relay-server list. |
/// | `TURN_TOKEN_ID`, `TURN_API_TOKEN` | Third-party credential source. |
/// | `TURN_API_URL` | Override of the credential endpoint URL. |
/// | `TURN_CACHE_TTL_SECONDS` | Override of the credential cache TTL. |
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the admission listener binds.
    pub bind: SocketAddr,
    /// Whether the environment enables SFU transport advertisement.
    pub sfu_enabled: bool,
    /// Relay-server sources.
    pub relay: RelayConfig,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigErrorType::PortInvalid`] error type if `PORT` isn't
    /// a valid port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|source| ConfigError {
                kind: ConfigErrorType::PortInvalid { raw },
                source: Some(Box::new(source)),
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let turn = match (env::var("TURN_TOKEN_ID"), env::var("TURN_API_TOKEN")) {
            (Ok(token_id), Ok(api_token)) => Some(TurnApiConfig {
                token_id,
                api_token,
                api_url: env::var("TURN_API_URL").ok(),
                cache_ttl: env::var("TURN_CACHE_TTL_SECONDS")
                    .ok()
                    .and_then(|raw| raw.parse().ok())
                    .map(Duration::from_secs),
            }),
            _ => None,
        };

        Ok(Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            sfu_enabled: env::var("FEATURE_SFU_ENABLED")
                .map(|raw| parse_flag(&raw))
                .unwrap_or(false),
            relay: RelayConfig {
                turn,
                static_servers_json: env::var("ICE_SERVERS_JSON").ok(),
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            sfu_enabled: false,
            relay: RelayConfig::default(),
        }
    }
}

/// Runtime key-value overrides layered over the environment.
///
/// Flags resolve in order: live override, environment value, built-in
/// default. The environment is captured at process start; overrides may be
/// flipped at any time.
///
/// # Cloning
///
/// Wraps its map in an [`Arc`]; clones share the same overrides.
#[derive(Clone, Debug, Default)]
pub struct FeatureFlags(Arc<DashMap<String, String>>);

impl FeatureFlags {
    /// Create an empty override set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a runtime override.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a runtime override, falling back to the environment value.
    pub fn remove(&self, key: &str) {
        self.0.remove(key);
    }

    /// Resolve a boolean flag against its environment-derived default.
    pub fn is_enabled(&self, key: &str, env_default: bool) -> bool {
        self.0
            .get(key)
            .map(|value| parse_flag(value.as_str()))
            .unwrap_or(env_default)
    }
}

/// Truthiness of a flag value.
fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true")
}

/// Loading configuration from the environment failed.
#[derive(Debug)]
pub struct ConfigError {
    pub(crate) kind: ConfigErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl ConfigError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ConfigErrorType {
        &self.kind
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ConfigErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ConfigErrorType::PortInvalid { raw } => {
                f.write_str("PORT isn't a valid port number: ")?;

                f.write_str(raw)
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`ConfigError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigErrorType {
    /// `PORT` couldn't be parsed as a port number.
    PortInvalid {
        /// Value found in the environment.
        raw: String,
    },
}
