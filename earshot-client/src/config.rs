//! Configuration for a cell channel session.

use crate::selector::SelectorConfig;
use earshot_model::geometry::Vec3;
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::Arc,
    time::Duration,
};

/// Cadence of heartbeat frames while the channel is open.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default cadence of position polls.
const DEFAULT_POSITION_INTERVAL: Duration = Duration::from_millis(150);

/// The cell accepts at most one position per this interval; polling faster
/// only wastes frames.
const MIN_POSITION_INTERVAL: Duration = Duration::from_millis(100);

/// Source of the local player's pose, polled on the position cadence.
pub trait PositionSource: Send + Sync {
    /// The player's current position.
    fn position(&self) -> Vec3;
}

impl<F: Fn() -> Vec3 + Send + Sync> PositionSource for F {
    fn position(&self) -> Vec3 {
        self()
    }
}

/// Configuration used to open a cell channel.
///
/// Use [`Config::builder`] to start building one.
#[derive(Clone)]
pub struct Config {
    heartbeat_interval: Duration,
    player_id: String,
    position_interval: Duration,
    position_source: Option<Arc<dyn PositionSource>>,
    selector: Option<SelectorConfig>,
    session_token: String,
    url: String,
}

impl Config {
    /// Create a builder from the channel URL and the admission credentials.
    pub fn builder(
        url: impl Into<String>,
        player_id: impl Into<String>,
        session_token: impl Into<String>,
    ) -> ConfigBuilder {
        ConfigBuilder::new(url.into(), player_id.into(), session_token.into())
    }

    /// Cadence of heartbeat frames.
    pub const fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// The player this session registers as.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Cadence of position polls.
    pub const fn position_interval(&self) -> Duration {
        self.position_interval
    }

    /// Source of the local pose, if position streaming is wanted.
    pub fn position_source(&self) -> Option<&Arc<dyn PositionSource>> {
        self.position_source.as_ref()
    }

    /// Tuning for the peer selector, if one should run.
    pub fn selector(&self) -> Option<&SelectorConfig> {
        self.selector.as_ref()
    }

    /// One-time token minted at admission.
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// The cell channel URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Config")
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("player_id", &self.player_id)
            .field("position_interval", &self.position_interval)
            .field(
                "position_source",
                &self.position_source.as_ref().map(|_| "dyn PositionSource"),
            )
            .field("selector", &self.selector)
            .field("url", &self.url)
            .finish()
    }
}

/// Builder for a [`Config`].
#[derive(Debug)]
#[must_use = "builders have no effect if unused"]
pub struct ConfigBuilder {
    inner: Config,
}

impl ConfigBuilder {
    fn new(url: String, player_id: String, session_token: String) -> Self {
        Self {
            inner: Config {
                heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
                player_id,
                position_interval: DEFAULT_POSITION_INTERVAL,
                position_source: None,
                selector: None,
                session_token,
                url,
            },
        }
    }

    /// Consume the builder, returning the configuration.
    pub fn build(self) -> Config {
        self.inner
    }

    /// Set the cadence of heartbeat frames.
    pub const fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.inner.heartbeat_interval = interval;

        self
    }

    /// Set the cadence of position polls.
    ///
    /// Values below the cell's per-connection rate limit are clamped up to
    /// it.
    pub fn position_interval(mut self, interval: Duration) -> Self {
        self.inner.position_interval = interval.max(MIN_POSITION_INTERVAL);

        self
    }

    /// Stream positions from the provided source.
    pub fn position_source(mut self, source: impl PositionSource + 'static) -> Self {
        self.inner.position_source = Some(Arc::new(source));

        self
    }

    /// Run a peer selector over the cell's peer frames, dispatching its
    /// decisions to subscribers.
    pub fn selector(mut self, config: SelectorConfig) -> Self {
        self.inner.selector = Some(config);

        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigBuilder};
    use earshot_model::geometry::Vec3;
    use static_assertions::assert_impl_all;
    use std::{fmt::Debug, time::Duration};

    assert_impl_all!(Config: Clone, Debug, Send, Sync);
    assert_impl_all!(ConfigBuilder: Debug, Send, Sync);

    #[test]
    fn defaults() {
        let config = Config::builder("ws://localhost/cell/cell:0:0:0", "alice", "tok").build();

        assert_eq!(Duration::from_secs(10), config.heartbeat_interval());
        assert_eq!(Duration::from_millis(150), config.position_interval());
        assert!(config.position_source().is_none());
        assert!(config.selector().is_none());
        assert_eq!("alice", config.player_id());
        assert_eq!("tok", config.session_token());
    }

    #[test]
    fn position_interval_is_clamped_to_the_rate_limit() {
        let config = Config::builder("ws://localhost", "alice", "tok")
            .position_interval(Duration::from_millis(10))
            .build();

        assert_eq!(Duration::from_millis(100), config.position_interval());

        let slower = Config::builder("ws://localhost", "alice", "tok")
            .position_interval(Duration::from_millis(500))
            .build();

        assert_eq!(Duration::from_millis(500), slower.position_interval());
    }

    #[test]
    fn closures_are_position_sources() {
        let config = Config::builder("ws://localhost", "alice", "tok")
            .position_source(|| Vec3::new(1.0, 2.0, 3.0))
            .build();

        let source = config.position_source().unwrap();
        assert_eq!(Vec3::new(1.0, 2.0, 3.0), source.position());
    }
}
