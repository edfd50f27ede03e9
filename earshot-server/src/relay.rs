//! Relay-server resolution for the media transport.
//!
//! Admission hands every joining player a list of STUN/TURN entries. The
//! list comes from the first source in this chain that yields a non-empty
//! validated result: a third-party credential endpoint (cached for the TTL
//! it returns), a static JSON list from configuration, and finally a
//! built-in STUN default. Resolution never fails admission.

use earshot_model::ice::IceServer;
use serde_json::Value;
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};

/// Relay entry returned when no other source yields anything usable.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// TTL requested from the third-party credential endpoint.
const REQUESTED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Bounds applied to whatever TTL the endpoint reports.
const CACHE_TTL_MIN: Duration = Duration::from_secs(5);
const CACHE_TTL_MAX: Duration = Duration::from_secs(60 * 60);

/// TTL used when the endpoint reports none.
const CACHE_TTL_FALLBACK: Duration = Duration::from_secs(60);

/// Third-party credential endpoint configuration.
#[derive(Clone, Debug)]
pub struct TurnApiConfig {
    /// Key identifier interpolated into the default endpoint URL.
    pub token_id: String,
    /// Bearer token authorizing the credential request.
    pub api_token: String,
    /// Override of the endpoint URL; the default is derived from
    /// [`token_id`].
    ///
    /// [`token_id`]: Self::token_id
    pub api_url: Option<String>,
    /// Override of the cache TTL, applied instead of the endpoint's.
    pub cache_ttl: Option<Duration>,
}

impl TurnApiConfig {
    fn url(&self) -> String {
        self.api_url.clone().unwrap_or_else(|| {
            format!(
                "https://rtc.live.cloudflare.com/v1/turn/keys/{}/credentials/generate",
                self.token_id
            )
        })
    }
}

/// Where relay servers may come from.
#[derive(Clone, Debug, Default)]
pub struct RelayConfig {
    /// Third-party credential endpoint, tried first when present.
    pub turn: Option<TurnApiConfig>,
    /// JSON-encoded static list, tried second when present.
    pub static_servers_json: Option<String>,
}

/// Resolver with a process-wide credential cache.
///
/// The cache is refreshed under a lock, so concurrent admissions during a
/// refresh wait for one fetch instead of stampeding the endpoint.
#[derive(Debug)]
pub struct RelayServerResolver {
    cache: Mutex<Option<CachedCredentials>>,
    config: RelayConfig,
    http: reqwest::Client,
}

#[derive(Debug)]
struct CachedCredentials {
    expires_at: Instant,
    servers: Vec<IceServer>,
}

impl RelayServerResolver {
    /// Create a resolver for the provided sources.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            cache: Mutex::new(None),
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Resolve the relay-server list for an admission response.
    pub async fn resolve(&self) -> Vec<IceServer> {
        if let Some(turn) = &self.config.turn {
            let mut cache = self.cache.lock().await;

            if let Some(cached) = cache.as_ref() {
                if cached.expires_at > Instant::now() {
                    return cached.servers.clone();
                }
            }

            match self.fetch_credentials(turn).await {
                Ok((servers, ttl)) if !servers.is_empty() => {
                    let ttl = clamp_ttl(turn.cache_ttl.or(ttl));
                    *cache = Some(CachedCredentials {
                        expires_at: Instant::now() + ttl,
                        servers: servers.clone(),
                    });

                    return servers;
                }
                Ok(_) => {
                    tracing::warn!("credential endpoint returned no usable relay servers");
                }
                Err(source) => {
                    tracing::warn!(%source, "failed to fetch relay credentials");
                }
            }
        }

        if let Some(json) = &self.config.static_servers_json {
            match parse_static_list(json) {
                Ok(servers) if !servers.is_empty() => return servers,
                Ok(_) => tracing::warn!("static relay-server list is empty after validation"),
                Err(source) => {
                    tracing::warn!(%source, "static relay-server list isn't valid json")
                }
            }
        }

        vec![IceServer::new(DEFAULT_STUN_URL)]
    }

    /// Fetch fresh credentials, returning the validated entries and the TTL
    /// the endpoint reported, if any.
    async fn fetch_credentials(
        &self,
        turn: &TurnApiConfig,
    ) -> Result<(Vec<IceServer>, Option<Duration>), FetchCredentialsError> {
        let body = serde_json::json!({ "ttl": REQUESTED_TTL.as_secs() });

        let response = self
            .http
            .post(turn.url())
            .bearer_auth(&turn.api_token)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(FetchCredentialsError::from_request)?;

        let payload: Value = response
            .json()
            .await
            .map_err(FetchCredentialsError::from_request)?;

        let servers = match payload.get("iceServers") {
            Some(Value::Array(entries)) => validate_entries(entries),
            Some(entry @ Value::Object(_)) => validate_entries(std::slice::from_ref(entry)),
            _ => Vec::new(),
        };

        let ttl = payload
            .get("ttl")
            .and_then(Value::as_u64)
            .map(Duration::from_secs);

        Ok((servers, ttl))
    }
}

/// Clamp a reported TTL into the allowed band, defaulting when absent.
fn clamp_ttl(ttl: Option<Duration>) -> Duration {
    ttl.unwrap_or(CACHE_TTL_FALLBACK)
        .clamp(CACHE_TTL_MIN, CACHE_TTL_MAX)
}

/// Keep only the entries matching the relay-server shape.
fn validate_entries(entries: &[Value]) -> Vec<IceServer> {
    entries
        .iter()
        .filter_map(|entry| serde_json::from_value::<IceServer>(entry.clone()).ok())
        .filter(IceServer::is_valid)
        .collect()
}

/// Parse the static configuration list, filtering invalid entries.
fn parse_static_list(json: &str) -> Result<Vec<IceServer>, serde_json::Error> {
    let entries: Vec<Value> = serde_json::from_str(json)?;

    Ok(validate_entries(&entries))
}

/// Requesting relay credentials from the third-party endpoint failed.
#[derive(Debug)]
struct FetchCredentialsError {
    source: reqwest::Error,
}

impl FetchCredentialsError {
    fn from_request(source: reqwest::Error) -> Self {
        Self { source }
    }
}

impl Display for FetchCredentialsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("requesting relay credentials failed")
    }
}

impl Error for FetchCredentialsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        clamp_ttl, parse_static_list, RelayConfig, RelayServerResolver, DEFAULT_STUN_URL,
    };
    use earshot_model::ice::{IceServer, IceUrls};
    use static_assertions::assert_impl_all;
    use std::{fmt::Debug, time::Duration};

    assert_impl_all!(RelayServerResolver: Debug, Send, Sync);

    #[test]
    fn ttl_is_clamped_into_band() {
        assert_eq!(Duration::from_secs(60), clamp_ttl(None));
        assert_eq!(Duration::from_secs(5), clamp_ttl(Some(Duration::from_secs(1))));
        assert_eq!(
            Duration::from_secs(3600),
            clamp_ttl(Some(Duration::from_secs(86_400)))
        );
        assert_eq!(
            Duration::from_secs(300),
            clamp_ttl(Some(Duration::from_secs(300)))
        );
    }

    #[test]
    fn static_list_filters_invalid_entries() {
        let servers = parse_static_list(
            r#"[
                {"urls": "stun:stun.example.com"},
                {"urls": ""},
                {"username": "orphan"},
                {"urls": ["turn:turn.example.com"], "username": "u", "credential": "c"}
            ]"#,
        )
        .unwrap();

        assert_eq!(2, servers.len());
        assert_eq!(IceUrls::One("stun:stun.example.com".to_owned()), servers[0].urls);
        assert_eq!(Some("u"), servers[1].username.as_deref());
    }

    #[tokio::test]
    async fn empty_static_list_falls_through_to_default() {
        let resolver = RelayServerResolver::new(RelayConfig {
            turn: None,
            static_servers_json: Some("[]".to_owned()),
        });

        assert_eq!(vec![IceServer::new(DEFAULT_STUN_URL)], resolver.resolve().await);
    }

    #[tokio::test]
    async fn invalid_static_list_falls_through_to_default() {
        let resolver = RelayServerResolver::new(RelayConfig {
            turn: None,
            static_servers_json: Some("not json".to_owned()),
        });

        assert_eq!(vec![IceServer::new(DEFAULT_STUN_URL)], resolver.resolve().await);
    }

    #[tokio::test]
    async fn static_list_is_served_when_valid() {
        let resolver = RelayServerResolver::new(RelayConfig {
            turn: None,
            static_servers_json: Some(r#"[{"urls": "stun:stun.example.com"}]"#.to_owned()),
        });

        assert_eq!(
            vec![IceServer::new("stun:stun.example.com")],
            resolver.resolve().await
        );
    }
}
