use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use super::CounterStore;
use crate::config::RemoteStoreConfig;
use crate::error::{ConfigError, StoreError};

const MAX_ERROR_BODY: usize = 256;

/// Reply envelope of the REST command protocol: `{"result": ..}` or `{"error": ".."}`.
#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Counter store reached over a REST increment/expire protocol.
///
/// Each command is a `POST` to `{base}/{command}/{args..}` with a bearer token:
/// - `incr/{key}` returns the post-increment value,
/// - `expire/{key}/{ttl}` attaches a TTL.
///
/// Atomicity comes from the server's native increment; the client holds no mutable state and
/// clones share one connection pool.
#[derive(Clone, Debug)]
pub struct RemoteCounterStore {
    client: Client,
    base: Url,
    token: String,
}

impl RemoteCounterStore {
    pub fn new(config: &RemoteStoreConfig) -> Result<Self, ConfigError> {
        let base = Url::parse(&config.url)
            .map_err(|_| ConfigError::InvalidStoreUrl { url: config.url.clone() })?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidStoreUrl { url: config.url.clone() });
        }
        if config.timeout_ms == 0 {
            return Err(ConfigError::InvalidStoreTimeout { provided_ms: 0 });
        }
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { client, base, token: config.token.clone() })
    }

    fn command_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // `new` rejected cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn command(&self, segments: &[&str]) -> Result<serde_json::Value, StoreError> {
        let response =
            self.client.post(self.command_url(segments)).bearer_auth(&self.token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(StoreError::Status { status: status.as_u16(), body });
        }

        let reply: CommandReply = response.json().await?;
        match reply {
            CommandReply { error: Some(message), .. } => Err(StoreError::Protocol(message)),
            CommandReply { result: Some(value), .. } => Ok(value),
            CommandReply { result: None, error: None } => {
                Err(StoreError::Protocol("reply carried neither result nor error".to_string()))
            }
        }
    }

    /// Attach a TTL to `key`.
    pub async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let ttl = ttl_secs.to_string();
        self.command(&["expire", key, &ttl]).await.map(|_| ())
    }
}

// Accepts both a JSON number and a numeric string; some REST caches send either.
fn as_count(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl CounterStore for RemoteCounterStore {
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<u64, StoreError> {
        let value = self.command(&["incr", key]).await?;
        let total = as_count(&value).ok_or_else(|| {
            StoreError::Protocol(format!("increment returned a non-counter value: {value}"))
        })?;

        if total == 1 {
            // Best effort: the decision never depends on the TTL because keys are windowed.
            let store = self.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                match store.expire(&key, ttl_secs).await {
                    Ok(()) => debug!(target: "gatekeeper::store", key = %key, ttl_secs, "expiry set"),
                    Err(err) => warn!(
                        target: "gatekeeper::store",
                        key = %key,
                        ttl_secs,
                        error = %err,
                        "failed to set counter expiry; key will linger until evicted"
                    ),
                }
            });
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(url: &str) -> RemoteCounterStore {
        RemoteCounterStore::new(&RemoteStoreConfig::new(url, "token")).unwrap()
    }

    #[test]
    fn command_url_encodes_key_as_single_segment() {
        let store = store("https://cache.example.com/");
        let url = store.command_url(&["incr", "api:default:10.0.0.1:60/x"]);
        assert_eq!(url.as_str(), "https://cache.example.com/incr/api:default:10.0.0.1:60%2Fx");
    }

    #[test]
    fn command_url_keeps_base_path() {
        let store = store("https://cache.example.com/v1");
        let url = store.command_url(&["expire", "k", "60"]);
        assert_eq!(url.as_str(), "https://cache.example.com/v1/expire/k/60");
    }

    #[test]
    fn rejects_non_http_urls() {
        for url in ["mailto:ops@example.com", "redis://localhost:6379", "::"] {
            assert!(
                RemoteCounterStore::new(&RemoteStoreConfig::new(url, "t")).is_err(),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = RemoteStoreConfig::new("https://cache.example.com", "t");
        config.timeout_ms = 0;
        assert_eq!(
            RemoteCounterStore::new(&config).unwrap_err(),
            ConfigError::InvalidStoreTimeout { provided_ms: 0 }
        );
    }

    #[test]
    fn counts_parse_from_number_or_string() {
        assert_eq!(as_count(&serde_json::json!(7)), Some(7));
        assert_eq!(as_count(&serde_json::json!("7")), Some(7));
        assert_eq!(as_count(&serde_json::json!(-1)), None);
        assert_eq!(as_count(&serde_json::json!(null)), None);
    }
}
