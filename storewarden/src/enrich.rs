// storewarden/src/enrich.rs
//
// Signal provider adapter. Given a session correlation key, fetches the
// bundle of already-computed device/network risk signals from the upstream
// provider. Pure lookup, no state of our own.
//
// The adapter is an enum rather than a trait object so lookup futures stay
// `Send` across spawned ingest tasks without pulling in async-trait.

use std::time::Duration;

use tracing::debug;

use crate::error::EnrichError;
use crate::events::{SessionKey, SignalBundle};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Env var holding the provider secret. When unset, the adapter is built in
/// its `Disabled` form and every lookup reports `NotConfigured`.
pub const PROVIDER_KEY_ENV: &str = "WARDEN_PROVIDER_API_KEY";

pub enum SignalProvider {
    Http(HttpSignalProvider),
    /// Serve a canned bundle for every key. Used by replay runs and tests.
    Fixed(Box<SignalBundle>),
    Disabled,
}

impl SignalProvider {
    /// Build from the environment: HTTP when the API key is set, otherwise
    /// disabled (ingestion still works, with client signals only).
    pub fn from_env(base_url: &str) -> Self {
        match std::env::var(PROVIDER_KEY_ENV) {
            Ok(key) if !key.is_empty() => {
                Self::Http(HttpSignalProvider::new(base_url.to_string(), key))
            }
            _ => Self::Disabled,
        }
    }

    pub async fn lookup(&self, key: &SessionKey) -> Result<SignalBundle, EnrichError> {
        match self {
            Self::Http(http) => http.lookup(key).await,
            Self::Fixed(bundle) => Ok((**bundle).clone()),
            Self::Disabled => Err(EnrichError::NotConfigured),
        }
    }
}

pub struct HttpSignalProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSignalProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, base_url, api_key }
    }

    async fn lookup(&self, key: &SessionKey) -> Result<SignalBundle, EnrichError> {
        let url = format!("{}/events/{}", self.base_url.trim_end_matches('/'), key);
        debug!("signal lookup {}", url);

        let resp = self
            .client
            .get(&url)
            .header("Auth-API-Key", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(EnrichError::Status(resp.status().as_u16()));
        }
        Ok(resp.json::<SignalBundle>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_provider_reports_not_configured() {
        let provider = SignalProvider::Disabled;
        let err = provider.lookup(&SessionKey::from("req-1")).await.unwrap_err();
        assert!(matches!(err, EnrichError::NotConfigured));
    }

    #[tokio::test]
    async fn fixed_provider_returns_the_canned_bundle() {
        let bundle = SignalBundle {
            suspect_score: Some(crate::events::SuspectScore { result: 12 }),
            ..Default::default()
        };
        let provider = SignalProvider::Fixed(Box::new(bundle));
        let got = provider.lookup(&SessionKey::from("req-2")).await.unwrap();
        assert_eq!(got.suspect_score.unwrap().result, 12);
    }
}
