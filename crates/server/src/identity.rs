//! Identity lookup against the external identity/profile provider.
//!
//! Called once per connection at authentication; the returned profile is
//! cached on the session for the connection's lifetime.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use livehub_shared::{HubError, ViewerProfile};
use reqwest::StatusCode;
use url::Url;

use crate::config::HubConfig;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token to a profile.
    ///
    /// Unknown or rejected tokens yield `Unauthorized`; a provider that cannot
    /// be reached yields `IdentityUnavailable`.
    async fn lookup(&self, token: &str) -> Result<ViewerProfile, HubError>;
}

/// Fixed token → profile table.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    profiles: HashMap<String, ViewerProfile>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, token: impl Into<String>, profile: ViewerProfile) -> Self {
        self.profiles.insert(token.into(), profile);
        self
    }

    /// Load a JSON object mapping tokens to profiles.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading identity file {}", path.display()))?;
        let profiles: HashMap<String, ViewerProfile> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing identity file {}", path.display()))?;
        Ok(Self { profiles })
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn lookup(&self, token: &str) -> Result<ViewerProfile, HubError> {
        self.profiles
            .get(token)
            .cloned()
            .ok_or_else(|| HubError::Unauthorized("unknown token".to_string()))
    }
}

/// Calls `GET {base}/me` on the identity service with the bearer token.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    me_url: Url,
}

impl HttpIdentityProvider {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url).with_context(|| format!("invalid identity URL {}", base_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let me_url = base.join("me")?;
        Ok(Self {
            client: reqwest::Client::new(),
            me_url,
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn lookup(&self, token: &str) -> Result<ViewerProfile, HubError> {
        let response = self
            .client
            .get(self.me_url.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Identity lookup failed: {}", e);
                HubError::IdentityUnavailable(e.to_string())
            })?;

        match response.status() {
            status if status.is_success() => response.json::<ViewerProfile>().await.map_err(|e| {
                tracing::error!("Identity provider returned an unreadable profile: {}", e);
                HubError::IdentityUnavailable(e.to_string())
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                Err(HubError::Unauthorized("token rejected by identity provider".to_string()))
            }
            status => {
                tracing::error!("Identity provider answered {}", status);
                Err(HubError::IdentityUnavailable(format!("identity provider answered {}", status)))
            }
        }
    }
}

/// Pick the identity source from configuration: the HTTP service when a URL
/// is set, otherwise a static table (possibly empty, which admits only
/// anonymous viewers).
pub fn from_config(config: &HubConfig) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    if let Some(url) = &config.identity_url {
        tracing::info!("Using identity service at {}", url);
        return Ok(Arc::new(HttpIdentityProvider::new(url)?));
    }
    if let Some(path) = &config.identity_file {
        let provider = StaticIdentityProvider::from_json_file(path)?;
        tracing::info!("Loaded {} identities from {}", provider.len(), path.display());
        return Ok(Arc::new(provider));
    }
    tracing::warn!("No identity source configured, only anonymous viewers can connect");
    Ok(Arc::new(StaticIdentityProvider::new()))
}
