//! Proxmox VE API access
//!
//! `GET https://<host>:<port>/api2/json<path>` with a static API token. Every
//! response wraps its payload in `{"data": ...}`; callers only see `data`.
//!
//! The hypervisor is reached through its self-signed certificate, so
//! certificate validation is turned off for this client only.

use crate::config::ProxmoxConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Read-only view of the Proxmox API used by the enumerator
#[async_trait]
pub trait ProxmoxApi {
    /// `data` member of the response for `path` (e.g. `/nodes/pve/status`)
    async fn get_json(&self, path: &str) -> Result<Value>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
}

/// reqwest-backed client
pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: String,
}

impl ProxmoxClient {
    pub fn new(config: &ProxmoxConfig) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&config.token.header_value())
            .map_err(|e| AgentError::Config(format!("invalid API token: {e}")))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url(),
        })
    }
}

#[async_trait]
impl ProxmoxApi for ProxmoxClient {
    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::api(path, e))?
            .error_for_status()
            .map_err(|e| AgentError::api(path, e))?;

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| AgentError::api(path, format!("invalid JSON body: {e}")))?;

        Ok(envelope.data)
    }
}
