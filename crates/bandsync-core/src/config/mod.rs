//! Sync client configuration.
//!
//! `ClientConfig` is the JSON document clients ship with (or write on first
//! run) to locate the sync API and identify the device and tenant. It is
//! validated once at load time and then turned into the explicit
//! [`SyncContext`] that every sync call carries.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::SyncContext;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_PUSH_BATCH_SIZE: usize = 100;
const DEFAULT_PULL_BATCH_SIZE: usize = 500;
const DEFAULT_MAX_PULL_BATCHES: usize = 20;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PLATFORM: &str = "cli";

/// Client-side sync configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the sync API, e.g. `https://api.example.com`
    pub api_base_url: String,
    pub device_id: String,
    /// Tenant (band) whose data this client syncs
    pub tenant_id: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Bearer token for the sync API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_push_batch_size")]
    pub push_batch_size: usize,
    #[serde(default = "default_pull_batch_size")]
    pub pull_batch_size: usize,
    /// Upper bound on pull round-trips per cycle
    #[serde(default = "default_max_pull_batches")]
    pub max_pull_batches: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

const fn default_push_batch_size() -> usize {
    DEFAULT_PUSH_BATCH_SIZE
}

const fn default_pull_batch_size() -> usize {
    DEFAULT_PULL_BATCH_SIZE
}

const fn default_max_pull_batches() -> usize {
    DEFAULT_MAX_PULL_BATCHES
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl ClientConfig {
    /// Config with default batching for the given endpoint and identity
    pub fn new(
        api_base_url: impl Into<String>,
        device_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            device_id: device_id.into(),
            tenant_id: tenant_id.into(),
            platform: default_platform(),
            auth_token: None,
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            pull_batch_size: DEFAULT_PULL_BATCH_SIZE,
            max_pull_batches: DEFAULT_MAX_PULL_BATCHES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Parse and validate a config document
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))?;
        config.validate()
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            Error::Config(format!("failed to read config at {}: {error}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Normalize fields and reject unusable values
    pub fn validate(self) -> Result<Self> {
        let api_base_url = normalize_required(self.api_base_url, "api_base_url")?;
        if !is_http_url(&api_base_url) {
            return Err(Error::Config(
                "api_base_url must include http:// or https://".to_string(),
            ));
        }

        for (value, field) in [
            (self.push_batch_size, "push_batch_size"),
            (self.pull_batch_size, "pull_batch_size"),
            (self.max_pull_batches, "max_pull_batches"),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{field} must be greater than zero")));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            device_id: normalize_required(self.device_id, "device_id")?,
            tenant_id: normalize_required(self.tenant_id, "tenant_id")?,
            platform: normalize_text_option(Some(self.platform)).unwrap_or_else(default_platform),
            auth_token: normalize_text_option(self.auth_token),
            ..self
        })
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Explicit identity carried by every sync call
    pub fn sync_context(&self) -> SyncContext {
        SyncContext::new(&self.device_id, &self.tenant_id, &self.platform)
    }
}

fn normalize_required(raw: String, field: &str) -> Result<String> {
    normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config(format!("config field '{field}' is required")))
}
