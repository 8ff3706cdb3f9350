//! Sync engine configuration.
//!
//! `SyncSettings` is the persisted, user-editable form. Every field has a
//! default so partial JSON files stay valid across versions. Components take
//! the typed configs derived from it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::TransportConfig;
use crate::realtime::ReconnectPolicy;
use crate::sync::{OrchestratorConfig, ReconcileConfig};
use crate::util::{is_http_url, is_ws_url, normalize_text_option};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RESOURCE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_OPERATION_RETRIES: u32 = 5;
const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 32_000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_RECONCILE_RETRY_DELAY_MS: u64 = 3_000;
const DEFAULT_RECONCILE_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    /// Backend base URL, e.g. `https://api.example.com`
    pub api_base_url: Option<String>,
    /// Realtime endpoint; derived from `api_base_url` when unset
    pub realtime_url: Option<String>,
    pub request_timeout_secs: u64,
    pub resource_timeout_secs: u64,
    pub sync_interval_secs: u64,
    pub max_operation_retries: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconcile_retry_delay_ms: u64,
    pub reconcile_max_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            realtime_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            resource_timeout_secs: DEFAULT_RESOURCE_TIMEOUT_SECS,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            max_operation_retries: DEFAULT_MAX_OPERATION_RETRIES,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            reconnect_max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconcile_retry_delay_ms: DEFAULT_RECONCILE_RETRY_DELAY_MS,
            reconcile_max_attempts: DEFAULT_RECONCILE_MAX_ATTEMPTS,
        }
    }
}

impl SyncSettings {
    /// Parse settings from JSON, normalizing URLs.
    pub fn from_json(payload: &str) -> Result<Self, String> {
        let settings: Self = serde_json::from_str(payload)
            .map_err(|error| format!("invalid settings JSON: {error}"))?;
        settings.normalized()
    }

    /// Trim URLs, drop trailing slashes and check their schemes.
    pub fn normalized(mut self) -> Result<Self, String> {
        self.api_base_url = normalize_url(self.api_base_url, "api_base_url", is_http_url)?;
        self.realtime_url = normalize_url(self.realtime_url, "realtime_url", is_ws_url)?;
        if self.request_timeout_secs == 0 || self.resource_timeout_secs == 0 {
            return Err("timeouts must be at least one second".to_string());
        }
        Ok(self)
    }

    /// The configured backend URL or an error naming the missing setting.
    pub fn require_api_base_url(&self) -> Result<&str, String> {
        self.api_base_url
            .as_deref()
            .ok_or_else(|| "api_base_url is not configured".to_string())
    }

    /// Realtime endpoint, derived as `<api>/v1/realtime` over ws(s) when unset.
    pub fn resolved_realtime_url(&self) -> Option<String> {
        if let Some(url) = &self.realtime_url {
            return Some(url.clone());
        }
        let api = self.api_base_url.as_deref()?;
        let ws = api
            .strip_prefix("https://")
            .map(|rest| format!("wss://{rest}"))
            .or_else(|| api.strip_prefix("http://").map(|rest| format!("ws://{rest}")))?;
        Some(format!("{ws}/v1/realtime"))
    }

    pub fn transport_config(&self) -> Result<TransportConfig, String> {
        Ok(TransportConfig {
            base_url: self.require_api_base_url()?.to_string(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            resource_timeout: Duration::from_secs(self.resource_timeout_secs),
        })
    }

    pub const fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_operation_retries: self.max_operation_retries,
            sync_interval: Duration::from_secs(self.sync_interval_secs),
        }
    }

    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    pub const fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            max_attempts: self.reconcile_max_attempts,
            retry_delay: Duration::from_millis(self.reconcile_retry_delay_ms),
        }
    }
}

fn normalize_url(
    value: Option<String>,
    field: &str,
    scheme_ok: fn(&str) -> bool,
) -> Result<Option<String>, String> {
    let Some(value) = normalize_text_option(value) else {
        return Ok(None);
    };
    let value = value.trim_end_matches('/').to_string();
    if !scheme_ok(&value) {
        return Err(format!("{field} has an unsupported scheme: {value}"));
    }
    Ok(Some(value))
}
