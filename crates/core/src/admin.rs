//! Vendor admin API client for device cleanup
//!
//! Ephemeral nodes normally deregister themselves, but a node torn down while
//! logged in can linger in the tailnet's device list. Teardown asks this
//! client to delete it by short hostname. Cleanup is advisory: callers use
//! [`cleanup_best_effort`], which never fails.

use crate::config::AdminConfig;
use crate::errors::{AdminError, Result};
use crate::observability;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A device as listed by the admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub id: String,
    /// Fully qualified name, e.g. `green.example.ts.net`
    #[serde(default)]
    pub name: String,
    /// Short machine hostname
    #[serde(default)]
    pub hostname: String,
}

impl DeviceRegistration {
    /// Whether this device is the node registered as `short_hostname`
    pub fn matches(&self, short_hostname: &str) -> bool {
        self.hostname == short_hostname
            || self.name == short_hostname
            || self.name.starts_with(&format!("{}.", short_hostname))
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<DeviceRegistration>,
}

/// Outcome of a best-effort cleanup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Deleted,
    NotFound,
    ManualCleanupRequired { instruction: String },
    Failed { message: String },
}

/// Tailscale API v2 client
#[derive(Debug, Clone)]
pub struct AdminCleanupClient {
    http: reqwest::Client,
    base_url: String,
    tailnet: String,
    api_key: String,
}

impl AdminCleanupClient {
    pub fn new(
        api_key: impl Into<String>,
        tailnet: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AdminError::MissingApiKey.into());
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tailgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(AdminError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tailnet: tailnet.into(),
            api_key,
        })
    }

    /// Client for the configured credential, `None` without one
    pub fn from_config(config: &AdminConfig) -> Result<Option<Self>> {
        match config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(Some(Self::new(
                key,
                config.tailnet.clone(),
                config.base_url.clone(),
            )?)),
            _ => Ok(None),
        }
    }

    /// All devices in the tailnet
    pub async fn list_devices(&self) -> Result<Vec<DeviceRegistration>> {
        let url = format!("{}/api/v2/tailnet/{}/devices", self.base_url, self.tailnet);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(AdminError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdminError::Status {
                status: status.as_u16(),
                url,
                body,
            }
            .into());
        }
        let list: DeviceList = response.json().await.map_err(AdminError::Http)?;
        debug!("Admin API listed {} devices", list.devices.len());
        Ok(list.devices)
    }

    /// Delete one device; a device that is already gone counts as deleted
    pub async fn delete_device(&self, id: &str) -> Result<()> {
        let url = format!("{}/api/v2/device/{}", self.base_url, id);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(AdminError::Http)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AdminError::Status {
            status: status.as_u16(),
            url,
            body,
        }
        .into())
    }

    /// Delete every device registered as `short_hostname`
    ///
    /// Returns `false` when no device matches.
    pub async fn delete_device_by_hostname(&self, short_hostname: &str) -> Result<bool> {
        async {
            let matching: Vec<DeviceRegistration> = self
                .list_devices()
                .await?
                .into_iter()
                .filter(|device| device.matches(short_hostname))
                .collect();
            if matching.is_empty() {
                debug!("No device registered as {}", short_hostname);
                return Ok(false);
            }
            for device in &matching {
                self.delete_device(&device.id).await?;
                info!(device_id = %device.id, name = %device.name, "Deleted device");
            }
            Ok(true)
        }
        .instrument(observability::device_cleanup_span(short_hostname))
        .await
    }
}

/// Delete `short_hostname` from the tailnet without ever failing
pub async fn cleanup_best_effort(
    client: Option<&AdminCleanupClient>,
    short_hostname: &str,
) -> CleanupOutcome {
    let client = match client {
        Some(client) => client,
        None => {
            let instruction = format!(
                "No admin API key configured; remove device '{}' manually at {}",
                short_hostname,
                crate::auth::ADMIN_MACHINES_URL
            );
            warn!("{}", instruction);
            return CleanupOutcome::ManualCleanupRequired { instruction };
        }
    };
    match client.delete_device_by_hostname(short_hostname).await {
        Ok(true) => CleanupOutcome::Deleted,
        Ok(false) => CleanupOutcome::NotFound,
        Err(e) => {
            warn!("Device cleanup for {} failed: {}", short_hostname, e);
            CleanupOutcome::Failed {
                message: e.to_string(),
            }
        }
    }
}
