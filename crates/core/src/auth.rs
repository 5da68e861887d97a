//! Login URL issuance and caching
//!
//! One [`AuthSession`] is cached per environment. Plain reads return the
//! cached session unchanged; a regenerate request replaces it with a session
//! whose URL differs from the previous one. The cache is retired whenever the
//! node is observed authenticated or explicitly logged out, and whenever the
//! daemon reports a pending login URL other than the cached one, so the next
//! unauthenticated period always starts from a fresh URL.

use crate::container::{ContainerLifecycleManager, ContainerStatus};
use crate::diagnosis;
use crate::errors::{MeshError, Result, TailgateError};
use crate::identity::NodeIdentity;
use crate::observability;
use crate::qr;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Admin console page where pending nodes can be approved
pub const ADMIN_MACHINES_URL: &str = "https://login.tailscale.com/admin/machines";

static LOGIN_URL_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://login\.tailscale\.com/a/\S*").expect("valid regex"));

static LOGIN_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://login\.tailscale\.com/a/[0-9a-f]+$").expect("valid regex"));

/// A cached login URL and its QR rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub auth_url: String,
    pub web_url: String,
    /// `data:image/png;base64,...`
    pub qr_code_data: String,
    pub issued_at: DateTime<Utc>,
}

/// Whether `url` is a well-formed login URL
pub fn is_login_url(url: &str) -> bool {
    LOGIN_URL.is_match(url)
}

/// Extract and validate the login URL from CLI output
pub fn parse_login_url(output: &str) -> Result<String> {
    let candidate = LOGIN_URL_CANDIDATE
        .find(output)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')']))
        .filter(|url| is_login_url(url));
    match candidate {
        Some(url) => Ok(url.to_string()),
        None => Err(MeshError::MalformedAuthUrl {
            output: output.trim().to_string(),
        }
        .into()),
    }
}

/// Requests, caches and invalidates login URLs
#[derive(Debug)]
pub struct AuthFlowCoordinator {
    lifecycle: Arc<ContainerLifecycleManager>,
    login_wait: Duration,
    sessions: Mutex<HashMap<String, AuthSession>>,
}

impl AuthFlowCoordinator {
    pub fn new(lifecycle: Arc<ContainerLifecycleManager>, login_wait: Duration) -> Self {
        Self {
            lifecycle,
            login_wait,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, AuthSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached session for `environment`, if any
    pub fn cached(&self, environment: &str) -> Option<AuthSession> {
        self.sessions().get(environment).cloned()
    }

    /// Feed an observed login state into the cache
    pub fn observe(&self, environment: &str, authenticated: bool) {
        if authenticated && self.sessions().remove(environment).is_some() {
            debug!("Node authenticated, retired cached login URL");
        }
    }

    /// Drop the cached session for `environment`
    pub fn retire(&self, environment: &str) {
        self.sessions().remove(environment);
    }

    /// Cached or freshly issued login URL
    pub async fn get_auth_url(&self, identity: &NodeIdentity, regenerate: bool) -> Result<AuthSession> {
        let timed = observability::Timed::new(observability::auth_url_span(identity, regenerate));
        let result = self
            .issue(identity, regenerate)
            .instrument(timed.span())
            .await;
        timed.complete();
        result
    }

    async fn issue(&self, identity: &NodeIdentity, regenerate: bool) -> Result<AuthSession> {
        let status = self.lifecycle.require_running(identity).await?;
        self.observe(&identity.environment_name, status.is_authenticated());
        if status.is_authenticated() {
            return Err(TailgateError::AlreadyAuthenticated {
                container: identity.container_name.clone(),
                hostname: status.hostname().unwrap_or_default().to_string(),
            });
        }

        let environment = identity.environment_name.as_str();
        let live_url = status
            .pending_auth_url()
            .filter(|url| is_login_url(url))
            .map(str::to_string);
        let mut previous = self.cached(environment);
        let superseded = matches!(
            (&previous, &live_url),
            (Some(session), Some(live)) if session.auth_url != *live
        );
        if superseded {
            info!("Daemon is waiting on a different login URL, retiring the cached one");
            self.retire(environment);
            previous = None;
        }

        if !regenerate {
            if let Some(session) = previous {
                debug!("Returning cached login URL");
                return Ok(session);
            }
            if let Some(live) = live_url {
                debug!("Adopting the daemon's pending login URL");
                return self.remember(environment, live);
            }
        }

        let previous_url = previous.map(|s| s.auth_url);
        let mut auth_url = self.request_url(identity, regenerate).await?;
        if regenerate && previous_url.as_deref() == Some(auth_url.as_str()) {
            warn!("Regenerate returned the cached login URL, retrying once");
            auth_url = self.request_url(identity, true).await?;
            if previous_url.as_deref() == Some(auth_url.as_str()) {
                return Err(MeshError::StaleAuthUrl { auth_url }.into());
            }
        }
        let session = self.remember(environment, auth_url)?;
        info!("Issued new login URL");
        Ok(session)
    }

    fn remember(&self, environment: &str, auth_url: String) -> Result<AuthSession> {
        let session = AuthSession {
            qr_code_data: qr::png_data_url(&auth_url)?,
            auth_url,
            web_url: ADMIN_MACHINES_URL.to_string(),
            issued_at: Utc::now(),
        };
        self.sessions()
            .insert(environment.to_string(), session.clone());
        Ok(session)
    }

    async fn request_url(&self, identity: &NodeIdentity, force_reauth: bool) -> Result<String> {
        let output = self
            .lifecycle
            .mesh()
            .request_login(
                &identity.container_name,
                &identity.mesh_hostname,
                force_reauth,
                self.login_wait,
            )
            .await?;
        let text = output.combined();
        parse_login_url(&text).map_err(|e| {
            // no URL because the control plane dropped the request
            let diagnosis = diagnosis::classify(&text);
            if diagnosis.transient {
                warn!("Login request failed: {}", diagnosis.summary());
                TailgateError::ControlPlane {
                    message: format!(
                        "{} ({})",
                        diagnosis.summary(),
                        crate::redaction::redact(text.trim())
                    ),
                }
            } else {
                e
            }
        })
    }

    /// Fresh login state; never cached
    pub async fn is_authenticated(&self, identity: &NodeIdentity) -> Result<bool> {
        let status = self.lifecycle.status(identity).await?;
        self.observe(&identity.environment_name, status.is_authenticated());
        Ok(status.is_authenticated())
    }

    /// Log in with a pre-shared auth key
    pub async fn login_with_auth_key(
        &self,
        identity: &NodeIdentity,
        auth_key: &str,
    ) -> Result<ContainerStatus> {
        crate::redaction::global_registry().add_secret(auth_key);
        let status = self.lifecycle.require_running(identity).await?;
        if status.is_authenticated() {
            self.observe(&identity.environment_name, true);
            return Ok(status);
        }

        self.lifecycle
            .mesh()
            .login_with_key(
                &identity.container_name,
                &identity.mesh_hostname,
                auth_key,
                self.login_wait,
            )
            .await?;
        let status = self.lifecycle.status(identity).await?;
        self.observe(&identity.environment_name, status.is_authenticated());
        info!(authenticated = status.is_authenticated(), "Auth key login finished");
        Ok(status)
    }

    /// Log the node out and retire the cached session
    pub async fn logout(&self, identity: &NodeIdentity) -> Result<()> {
        self.lifecycle.require_running(identity).await?;
        self.lifecycle
            .mesh()
            .logout(&identity.container_name)
            .await?;
        self.retire(&identity.environment_name);
        info!("Logged out of the tailnet");
        Ok(())
    }
}
