//! Container lifecycle management
//!
//! Owns the per-environment mesh container and its state volume. Status is a
//! snapshot recomputed on every call from `docker inspect` and the daemon's
//! `status --json`; nothing here is cached.

use crate::docker::{ContainerRunSpec, DockerCli, ENVIRONMENT_LABEL};
use crate::errors::{ConfigError, Result, TailgateError};
use crate::identity::NodeIdentity;
use crate::mesh::{MeshCli, MeshStatus};
use crate::observability;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, Instrument};

/// Structured container status
///
/// `authenticated` is only present when the container runs; `hostname` and
/// `ip_address` only when authenticated. The constructors are the only way
/// to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStatus {
    exists: bool,
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    authenticated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_address: Option<String>,
    /// Login URL the daemon is currently waiting on
    #[serde(skip)]
    pending_auth_url: Option<String>,
}

impl ContainerStatus {
    /// No container
    pub fn absent() -> Self {
        Self {
            exists: false,
            running: false,
            authenticated: None,
            hostname: None,
            ip_address: None,
            pending_auth_url: None,
        }
    }

    /// Container exists but is not running
    pub fn stopped() -> Self {
        Self {
            exists: true,
            ..Self::absent()
        }
    }

    /// Running, not (yet) logged in
    pub fn unauthenticated() -> Self {
        Self {
            exists: true,
            running: true,
            authenticated: Some(false),
            hostname: None,
            ip_address: None,
            pending_auth_url: None,
        }
    }

    /// Record the login URL the daemon reports while logged out
    pub fn with_pending_auth_url(mut self, auth_url: Option<String>) -> Self {
        if self.authenticated == Some(false) {
            self.pending_auth_url = auth_url;
        }
        self
    }

    /// Running and logged in as `hostname` with mesh address `ip_address`
    pub fn authenticated(hostname: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            exists: true,
            running: true,
            authenticated: Some(true),
            hostname: Some(hostname.into()),
            ip_address: Some(ip_address.into()),
            pending_auth_url: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated == Some(true)
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn pending_auth_url(&self) -> Option<&str> {
        self.pending_auth_url.as_deref()
    }
}

/// What `start` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Created,
    Started,
    AlreadyRunning,
}

/// Result of `start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub status: StartStatus,
    pub message: String,
}

/// Result of `remove`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RemoveOutcome {
    pub container_removed: bool,
    pub volume_removed: bool,
}

/// Container image and mounts used for new containers
#[derive(Debug, Clone)]
pub struct ContainerSettings {
    pub image: String,
    pub network: Option<String>,
    /// Mount point of the certs directory inside the container
    pub certs_mount: String,
}

/// Creates, starts, stops and inspects the per-environment mesh container
#[derive(Debug, Clone)]
pub struct ContainerLifecycleManager {
    docker: DockerCli,
    mesh: MeshCli,
    settings: ContainerSettings,
}

impl ContainerLifecycleManager {
    pub fn new(docker: DockerCli, mesh: MeshCli, settings: ContainerSettings) -> Self {
        Self {
            docker,
            mesh,
            settings,
        }
    }

    pub fn docker(&self) -> &DockerCli {
        &self.docker
    }

    /// Mesh CLI bound to the same docker client
    pub fn mesh(&self) -> &MeshCli {
        &self.mesh
    }

    /// Mount point of the certs directory inside the container
    pub fn certs_mount(&self) -> &str {
        &self.settings.certs_mount
    }

    /// Snapshot of the container and its mesh login state
    ///
    /// An absent container is a normal result. A running container whose
    /// daemon does not answer yet is reported as unauthenticated.
    pub async fn status(&self, identity: &NodeIdentity) -> Result<ContainerStatus> {
        let span = observability::container_status_span(identity);
        async {
            let state = match self.docker.inspect_state(&identity.container_name).await? {
                None => return Ok(ContainerStatus::absent()),
                Some(state) => state,
            };
            if !state.running {
                debug!("Container is {}", state.status);
                return Ok(ContainerStatus::stopped());
            }

            match self.mesh.status(&identity.container_name).await {
                Ok(mesh) => Ok(match mesh.authenticated_identity() {
                    Some((hostname, ip)) => ContainerStatus::authenticated(hostname, ip),
                    None => ContainerStatus::unauthenticated().with_pending_auth_url(mesh.auth_url),
                }),
                Err(e) => {
                    debug!("Mesh daemon not answering yet: {}", e);
                    Ok(ContainerStatus::unauthenticated())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Ensure the container exists and runs
    ///
    /// Returns as soon as the daemon process is spawned; it does not wait for
    /// the node to log in.
    pub async fn start(&self, identity: &NodeIdentity) -> Result<StartOutcome> {
        let timed = observability::Timed::new(observability::container_start_span(identity));
        let outcome = async {
            match self.docker.inspect_state(&identity.container_name).await? {
                Some(state) if state.running => Ok(StartOutcome {
                    status: StartStatus::AlreadyRunning,
                    message: format!("Container {} is already running", identity.container_name),
                }),
                Some(_) => {
                    self.docker.start(&identity.container_name).await?;
                    info!("Started existing container");
                    Ok(StartOutcome {
                        status: StartStatus::Started,
                        message: format!("Started existing container {}", identity.container_name),
                    })
                }
                None => {
                    self.create(identity).await?;
                    Ok(StartOutcome {
                        status: StartStatus::Created,
                        message: format!(
                            "Created container {} with volume {}",
                            identity.container_name, identity.volume_name
                        ),
                    })
                }
            }
        }
        .instrument(timed.span())
        .await;
        timed.complete();
        outcome
    }

    async fn create(&self, identity: &NodeIdentity) -> Result<()> {
        std::fs::create_dir_all(&identity.certs_dir).map_err(|e| {
            TailgateError::Config(ConfigError::Validation {
                message: format!(
                    "cannot create certs directory {}: {}",
                    identity.certs_dir.display(),
                    e
                ),
            })
        })?;

        let mut labels = IndexMap::new();
        labels.insert(
            ENVIRONMENT_LABEL.to_string(),
            identity.environment_name.clone(),
        );

        self.docker
            .create_volume(&identity.volume_name, &labels)
            .await?;

        let run = ContainerRunSpec {
            name: identity.container_name.clone(),
            image: self.settings.image.clone(),
            state_volume: identity.volume_name.clone(),
            certs_host_dir: identity.certs_dir.clone(),
            certs_mount: self.settings.certs_mount.clone(),
            network: self.settings.network.clone(),
            labels,
        };
        let id = self.docker.run_detached(&run).await?;
        info!("Created container {}", id);
        Ok(())
    }

    /// Stop the container; `false` when there was nothing to stop
    pub async fn stop(&self, identity: &NodeIdentity) -> Result<bool> {
        self.docker
            .stop(&identity.container_name)
            .instrument(observability::container_teardown_span(identity))
            .await
    }

    /// Remove the container and optionally its state volume
    pub async fn remove(&self, identity: &NodeIdentity, remove_volume: bool) -> Result<RemoveOutcome> {
        async {
            let container_removed = self.docker.remove(&identity.container_name).await?;
            let volume_removed = if remove_volume {
                self.docker.remove_volume(&identity.volume_name).await?
            } else {
                false
            };
            info!(
                container_removed,
                volume_removed, "Removed environment resources"
            );
            Ok(RemoveOutcome {
                container_removed,
                volume_removed,
            })
        }
        .instrument(observability::container_teardown_span(identity))
        .await
    }

    /// Daemon logs written since `since`
    pub async fn logs_since(&self, identity: &NodeIdentity, since: DateTime<Utc>) -> Result<String> {
        self.docker
            .logs_since(&identity.container_name, since)
            .await
    }

    /// Raw daemon status, `None` when the container is absent or stopped
    pub async fn mesh_status(&self, identity: &NodeIdentity) -> Result<Option<MeshStatus>> {
        match self.docker.inspect_state(&identity.container_name).await? {
            Some(state) if state.running => {
                Ok(Some(self.mesh.status(&identity.container_name).await?))
            }
            _ => Ok(None),
        }
    }

    /// Fail with `NotFound`/`NotRunning` unless the container runs
    pub async fn require_running(&self, identity: &NodeIdentity) -> Result<ContainerStatus> {
        let status = self.status(identity).await?;
        if !status.exists() {
            return Err(TailgateError::NotFound {
                container: identity.container_name.clone(),
            });
        }
        if !status.running() {
            return Err(TailgateError::NotRunning {
                container: identity.container_name.clone(),
            });
        }
        Ok(status)
    }

    /// Like [`require_running`](Self::require_running), also requiring a login
    pub async fn require_authenticated(&self, identity: &NodeIdentity) -> Result<ContainerStatus> {
        let status = self.require_running(identity).await?;
        if !status.is_authenticated() {
            return Err(TailgateError::NotAuthenticated {
                container: identity.container_name.clone(),
            });
        }
        Ok(status)
    }
}
