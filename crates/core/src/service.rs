//! Composition root
//!
//! [`TailscaleService`] wires the components together and is what both the
//! HTTP surface and the CLI call. It validates input, serializes mutations per
//! environment, and shapes responses; everything else lives in the components.
//!
//! Mutating operations take the environment's lock for their full duration.
//! Status-like reads never take it, so polling is never blocked by a slow
//! certificate issuance.

use crate::admin::{cleanup_best_effort, AdminCleanupClient, CleanupOutcome};
use crate::auth::{AuthFlowCoordinator, AuthSession};
use crate::cert::{CertificateProvisioner, CertificateRecord};
use crate::config::ServiceConfig;
use crate::container::{
    ContainerLifecycleManager, ContainerSettings, ContainerStatus, StartOutcome,
};
use crate::docker::DockerCli;
use crate::errors::{Result, TailgateError};
use crate::identity::NodeIdentity;
use crate::mesh::{MeshCli, MeshStatus};
use crate::process::ProcessRunner;
use crate::retry::RetryConfig;
use crate::routes::{ConfigureOutcome, DeploymentTopology, RouteConfigurator, ServeState};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

/// Admin console DNS page (MagicDNS and HTTPS certificates)
pub const ADMIN_DNS_URL: &str = "https://login.tailscale.com/admin/dns";

/// Upper bound on caller-requested certificate retries
pub const MAX_CERT_RETRIES: u32 = 5;

/// Result of `stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub stopped: bool,
    pub message: String,
}

/// Result of a full teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub container_removed: bool,
    pub volume_removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_cleanup: Option<CleanupOutcome>,
}

/// One tailnet feature flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureFlag {
    pub enabled: bool,
    pub admin_url: String,
}

/// Tailnet-wide features relevant to serving
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TailnetSettings {
    /// Tailnet the node is logged into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tailnet: Option<String>,
    /// Suffix of MagicDNS names, e.g. `example.ts.net`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magic_dns_suffix: Option<String>,
    pub magic_dns: FeatureFlag,
    pub https_serve: FeatureFlag,
}

/// Public HTTPS URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessUrls {
    pub frontend: String,
    pub backend: String,
    pub environments: IndexMap<String, String>,
}

/// Static identity of an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tailscale_hostname: Option<String>,
    pub tailscale_container_name: String,
    pub tailscale_volume_name: String,
}

/// Certificate request options
#[derive(Debug, Clone, Default)]
pub struct CertRequest {
    /// Defaults to the node's own `*.ts.net` name
    pub hostname: Option<String>,
    pub timeout: Option<Duration>,
    /// Extra attempts on transient control-plane failures
    pub retries: Option<u32>,
}

/// The control-plane service
#[derive(Debug)]
pub struct TailscaleService {
    config: ServiceConfig,
    lifecycle: Arc<ContainerLifecycleManager>,
    auth: AuthFlowCoordinator,
    certs: CertificateProvisioner,
    routes: RouteConfigurator,
    admin: Option<AdminCleanupClient>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TailscaleService {
    /// Build the service on top of `runner`
    pub fn new(config: ServiceConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        config.validate()?;
        let admin = AdminCleanupClient::from_config(&config.admin)?;
        Ok(Self::with_admin(config, runner, admin))
    }

    /// Build the service with an explicit admin client
    pub fn with_admin(
        config: ServiceConfig,
        runner: Arc<dyn ProcessRunner>,
        admin: Option<AdminCleanupClient>,
    ) -> Self {
        let docker = DockerCli::new(runner)
            .with_path(config.docker_path.clone())
            .with_timeout(config.timeouts.command());
        let mesh = MeshCli::new(docker.clone(), config.timeouts.command());
        let lifecycle = Arc::new(ContainerLifecycleManager::new(
            docker,
            mesh,
            ContainerSettings {
                image: config.image.clone(),
                network: config.network.clone(),
                certs_mount: config.container_certs_dir.clone(),
            },
        ));
        let auth = AuthFlowCoordinator::new(Arc::clone(&lifecycle), config.timeouts.login());
        let certs = CertificateProvisioner::new(Arc::clone(&lifecycle), config.timeouts.cert());
        let routes = RouteConfigurator::new(
            Arc::clone(&lifecycle),
            config.project_prefix.clone(),
            config.dev_mode,
            config.services.clone(),
        );
        Self {
            config,
            lifecycle,
            auth,
            certs,
            routes,
            admin,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Environment served when none is named
    pub fn default_environment(&self) -> &str {
        &self.config.environment
    }

    pub fn identity(&self, environment: &str) -> Result<NodeIdentity> {
        self.config.identity_for(environment)
    }

    /// Fail unless the docker CLI answers
    pub async fn check_docker(&self) -> Result<()> {
        self.lifecycle.docker().check_installed().await
    }

    async fn lock(&self, environment: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(environment.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Container status snapshot
    pub async fn status(&self, environment: &str) -> Result<ContainerStatus> {
        let identity = self.identity(environment)?;
        let status = self.lifecycle.status(&identity).await?;
        self.auth.observe(environment, status.is_authenticated());
        Ok(status)
    }

    /// Idempotent create/start
    pub async fn start(&self, environment: &str) -> Result<StartOutcome> {
        let identity = self.identity(environment)?;
        let _guard = self.lock(environment).await;
        self.lifecycle.start(&identity).await
    }

    /// Stop the container
    pub async fn stop(&self, environment: &str) -> Result<StopOutcome> {
        let identity = self.identity(environment)?;
        let _guard = self.lock(environment).await;
        let stopped = self.lifecycle.stop(&identity).await?;
        Ok(StopOutcome {
            stopped,
            message: if stopped {
                format!("Stopped container {}", identity.container_name)
            } else {
                format!("Container {} does not exist", identity.container_name)
            },
        })
    }

    /// Remove the container, optionally its volume and tailnet device
    ///
    /// Device cleanup runs after the container is gone and never fails the
    /// teardown.
    pub async fn teardown(
        &self,
        environment: &str,
        remove_volume: bool,
        purge_device: bool,
    ) -> Result<TeardownReport> {
        let identity = self.identity(environment)?;
        let _guard = self.lock(environment).await;
        let removed = self.lifecycle.remove(&identity, remove_volume).await?;
        self.auth.retire(environment);

        let device_cleanup = if purge_device {
            Some(cleanup_best_effort(self.admin.as_ref(), &identity.mesh_hostname).await)
        } else {
            None
        };
        Ok(TeardownReport {
            container_removed: removed.container_removed,
            volume_removed: removed.volume_removed,
            device_cleanup,
        })
    }

    /// Cached or regenerated login URL
    pub async fn auth_url(&self, environment: &str, regenerate: bool) -> Result<AuthSession> {
        let identity = self.identity(environment)?;
        let _guard = self.lock(environment).await;
        self.auth.get_auth_url(&identity, regenerate).await
    }

    /// Fresh login state
    pub async fn is_authenticated(&self, environment: &str) -> Result<bool> {
        let identity = self.identity(environment)?;
        self.auth.is_authenticated(&identity).await
    }

    /// Log in with `auth_key`, or the configured key when `None`
    pub async fn login(&self, environment: &str, auth_key: Option<&str>) -> Result<ContainerStatus> {
        let identity = self.identity(environment)?;
        let key = auth_key
            .or(self.config.auth_key.as_deref())
            .ok_or_else(|| crate::errors::ConfigError::MissingCredential {
                name: "auth_key".to_string(),
            })?;
        let _guard = self.lock(environment).await;
        self.auth.login_with_auth_key(&identity, key).await
    }

    /// Log out of the tailnet
    pub async fn logout(&self, environment: &str) -> Result<()> {
        let identity = self.identity(environment)?;
        let _guard = self.lock(environment).await;
        self.auth.logout(&identity).await
    }

    /// Issue a certificate, optionally retrying transient failures
    pub async fn provision_cert(
        &self,
        environment: &str,
        request: CertRequest,
    ) -> Result<CertificateRecord> {
        let identity = self.identity(environment)?;
        let _guard = self.lock(environment).await;

        let hostname = match request.hostname {
            Some(hostname) if !hostname.trim().is_empty() => hostname,
            _ => {
                let status = self.lifecycle.require_authenticated(&identity).await?;
                status
                    .hostname()
                    .map(str::to_string)
                    .ok_or_else(|| TailgateError::NotAuthenticated {
                        container: identity.container_name.clone(),
                    })?
            }
        };

        match request.retries {
            Some(retries) if retries > 0 => {
                if retries > MAX_CERT_RETRIES {
                    return Err(TailgateError::InvalidRequest {
                        message: format!("retries must be at most {}", MAX_CERT_RETRIES),
                    });
                }
                let policy = RetryConfig::for_certificates(retries);
                self.certs
                    .provision_with_retry(&identity, &hostname, request.timeout, &policy)
                    .await
            }
            _ => self.certs.provision(&identity, &hostname, request.timeout).await,
        }
    }

    /// Apply serve routes for `topology`
    pub async fn configure_serve(
        &self,
        environment: &str,
        topology: &DeploymentTopology,
    ) -> Result<ConfigureOutcome> {
        let identity = self.identity(environment)?;
        let _guard = self.lock(environment).await;
        self.routes.configure(&identity, topology).await
    }

    /// Live serve routes
    pub async fn serve_status(&self, environment: &str) -> Result<ServeState> {
        let identity = self.identity(environment)?;
        self.routes.status(&identity).await
    }

    /// Clear serve routes
    pub async fn reset_serve(&self, environment: &str) -> Result<()> {
        let identity = self.identity(environment)?;
        let _guard = self.lock(environment).await;
        self.routes.reset(&identity).await
    }

    /// MagicDNS and HTTPS availability for the node's tailnet
    ///
    /// Without a running, answering daemon both features read as disabled.
    pub async fn tailnet_settings(&self, environment: &str) -> Result<TailnetSettings> {
        let identity = self.identity(environment)?;
        let status = match self.lifecycle.mesh_status(&identity).await {
            Ok(status) => status.unwrap_or_default(),
            Err(e) => {
                debug!("Mesh status unavailable for {}: {}", environment, e);
                MeshStatus::default()
            }
        };
        Ok(TailnetSettings {
            magic_dns: FeatureFlag {
                enabled: status.magic_dns_enabled,
                admin_url: ADMIN_DNS_URL.to_string(),
            },
            https_serve: FeatureFlag {
                enabled: status.https_enabled(),
                admin_url: ADMIN_DNS_URL.to_string(),
            },
            tailnet: status.tailnet_name,
            magic_dns_suffix: status.magic_dns_suffix,
        })
    }

    /// Best known `*.ts.net` name: the live one, else the configured one
    async fn known_hostname(&self, environment: &str) -> Option<String> {
        match self.status(environment).await {
            Ok(status) if status.is_authenticated() => status.hostname().map(str::to_string),
            Ok(_) => self.config.environments.get(environment).cloned(),
            Err(e) => {
                debug!("Status unavailable for {}: {}", environment, e);
                self.config.environments.get(environment).cloned()
            }
        }
    }

    /// HTTPS URLs for the frontend, the backend and every known environment
    pub async fn access_urls(&self, environment: &str) -> Result<AccessUrls> {
        let identity = self.identity(environment)?;
        let hostname = self.known_hostname(environment).await.ok_or_else(|| {
            TailgateError::NotAuthenticated {
                container: identity.container_name.clone(),
            }
        })?;

        let mut environments: IndexMap<String, String> = self
            .config
            .environments
            .iter()
            .map(|(name, host)| (name.clone(), format!("https://{}", host)))
            .collect();
        environments.insert(environment.to_string(), format!("https://{}", hostname));

        Ok(AccessUrls {
            frontend: format!("https://{}", hostname),
            backend: format!("https://{}/api", hostname),
            environments,
        })
    }

    /// Names of everything owned by `environment`
    pub async fn environment(&self, environment: &str) -> Result<EnvironmentInfo> {
        let identity = self.identity(environment)?;
        Ok(EnvironmentInfo {
            name: identity.environment_name.clone(),
            tailscale_hostname: self.known_hostname(environment).await,
            tailscale_container_name: identity.container_name,
            tailscale_volume_name: identity.volume_name,
        })
    }

    /// Delete a device from the tailnet by short hostname
    pub async fn cleanup_device(&self, short_hostname: &str) -> CleanupOutcome {
        info!("Cleaning up device {}", short_hostname);
        cleanup_best_effort(self.admin.as_ref(), short_hostname).await
    }
}
