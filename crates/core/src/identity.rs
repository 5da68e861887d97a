//! Per-environment node identity
//!
//! A [`NodeIdentity`] names every resource tailgate manages for one
//! deployment environment: the container, its state volume, and the host
//! directory certificates are written to.

use crate::errors::{ConfigError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Maximum environment name length (DNS label limit)
const MAX_ENVIRONMENT_LEN: usize = 63;

/// Names of all resources owned by one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeIdentity {
    /// Deployment environment name (e.g. "green")
    pub environment_name: String,
    /// `<prefix>-<env>-tailscale`
    pub container_name: String,
    /// `<prefix>-<env>-tailscale-state`
    pub volume_name: String,
    /// Host directory mounted into the container at the certs mount point
    pub certs_dir: PathBuf,
    /// Short node name registered on the tailnet
    pub mesh_hostname: String,
}

impl NodeIdentity {
    /// Derive the identity for `environment` under `prefix`
    ///
    /// Certificates for the environment live in `<certs_root>/<env>`.
    pub fn new(prefix: &str, environment: &str, certs_root: &Path) -> Result<Self> {
        validate_environment_name(environment)?;
        let base = format!("{}-{}", prefix, environment);
        Ok(Self {
            environment_name: environment.to_string(),
            container_name: format!("{}-tailscale", base),
            volume_name: format!("{}-tailscale-state", base),
            certs_dir: certs_root.join(environment),
            mesh_hostname: base,
        })
    }

    /// Override the short node name
    pub fn with_mesh_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.mesh_hostname = hostname.into();
        self
    }

    /// Host path of the certificate for `hostname`
    pub fn cert_path(&self, hostname: &str) -> PathBuf {
        self.certs_dir.join(format!("{}.crt", hostname))
    }

    /// Host path of the private key for `hostname`
    pub fn key_path(&self, hostname: &str) -> PathBuf {
        self.certs_dir.join(format!("{}.key", hostname))
    }
}

/// Validate an environment name against container/DNS naming rules
pub fn validate_environment_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| -> Result<()> {
        Err(ConfigError::InvalidEnvironment {
            name: name.to_string(),
            reason: reason.to_string(),
        }
        .into())
    };

    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.len() > MAX_ENVIRONMENT_LEN {
        return invalid("must be at most 63 characters");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return invalid("must not start or end with '-'");
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return invalid(&format!(
            "contains invalid character '{}'; only lowercase letters, digits and '-' are allowed",
            ch
        ));
    }
    Ok(())
}

/// Whether `hostname` is a fully qualified mesh hostname
pub fn is_mesh_hostname(hostname: &str) -> bool {
    let trimmed = hostname.trim_end_matches('.');
    trimmed.len() > ".ts.net".len()
        && trimmed.ends_with(".ts.net")
        && !trimmed.starts_with('.')
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// Validate a fully qualified mesh hostname
pub fn validate_mesh_hostname(hostname: &str) -> Result<()> {
    if is_mesh_hostname(hostname) {
        Ok(())
    } else {
        Err(ConfigError::InvalidHostname {
            hostname: hostname.to_string(),
        }
        .into())
    }
}
