//! Certificate provisioning
//!
//! One call is one issuance attempt: the mesh CLI writes the certificate and
//! key into the container's certs mount, and the result is validated from the
//! host side of that mount. Failed attempts carry the CLI output verbatim and
//! a [`Diagnosis`] of the daemon logs written during the attempt. Retrying is
//! left to callers; [`CertificateProvisioner::provision_with_retry`] is the
//! stock policy that only retries transient diagnoses.

use crate::container::ContainerLifecycleManager;
use crate::diagnosis::{self, ControlPlaneIssue, Diagnosis};
use crate::errors::{ProcessError, Result, TailgateError};
use crate::identity::{validate_mesh_hostname, NodeIdentity};
use crate::observability;
use crate::retry::{retry_async, RetryConfig, RetryDecision};
use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn, Instrument};

/// Default issuance timeout
pub const DEFAULT_CERT_TIMEOUT: Duration = Duration::from_secs(120);

const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

/// Outcome of one issuance attempt (or the last of several)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateRecord {
    pub hostname: String,
    pub cert_path: String,
    pub key_path: String,
    pub provisioned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
    /// The CLI exceeded its time budget
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
    pub attempts: u32,
}

impl CertificateRecord {
    /// Failed attempt whose diagnosis says retrying can help
    pub fn is_transient_failure(&self) -> bool {
        !self.provisioned
            && self
                .diagnosis
                .as_ref()
                .map(|d| d.transient)
                .unwrap_or(false)
    }
}

/// Whether `contents` holds a complete PEM certificate block
pub fn is_pem_certificate(contents: &str) -> bool {
    match (contents.find(PEM_CERT_BEGIN), contents.rfind(PEM_CERT_END)) {
        (Some(begin), Some(end)) => begin < end,
        _ => false,
    }
}

fn valid_pair(cert_path: &Path, key_path: &Path) -> bool {
    let cert_ok = std::fs::read_to_string(cert_path)
        .map(|c| is_pem_certificate(&c))
        .unwrap_or(false);
    let key_ok = std::fs::read_to_string(key_path)
        .map(|k| k.contains("PRIVATE KEY-----"))
        .unwrap_or(false);
    cert_ok && key_ok
}

/// Remove a cert/key pair that does not validate
fn discard_invalid_pair(cert_path: &Path, key_path: &Path) {
    if valid_pair(cert_path, key_path) {
        return;
    }
    for path in [cert_path, key_path] {
        match std::fs::remove_file(path) {
            Ok(()) => warn!("Removed invalid certificate file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

enum Attempt {
    Failed(CertificateRecord),
    Error(TailgateError),
}

impl std::fmt::Debug for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attempt::Failed(record) => write!(f, "Failed({:?})", record.error),
            Attempt::Error(e) => write!(f, "Error({})", e),
        }
    }
}

/// Drives `tailscale cert` inside the container
#[derive(Debug, Clone)]
pub struct CertificateProvisioner {
    lifecycle: Arc<ContainerLifecycleManager>,
    default_timeout: Duration,
}

impl CertificateProvisioner {
    pub fn new(lifecycle: Arc<ContainerLifecycleManager>, default_timeout: Duration) -> Self {
        Self {
            lifecycle,
            default_timeout,
        }
    }

    /// One issuance attempt for `hostname`
    ///
    /// Precondition failures (invalid hostname, container absent, not
    /// running, not logged in) are errors. Failures of the attempt itself are
    /// an `Ok` record with `provisioned: false`.
    pub async fn provision(
        &self,
        identity: &NodeIdentity,
        hostname: &str,
        timeout: Option<Duration>,
    ) -> Result<CertificateRecord> {
        let hostname = hostname.trim_end_matches('.');
        validate_mesh_hostname(hostname)?;
        let timed = observability::Timed::new(observability::cert_provision_span(identity, hostname));
        let record = self
            .attempt(identity, hostname, timeout.unwrap_or(self.default_timeout))
            .instrument(timed.span())
            .await;
        timed.complete();
        record
    }

    async fn attempt(
        &self,
        identity: &NodeIdentity,
        hostname: &str,
        timeout: Duration,
    ) -> Result<CertificateRecord> {
        self.lifecycle.require_authenticated(identity).await?;

        let cert_path = identity.cert_path(hostname);
        let key_path = identity.key_path(hostname);
        let mount = self.lifecycle.certs_mount().trim_end_matches('/');
        let container_cert = format!("{}/{}.crt", mount, hostname);
        let container_key = format!("{}/{}.key", mount, hostname);

        let mut record = CertificateRecord {
            hostname: hostname.to_string(),
            cert_path: cert_path.display().to_string(),
            key_path: key_path.display().to_string(),
            provisioned: false,
            error: None,
            duration_seconds: 0.0,
            timed_out: false,
            diagnosis: None,
            attempts: 1,
        };

        let since = Utc::now() - chrono::Duration::seconds(1);
        let started = Instant::now();
        let result = self
            .lifecycle
            .mesh()
            .cert(
                &identity.container_name,
                hostname,
                &container_cert,
                &container_key,
                timeout,
            )
            .await;
        record.duration_seconds = (started.elapsed().as_millis() as f64) / 1000.0;

        let cli_output = match result {
            Ok(output) if output.success() => {
                if valid_pair(&cert_path, &key_path) {
                    record.provisioned = true;
                    info!(
                        duration_seconds = record.duration_seconds,
                        "Certificate provisioned"
                    );
                    return Ok(record);
                }
                record.error = Some(format!(
                    "certificate command exited 0 but {} does not contain a PEM certificate with its key at {}",
                    record.cert_path, record.key_path
                ));
                output.combined()
            }
            Ok(output) => {
                let text = output.combined();
                record.error = Some(format!(
                    "certificate command failed with exit code {}: {}",
                    output.exit_code,
                    crate::redaction::redact(text.trim())
                ));
                text
            }
            Err(TailgateError::Process(ProcessError::Timeout { command, timeout })) => {
                record.timed_out = true;
                record.error = Some(format!(
                    "Command `{}` timed out after {}s",
                    command,
                    timeout.as_secs()
                ));
                String::new()
            }
            Err(e) => return Err(e),
        };

        let logs = match self.lifecycle.logs_since(identity, since).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Could not read daemon logs for diagnosis: {}", e);
                String::new()
            }
        };
        let mut diagnosis = diagnosis::classify(&format!("{}\n{}", cli_output, logs));
        if record.timed_out {
            // a hung control-plane request looks the same as an i/o timeout
            let evidence = record.error.clone().unwrap_or_default();
            diagnosis.note(ControlPlaneIssue::IoTimeout, evidence);
        }
        if !diagnosis.is_empty() {
            warn!(
                transient = diagnosis.transient,
                "Certificate attempt failed: {}",
                diagnosis.summary()
            );
        }
        record.diagnosis = Some(diagnosis);

        discard_invalid_pair(&cert_path, &key_path);
        Ok(record)
    }

    /// Issue with caller-level retry on transient control-plane failures
    ///
    /// Permanent failures and precondition errors return immediately. The
    /// returned record is the last attempt with `attempts` set to the count.
    pub async fn provision_with_retry(
        &self,
        identity: &NodeIdentity,
        hostname: &str,
        timeout: Option<Duration>,
        retry: &RetryConfig,
    ) -> Result<CertificateRecord> {
        let outcome = retry_async(
            retry,
            |attempt| async move {
                match self.provision(identity, hostname, timeout).await {
                    Ok(mut record) if !record.provisioned => {
                        record.attempts = attempt + 1;
                        Err(Attempt::Failed(record))
                    }
                    Ok(mut record) => {
                        record.attempts = attempt + 1;
                        Ok(record)
                    }
                    Err(e) => Err(Attempt::Error(e)),
                }
            },
            |failure| match failure {
                Attempt::Failed(record) if record.is_transient_failure() => RetryDecision::Retry,
                _ => RetryDecision::Stop,
            },
        )
        .await;

        match outcome {
            Ok(record) | Err(Attempt::Failed(record)) => Ok(record),
            Err(Attempt::Error(e)) => Err(e),
        }
    }
}
