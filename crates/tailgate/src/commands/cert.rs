//! Provision-cert command implementation

use super::print_json;
use anyhow::Result;
use std::time::Duration;
use tailgate_core::service::{CertRequest, TailscaleService};
use tracing::{instrument, warn};

/// Provision-cert command arguments
#[derive(Debug, Clone, Default)]
pub struct ProvisionCertArgs {
    /// Hostname to issue for; the node's own name when absent
    pub hostname: Option<String>,
    /// Issuance timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Extra attempts on transient failures
    pub retries: Option<u32>,
}

impl From<ProvisionCertArgs> for CertRequest {
    fn from(args: ProvisionCertArgs) -> Self {
        CertRequest {
            hostname: args.hostname,
            timeout: args.timeout_secs.map(Duration::from_secs),
            retries: args.retries,
        }
    }
}

/// Execute the provision-cert command
///
/// A failed attempt still prints its record (with diagnosis) before the
/// command exits non-zero.
#[instrument(skip(service))]
pub async fn execute_provision_cert(
    service: &TailscaleService,
    environment: &str,
    args: ProvisionCertArgs,
) -> Result<()> {
    let record = service.provision_cert(environment, args.into()).await?;
    print_json(&record)?;
    if !record.provisioned {
        if let Some(diagnosis) = record.diagnosis.as_ref().filter(|d| !d.is_empty()) {
            warn!("{}", diagnosis.summary());
        }
        anyhow::bail!(
            "certificate for {} was not provisioned: {}",
            record.hostname,
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_convert_to_request() {
        let request: CertRequest = ProvisionCertArgs {
            hostname: Some("green.example.ts.net".to_string()),
            timeout_secs: Some(45),
            retries: Some(2),
        }
        .into();
        assert_eq!(request.hostname.as_deref(), Some("green.example.ts.net"));
        assert_eq!(request.timeout, Some(Duration::from_secs(45)));
        assert_eq!(request.retries, Some(2));

        let request: CertRequest = ProvisionCertArgs::default().into();
        assert!(request.hostname.is_none());
        assert!(request.timeout.is_none());
    }
}
