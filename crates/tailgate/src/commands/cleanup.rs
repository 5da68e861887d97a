//! Cleanup-device command implementation

use super::print_json;
use anyhow::Result;
use tailgate_core::admin::CleanupOutcome;
use tailgate_core::service::TailscaleService;
use tracing::instrument;

/// Execute the cleanup-device command
///
/// Cleanup is best-effort: the outcome is printed and only an API failure
/// makes the command exit non-zero.
#[instrument(skip(service))]
pub async fn execute_cleanup_device(service: &TailscaleService, short_hostname: &str) -> Result<()> {
    let outcome = service.cleanup_device(short_hostname).await;
    print_json(&outcome)?;
    if let CleanupOutcome::Failed { message } = outcome {
        anyhow::bail!("device cleanup for {} failed: {}", short_hostname, message);
    }
    Ok(())
}
