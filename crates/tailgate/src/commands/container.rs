//! Container commands: status, start, stop, remove

use super::print_json;
use anyhow::Result;
use tailgate_core::service::TailscaleService;
use tracing::{debug, instrument};

/// Execute the status command
#[instrument(skip(service))]
pub async fn execute_status(service: &TailscaleService, environment: &str) -> Result<()> {
    let status = service.status(environment).await?;
    print_json(&status)
}

/// Execute the start command
#[instrument(skip(service))]
pub async fn execute_start(service: &TailscaleService, environment: &str) -> Result<()> {
    let outcome = service.start(environment).await?;
    debug!("{}", outcome.message);
    print_json(&outcome)
}

/// Execute the stop command
#[instrument(skip(service))]
pub async fn execute_stop(service: &TailscaleService, environment: &str) -> Result<()> {
    let outcome = service.stop(environment).await?;
    print_json(&outcome)
}

/// Execute the remove command
#[instrument(skip(service))]
pub async fn execute_remove(
    service: &TailscaleService,
    environment: &str,
    remove_volume: bool,
    purge_device: bool,
) -> Result<()> {
    let report = service
        .teardown(environment, remove_volume, purge_device)
        .await?;
    print_json(&report)
}
