//! Serve route and discovery commands

use super::print_json;
use anyhow::Result;
use tailgate_core::routes::{DeploymentMode, DeploymentTopology};
use tailgate_core::service::TailscaleService;
use tracing::instrument;

/// Configure-serve command arguments
#[derive(Debug, Clone)]
pub struct ConfigureServeArgs {
    pub hostname: String,
    pub mode: DeploymentMode,
    pub backend_port: Option<u16>,
    pub use_proxy: bool,
}

impl From<ConfigureServeArgs> for DeploymentTopology {
    fn from(args: ConfigureServeArgs) -> Self {
        DeploymentTopology {
            mode: args.mode,
            target_hostname: args.hostname,
            backend_port: args.backend_port,
            use_proxy: args.use_proxy,
        }
    }
}

/// Execute the configure-serve command
#[instrument(skip(service))]
pub async fn execute_configure_serve(
    service: &TailscaleService,
    environment: &str,
    args: ConfigureServeArgs,
) -> Result<()> {
    let topology: DeploymentTopology = args.into();
    let outcome = service.configure_serve(environment, &topology).await?;
    print_json(&outcome)
}

/// Execute the serve-status command
#[instrument(skip(service))]
pub async fn execute_serve_status(service: &TailscaleService, environment: &str) -> Result<()> {
    print_json(&service.serve_status(environment).await?)
}

/// Execute the reset-serve command
#[instrument(skip(service))]
pub async fn execute_reset_serve(service: &TailscaleService, environment: &str) -> Result<()> {
    service.reset_serve(environment).await?;
    print_json(&serde_json::json!({ "success": true }))
}

/// Execute the access-urls command
#[instrument(skip(service))]
pub async fn execute_access_urls(service: &TailscaleService, environment: &str) -> Result<()> {
    print_json(&service.access_urls(environment).await?)
}

/// Execute the environment command
#[instrument(skip(service))]
pub async fn execute_environment(service: &TailscaleService, environment: &str) -> Result<()> {
    print_json(&service.environment(environment).await?)
}

/// Execute the tailnet-settings command
#[instrument(skip(service))]
pub async fn execute_tailnet_settings(service: &TailscaleService, environment: &str) -> Result<()> {
    print_json(&service.tailnet_settings(environment).await?)
}
