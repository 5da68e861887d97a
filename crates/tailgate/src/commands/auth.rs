//! Login commands: auth-url, login, logout

use super::print_json;
use anyhow::Result;
use tailgate_core::qr;
use tailgate_core::service::TailscaleService;
use tracing::{info, instrument};

/// Execute the auth-url command
///
/// The session JSON goes to stdout; with `--qr` the URL is also drawn on
/// stderr so it can be scanned straight from the terminal.
#[instrument(skip(service))]
pub async fn execute_auth_url(
    service: &TailscaleService,
    environment: &str,
    regenerate: bool,
    draw_qr: bool,
) -> Result<()> {
    let session = service.auth_url(environment, regenerate).await?;
    if draw_qr {
        eprintln!("{}", qr::terminal(&session.auth_url)?);
        eprintln!("Approve the node at {}", session.web_url);
    }
    print_json(&session)
}

/// Execute the login command
#[instrument(skip(service, auth_key))]
pub async fn execute_login(
    service: &TailscaleService,
    environment: &str,
    auth_key: Option<&str>,
) -> Result<()> {
    let status = service.login(environment, auth_key).await?;
    info!(
        authenticated = status.is_authenticated(),
        "Login finished"
    );
    print_json(&status)
}

/// Execute the logout command
#[instrument(skip(service))]
pub async fn execute_logout(service: &TailscaleService, environment: &str) -> Result<()> {
    service.logout(environment).await?;
    print_json(&serde_json::json!({ "success": true }))
}
