//! Mesh CLI (tailscale) wrapper
//!
//! Every command runs inside the managed container via `docker exec`. The
//! daemon's own persisted state is the source of truth for authentication,
//! so [`MeshStatus`] is always parsed from a fresh `status --json`.

use crate::docker::DockerCli;
use crate::errors::{MeshError, Result};
use crate::process::CommandOutput;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, instrument};

/// Mesh CLI binary inside the container
pub const MESH_BINARY: &str = "tailscale";

/// Extra process budget on top of the CLI's own `--timeout`
const LOGIN_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(rename = "BackendState", default)]
    backend_state: String,
    #[serde(rename = "AuthURL", default)]
    auth_url: String,
    #[serde(rename = "Self", default)]
    self_node: Option<RawNode>,
    #[serde(rename = "CurrentTailnet", default)]
    current_tailnet: Option<RawTailnet>,
    #[serde(rename = "CertDomains", default)]
    cert_domains: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(rename = "DNSName", default)]
    dns_name: String,
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawTailnet {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "MagicDNSSuffix", default)]
    magic_dns_suffix: String,
    #[serde(rename = "MagicDNSEnabled", default)]
    magic_dns_enabled: bool,
}

/// Parsed `tailscale status --json`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeshStatus {
    /// e.g. `NoState`, `NeedsLogin`, `Starting`, `Running`
    pub backend_state: String,
    /// Pending login URL, if the daemon is waiting for one
    pub auth_url: Option<String>,
    /// Self DNS name without the trailing dot
    pub dns_name: Option<String>,
    pub addresses: Vec<String>,
    pub tailnet_name: Option<String>,
    pub magic_dns_suffix: Option<String>,
    pub magic_dns_enabled: bool,
    /// Domains the node may request certificates for (HTTPS enabled)
    pub cert_domains: Vec<String>,
}

impl MeshStatus {
    /// Parse the JSON document printed by `status --json`
    pub fn parse(json: &str) -> Result<Self> {
        let raw: RawStatus = serde_json::from_str(json.trim()).map_err(|e| {
            MeshError::StatusParse {
                message: e.to_string(),
            }
        })?;

        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        let (dns_name, addresses) = match raw.self_node {
            Some(node) => (
                non_empty(node.dns_name.trim_end_matches('.').to_string()),
                node.tailscale_ips.unwrap_or_default(),
            ),
            None => (None, Vec::new()),
        };
        let (tailnet_name, magic_dns_suffix, magic_dns_enabled) = match raw.current_tailnet {
            Some(t) => (non_empty(t.name), non_empty(t.magic_dns_suffix), t.magic_dns_enabled),
            None => (None, None, false),
        };

        Ok(Self {
            backend_state: raw.backend_state,
            auth_url: non_empty(raw.auth_url),
            dns_name,
            addresses,
            tailnet_name,
            magic_dns_suffix,
            magic_dns_enabled,
            cert_domains: raw.cert_domains.unwrap_or_default(),
        })
    }

    /// Backend reports `Running`
    pub fn is_running(&self) -> bool {
        self.backend_state == "Running"
    }

    /// First IPv4 address inside `100.0.0.0/8`
    pub fn mesh_ipv4(&self) -> Option<&str> {
        self.addresses.iter().map(String::as_str).find(|addr| {
            addr.parse::<Ipv4Addr>()
                .map(|ip| ip.octets()[0] == 100)
                .unwrap_or(false)
        })
    }

    /// `(hostname, ip)` when the node is fully logged in
    ///
    /// Requires backend `Running`, a `*.ts.net` DNS name and a mesh IPv4.
    pub fn authenticated_identity(&self) -> Option<(String, String)> {
        if !self.is_running() {
            return None;
        }
        let hostname = self
            .dns_name
            .as_deref()
            .filter(|name| crate::identity::is_mesh_hostname(name))?;
        let ip = self.mesh_ipv4()?;
        Some((hostname.to_string(), ip.to_string()))
    }

    /// HTTPS certificates are available for this tailnet
    pub fn https_enabled(&self) -> bool {
        !self.cert_domains.is_empty()
    }
}

/// Runs the mesh CLI inside a container
#[derive(Debug, Clone)]
pub struct MeshCli {
    docker: DockerCli,
    timeout: Duration,
}

impl MeshCli {
    pub fn new(docker: DockerCli, timeout: Duration) -> Self {
        Self { docker, timeout }
    }

    async fn exec(
        &self,
        container: &str,
        args: &[&str],
        stdin: Option<String>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut command = Vec::with_capacity(args.len() + 1);
        command.push(MESH_BINARY.to_string());
        command.extend(args.iter().map(|a| a.to_string()));
        self.docker.exec(container, &command, stdin, timeout).await
    }

    /// Fresh daemon status
    #[instrument(skip(self))]
    pub async fn status(&self, container: &str) -> Result<MeshStatus> {
        let output = self
            .exec(container, &["status", "--json"], None, self.timeout)
            .await?;
        // status exits non-zero while logged out but still prints JSON
        if output.stdout.trim_start().starts_with('{') {
            return MeshStatus::parse(&output.stdout);
        }
        let output = output.ensure_success(&self.describe(container, &["status", "--json"]))?;
        MeshStatus::parse(&output.stdout)
    }

    /// Bounded interactive `up` that prints a login URL
    ///
    /// The CLI waits for the human to finish logging in, so it is expected
    /// to hit `--timeout` and exit non-zero; output is returned either way.
    #[instrument(skip(self))]
    pub async fn request_login(
        &self,
        container: &str,
        hostname: &str,
        force_reauth: bool,
        wait: Duration,
    ) -> Result<CommandOutput> {
        let hostname_arg = format!("--hostname={}", hostname);
        let timeout_arg = format!("--timeout={}s", wait.as_secs().max(1));
        let mut args = vec![
            "up",
            hostname_arg.as_str(),
            "--accept-dns=false",
            timeout_arg.as_str(),
        ];
        if force_reauth {
            args.push("--force-reauth");
        }
        let output = self
            .exec(container, &args, None, wait + LOGIN_SLACK)
            .await?;
        debug!("Login request exited with code {}", output.exit_code);
        Ok(output)
    }

    /// Non-interactive login with a pre-shared key
    #[instrument(skip(self, auth_key))]
    pub async fn login_with_key(
        &self,
        container: &str,
        hostname: &str,
        auth_key: &str,
        wait: Duration,
    ) -> Result<()> {
        let key_arg = format!("--authkey={}", auth_key);
        let hostname_arg = format!("--hostname={}", hostname);
        let timeout_arg = format!("--timeout={}s", wait.as_secs().max(1));
        let args = [
            "up",
            key_arg.as_str(),
            hostname_arg.as_str(),
            "--accept-dns=false",
            timeout_arg.as_str(),
        ];
        let output = self
            .exec(container, &args, None, wait + LOGIN_SLACK)
            .await?;
        output.ensure_success(&self.describe(container, &args))?;
        Ok(())
    }

    /// Log the node out of the tailnet
    #[instrument(skip(self))]
    pub async fn logout(&self, container: &str) -> Result<()> {
        let args = ["logout"];
        let output = self.exec(container, &args, None, self.timeout).await?;
        output.ensure_success(&self.describe(container, &args))?;
        Ok(())
    }

    /// Issue a certificate, returning raw output
    #[instrument(skip(self))]
    pub async fn cert(
        &self,
        container: &str,
        hostname: &str,
        cert_file: &str,
        key_file: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        self.exec(
            container,
            &["cert", "--cert-file", cert_file, "--key-file", key_file, hostname],
            None,
            timeout,
        )
        .await
    }

    /// Live serve configuration as printed by `serve status --json`
    #[instrument(skip(self))]
    pub async fn serve_status(&self, container: &str) -> Result<String> {
        let args = ["serve", "status", "--json"];
        let output = self.exec(container, &args, None, self.timeout).await?;
        let output = output.ensure_success(&self.describe(container, &args))?;
        Ok(output.stdout)
    }

    /// Replace the whole serve configuration with `config_json`
    #[instrument(skip(self, config_json))]
    pub async fn serve_set_raw(&self, container: &str, config_json: String) -> Result<()> {
        let args = ["serve", "set-raw"];
        let output = self
            .exec(container, &args, Some(config_json), self.timeout)
            .await?;
        output.ensure_success(&self.describe(container, &args))?;
        Ok(())
    }

    /// Clear the serve configuration
    #[instrument(skip(self))]
    pub async fn serve_reset(&self, container: &str) -> Result<()> {
        let args = ["serve", "reset"];
        let output = self.exec(container, &args, None, self.timeout).await?;
        output.ensure_success(&self.describe(container, &args))?;
        Ok(())
    }

    /// Command description for error messages
    fn describe(&self, container: &str, args: &[&str]) -> crate::process::CommandSpec {
        crate::process::CommandSpec::new("docker")
            .args(["exec", container, MESH_BINARY])
            .args(args.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProcessError, TailgateError};
    use crate::process::mock::{MockResponse, MockRunner};
    use std::sync::Arc;

    const RUNNING_STATUS: &str = r#"{
        "BackendState": "Running",
        "AuthURL": "",
        "Self": {
            "DNSName": "green.example.ts.net.",
            "TailscaleIPs": ["100.101.102.103", "fd7a:115c:a1e0::1"]
        },
        "CurrentTailnet": {
            "Name": "example.github",
            "MagicDNSSuffix": "example.ts.net",
            "MagicDNSEnabled": true
        },
        "CertDomains": ["green.example.ts.net"]
    }"#;

    fn mesh(runner: &MockRunner) -> MeshCli {
        MeshCli::new(
            DockerCli::new(Arc::new(runner.clone())),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_parse_running_status() {
        let status = MeshStatus::parse(RUNNING_STATUS).unwrap();
        assert!(status.is_running());
        assert_eq!(status.dns_name.as_deref(), Some("green.example.ts.net"));
        assert_eq!(status.mesh_ipv4(), Some("100.101.102.103"));
        assert!(status.magic_dns_enabled);
        assert!(status.https_enabled());
        assert_eq!(
            status.authenticated_identity(),
            Some((
                "green.example.ts.net".to_string(),
                "100.101.102.103".to_string()
            ))
        );
    }

    #[test]
    fn test_needs_login_is_not_authenticated() {
        let status = MeshStatus::parse(
            r#"{"BackendState":"NeedsLogin","AuthURL":"https://login.tailscale.com/a/abc","Self":{"DNSName":"","TailscaleIPs":null},"CertDomains":null}"#,
        )
        .unwrap();
        assert!(!status.is_running());
        assert_eq!(
            status.auth_url.as_deref(),
            Some("https://login.tailscale.com/a/abc")
        );
        assert!(status.authenticated_identity().is_none());
        assert!(!status.https_enabled());
    }

    #[test]
    fn test_running_without_mesh_ip_is_not_authenticated() {
        let status = MeshStatus::parse(
            r#"{"BackendState":"Running","Self":{"DNSName":"green.example.ts.net.","TailscaleIPs":["10.0.0.2"]}}"#,
        )
        .unwrap();
        assert!(status.authenticated_identity().is_none());
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            MeshStatus::parse("failed to connect to local tailscaled"),
            Err(TailgateError::Mesh(MeshError::StatusParse { .. }))
        ));
    }

    #[tokio::test]
    async fn test_status_accepts_json_on_nonzero_exit() {
        let runner = MockRunner::new();
        runner.on(
            "tailscale status --json",
            MockResponse {
                exit_code: 1,
                stdout: r#"{"BackendState":"NeedsLogin"}"#.to_string(),
                ..Default::default()
            },
        );
        let status = mesh(&runner).status("c").await.unwrap();
        assert_eq!(status.backend_state, "NeedsLogin");
    }

    #[tokio::test]
    async fn test_status_daemon_down_is_process_failure() {
        let runner = MockRunner::new();
        runner.on(
            "tailscale status --json",
            MockResponse::fail(1, "failed to connect to local tailscaled; it doesn't appear to be running"),
        );
        let err = mesh(&runner).status("c").await.unwrap_err();
        assert!(matches!(
            err,
            TailgateError::Process(ProcessError::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_login_arguments() {
        let runner = MockRunner::new();
        runner.on("tailscale up", MockResponse::fail(1, "timeout waiting"));
        let output = mesh(&runner)
            .request_login("c", "tailgate-green", true, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 1);
        let spec = &runner.history()[0];
        assert_eq!(
            spec.args,
            vec![
                "exec",
                "c",
                "tailscale",
                "up",
                "--hostname=tailgate-green",
                "--accept-dns=false",
                "--timeout=10s",
                "--force-reauth"
            ]
        );
        assert_eq!(spec.timeout, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_serve_set_raw_pipes_stdin() {
        let runner = MockRunner::new();
        mesh(&runner)
            .serve_set_raw("c", "{\"TCP\":{}}".to_string())
            .await
            .unwrap();
        let spec = &runner.history()[0];
        assert_eq!(spec.args, vec!["exec", "-i", "c", "tailscale", "serve", "set-raw"]);
        assert_eq!(spec.stdin.as_deref(), Some("{\"TCP\":{}}"));
    }
}
