//! Docker CLI integration
//!
//! Thin wrapper over the `docker` binary driven through a [`ProcessRunner`].
//! Absent containers and volumes are reported as `None`/`false`, never as
//! errors; every other non-zero exit is surfaced with stderr verbatim.

use crate::errors::{DockerError, Result};
use crate::process::{CommandOutput, CommandSpec, ProcessRunner, DEFAULT_COMMAND_TIMEOUT};
use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Label attached to every container and volume tailgate creates
pub const ENVIRONMENT_LABEL: &str = "tailgate.environment";

/// Mesh daemon state directory inside the container
pub const STATE_DIR: &str = "/var/lib/tailscale";

/// Subset of `docker inspect` `.State`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Running")]
    pub running: bool,
}

/// Everything needed to `docker run -d` the mesh container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRunSpec {
    pub name: String,
    pub image: String,
    /// Named volume mounted at [`STATE_DIR`]
    pub state_volume: String,
    /// Host directory bind-mounted at `certs_mount`
    pub certs_host_dir: PathBuf,
    pub certs_mount: String,
    pub network: Option<String>,
    pub labels: IndexMap<String, String>,
}

impl ContainerRunSpec {
    /// Arguments following `docker`
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--hostname".to_string(),
            self.name.clone(),
        ];
        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        args.push("-v".to_string());
        args.push(format!("{}:{}", self.state_volume, STATE_DIR));
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            self.certs_host_dir.display(),
            self.certs_mount
        ));
        args.push("--entrypoint".to_string());
        args.push("tailscaled".to_string());
        args.push(self.image.clone());
        args.push("--tun=userspace-networking".to_string());
        args.push(format!("--statedir={}", STATE_DIR));
        args
    }
}

/// Whether docker's stderr says the object does not exist
pub fn is_missing_object(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such container")
        || stderr.contains("no such object")
        || stderr.contains("no such volume")
}

/// Docker CLI client
#[derive(Debug, Clone)]
pub struct DockerCli {
    runner: Arc<dyn ProcessRunner>,
    docker_path: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            docker_path: "docker".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Use a custom docker binary path
    pub fn with_path(mut self, docker_path: impl Into<String>) -> Self {
        self.docker_path = docker_path.into();
        self
    }

    /// Override the timeout for short docker commands
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.docker_path)
            .args(args)
            .timeout(self.timeout)
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let output = self.runner.run(&spec).await?;
        output.ensure_success(&spec)
    }

    /// Check that the docker binary answers
    #[instrument(skip(self))]
    pub async fn check_installed(&self) -> Result<()> {
        let spec = self.command(["--version"]);
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(DockerError::NotInstalled {
                message: output.stderr.trim().to_string(),
            }
            .into()),
            Err(e) => Err(DockerError::NotInstalled {
                message: e.to_string(),
            }
            .into()),
        }
    }

    /// State of a container, `None` when it does not exist
    #[instrument(skip(self))]
    pub async fn inspect_state(&self, name: &str) -> Result<Option<ContainerState>> {
        let spec = self.command([
            "inspect",
            "--type",
            "container",
            "--format",
            "{{json .State}}",
            name,
        ]);
        let output = self.runner.run(&spec).await?;
        if !output.success() && is_missing_object(&output.stderr) {
            debug!("Container {} does not exist", name);
            return Ok(None);
        }
        let output = output.ensure_success(&spec)?;
        let state: ContainerState =
            serde_json::from_str(output.stdout.trim()).map_err(|e| {
                DockerError::UnexpectedOutput {
                    operation: "inspect".to_string(),
                    message: format!("{}: {}", e, output.stdout.trim()),
                }
            })?;
        Ok(Some(state))
    }

    /// Create a named volume (docker treats an existing volume as success)
    #[instrument(skip(self, labels))]
    pub async fn create_volume(&self, name: &str, labels: &IndexMap<String, String>) -> Result<()> {
        let mut args = vec!["volume".to_string(), "create".to_string()];
        for (key, value) in labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(name.to_string());
        self.run_checked(self.command(args)).await?;
        Ok(())
    }

    /// Remove a named volume; `false` when it was already gone
    #[instrument(skip(self))]
    pub async fn remove_volume(&self, name: &str) -> Result<bool> {
        let spec = self.command(["volume", "rm", name]);
        let output = self.runner.run(&spec).await?;
        if !output.success() && is_missing_object(&output.stderr) {
            return Ok(false);
        }
        output.ensure_success(&spec)?;
        Ok(true)
    }

    /// `docker run -d`, returning the new container ID
    #[instrument(skip(self, run), fields(container = %run.name))]
    pub async fn run_detached(&self, run: &ContainerRunSpec) -> Result<String> {
        let output = self.run_checked(self.command(run.to_args())).await?;
        let id = output.stdout.trim().to_string();
        if id.is_empty() {
            return Err(DockerError::UnexpectedOutput {
                operation: "run".to_string(),
                message: "docker run printed no container ID".to_string(),
            }
            .into());
        }
        Ok(id)
    }

    /// Start an existing stopped container
    #[instrument(skip(self))]
    pub async fn start(&self, name: &str) -> Result<()> {
        self.run_checked(self.command(["start", name])).await?;
        Ok(())
    }

    /// Stop a container; `false` when it does not exist
    #[instrument(skip(self))]
    pub async fn stop(&self, name: &str) -> Result<bool> {
        let spec = self.command(["stop", name]);
        let output = self.runner.run(&spec).await?;
        if !output.success() && is_missing_object(&output.stderr) {
            return Ok(false);
        }
        output.ensure_success(&spec)?;
        Ok(true)
    }

    /// Force-remove a container; `false` when it does not exist
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let spec = self.command(["rm", "-f", name]);
        let output = self.runner.run(&spec).await?;
        if !output.success() && is_missing_object(&output.stderr) {
            return Ok(false);
        }
        output.ensure_success(&spec)?;
        Ok(true)
    }

    /// Run a command inside a container and return its raw output
    ///
    /// A non-zero exit of the inner command is returned, not raised.
    pub async fn exec(
        &self,
        name: &str,
        command: &[String],
        stdin: Option<String>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut args = vec!["exec".to_string()];
        if stdin.is_some() {
            args.push("-i".to_string());
        }
        args.push(name.to_string());
        args.extend(command.iter().cloned());

        let mut spec = self.command(args).timeout(timeout);
        if let Some(input) = stdin {
            spec = spec.stdin(input);
        }
        self.runner.run(&spec).await
    }

    /// Combined container logs since `since`
    #[instrument(skip(self))]
    pub async fn logs_since(&self, name: &str, since: DateTime<Utc>) -> Result<String> {
        let since = format!("--since={}", since.to_rfc3339_opts(SecondsFormat::Secs, true));
        let output = self
            .run_checked(self.command(["logs".to_string(), since, name.to_string()]))
            .await?;
        Ok(output.combined())
    }
}
