//! Error types and handling
//!
//! The taxonomy follows the same shape as the rest of the crate: one error enum
//! per domain (configuration, external processes, Docker, the mesh CLI, the
//! vendor admin API) wrapped in [`TailgateError`] for unified handling.
//!
//! Errors that originate from an external command always carry the rendered
//! command line and its stderr verbatim so the failing invocation can be
//! reproduced from the message alone.

use std::time::Duration;
use thiserror::Error;

/// Configuration-related errors (permanent, never retried)
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file parsing error
    #[error("Failed to parse configuration file {path}: {message}")]
    Parsing { path: String, message: String },

    /// Configuration validation error
    #[error("Configuration validation error: {message}")]
    Validation { message: String },

    /// Environment name does not satisfy container naming rules
    #[error("Invalid environment name '{name}': {reason}")]
    InvalidEnvironment { name: String, reason: String },

    /// Hostname is not a mesh hostname
    #[error("Invalid mesh hostname '{hostname}': expected a name ending in .ts.net")]
    InvalidHostname { hostname: String },

    /// A required credential was not configured
    #[error("Missing credential: {name}")]
    MissingCredential { name: String },

    /// Configuration file I/O error
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from running an external program
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The program could not be started at all
    #[error("Failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },

    /// The program exceeded its time budget and was killed
    #[error("Command `{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// The program exited with a non-zero status
    #[error("Command `{command}` failed with exit code {exit_code}: {}", failure_text(.stdout, .stderr))]
    Failed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
}

fn failure_text(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    let stdout = stdout.trim();
    match (stderr.is_empty(), stdout.is_empty()) {
        (false, true) => stderr.to_string(),
        (true, false) => stdout.to_string(),
        (true, true) => "<no output>".to_string(),
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Docker-related errors
#[derive(Error, Debug)]
pub enum DockerError {
    /// Docker is not installed or not accessible
    #[error("Docker is not installed or not accessible: {message}")]
    NotInstalled { message: String },

    /// Docker CLI produced output that could not be interpreted
    #[error("Unexpected docker output for {operation}: {message}")]
    UnexpectedOutput { operation: String, message: String },
}

/// Mesh CLI (tailscale) errors
#[derive(Error, Debug)]
pub enum MeshError {
    /// `status --json` output could not be parsed
    #[error("Failed to parse mesh status: {message}")]
    StatusParse { message: String },

    /// The login command did not print a well-formed login URL
    #[error("Mesh CLI did not return a valid login URL. Output was:\n{output}")]
    MalformedAuthUrl { output: String },

    /// A regenerate request produced the same URL as the cached session
    #[error("Mesh CLI returned the previously issued login URL {auth_url} after a regenerate request")]
    StaleAuthUrl { auth_url: String },

    /// Rendering the login QR code failed
    #[error("Failed to render QR code: {message}")]
    QrCode { message: String },

    /// `serve status --json` output could not be parsed
    #[error("Failed to parse serve configuration: {message}")]
    ServeParse { message: String },
}

/// Vendor admin API errors
#[derive(Error, Debug)]
pub enum AdminError {
    /// No API credential configured
    #[error("No admin API key configured")]
    MissingApiKey,

    /// Transport-level failure
    #[error("Admin API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("Admin API returned {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum TailgateError {
    /// Configuration or other permanent input errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// External process errors
    #[error("{0}")]
    Process(#[from] ProcessError),

    /// Docker errors
    #[error("Docker error: {0}")]
    Docker(#[from] DockerError),

    /// Mesh CLI errors
    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    /// Admin API errors
    #[error("Admin API error: {0}")]
    Admin(#[from] AdminError),

    /// The container (or volume) does not exist
    #[error("Container {container} does not exist")]
    NotFound { container: String },

    /// The operation needs a running container
    #[error("Container {container} is not running")]
    NotRunning { container: String },

    /// The operation needs a logged-in mesh node
    #[error("Node in container {container} is not authenticated to the tailnet")]
    NotAuthenticated { container: String },

    /// A login URL was requested for a node that is already logged in
    #[error("Node in container {container} is already authenticated as {hostname}")]
    AlreadyAuthenticated { container: String, hostname: String },

    /// A classified, transient control-plane failure reported by the mesh CLI
    #[error("Control plane error: {message}")]
    ControlPlane { message: String },

    /// Malformed request input
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl TailgateError {
    /// Stable machine-readable code used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Process(ProcessError::Timeout { .. }) => "command_timeout",
            Self::Process(_) => "external_process_failure",
            Self::Docker(_) => "docker_error",
            Self::Mesh(_) => "mesh_error",
            Self::Admin(_) => "admin_api_error",
            Self::NotFound { .. } => "not_found",
            Self::NotRunning { .. } => "not_running",
            Self::NotAuthenticated { .. } => "not_authenticated",
            Self::AlreadyAuthenticated { .. } => "already_authenticated",
            Self::ControlPlane { .. } => "control_plane",
            Self::InvalidRequest { .. } => "invalid_request",
        }
    }
}

/// Convenience type alias for Results with TailgateError
pub type Result<T> = std::result::Result<T, TailgateError>;
