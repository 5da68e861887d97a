use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tailgate_core::config::ServiceConfig;
use tailgate_core::process::CliProcessRunner;
use tailgate_core::routes::DeploymentMode;
use tailgate_core::service::TailscaleService;

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Deployment mode as accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ModeOption {
    /// Upstreams addressed by bare service name
    Single,
    /// Upstreams addressed as `<prefix>-<env>-<service>`
    Multi,
}

impl From<ModeOption> for DeploymentMode {
    fn from(mode: ModeOption) -> Self {
        match mode {
            ModeOption::Single => DeploymentMode::Single,
            ModeOption::Multi => DeploymentMode::Multi,
        }
    }
}

/// tailgate subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP control API
    Serve {
        /// Listen address (overrides configuration)
        #[arg(long, value_name = "ADDR")]
        listen: Option<SocketAddr>,
    },

    /// Show container and login status
    Status,

    /// Create or start the mesh container
    Start,

    /// Stop the mesh container
    Stop,

    /// Remove the mesh container
    Remove {
        /// Also remove the state volume (the node forgets its identity)
        #[arg(long)]
        volume: bool,
        /// Also delete the device from the tailnet
        #[arg(long)]
        purge_device: bool,
    },

    /// Print the login URL for an unauthenticated node
    AuthUrl {
        /// Discard the cached URL and request a new one
        #[arg(long)]
        regenerate: bool,
        /// Also draw the URL as a QR code on stderr
        #[arg(long)]
        qr: bool,
    },

    /// Log the node in with a pre-shared auth key
    Login {
        /// Auth key (defaults to the configured key)
        #[arg(long, value_name = "KEY")]
        auth_key: Option<String>,
    },

    /// Log the node out of the tailnet
    Logout,

    /// Issue a TLS certificate for the node
    ProvisionCert {
        /// Hostname to issue for (defaults to the node's own name)
        #[arg(long)]
        hostname: Option<String>,
        /// Issuance timeout in seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout_secs: Option<u64>,
        /// Extra attempts on transient control-plane failures
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Apply serve routes for a deployment topology
    ConfigureServe {
        /// Public `*.ts.net` hostname
        #[arg(long)]
        hostname: String,
        /// How upstream services are addressed
        #[arg(long, value_enum, default_value = "single")]
        mode: ModeOption,
        /// Backend port (overrides configuration)
        #[arg(long)]
        backend_port: Option<u16>,
        /// Route `/` through the reverse proxy instead of the frontend
        #[arg(long)]
        use_proxy: bool,
    },

    /// Show the live serve routes
    ServeStatus,

    /// Clear every serve route
    ResetServe,

    /// Print the public HTTPS URLs
    AccessUrls,

    /// Print the names owned by the environment
    Environment,

    /// Show MagicDNS and HTTPS availability for the tailnet
    TailnetSettings,

    /// Delete a device from the tailnet by short hostname
    CleanupDevice {
        /// Short hostname, e.g. `tailgate-dev`
        short_hostname: String,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Per-environment mesh node control plane",
    long_about = "Per-environment mesh node control plane\n\nRuns one Tailscale container per deployment environment, logs it in, issues its TLS certificate and publishes the environment's services over HTTPS.",
    color = clap::ColorChoice::Auto
)]
pub struct Cli {
    /// Log format (text or json, defaults to text, can be set via TAILGATE_LOG_FORMAT env var)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Configuration file path (can be set via TAILGATE_CONFIG env var)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Environment to act on (defaults to the configured environment)
    #[arg(long = "env", global = true, value_name = "NAME")]
    pub environment: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None,
        };
        let log_level = self.log_level.as_str();
        if std::env::var_os("TAILGATE_LOG").is_none() && std::env::var_os("RUST_LOG").is_none() {
            std::env::set_var(
                "RUST_LOG",
                format!(
                    "tailgate={},tailgate_core={},tower_http={}",
                    log_level, log_level, log_level
                ),
            );
        }
        tailgate_core::logging::init(log_format)?;
        tracing::debug!("CLI initialized with log level: {}", log_level);

        let mut config = ServiceConfig::load(self.config.as_deref())?;
        let environment = self
            .environment
            .unwrap_or_else(|| config.environment.clone());

        if let Commands::Serve { listen } = &self.command {
            // the API always serves the configured environment
            if environment != config.environment {
                config.node_hostname = None;
            }
            config.environment = environment.clone();
            if let Some(listen) = listen {
                config.listen = *listen;
            }
        }

        let service = Arc::new(TailscaleService::new(
            config,
            Arc::new(CliProcessRunner::new()),
        )?);
        // fail fast on a bad --env before touching docker
        service.identity(&environment)?;

        use crate::commands;
        match self.command {
            Commands::Serve { .. } => commands::serve::execute_serve(service).await,
            Commands::Status => commands::container::execute_status(&service, &environment).await,
            Commands::Start => commands::container::execute_start(&service, &environment).await,
            Commands::Stop => commands::container::execute_stop(&service, &environment).await,
            Commands::Remove {
                volume,
                purge_device,
            } => {
                commands::container::execute_remove(&service, &environment, volume, purge_device)
                    .await
            }
            Commands::AuthUrl { regenerate, qr } => {
                commands::auth::execute_auth_url(&service, &environment, regenerate, qr).await
            }
            Commands::Login { auth_key } => {
                commands::auth::execute_login(&service, &environment, auth_key.as_deref()).await
            }
            Commands::Logout => commands::auth::execute_logout(&service, &environment).await,
            Commands::ProvisionCert {
                hostname,
                timeout_secs,
                retries,
            } => {
                let args = commands::cert::ProvisionCertArgs {
                    hostname,
                    timeout_secs,
                    retries,
                };
                commands::cert::execute_provision_cert(&service, &environment, args).await
            }
            Commands::ConfigureServe {
                hostname,
                mode,
                backend_port,
                use_proxy,
            } => {
                let args = commands::routes::ConfigureServeArgs {
                    hostname,
                    mode: mode.into(),
                    backend_port,
                    use_proxy,
                };
                commands::routes::execute_configure_serve(&service, &environment, args).await
            }
            Commands::ServeStatus => {
                commands::routes::execute_serve_status(&service, &environment).await
            }
            Commands::ResetServe => {
                commands::routes::execute_reset_serve(&service, &environment).await
            }
            Commands::AccessUrls => {
                commands::routes::execute_access_urls(&service, &environment).await
            }
            Commands::Environment => {
                commands::routes::execute_environment(&service, &environment).await
            }
            Commands::TailnetSettings => {
                commands::routes::execute_tailnet_settings(&service, &environment).await
            }
            Commands::CleanupDevice { short_hostname } => {
                commands::cleanup::execute_cleanup_device(&service, &short_hostname).await
            }
        }
    }
}
