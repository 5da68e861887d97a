//! Serve route configuration
//!
//! A [`DeploymentTopology`] fully determines the [`RouteSet`]. Applying it
//! always re-derives the whole serve configuration and replaces the live one
//! in a single `serve set-raw` call, so re-applying is a no-op and a changed
//! topology never leaves stale routes behind or passes through an empty table.

use crate::config::ServiceTargets;
use crate::container::ContainerLifecycleManager;
use crate::errors::{ConfigError, MeshError, Result};
use crate::identity::{validate_mesh_hostname, NodeIdentity};
use crate::observability;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, Instrument};

/// Frontend dev server port
pub const DEV_FRONTEND_PORT: u16 = 5173;
/// Frontend production port
pub const PROD_FRONTEND_PORT: u16 = 80;
/// Retired frontend port that must never be routed to
pub const DEPRECATED_FRONTEND_PORT: u16 = 3000;

/// Streaming endpoints served by the streaming service
pub const STREAMING_PATHS: [&str; 2] = ["/ws_pcm", "/ws_omi"];
/// Endpoints served by the backend
pub const BACKEND_PATHS: [&str; 2] = ["/api", "/auth"];

/// Frontend port for a dev or production deployment
pub fn frontend_port(dev_mode: bool) -> u16 {
    if dev_mode {
        DEV_FRONTEND_PORT
    } else {
        PROD_FRONTEND_PORT
    }
}

/// How upstream services are addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// One compose project per host: bare service names
    #[default]
    #[serde(alias = "single-host")]
    Single,
    /// Several environments share a network: `<prefix>-<env>-<service>`
    #[serde(alias = "multi-host")]
    Multi,
}

/// Desired deployment shape, as sent to `configure-serve`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTopology {
    #[serde(rename = "deployment_mode", default)]
    pub mode: DeploymentMode,
    #[serde(rename = "hostname")]
    pub target_hostname: String,
    /// Falls back to the configured backend port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_port: Option<u16>,
    #[serde(rename = "use_caddy_proxy", default)]
    pub use_proxy: bool,
}

/// Values the route mapping depends on besides the topology
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub project_prefix: String,
    pub environment: String,
    pub dev_mode: bool,
    pub services: ServiceTargets,
}

/// One path mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    /// Upstream URL, e.g. `http://backend:8000`
    pub target: String,
}

/// Complete desired route table for one hostname, ordered by path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSet {
    pub hostname: String,
    pub routes: Vec<Route>,
}

impl RouteSet {
    /// Derive the route table from a topology
    pub fn from_topology(topology: &DeploymentTopology, ctx: &RouteContext) -> Result<Self> {
        let hostname = topology.target_hostname.trim_end_matches('.').to_string();
        validate_mesh_hostname(&hostname)?;

        let backend_port = topology.backend_port.unwrap_or(ctx.services.backend_port);
        if backend_port == 0 {
            return Err(ConfigError::Validation {
                message: "backend_port must be greater than zero".to_string(),
            }
            .into());
        }

        let host = |service: &str| match topology.mode {
            DeploymentMode::Single => service.to_string(),
            DeploymentMode::Multi => {
                format!("{}-{}-{}", ctx.project_prefix, ctx.environment, service)
            }
        };
        let upstream = |service: &str, port: u16| format!("http://{}:{}", host(service), port);

        let root = if topology.use_proxy {
            upstream(&ctx.services.proxy, ctx.services.proxy_port)
        } else {
            upstream(&ctx.services.frontend, frontend_port(ctx.dev_mode))
        };

        let mut routes = vec![Route {
            path: "/".to_string(),
            target: root,
        }];
        for path in BACKEND_PATHS {
            routes.push(Route {
                path: path.to_string(),
                target: upstream(&ctx.services.backend, backend_port),
            });
        }
        for path in STREAMING_PATHS {
            routes.push(Route {
                path: path.to_string(),
                target: upstream(&ctx.services.streaming, ctx.services.streaming_port),
            });
        }
        routes.sort_by(|a, b| a.path.cmp(&b.path));

        let deprecated = format!(":{}", DEPRECATED_FRONTEND_PORT);
        if let Some(route) = routes.iter().find(|r| r.target.ends_with(&deprecated)) {
            return Err(ConfigError::Validation {
                message: format!(
                    "route {} targets deprecated port {}",
                    route.path, DEPRECATED_FRONTEND_PORT
                ),
            }
            .into());
        }

        Ok(Self { hostname, routes })
    }

    /// Target for `path`
    pub fn target(&self, path: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.target.as_str())
    }

    /// Full serve configuration document for `serve set-raw`
    pub fn to_serve_config(&self) -> Value {
        let mut handlers = Map::new();
        for route in &self.routes {
            handlers.insert(route.path.clone(), json!({ "Proxy": route.target }));
        }
        let mut web = Map::new();
        web.insert(
            format!("{}:443", self.hostname),
            json!({ "Handlers": Value::Object(handlers) }),
        );
        json!({
            "TCP": { "443": { "HTTPS": true } },
            "Web": Value::Object(web),
        })
    }
}

/// Live serve configuration as read back from the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServeState {
    /// No container to ask
    ContainerAbsent,
    /// The container exists but its daemon is down
    ContainerStopped,
    NotConfigured,
    Configured(RouteSet),
}

impl ServeState {
    /// Parse `serve status --json` output
    pub fn parse(output: &str) -> Result<Self> {
        let trimmed = output.trim();
        if trimmed.is_empty() || trimmed.contains("No serve config") {
            return Ok(Self::NotConfigured);
        }
        let value: Value = serde_json::from_str(trimmed).map_err(|e| MeshError::ServeParse {
            message: format!("{}: {}", e, trimmed),
        })?;

        let web = match value.get("Web").and_then(Value::as_object) {
            Some(web) if !web.is_empty() => web,
            _ => return Ok(Self::NotConfigured),
        };
        let (host_port, site) = match web.iter().next() {
            Some(entry) => entry,
            None => return Ok(Self::NotConfigured),
        };
        let hostname = host_port
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(host_port)
            .to_string();

        let mut routes: Vec<Route> = site
            .get("Handlers")
            .and_then(Value::as_object)
            .map(|handlers| {
                handlers
                    .iter()
                    .filter_map(|(path, handler)| {
                        handler.get("Proxy").and_then(Value::as_str).map(|target| Route {
                            path: path.clone(),
                            target: target.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        if routes.is_empty() {
            return Ok(Self::NotConfigured);
        }
        routes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self::Configured(RouteSet { hostname, routes }))
    }
}

/// Result of `configure`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigureOutcome {
    pub success: bool,
    pub hostname: String,
    pub deployment_mode: DeploymentMode,
    pub routes: Vec<Route>,
}

/// Applies route sets through the mesh CLI
#[derive(Debug, Clone)]
pub struct RouteConfigurator {
    lifecycle: Arc<ContainerLifecycleManager>,
    project_prefix: String,
    dev_mode: bool,
    services: ServiceTargets,
}

impl RouteConfigurator {
    pub fn new(
        lifecycle: Arc<ContainerLifecycleManager>,
        project_prefix: impl Into<String>,
        dev_mode: bool,
        services: ServiceTargets,
    ) -> Self {
        Self {
            lifecycle,
            project_prefix: project_prefix.into(),
            dev_mode,
            services,
        }
    }

    /// Route context for `identity`
    pub fn context(&self, identity: &NodeIdentity) -> RouteContext {
        RouteContext {
            project_prefix: self.project_prefix.clone(),
            environment: identity.environment_name.clone(),
            dev_mode: self.dev_mode,
            services: self.services.clone(),
        }
    }

    /// Derive and atomically apply the route set for `topology`
    pub async fn configure(
        &self,
        identity: &NodeIdentity,
        topology: &DeploymentTopology,
    ) -> Result<ConfigureOutcome> {
        let route_set = RouteSet::from_topology(topology, &self.context(identity))?;
        let timed = observability::Timed::new(observability::serve_configure_span(
            identity,
            &route_set.hostname,
        ));
        let result = async {
            self.lifecycle.require_authenticated(identity).await?;
            let document = serde_json::to_string_pretty(&route_set.to_serve_config()).map_err(
                |e| MeshError::ServeParse {
                    message: e.to_string(),
                },
            )?;
            self.lifecycle
                .mesh()
                .serve_set_raw(&identity.container_name, document)
                .await?;
            info!(routes = route_set.routes.len(), "Applied serve routes");
            Ok(ConfigureOutcome {
                success: true,
                hostname: route_set.hostname.clone(),
                deployment_mode: topology.mode,
                routes: route_set.routes.clone(),
            })
        }
        .instrument(timed.span())
        .await;
        timed.complete();
        result
    }

    /// Read back the live route table
    ///
    /// A missing or stopped container is a state, not an error.
    pub async fn status(&self, identity: &NodeIdentity) -> Result<ServeState> {
        let status = self.lifecycle.status(identity).await?;
        if !status.exists() {
            return Ok(ServeState::ContainerAbsent);
        }
        if !status.running() {
            return Ok(ServeState::ContainerStopped);
        }
        let output = self
            .lifecycle
            .mesh()
            .serve_status(&identity.container_name)
            .await?;
        ServeState::parse(&output)
    }

    /// Remove every serve route
    pub async fn reset(&self, identity: &NodeIdentity) -> Result<()> {
        self.lifecycle.require_running(identity).await?;
        self.lifecycle
            .mesh()
            .serve_reset(&identity.container_name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dev_mode: bool) -> RouteContext {
        RouteContext {
            project_prefix: "tailgate".to_string(),
            environment: "green".to_string(),
            dev_mode,
            services: ServiceTargets::default(),
        }
    }

    fn topology(mode: DeploymentMode) -> DeploymentTopology {
        DeploymentTopology {
            mode,
            target_hostname: "green.example.ts.net".to_string(),
            backend_port: Some(8000),
            use_proxy: false,
        }
    }

    #[test]
    fn test_frontend_port_never_deprecated() {
        assert_eq!(frontend_port(true), 5173);
        assert_eq!(frontend_port(false), 80);
        assert_ne!(frontend_port(true), DEPRECATED_FRONTEND_PORT);
        assert_ne!(frontend_port(false), DEPRECATED_FRONTEND_PORT);
    }

    #[test]
    fn test_single_mode_routes() {
        let set = RouteSet::from_topology(&topology(DeploymentMode::Single), &ctx(true)).unwrap();
        let paths: Vec<&str> = set.routes.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/api", "/auth", "/ws_omi", "/ws_pcm"]);
        assert_eq!(set.target("/"), Some("http://frontend:5173"));
        assert_eq!(set.target("/api"), Some("http://backend:8000"));
        assert_eq!(set.target("/auth"), Some("http://backend:8000"));
        assert_eq!(set.target("/ws_pcm"), Some("http://chronicle:8000"));
        assert_eq!(set.target("/ws_omi"), Some("http://chronicle:8000"));
    }

    #[test]
    fn test_multi_mode_qualifies_hosts() {
        let set = RouteSet::from_topology(&topology(DeploymentMode::Multi), &ctx(false)).unwrap();
        assert_eq!(set.target("/"), Some("http://tailgate-green-frontend:80"));
        assert_eq!(set.target("/api"), Some("http://tailgate-green-backend:8000"));
        assert_eq!(
            set.target("/ws_pcm"),
            Some("http://tailgate-green-chronicle:8000")
        );
    }

    #[test]
    fn test_proxy_fronts_root_only() {
        let mut topo = topology(DeploymentMode::Single);
        topo.use_proxy = true;
        let set = RouteSet::from_topology(&topo, &ctx(true)).unwrap();
        assert_eq!(set.target("/"), Some("http://caddy:80"));
        assert_eq!(set.target("/api"), Some("http://backend:8000"));
    }

    #[test]
    fn test_invalid_topologies_rejected() {
        let mut topo = topology(DeploymentMode::Single);
        topo.target_hostname = "green.example.com".to_string();
        assert!(RouteSet::from_topology(&topo, &ctx(true)).is_err());

        let mut topo = topology(DeploymentMode::Single);
        topo.backend_port = Some(0);
        assert!(RouteSet::from_topology(&topo, &ctx(true)).is_err());

        let mut context = ctx(true);
        context.services.streaming_port = 3000;
        assert!(RouteSet::from_topology(&topology(DeploymentMode::Single), &context).is_err());
    }

    #[test]
    fn test_topology_wire_names() {
        let topo: DeploymentTopology = serde_json::from_str(
            r#"{"deployment_mode":"multi","hostname":"green.example.ts.net","backend_port":8010,"use_caddy_proxy":true}"#,
        )
        .unwrap();
        assert_eq!(topo.mode, DeploymentMode::Multi);
        assert_eq!(topo.backend_port, Some(8010));
        assert!(topo.use_proxy);

        let topo: DeploymentTopology =
            serde_json::from_str(r#"{"hostname":"green.example.ts.net"}"#).unwrap();
        assert_eq!(topo.mode, DeploymentMode::Single);
        assert_eq!(topo.backend_port, None);
    }

    #[test]
    fn test_serve_config_round_trips_through_status() {
        let set = RouteSet::from_topology(&topology(DeploymentMode::Single), &ctx(true)).unwrap();
        let document = serde_json::to_string(&set.to_serve_config()).unwrap();
        assert!(document.starts_with(r#"{"TCP":{"443":{"HTTPS":true}},"Web":{"green.example.ts.net:443""#));
        assert_eq!(ServeState::parse(&document).unwrap(), ServeState::Configured(set));
    }

    #[test]
    fn test_empty_serve_status_is_not_configured() {
        assert_eq!(ServeState::parse("").unwrap(), ServeState::NotConfigured);
        assert_eq!(ServeState::parse("{}").unwrap(), ServeState::NotConfigured);
        assert_eq!(
            ServeState::parse("No serve config").unwrap(),
            ServeState::NotConfigured
        );
        assert!(ServeState::parse("{not json").is_err());
    }

    #[test]
    fn test_serve_state_serialization() {
        let json = serde_json::to_value(ServeState::NotConfigured).unwrap();
        assert_eq!(json, serde_json::json!({"state": "not_configured"}));
    }
}
