//! Standardized tracing spans and structured fields
//!
//! Component operations run inside one of the spans below so that a single
//! environment's activity can be followed across docker and mesh invocations.
//! Spans are attached to futures with [`tracing::Instrument`]; durations are
//! recorded through [`Timed`] when the operation finishes.

use std::time::Instant;
use tracing::{span, Span};

/// Canonical span names
pub mod spans {
    pub const CONTAINER_STATUS: &str = "container.status";
    pub const CONTAINER_START: &str = "container.start";
    pub const CONTAINER_TEARDOWN: &str = "container.teardown";
    pub const AUTH_URL: &str = "auth.url";
    pub const CERT_PROVISION: &str = "cert.provision";
    pub const SERVE_CONFIGURE: &str = "serve.configure";
    pub const DEVICE_CLEANUP: &str = "device.cleanup";
}

/// Common field names for structured logging
pub mod fields {
    pub const ENVIRONMENT: &str = "environment";
    pub const CONTAINER: &str = "container";
    pub const HOSTNAME: &str = "hostname";
    pub const DURATION_MS: &str = "duration_ms";
}

macro_rules! env_span {
    ($name:expr, $identity:expr) => {
        span!(
            target: "tailgate_core::observability",
            tracing::Level::INFO,
            $name,
            environment = %$identity.environment_name,
            container = %$identity.container_name,
            duration_ms = tracing::field::Empty
        )
    };
}

/// Span for a container status snapshot
pub fn container_status_span(identity: &crate::identity::NodeIdentity) -> Span {
    env_span!(spans::CONTAINER_STATUS, identity)
}

/// Span for container creation/start
pub fn container_start_span(identity: &crate::identity::NodeIdentity) -> Span {
    env_span!(spans::CONTAINER_START, identity)
}

/// Span for stop/remove and device cleanup
pub fn container_teardown_span(identity: &crate::identity::NodeIdentity) -> Span {
    env_span!(spans::CONTAINER_TEARDOWN, identity)
}

/// Span for login URL issuance
pub fn auth_url_span(identity: &crate::identity::NodeIdentity, regenerate: bool) -> Span {
    span!(
        target: "tailgate_core::observability",
        tracing::Level::INFO,
        spans::AUTH_URL,
        environment = %identity.environment_name,
        regenerate,
        duration_ms = tracing::field::Empty
    )
}

/// Span for one certificate issuance attempt
pub fn cert_provision_span(identity: &crate::identity::NodeIdentity, hostname: &str) -> Span {
    span!(
        target: "tailgate_core::observability",
        tracing::Level::INFO,
        spans::CERT_PROVISION,
        environment = %identity.environment_name,
        hostname = %hostname,
        duration_ms = tracing::field::Empty
    )
}

/// Span for applying serve routes
pub fn serve_configure_span(identity: &crate::identity::NodeIdentity, hostname: &str) -> Span {
    span!(
        target: "tailgate_core::observability",
        tracing::Level::INFO,
        spans::SERVE_CONFIGURE,
        environment = %identity.environment_name,
        hostname = %hostname,
        duration_ms = tracing::field::Empty
    )
}

/// Span for an admin API device cleanup
pub fn device_cleanup_span(short_hostname: &str) -> Span {
    span!(
        target: "tailgate_core::observability",
        tracing::Level::INFO,
        spans::DEVICE_CLEANUP,
        hostname = %short_hostname,
        duration_ms = tracing::field::Empty
    )
}

/// Records elapsed time on a span when completed
///
/// Unlike an entered span guard this is `Send`, so it can live across awaits.
pub struct Timed {
    span: Span,
    start_time: Instant,
}

impl Timed {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            start_time: Instant::now(),
        }
    }

    /// The span to instrument the operation's future with
    pub fn span(&self) -> Span {
        self.span.clone()
    }

    /// Record duration and return it in milliseconds
    pub fn complete(self) -> u64 {
        let duration_ms = self.start_time.elapsed().as_millis() as u64;
        self.span.record(fields::DURATION_MS, duration_ms);
        duration_ms
    }
}
