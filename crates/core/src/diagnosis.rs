//! Control-plane failure classification
//!
//! Certificate issuance fails in a handful of recognizable ways when the
//! daemon's long-lived control connection drops. The matchers below are
//! checked in order against daemon logs and CLI output; the first pattern of
//! each kind that matches contributes one issue with the matching line as
//! evidence.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A recognized control-plane condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPlaneIssue {
    /// Control connection closed mid-handshake
    UnexpectedEof,
    /// Control request timed out
    IoTimeout,
    /// Control connection reset by peer
    ConnectionReset,
    /// Host clock jumped (sleep/wake), severing the control connection
    SleepWakeTimeJump,
    /// HTTPS certificates are disabled for the tailnet
    HttpsNotEnabled,
}

impl ControlPlaneIssue {
    /// Whether retrying later can resolve the condition
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::HttpsNotEnabled)
    }

    /// Operator-facing hint
    pub fn hint(self) -> &'static str {
        match self {
            Self::UnexpectedEof => "control plane closed the connection; retry shortly",
            Self::IoTimeout => "control plane request timed out; retry shortly",
            Self::ConnectionReset => "control plane connection was reset; retry shortly",
            Self::SleepWakeTimeJump => {
                "host clock jumped (sleep/wake); the daemon is reconnecting, retry shortly"
            }
            Self::HttpsNotEnabled => {
                "HTTPS certificates are disabled for this tailnet; enable them in the admin console"
            }
        }
    }
}

/// One classified finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFinding {
    pub kind: ControlPlaneIssue,
    pub transient: bool,
    /// Line that matched
    pub evidence: String,
}

/// All findings for one attempt
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Diagnosis {
    pub issues: Vec<IssueFinding>,
    /// At least one issue, and every issue is transient
    pub transient: bool,
}

impl Diagnosis {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has(&self, kind: ControlPlaneIssue) -> bool {
        self.issues.iter().any(|issue| issue.kind == kind)
    }

    /// Add `kind` unless already present, keeping `transient` in step
    pub fn note(&mut self, kind: ControlPlaneIssue, evidence: impl Into<String>) {
        if !self.has(kind) {
            self.issues.push(IssueFinding {
                kind,
                transient: kind.is_transient(),
                evidence: evidence.into(),
            });
        }
        self.transient = self.issues.iter().all(|issue| issue.transient);
    }

    /// Single-line summary for error messages
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|issue| format!("{:?}: {}", issue.kind, issue.kind.hint()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

struct Matcher {
    kind: ControlPlaneIssue,
    pattern: Regex,
}

static MATCHERS: Lazy<Vec<Matcher>> = Lazy::new(|| {
    [
        (ControlPlaneIssue::HttpsNotEnabled, r"(?i)(https|certificates?)\s+(is\s+|are\s+)?not enabled|enable https"),
        (ControlPlaneIssue::SleepWakeTimeJump, r"(?i)time jumped|time jump|clock jump|wake(-|\s)?up detected|woke from sleep"),
        (ControlPlaneIssue::UnexpectedEof, r"(?i)unexpected EOF"),
        (ControlPlaneIssue::IoTimeout, r"(?i)i/o timeout|context deadline exceeded|TLS handshake timeout"),
        (ControlPlaneIssue::ConnectionReset, r"(?i)connection reset by peer|connection reset"),
    ]
    .into_iter()
    .map(|(kind, pattern)| Matcher {
        kind,
        pattern: Regex::new(pattern).expect("valid matcher regex"),
    })
    .collect()
});

/// Classify `text` (daemon logs and/or CLI output)
pub fn classify(text: &str) -> Diagnosis {
    let mut issues = Vec::new();
    for matcher in MATCHERS.iter() {
        if let Some(line) = text.lines().find(|line| matcher.pattern.is_match(line)) {
            issues.push(IssueFinding {
                kind: matcher.kind,
                transient: matcher.kind.is_transient(),
                evidence: line.trim().to_string(),
            });
        }
    }
    let transient = !issues.is_empty() && issues.iter().all(|issue| issue.transient);
    Diagnosis { issues, transient }
}
