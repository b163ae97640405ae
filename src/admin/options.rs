use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::check::{CheckOptions, Invariant};

/// Specifies the depth of audit checks to perform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Checks each migrated bundle on its own, against the uuids of its
    /// dependencies.
    #[default]
    Fast,
    /// Additionally loads each bundle with its dependency closure into a
    /// fresh runtime and checks the live graph.
    Full,
}

impl FromStr for AuditLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(AuditLevel::Fast),
            "full" => Ok(AuditLevel::Full),
            other => Err(format!("unknown audit level {other:?}")),
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditLevel::Fast => "fast",
            AuditLevel::Full => "full",
        })
    }
}

/// Options shared by the audit entry points.
#[derive(Clone)]
pub struct AuditOptions {
    /// Depth of the checks.
    pub level: AuditLevel,
    /// Maximum findings kept per bundle report.
    pub max_findings: Option<usize>,
    /// Bundles audited concurrently.
    pub jobs: usize,
    /// Domain invariants evaluated on live graphs at [`AuditLevel::Full`].
    pub invariants: Vec<Arc<dyn Invariant>>,
}

impl AuditOptions {
    pub(crate) fn check_options(&self) -> CheckOptions {
        CheckOptions {
            max_findings: self.max_findings,
        }
    }
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            level: AuditLevel::Fast,
            max_findings: Some(64),
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            invariants: Vec::new(),
        }
    }
}

impl fmt::Debug for AuditOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditOptions")
            .field("level", &self.level)
            .field("max_findings", &self.max_findings)
            .field("jobs", &self.jobs)
            .field(
                "invariants",
                &self.invariants.iter().map(|inv| inv.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
