use std::fmt;

use serde::Serialize;

use crate::types::{BundleId, Iid};

/// Indicates how serious a finding is.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Noteworthy but harmless.
    Info,
    /// Suspicious data that still loads.
    Warning,
    /// Broken invariant; the bundle fails the check.
    Error,
}

/// Category of a finding, mirroring the error taxonomy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Field drift against the schema, including double ownership.
    SchemaMismatch,
    /// A reference that does not resolve.
    DanglingReference,
    /// A declared dependency nothing references.
    UnusedDependency,
    /// An instance of a class the schema does not know.
    UnregisteredClass,
    /// The bundle cannot be migrated to the current version.
    NoMigrationPath,
    /// The bundle takes part in a dependency cycle.
    CyclicDependency,
    /// Ownership structure anomaly (unreachable or unowned instances).
    Ownership,
    /// Two instances share an identifier.
    DuplicateUuid,
    /// A domain-level invariant failed.
    DomainInvariant,
    /// The bundle could not be read or loaded at all.
    LoadFailure,
}

impl FindingKind {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            FindingKind::SchemaMismatch => "schema_mismatch",
            FindingKind::DanglingReference => "dangling_reference",
            FindingKind::UnusedDependency => "unused_dependency",
            FindingKind::UnregisteredClass => "unregistered_class",
            FindingKind::NoMigrationPath => "no_migration_path",
            FindingKind::CyclicDependency => "cyclic_dependency",
            FindingKind::Ownership => "ownership",
            FindingKind::DuplicateUuid => "duplicate_uuid",
            FindingKind::DomainInvariant => "domain_invariant",
            FindingKind::LoadFailure => "load_failure",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single problem discovered by a check.
#[derive(Clone, Debug, Serialize)]
pub struct Finding {
    /// The severity level of this finding.
    pub severity: Severity,
    /// What kind of problem it is.
    pub kind: FindingKind,
    /// Instance the finding is about, for raw checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iid: Option<Iid>,
    /// Uuid of the instance the finding is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Field the finding is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Human-readable description of the issue.
    pub message: String,
}

impl Finding {
    /// Creates a finding with no location.
    pub fn new(severity: Severity, kind: FindingKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            iid: None,
            uuid: None,
            field: None,
            message: message.into(),
        }
    }

    /// Error-level finding.
    pub fn error(kind: FindingKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, kind, message)
    }

    /// Warning-level finding.
    pub fn warning(kind: FindingKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, kind, message)
    }

    /// Info-level finding.
    pub fn info(kind: FindingKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, kind, message)
    }

    /// Attaches a raw instance location.
    pub fn at(mut self, iid: Iid, uuid: impl Into<String>) -> Self {
        self.iid = Some(iid);
        self.uuid = Some(uuid.into());
        self
    }

    /// Attaches a uuid without an instance index.
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Attaches a field name.
    pub fn in_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(iid) = self.iid {
            write!(f, " iid {iid}")?;
        }
        if let Some(uuid) = &self.uuid {
            write!(f, " ({uuid})")?;
        }
        if let Some(field) = &self.field {
            write!(f, " .{field}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Limits applied while collecting findings.
#[derive(Clone, Debug, Default)]
pub struct CheckOptions {
    /// Maximum number of findings kept per report; `None` keeps all of them.
    pub max_findings: Option<usize>,
}

/// Statistics collected while checking.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CheckCounts {
    /// Instances examined.
    pub instances: u64,
    /// Local references examined.
    pub references: u64,
    /// Cross-bundle references examined.
    pub cross_references: u64,
    /// Error findings, including truncated ones.
    pub errors: u64,
    /// Warning findings, including truncated ones.
    pub warnings: u64,
}

/// Accumulates findings across check passes.
#[derive(Clone, Debug, Default)]
pub struct Findings {
    max: Option<usize>,
    items: Vec<Finding>,
    dropped: usize,
    counts: CheckCounts,
}

impl Findings {
    /// Creates an empty sink honouring `opts`.
    pub fn new(opts: &CheckOptions) -> Self {
        Self {
            max: opts.max_findings,
            ..Self::default()
        }
    }

    /// Records a finding, counting it even when the report is full.
    pub fn push(&mut self, finding: Finding) {
        match finding.severity {
            Severity::Error => self.counts.errors += 1,
            Severity::Warning => self.counts.warnings += 1,
            Severity::Info => {}
        }
        if self.max.is_some_and(|max| self.items.len() >= max) {
            self.dropped += 1;
            return;
        }
        self.items.push(finding);
    }

    /// Findings kept so far.
    pub fn items(&self) -> &[Finding] {
        &self.items
    }

    /// Returns true if any error was recorded.
    pub fn has_errors(&self) -> bool {
        self.counts.errors > 0
    }

    pub(crate) fn counts_mut(&mut self) -> &mut CheckCounts {
        &mut self.counts
    }

    /// Closes the sink into a report.
    pub fn into_report(self, bundle_id: Option<BundleId>) -> CheckReport {
        CheckReport {
            bundle_id,
            success: self.counts.errors == 0,
            findings: self.items,
            truncated: self.dropped,
            counts: self.counts,
        }
    }
}

/// Complete report of one check run.
#[derive(Clone, Debug, Serialize)]
pub struct CheckReport {
    /// Bundle the report is about, when it is about a single bundle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<BundleId>,
    /// Whether no error-level finding was recorded.
    pub success: bool,
    /// Findings, in discovery order.
    pub findings: Vec<Finding>,
    /// Findings discarded because of [`CheckOptions::max_findings`].
    pub truncated: usize,
    /// Statistics about the data examined.
    pub counts: CheckCounts,
}

impl CheckReport {
    /// Iterates findings of one kind.
    pub fn of_kind(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    /// Returns true if some finding has `kind` and at least `severity`.
    pub fn has(&self, kind: FindingKind, severity: Severity) -> bool {
        self.of_kind(kind).any(|f| f.severity >= severity)
    }
}
