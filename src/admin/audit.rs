use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::admin::options::{AuditLevel, AuditOptions};
use crate::admin::{AdminError, Result};
use crate::check::{
    check_live, check_raw_into, CheckReport, DepIndex, Finding, FindingKind, Findings, Invariant,
};
use crate::deps::{dependencies_of, DependencyLoader};
use crate::error::BundleError;
use crate::migrate::Migrator;
use crate::raw::RawBundle;
use crate::runtime::Runtime;
use crate::schema::SchemaRegistry;
use crate::store::BundleStore;
use crate::types::BundleId;

/// Totals across every audited bundle.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditTotals {
    /// Bundles audited.
    pub bundles: usize,
    /// Bundles without error findings.
    pub passed: usize,
    /// Bundles with at least one error finding.
    pub failed: usize,
    /// Error findings, including truncated ones.
    pub errors: u64,
    /// Warning findings, including truncated ones.
    pub warnings: u64,
}

/// Result of auditing a whole store.
#[derive(Clone, Debug, Serialize)]
pub struct AuditReport {
    /// The audit level that was performed.
    pub level: AuditLevel,
    /// Whether every bundle passed.
    pub success: bool,
    /// Aggregate counts.
    pub totals: AuditTotals,
    /// Per-bundle reports keyed by bundle id.
    pub bundles: BTreeMap<BundleId, CheckReport>,
}

impl AuditReport {
    fn new(level: AuditLevel) -> Self {
        Self {
            level,
            success: true,
            totals: AuditTotals::default(),
            bundles: BTreeMap::new(),
        }
    }

    fn record(&mut self, id: BundleId, report: CheckReport) {
        self.totals.bundles += 1;
        self.totals.errors += report.counts.errors;
        self.totals.warnings += report.counts.warnings;
        if report.success {
            self.totals.passed += 1;
        } else {
            self.totals.failed += 1;
            self.success = false;
        }
        self.bundles.insert(id, report);
    }
}

/// Audits every bundle in `store`, running up to `opts.jobs` bundles at once.
///
/// Problems with the data become findings; only failures of the store
/// itself or of the task scheduler are returned as errors. `progress` is
/// invoked once per bundle, in bundle id order.
pub async fn audit(
    store: Arc<dyn BundleStore>,
    registry: Arc<SchemaRegistry>,
    migrator: Arc<Migrator>,
    opts: AuditOptions,
    mut progress: impl FnMut(&BundleId, &CheckReport),
) -> Result<AuditReport> {
    let ids = store.list()?;
    tracing::info!(bundles = ids.len(), level = %opts.level, jobs = opts.jobs, "admin.audit.start");
    let permits = Arc::new(Semaphore::new(opts.jobs.max(1)));
    let opts = Arc::new(opts);

    let mut tasks = Vec::with_capacity(ids.len());
    for id in ids {
        let permit = Arc::clone(&permits)
            .acquire_owned()
            .await
            .map_err(|err| AdminError::Message(format!("audit scheduler closed: {err}")))?;
        let store = Arc::clone(&store);
        let registry = Arc::clone(&registry);
        let migrator = Arc::clone(&migrator);
        let opts = Arc::clone(&opts);
        let task_id = id.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            verify(store.as_ref(), &registry, &migrator, &task_id, &opts)
        });
        tasks.push((id, task));
    }

    let mut report = AuditReport::new(opts.level);
    for (id, task) in tasks {
        let bundle = task
            .await
            .map_err(|err| AdminError::Message(format!("audit of bundle {id} aborted: {err}")))?;
        progress(&id, &bundle);
        report.record(id, bundle);
    }
    tracing::info!(
        passed = report.totals.passed,
        failed = report.totals.failed,
        "admin.audit.done"
    );
    Ok(report)
}

/// Audits a single bundle.
///
/// The bundle is migrated, then checked against the schema and against the
/// uuids of its dependencies. At [`AuditLevel::Full`] a bundle whose raw
/// checks pass is also loaded with its dependency closure into a fresh
/// runtime, where the live checks and `opts.invariants` run.
pub fn verify(
    store: &dyn BundleStore,
    registry: &Arc<SchemaRegistry>,
    migrator: &Migrator,
    id: &BundleId,
    opts: &AuditOptions,
) -> CheckReport {
    let mut findings = Findings::new(&opts.check_options());
    let raw = match load_current(store, migrator, id) {
        Ok(raw) => raw,
        Err(err) => {
            findings.push(failure_finding(&err));
            return findings.into_report(Some(id.clone()));
        }
    };

    let mut index = DepIndex::new();
    for dep in dependencies_of(id, &raw) {
        match load_current(store, migrator, &dep) {
            Ok(dep_raw) => index.insert(dep, &dep_raw),
            Err(err) => {
                tracing::debug!(bundle = %id, dep = %dep, error = %err, "admin.verify.dep_unavailable")
            }
        }
    }
    check_raw_into(id, registry, &raw, Some(&index), &mut findings);

    if opts.level == AuditLevel::Full {
        if findings.has_errors() {
            findings.push(Finding::info(
                FindingKind::LoadFailure,
                "live checks skipped because the bundle has errors",
            ));
        } else {
            let mut rt = Runtime::new(Arc::clone(registry));
            match DependencyLoader::new(store, migrator).load(&mut rt, id) {
                Ok(_) => {
                    let invariants: Vec<&dyn Invariant> =
                        opts.invariants.iter().map(|inv| &**inv).collect();
                    check_live(&rt, &invariants, &mut findings);
                }
                Err(err) => findings.push(failure_finding(&err)),
            }
        }
    }
    findings.into_report(Some(id.clone()))
}

fn load_current(store: &dyn BundleStore, migrator: &Migrator, id: &BundleId) -> crate::Result<RawBundle> {
    migrator.migrate(store.load_raw_bundle(id)?)
}

fn failure_finding(err: &BundleError) -> Finding {
    let kind = match err {
        BundleError::NoMigrationPath { .. } => FindingKind::NoMigrationPath,
        BundleError::CyclicDependency { .. } => FindingKind::CyclicDependency,
        BundleError::UnregisteredClass { .. } => FindingKind::UnregisteredClass,
        BundleError::DanglingReference { .. } => FindingKind::DanglingReference,
        BundleError::SchemaMismatch { .. } => FindingKind::SchemaMismatch,
        BundleError::UnusedDependency { .. } => FindingKind::UnusedDependency,
        _ => FindingKind::LoadFailure,
    };
    Finding::error(kind, err.to_string())
}
