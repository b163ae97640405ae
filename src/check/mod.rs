#![forbid(unsafe_code)]

//! Invariant checking for raw bundles and live graphs.
//!
//! Every pass appends to a [`Findings`] sink instead of failing on the first
//! problem, so audit tooling can report everything wrong with a corpus in
//! one run. The passes are independent and may be run on their own;
//! [`check_raw`] runs the three raw passes together.

mod fields;
mod live;
mod ownership;
mod refs;
mod report;

pub use fields::check_bundle_fields;
pub use live::{check_live, Invariant, UniqueKey};
pub use ownership::check_ownership;
pub use refs::{check_references, DepIndex};
pub use report::{
    CheckCounts, CheckOptions, CheckReport, Finding, FindingKind, Findings, Severity,
};

use crate::raw::RawBundle;
use crate::schema::SchemaRegistry;
use crate::types::BundleId;

/// Runs the field, reference and ownership passes over a migrated bundle.
pub fn check_raw(
    bundle_id: &BundleId,
    registry: &SchemaRegistry,
    raw: &RawBundle,
    deps: Option<&DepIndex>,
    opts: &CheckOptions,
) -> CheckReport {
    let mut findings = Findings::new(opts);
    check_raw_into(bundle_id, registry, raw, deps, &mut findings);
    findings.into_report(Some(bundle_id.clone()))
}

/// Like [`check_raw`], appending to an existing sink.
pub fn check_raw_into(
    bundle_id: &BundleId,
    registry: &SchemaRegistry,
    raw: &RawBundle,
    deps: Option<&DepIndex>,
    findings: &mut Findings,
) {
    findings.counts_mut().instances += raw.instances.len() as u64;
    check_bundle_fields(registry, raw, findings);
    check_references(bundle_id, raw, deps, findings);
    check_ownership(registry, raw, findings);
    let errors = findings.counts_mut().errors;
    tracing::debug!(bundle = %bundle_id, errors, kept = findings.items().len(), "check.raw");
}
