use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::check::report::{Finding, FindingKind, Findings};
use crate::raw::{RawBundle, RawRef};
use crate::types::{Addr, BundleId, Iid};

/// Uuids available in each dependency bundle, for resolving cross references
/// without unbundling anything.
#[derive(Clone, Debug, Default)]
pub struct DepIndex {
    uuids: FxHashMap<BundleId, FxHashSet<String>>,
}

impl DepIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every instance of `raw` under `bundle_id`.
    pub fn insert(&mut self, bundle_id: BundleId, raw: &RawBundle) {
        let uuids = raw.instances.iter().map(|inst| inst.uuid.clone()).collect();
        self.uuids.insert(bundle_id, uuids);
    }

    /// Returns true if `bundle_id` has been indexed.
    pub fn knows(&self, bundle_id: &BundleId) -> bool {
        self.uuids.contains_key(bundle_id)
    }

    /// Returns true if the address resolves in the index.
    pub fn contains(&self, addr: &Addr) -> bool {
        self.uuids
            .get(&addr.bundle_id)
            .is_some_and(|uuids| uuids.contains(&addr.uuid))
    }
}

/// Checks that every local and cross reference resolves and that the
/// declared dependencies match the cross references actually present.
///
/// Cross references are only resolved against dependency contents when a
/// [`DepIndex`] is supplied.
pub fn check_references(
    bundle_id: &BundleId,
    raw: &RawBundle,
    deps: Option<&DepIndex>,
    findings: &mut Findings,
) {
    let len = raw.instances.len();
    let mut local_uuids: FxHashMap<&str, Iid> = FxHashMap::default();
    for (idx, inst) in raw.instances.iter().enumerate() {
        let iid = Iid(idx as u32);
        if let Some(first) = local_uuids.insert(inst.uuid.as_str(), iid) {
            findings.push(
                Finding::error(
                    FindingKind::DuplicateUuid,
                    format!("uuid already used by iid {first}"),
                )
                .at(iid, &inst.uuid),
            );
        }
    }

    for root in &raw.roots {
        if root.index() >= len {
            findings.push(Finding::error(
                FindingKind::DanglingReference,
                format!("root iid {root} is outside the instance table ({len} instances)"),
            ));
        }
    }

    let declared: BTreeSet<&BundleId> = raw.deps.iter().collect();
    if declared.len() != raw.deps.len() {
        findings.push(Finding::warning(
            FindingKind::UnusedDependency,
            "dependency list contains duplicates",
        ));
    }

    let mut referenced: BTreeSet<&BundleId> = BTreeSet::new();
    let mut local_count = 0u64;
    let mut cross_count = 0u64;
    raw.visit_refs(|holder, field, reference| {
        let inst = &raw.instances[holder.index()];
        match reference {
            RawRef::Local(target) => {
                local_count += 1;
                if target.index() >= len {
                    findings.push(
                        Finding::error(
                            FindingKind::DanglingReference,
                            format!("iid {target} is outside the instance table ({len} instances)"),
                        )
                        .at(holder, &inst.uuid)
                        .in_field(field),
                    );
                }
            }
            RawRef::Cross(addr) => {
                cross_count += 1;
                if addr.bundle_id == *bundle_id {
                    if !local_uuids.contains_key(addr.uuid.as_str()) {
                        findings.push(
                            Finding::error(
                                FindingKind::DanglingReference,
                                format!("no instance with uuid {}", addr.uuid),
                            )
                            .at(holder, &inst.uuid)
                            .in_field(field),
                        );
                    }
                    return;
                }
                referenced.insert(&addr.bundle_id);
                if !declared.contains(&addr.bundle_id) {
                    findings.push(
                        Finding::error(
                            FindingKind::DanglingReference,
                            format!("{addr} points into undeclared dependency {}", addr.bundle_id),
                        )
                        .at(holder, &inst.uuid)
                        .in_field(field),
                    );
                    return;
                }
                let Some(index) = deps else { return };
                let detail = if !index.knows(&addr.bundle_id) {
                    format!("dependency {} is unavailable", addr.bundle_id)
                } else if !index.contains(addr) {
                    format!("dependency {} has no instance {}", addr.bundle_id, addr.uuid)
                } else {
                    return;
                };
                findings.push(
                    Finding::error(FindingKind::DanglingReference, detail)
                        .at(holder, &inst.uuid)
                        .in_field(field),
                );
            }
        }
    });

    for dep in declared.difference(&referenced) {
        findings.push(Finding::error(
            FindingKind::UnusedDependency,
            format!("dependency {dep} is never referenced"),
        ));
    }

    let counts = findings.counts_mut();
    counts.references += local_count;
    counts.cross_references += cross_count;
}
