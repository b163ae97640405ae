use std::collections::BTreeMap;

use serde::Serialize;

use crate::admin::Result;
use crate::raw::RawRef;
use crate::store::BundleStore;
use crate::types::BundleId;

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub bundle_id: BundleId,
    pub version: u32,
    pub instances: usize,
    pub roots: usize,
    pub unreachable: usize,
    pub classes: BTreeMap<String, usize>,
    pub references: ReferenceStats,
    pub deps: Vec<BundleId>,
    pub digest: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceStats {
    pub local: u64,
    pub cross: u64,
    pub by_bundle: BTreeMap<BundleId, u64>,
}

/// Describes a stored bundle as it is on disk, without migrating it.
pub fn stats(store: &dyn BundleStore, id: &BundleId) -> Result<StatsReport> {
    let raw = store.load_raw_bundle(id)?;

    let mut classes: BTreeMap<String, usize> = BTreeMap::new();
    for inst in &raw.instances {
        *classes.entry(inst.class_name.clone()).or_default() += 1;
    }
    let mut references = ReferenceStats::default();
    raw.visit_refs(|_, _, reference| match reference {
        RawRef::Local(_) => references.local += 1,
        RawRef::Cross(addr) => {
            references.cross += 1;
            *references.by_bundle.entry(addr.bundle_id.clone()).or_default() += 1;
        }
    });

    let encoded = raw.to_json_vec()?;
    Ok(StatsReport {
        bundle_id: id.clone(),
        version: raw.version,
        instances: raw.instances.len(),
        roots: raw.roots.len(),
        unreachable: raw.instances.len() - raw.reachable().len(),
        classes,
        references,
        deps: raw.deps.clone(),
        digest: format!("{:016x}", raw.digest()?),
        size_bytes: encoded.len(),
    })
}
