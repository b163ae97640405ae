use serde::Serialize;

use crate::admin::Result;
use crate::store::BundleStore;
use crate::types::BundleId;

/// Outcome of pruning one bundle.
#[derive(Debug, Clone, Serialize)]
pub struct PruneReport {
    /// Bundle that was pruned.
    pub bundle_id: BundleId,
    /// Whether the result was written back.
    pub dry_run: bool,
    /// Instances dropped because no root reaches them.
    pub removed: usize,
    /// Instances left.
    pub remaining: usize,
    /// Declared dependencies nothing references any more.
    pub deps_removed: Vec<BundleId>,
}

/// Drops unreachable instances and unused dependencies from a stored bundle.
///
/// The bundle keeps its version; nothing is migrated. With `dry_run` the
/// store is left untouched and the report describes what would change.
pub fn prune(store: &dyn BundleStore, id: &BundleId, dry_run: bool) -> Result<PruneReport> {
    let mut raw = store.load_raw_bundle(id)?;
    let deps_before = raw.deps.clone();
    let removed = raw.prune_unreachable()?;
    raw.recompute_deps();
    raw.deps.retain(|dep| dep != id);
    let deps_removed: Vec<BundleId> = deps_before
        .into_iter()
        .filter(|dep| !raw.deps.contains(dep))
        .collect();

    let changed = removed > 0 || !deps_removed.is_empty();
    if changed && !dry_run {
        store.save_raw_bundle(id, &raw)?;
    }
    tracing::info!(bundle = %id, removed, deps_removed = deps_removed.len(), dry_run, "admin.prune");
    Ok(PruneReport {
        bundle_id: id.clone(),
        dry_run,
        removed,
        remaining: raw.instances.len(),
        deps_removed,
    })
}
