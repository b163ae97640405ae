#![forbid(unsafe_code)]

//! Dependency resolution across bundles.
//!
//! Loading a bundle means loading, migrating and unbundling everything it
//! references first. The full order is computed before any unbundling
//! starts; a cycle between bundles is fatal, unlike cycles between objects.
//! The unbundling itself runs inside a runtime transaction so a failure or a
//! cancellation leaves the runtime as it was.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{BundleError, Result};
use crate::migrate::Migrator;
use crate::raw::RawBundle;
use crate::runtime::Runtime;
use crate::store::BundleStore;
use crate::types::{BundleId, ObjId};

/// Shared flag used to abandon a load from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`BundleError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BundleError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Migrated bundles in the order they must be unbundled.
#[derive(Debug, Default)]
pub struct LoadPlan {
    order: Vec<BundleId>,
    bundles: FxHashMap<BundleId, RawBundle>,
}

impl LoadPlan {
    /// Bundle ids, dependencies before dependents.
    pub fn order(&self) -> &[BundleId] {
        &self.order
    }

    /// Migrated content of a planned bundle.
    pub fn bundle(&self, id: &BundleId) -> Option<&RawBundle> {
        self.bundles.get(id)
    }

    /// Number of bundles in the plan.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing needs loading.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Bundle ids `raw` depends on: declared deps plus any bundle named by a
/// cross reference, excluding itself.
pub fn dependencies_of(id: &BundleId, raw: &RawBundle) -> Vec<BundleId> {
    let mut deps: Vec<BundleId> = raw.deps.clone();
    deps.extend(raw.referenced_bundles());
    deps.sort();
    deps.dedup();
    deps.retain(|dep| dep != id);
    deps
}

/// Loads bundles from a store and unbundles them in dependency order.
pub struct DependencyLoader<'a> {
    store: &'a dyn BundleStore,
    migrator: &'a Migrator,
    cancel: CancelToken,
}

impl<'a> DependencyLoader<'a> {
    /// Creates a loader reading from `store` and migrating with `migrator`.
    pub fn new(store: &'a dyn BundleStore, migrator: &'a Migrator) -> Self {
        Self {
            store,
            migrator,
            cancel: CancelToken::new(),
        }
    }

    /// Uses `cancel` to abandon loads.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token observed by this loader.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Computes the full load order for `root` without touching any runtime.
    pub fn plan(&self, root: &BundleId) -> Result<LoadPlan> {
        self.plan_skipping(root, &|_| false)
    }

    /// Loads `root` and its dependency closure into `rt`, returning the roots
    /// of `root`.
    ///
    /// Bundles already loaded into `rt` are reused as they are. On any error,
    /// including cancellation, the runtime is rolled back to its state
    /// before the call.
    pub fn load(&self, rt: &mut Runtime, root: &BundleId) -> Result<Vec<ObjId>> {
        if let Some(roots) = rt.roots(root) {
            return Ok(roots.to_vec());
        }
        let plan = self.plan_skipping(root, &|id| rt.is_loaded(id))?;
        tracing::info!(bundle = %root, bundles = plan.len(), "deps.load.start");
        let roots = rt.transaction(|rt| {
            let mut roots = Vec::new();
            for id in plan.order() {
                self.cancel.check()?;
                let raw = plan
                    .bundle(id)
                    .ok_or_else(|| BundleError::NotFound(format!("planned bundle {id}")))?;
                roots = rt.unbundle(id, raw)?;
                tracing::debug!(bundle = %id, instances = raw.len(), "deps.load.bundle");
            }
            Ok(roots)
        });
        match &roots {
            Ok(_) => tracing::info!(bundle = %root, "deps.load.done"),
            Err(err) => tracing::warn!(bundle = %root, error = %err, "deps.load.failed"),
        }
        roots
    }

    fn plan_skipping(&self, root: &BundleId, skip: &dyn Fn(&BundleId) -> bool) -> Result<LoadPlan> {
        let mut plan = LoadPlan::default();
        let mut marks: FxHashMap<BundleId, Mark> = FxHashMap::default();
        // Each frame is a bundle being visited and the deps it still has to visit.
        let mut stack: Vec<(BundleId, std::vec::IntoIter<BundleId>)> = Vec::new();

        let deps = self.fetch(root, &mut plan)?;
        marks.insert(root.clone(), Mark::InProgress);
        stack.push((root.clone(), deps.into_iter()));

        while let Some((current, pending)) = stack.last_mut() {
            let Some(dep) = pending.next() else {
                let current = current.clone();
                marks.insert(current.clone(), Mark::Done);
                plan.order.push(current);
                stack.pop();
                continue;
            };
            if skip(&dep) {
                continue;
            }
            match marks.get(&dep) {
                Some(Mark::Done) => continue,
                Some(Mark::InProgress) => {
                    let start = stack
                        .iter()
                        .position(|(id, _)| *id == dep)
                        .unwrap_or_default();
                    let mut cycle: Vec<BundleId> =
                        stack[start..].iter().map(|(id, _)| id.clone()).collect();
                    cycle.push(dep);
                    return Err(BundleError::CyclicDependency { cycle });
                }
                None => {
                    let deps = self.fetch(&dep, &mut plan)?;
                    marks.insert(dep.clone(), Mark::InProgress);
                    stack.push((dep, deps.into_iter()));
                }
            }
        }
        Ok(plan)
    }

    fn fetch(&self, id: &BundleId, plan: &mut LoadPlan) -> Result<Vec<BundleId>> {
        self.cancel.check()?;
        let raw = self.store.load_raw_bundle(id)?;
        let from = raw.version;
        let raw = self.migrator.migrate(raw).map_err(|err| {
            tracing::warn!(bundle = %id, version = from, error = %err, "deps.migrate.failed");
            err
        })?;
        let deps = dependencies_of(id, &raw);
        tracing::trace!(bundle = %id, deps = deps.len(), "deps.fetch");
        plan.bundles.insert(id.clone(), raw);
        Ok(deps)
    }
}
