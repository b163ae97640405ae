use std::sync::Arc;

use strata::deps::{CancelToken, DependencyLoader};
use strata::error::BundleError;
use strata::migrate::Migrator;
use strata::raw::{ObjInst, RawBundle, RawValue};
use strata::runtime::Runtime;
use strata::schema::{FieldSpec, SchemaBuilder, SchemaRegistry};
use strata::store::{BundleStore, MemoryStore};
use strata::types::BundleId;

fn registry() -> Arc<SchemaRegistry> {
    let mut builder = SchemaBuilder::new(1);
    builder
        .register_class(
            "Part",
            vec![
                FieldSpec::scalar("name"),
                FieldSpec::owned_list("parts", "Part"),
                FieldSpec::weak("uses", "Part").optional(),
            ],
        )
        .unwrap();
    Arc::new(builder.build().unwrap())
}

fn bid(id: &str) -> BundleId {
    BundleId::new(id)
}

/// Publishes a library bundle `D` and an application bundle `P` that uses
/// one of its parts. Returns the uuid of the shared part.
fn publish(store: &dyn BundleStore) -> String {
    let mut rt = Runtime::new(registry());
    let lib = rt.create("Part").unwrap();
    rt.set(lib, "name", "lib").unwrap();
    let shared = rt.create("Part").unwrap();
    rt.set(shared, "name", "shared").unwrap();
    rt.push(lib, "parts", shared).unwrap();
    let d = rt.bundle(&bid("D"), &[lib]).unwrap();

    let app = rt.create("Part").unwrap();
    rt.set(app, "name", "app").unwrap();
    rt.set(app, "uses", shared).unwrap();
    let p = rt.bundle(&bid("P"), &[app]).unwrap();
    assert_eq!(p.deps, vec![bid("D")]);

    store.save_raw_bundle(&bid("D"), &d).unwrap();
    store.save_raw_bundle(&bid("P"), &p).unwrap();
    rt.addr(shared).unwrap().uuid.clone()
}

fn part(uuid: &str, uses: Option<RawValue>) -> ObjInst {
    let inst = ObjInst::new(uuid, "Part")
        .with_field("name", RawValue::from(uuid))
        .with_field("parts", RawValue::List(vec![]));
    match uses {
        Some(target) => inst.with_field("uses", target),
        None => inst,
    }
}

fn single(inst: ObjInst, deps: &[&str]) -> RawBundle {
    let mut raw = RawBundle::new(1);
    raw.instances.push(inst);
    raw.roots.push(0.into());
    raw.deps = deps.iter().map(|dep| bid(dep)).collect();
    raw
}

#[test]
fn shared_dependency_keeps_identity_when_loaded_first() {
    let store = MemoryStore::new();
    let uuid = publish(&store);
    let migrator = Migrator::new(1);
    let loader = DependencyLoader::new(&store, &migrator);

    let mut rt = Runtime::new(registry());
    let d_roots = loader.load(&mut rt, &bid("D")).unwrap();
    let direct = rt.owned_children(d_roots[0]).unwrap()[0];
    assert_eq!(rt.addr(direct).unwrap().uuid, uuid);

    let p_roots = loader.load(&mut rt, &bid("P")).unwrap();
    let via_p = rt.get_ref(p_roots[0], "uses").unwrap().unwrap();
    assert_eq!(via_p, direct);
    assert_eq!(rt.len(), 3);
}

#[test]
fn shared_dependency_keeps_identity_when_loaded_through_dependent() {
    let store = MemoryStore::new();
    publish(&store);
    let migrator = Migrator::new(1);
    let loader = DependencyLoader::new(&store, &migrator);

    let mut rt = Runtime::new(registry());
    let p_roots = loader.load(&mut rt, &bid("P")).unwrap();
    assert!(rt.is_loaded(&bid("D")));
    let via_p = rt.get_ref(p_roots[0], "uses").unwrap().unwrap();

    let d_roots = loader.load(&mut rt, &bid("D")).unwrap();
    assert_eq!(rt.owned_children(d_roots[0]).unwrap(), vec![via_p]);
    assert_eq!(rt.len(), 3);
}

#[test]
fn unbundling_without_dependencies_is_dangling() {
    let store = MemoryStore::new();
    publish(&store);
    let raw = store.load_raw_bundle(&bid("P")).unwrap();
    let mut rt = Runtime::new(registry());
    let err = rt.unbundle(&bid("P"), &raw).unwrap_err();
    assert!(matches!(err, BundleError::DanglingReference { .. }), "{err}");
    assert!(rt.is_empty());
}

#[test]
fn failed_load_rolls_back_dependencies() {
    let store = MemoryStore::new();
    let uuid = publish(&store);
    let mut broken = single(part("app", Some(RawValue::xref("D", uuid))), &["D"]);
    broken.instances.push(ObjInst::new("ghost", "Ghost"));
    store.save_raw_bundle(&bid("broken"), &broken).unwrap();

    let migrator = Migrator::new(1);
    let loader = DependencyLoader::new(&store, &migrator);
    let mut rt = Runtime::new(registry());
    let err = loader.load(&mut rt, &bid("broken")).unwrap_err();
    assert!(matches!(err, BundleError::UnregisteredClass { .. }), "{err}");
    assert!(rt.is_empty());
    assert!(!rt.is_loaded(&bid("D")));

    // Bundles loaded before the failing call stay loaded.
    loader.load(&mut rt, &bid("D")).unwrap();
    assert!(loader.load(&mut rt, &bid("broken")).is_err());
    assert_eq!(rt.len(), 2);
    assert!(rt.is_loaded(&bid("D")));
    assert!(!rt.is_loaded(&bid("broken")));
}

#[test]
fn bundle_cycles_are_fatal() {
    let store = MemoryStore::new();
    store
        .save_raw_bundle(&bid("A"), &single(part("a", Some(RawValue::xref("B", "b"))), &["B"]))
        .unwrap();
    store
        .save_raw_bundle(&bid("B"), &single(part("b", Some(RawValue::xref("A", "a"))), &["A"]))
        .unwrap();
    let migrator = Migrator::new(1);
    let mut rt = Runtime::new(registry());
    let err = DependencyLoader::new(&store, &migrator)
        .load(&mut rt, &bid("A"))
        .unwrap_err();
    match err {
        BundleError::CyclicDependency { cycle } => assert_eq!(cycle, vec![bid("A"), bid("B"), bid("A")]),
        other => panic!("unexpected error {other}"),
    }
    assert!(rt.is_empty());
}

/// Store that requests cancellation as soon as a given bundle is read.
struct CancellingStore {
    inner: MemoryStore,
    trigger: BundleId,
    token: CancelToken,
}

impl BundleStore for CancellingStore {
    fn load_raw_bundle(&self, id: &BundleId) -> strata::Result<RawBundle> {
        if *id == self.trigger {
            self.token.cancel();
        }
        self.inner.load_raw_bundle(id)
    }

    fn save_raw_bundle(&self, id: &BundleId, raw: &RawBundle) -> strata::Result<()> {
        self.inner.save_raw_bundle(id, raw)
    }

    fn list(&self) -> strata::Result<Vec<BundleId>> {
        self.inner.list()
    }
}

#[test]
fn cancellation_during_a_load_leaves_runtime_untouched() {
    let token = CancelToken::new();
    let store = CancellingStore {
        inner: MemoryStore::new(),
        trigger: bid("D"),
        token: token.clone(),
    };
    publish(&store.inner);
    let migrator = Migrator::new(1);
    let loader = DependencyLoader::new(&store, &migrator).with_cancel(token);

    let mut rt = Runtime::new(registry());
    let err = loader.load(&mut rt, &bid("P")).unwrap_err();
    assert!(matches!(err, BundleError::Cancelled));
    assert!(rt.is_empty());
    assert!(loader.cancel_token().is_cancelled());
}

#[test]
fn runtimes_on_separate_threads_share_a_store() {
    let store = Arc::new(MemoryStore::new());
    let uuid = publish(&*store);
    let migrator = Arc::new(Migrator::new(1));
    let registry = registry();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let migrator = Arc::clone(&migrator);
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    let mut rt = Runtime::new(registry);
                    let roots = DependencyLoader::new(&*store, &migrator)
                        .load(&mut rt, &bid("P"))
                        .unwrap();
                    let target = rt.get_ref(roots[0], "uses").unwrap().unwrap();
                    rt.addr(target).unwrap().uuid.clone()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), uuid);
        }
    });
}

#[test]
fn plan_lists_dependencies_first() {
    let store = MemoryStore::new();
    publish(&store);
    let migrator = Migrator::new(1);
    let plan = DependencyLoader::new(&store, &migrator).plan(&bid("P")).unwrap();
    assert_eq!(plan.order(), &[bid("D"), bid("P")]);
    assert_eq!(plan.bundle(&bid("D")).unwrap().len(), 2);
}
