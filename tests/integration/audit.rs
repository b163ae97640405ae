use std::sync::Arc;

use strata::admin::{self, AuditLevel, AuditOptions, AuditReport};
use strata::check::{FindingKind, Severity, UniqueKey};
use strata::migrate::{ops, Migration, Migrator};
use strata::raw::{ObjInst, RawBundle, RawValue};
use strata::schema::{FieldSpec, SchemaBuilder, SchemaRegistry};
use strata::store::{BundleStore, DirStore};
use strata::types::{BundleId, Iid};
use tempfile::TempDir;

fn registry() -> Arc<SchemaRegistry> {
    let mut builder = SchemaBuilder::new(2);
    builder
        .register_class(
            "Folder",
            vec![
                FieldSpec::scalar("name"),
                FieldSpec::owned_list("items", "Folder"),
                FieldSpec::weak("link", "Folder").optional(),
            ],
        )
        .unwrap();
    Arc::new(builder.build().unwrap())
}

fn migrator() -> Arc<Migrator> {
    let step = Migration::new(1, 2, "entries-to-items", |mut raw: RawBundle| {
        ops::rename_field(&mut raw, "Folder", "entries", "items");
        Ok(raw)
    });
    Arc::new(Migrator::with_migrations(2, vec![step]).unwrap())
}

fn folder(uuid: &str, name: &str, items: &[u32]) -> ObjInst {
    ObjInst::new(uuid, "Folder")
        .with_field("name", RawValue::from(name))
        .with_field(
            "items",
            RawValue::List(items.iter().map(|iid| RawValue::local(*iid)).collect()),
        )
}

fn bundle(version: u32, instances: Vec<ObjInst>, deps: &[&str]) -> RawBundle {
    RawBundle {
        version,
        instances,
        roots: vec![Iid(0)],
        deps: deps.iter().map(|dep| BundleId::new(*dep)).collect(),
    }
}

fn seeded_store() -> (TempDir, Arc<DirStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::open(dir.path()).unwrap();
    let save = |id: &str, raw: RawBundle| store.save_raw_bundle(&BundleId::new(id), &raw).unwrap();

    save(
        "lib",
        bundle(2, vec![folder("root", "lib", &[1]), folder("shared", "shared", &[])], &[]),
    );
    save(
        "app",
        bundle(
            2,
            vec![folder("root", "app", &[]).with_field("link", RawValue::xref("lib", "shared"))],
            &["lib"],
        ),
    );
    save(
        "legacy",
        bundle(
            1,
            vec![ObjInst::new("root", "Folder")
                .with_field("name", RawValue::from("legacy"))
                .with_field("entries", RawValue::List(vec![]))],
            &[],
        ),
    );
    save(
        "dangling",
        bundle(
            2,
            vec![folder("root", "dangling", &[]).with_field("link", RawValue::xref("lib", "gone"))],
            &["lib"],
        ),
    );
    save("stale", bundle(2, vec![folder("root", "stale", &[])], &["lib"]));
    save("ancient", bundle(0, vec![folder("root", "ancient", &[])], &[]));
    save(
        "dupes",
        bundle(
            2,
            vec![
                folder("root", "dupes", &[1, 2]),
                folder("x", "same", &[]),
                folder("y", "same", &[]),
            ],
            &[],
        ),
    );
    (dir, Arc::new(store))
}

async fn run(store: Arc<DirStore>, opts: AuditOptions) -> AuditReport {
    admin::audit(store, registry(), migrator(), opts, |_, _| {})
        .await
        .unwrap()
}

fn failed(report: &AuditReport) -> Vec<&str> {
    report
        .bundles
        .iter()
        .filter(|(_, bundle)| !bundle.success)
        .map(|(id, _)| id.as_str())
        .collect()
}

#[tokio::test]
async fn fast_audit_reports_every_broken_bundle() {
    let (_dir, store) = seeded_store();
    let report = run(store, AuditOptions::default()).await;

    assert!(!report.success);
    assert_eq!(report.totals.bundles, 7);
    assert_eq!(failed(&report), vec!["ancient", "dangling", "stale"]);

    let bundle = |id: &str| &report.bundles[&BundleId::new(id)];
    assert!(bundle("ancient").has(FindingKind::NoMigrationPath, Severity::Error));
    assert!(bundle("dangling").has(FindingKind::DanglingReference, Severity::Error));
    assert!(bundle("stale").has(FindingKind::UnusedDependency, Severity::Error));
    assert!(bundle("legacy").findings.is_empty());
    assert_eq!(bundle("app").counts.cross_references, 1);
}

#[tokio::test]
async fn full_audit_runs_domain_invariants() {
    let (_dir, store) = seeded_store();
    let opts = AuditOptions {
        level: AuditLevel::Full,
        jobs: 2,
        invariants: vec![Arc::new(UniqueKey::new("Folder", "items", "name"))],
        ..AuditOptions::default()
    };
    let report = run(store, opts).await;

    assert_eq!(failed(&report), vec!["ancient", "dangling", "dupes", "stale"]);
    let dupes = &report.bundles[&BundleId::new("dupes")];
    assert_eq!(dupes.of_kind(FindingKind::DomainInvariant).count(), 1);
    let app = &report.bundles[&BundleId::new("app")];
    assert!(app.success, "{:?}", app.findings);
    // Live pass sees app plus the library it pulled in.
    assert_eq!(app.counts.instances, 1 + 3);
}

#[tokio::test]
async fn findings_are_capped_but_still_counted() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::open(dir.path()).unwrap();
    let instances = (0..10)
        .map(|idx| folder(&format!("n{idx}"), "orphan", &[]))
        .collect();
    store
        .save_raw_bundle(&BundleId::new("sprawl"), &bundle(2, instances, &[]))
        .unwrap();

    let opts = AuditOptions {
        max_findings: Some(3),
        ..AuditOptions::default()
    };
    let report = run(Arc::new(store), opts).await;
    let sprawl = &report.bundles[&BundleId::new("sprawl")];
    assert!(sprawl.success);
    assert_eq!(sprawl.findings.len(), 3);
    assert_eq!(sprawl.truncated, 6);
    assert_eq!(sprawl.counts.warnings, 9);
}

#[tokio::test]
async fn pruning_clears_ownership_warnings() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::open(dir.path()).unwrap();
    let id = BundleId::new("sprawl");
    store
        .save_raw_bundle(
            &id,
            &bundle(
                2,
                vec![
                    folder("root", "root", &[2]),
                    folder("lost", "lost", &[]).with_field("link", RawValue::xref("lib", "x")),
                    folder("kept", "kept", &[]),
                ],
                &["lib"],
            ),
        )
        .unwrap();

    let stats = admin::stats(&store, &id).unwrap();
    assert_eq!(stats.unreachable, 1);
    assert_eq!(stats.references.cross, 1);

    let preview = admin::prune(&store, &id, true).unwrap();
    assert_eq!(preview.removed, 1);
    assert_eq!(store.load_raw_bundle(&id).unwrap().len(), 3);

    admin::prune(&store, &id, false).unwrap();
    let report = run(Arc::new(store), AuditOptions::default()).await;
    let pruned = &report.bundles[&id];
    assert!(pruned.success, "{:?}", pruned.findings);
    assert!(pruned.findings.is_empty(), "{:?}", pruned.findings);
}

#[test]
fn missing_store_directory_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = admin::open_store(dir.path().join("nope")).unwrap_err();
    assert!(matches!(err, admin::AdminError::MissingStore(_)));
}
