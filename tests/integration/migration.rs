use std::sync::Arc;

use strata::error::BundleError;
use strata::migrate::{ops, Migration, Migrator};
use strata::raw::{RawBundle, RawValue};
use strata::runtime::{Runtime, Value};
use strata::schema::{FieldSpec, SchemaBuilder, SchemaRegistry};
use strata::store::{BundleStore, DirStore};
use strata::deps::DependencyLoader;
use strata::types::BundleId;

const BOX_V3: &str = r#"{
    "version": 3,
    "instances": [
        {"uuid": "a", "className": "Box", "fields": {"child": {"__ref": 1}}},
        {"uuid": "b", "className": "Box", "fields": {"child": {"__ref": 0}}}
    ],
    "roots": [0],
    "deps": []
}"#;

fn registry_v4() -> Arc<SchemaRegistry> {
    let mut builder = SchemaBuilder::new(4);
    builder
        .register_class(
            "Box",
            vec![
                FieldSpec::owned("child", "Box").optional(),
                FieldSpec::scalar("label"),
            ],
        )
        .unwrap();
    Arc::new(builder.build().unwrap())
}

fn add_label() -> Migration {
    Migration::new(3, 4, "box-label", |mut raw: RawBundle| {
        ops::add_field(&mut raw, "Box", "label", RawValue::from("untitled"));
        Ok(raw)
    })
}

#[test]
fn migrated_box_cycle_resolves_in_both_directions() {
    let raw = RawBundle::from_json_slice(BOX_V3.as_bytes()).unwrap();
    let migrator = Migrator::with_migrations(4, vec![add_label()]).unwrap();
    let migrated = migrator.migrate(raw).unwrap();
    assert_eq!(migrated.version, 4);

    let mut rt = Runtime::new(registry_v4());
    let roots = rt.unbundle(&BundleId::new("boxes"), &migrated).unwrap();
    let root = roots[0];
    let child = rt.get_ref(root, "child").unwrap().unwrap();
    assert_eq!(rt.addr(child).unwrap().uuid, "b");
    assert_eq!(rt.get_ref(child, "child").unwrap(), Some(root));
    assert_eq!(rt.addr(root).unwrap().uuid, "a");
    assert_eq!(rt.get(child, "label").unwrap(), &Value::from("untitled"));
}

#[test]
fn unmigrated_bundle_is_refused_by_the_runtime() {
    let raw = RawBundle::from_json_slice(BOX_V3.as_bytes()).unwrap();
    let mut rt = Runtime::new(registry_v4());
    let err = rt.unbundle(&BundleId::new("boxes"), &raw).unwrap_err();
    assert!(matches!(err, BundleError::VersionMismatch { found: 3, expected: 4, .. }));
    assert!(rt.is_empty());
}

#[test]
fn chained_steps_run_in_order() {
    let mut raw = RawBundle::new(1);
    raw.instances.push(
        strata::raw::ObjInst::new("a", "Crate").with_field("contents", RawValue::local(0)),
    );
    raw.roots.push(0.into());

    let migrator = Migrator::with_migrations(
        4,
        vec![
            Migration::new(2, 3, "contents-to-child", |mut raw: RawBundle| {
                ops::rename_field(&mut raw, "Box", "contents", "child");
                Ok(raw)
            }),
            Migration::new(1, 2, "crate-to-box", |mut raw: RawBundle| {
                ops::rename_class(&mut raw, "Crate", "Box");
                Ok(raw)
            }),
            add_label(),
        ],
    )
    .unwrap();
    assert_eq!(migrator.oldest_supported(), 1);
    let names: Vec<&str> = migrator.plan(1).unwrap().iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["crate-to-box", "contents-to-child", "box-label"]);

    let migrated = migrator.migrate(raw).unwrap();
    let inst = &migrated.instances[0];
    assert_eq!(inst.class_name, "Box");
    assert_eq!(inst.fields["child"], RawValue::local(0));
    assert_eq!(inst.fields["label"], RawValue::from("untitled"));
}

#[test]
fn missing_steps_and_future_versions_have_no_path() {
    let migrator = Migrator::with_migrations(4, vec![add_label()]).unwrap();
    let err = migrator.migrate(RawBundle::new(1)).unwrap_err();
    assert!(matches!(err, BundleError::NoMigrationPath { from: 1, to: 4 }));
    let err = migrator.migrate(RawBundle::new(9)).unwrap_err();
    assert!(matches!(err, BundleError::NoMigrationPath { from: 9, .. }));

    let current = RawBundle::new(4);
    assert_eq!(migrator.migrate(current.clone()).unwrap(), current);
}

#[test]
fn failing_transform_names_the_step() {
    let migrator = Migrator::with_migrations(
        4,
        vec![Migration::new(3, 4, "strict-labels", |mut raw: RawBundle| {
            ops::map_field(&mut raw, "Box", "child", |value| match value {
                RawValue::Ref(_) => Err(BundleError::InvalidArgument("refs not allowed".into())),
                other => Ok(other),
            })?;
            Ok(raw)
        })],
    )
    .unwrap();
    let raw = RawBundle::from_json_slice(BOX_V3.as_bytes()).unwrap();
    match migrator.migrate(raw).unwrap_err() {
        BundleError::MigrationFailed { name, from, to, detail } => {
            assert_eq!(name, "strict-labels");
            assert_eq!((from, to), (3, 4));
            assert!(detail.contains("refs not allowed"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn broken_chains_are_rejected_up_front() {
    let overlapping = Migrator::with_migrations(
        4,
        vec![
            Migration::new(3, 4, "one", Ok),
            Migration::new(3, 4, "two", Ok),
        ],
    );
    assert!(matches!(overlapping, Err(BundleError::InvalidMigrationChain(_))));

    let stranded = Migrator::with_migrations(4, vec![Migration::new(1, 2, "orphan", Ok)]);
    assert!(matches!(stranded, Err(BundleError::InvalidMigrationChain(_))));

    let backwards = Migrator::with_migrations(4, vec![Migration::new(3, 2, "back", Ok)]);
    assert!(matches!(backwards, Err(BundleError::InvalidMigrationChain(_))));
}

#[test]
fn loader_migrates_stored_bundles() -> strata::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = DirStore::open(dir.path())?;
    let id = BundleId::new("boxes");
    store.save_raw_bundle(&id, &RawBundle::from_json_slice(BOX_V3.as_bytes())?)?;

    let migrator = Migrator::with_migrations(4, vec![add_label()])?;
    let mut rt = Runtime::new(registry_v4());
    let roots = DependencyLoader::new(&store, &migrator).load(&mut rt, &id)?;
    assert_eq!(roots.len(), 1);
    assert_eq!(rt.len(), 2);
    // The stored document is left at its original version.
    assert_eq!(store.load_raw_bundle(&id)?.version, 3);
    Ok(())
}
