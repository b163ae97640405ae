#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use strata::raw::{ObjInst, RawBundle, RawValue};
use strata::schema::{FieldSpec, SchemaBuilder};
use strata::store::{BundleStore, DirStore};
use strata::types::{BundleId, Iid};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    store: PathBuf,
    schema: PathBuf,
    config: PathBuf,
}

fn node(uuid: &str, children: &[u32]) -> ObjInst {
    ObjInst::new(uuid, "Node")
        .with_field("name", RawValue::from(uuid))
        .with_field(
            "children",
            RawValue::List(children.iter().map(|iid| RawValue::local(*iid)).collect()),
        )
}

fn save(store: &DirStore, id: &str, instances: Vec<ObjInst>, deps: &[&str]) {
    let raw = RawBundle {
        version: 1,
        instances,
        roots: vec![Iid(0)],
        deps: deps.iter().map(|dep| BundleId::new(*dep)).collect(),
    };
    store.save_raw_bundle(&BundleId::new(id), &raw).expect("save bundle");
}

fn setup() -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let store_path = dir.path().join("bundles");
    let store = DirStore::open(&store_path).expect("open store");

    save(&store, "lib", vec![node("root", &[1]), node("shared", &[])], &[]);
    save(
        &store,
        "app",
        vec![node("root", &[]).with_field("link", RawValue::xref("lib", "shared"))],
        &["lib"],
    );
    save(
        &store,
        "messy",
        vec![node("root", &[]), node("orphan", &[])],
        &[],
    );

    let mut builder = SchemaBuilder::new(1);
    builder
        .register_class(
            "Node",
            vec![
                FieldSpec::scalar("name"),
                FieldSpec::owned_list("children", "Node"),
                FieldSpec::weak("link", "Node").optional(),
            ],
        )
        .expect("register");
    let registry = builder.build().expect("schema");
    let schema = dir.path().join("schema.json");
    fs::write(
        &schema,
        serde_json::to_vec_pretty(&registry.to_doc()).expect("schema json"),
    )
    .expect("write schema");

    let config = dir.path().join("cli.toml");
    Fixture {
        dir,
        store: store_path,
        schema,
        config,
    }
}

fn add_broken(fixture: &Fixture) {
    let store = DirStore::open(&fixture.store).expect("open store");
    save(
        &store,
        "broken",
        vec![node("root", &[]).with_field("link", RawValue::xref("lib", "gone"))],
        &["lib"],
    );
}

fn strata(fixture: &Fixture) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("strata");
    cmd.arg("--config").arg(&fixture.config).arg("--quiet");
    cmd
}

fn json_stdout(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("valid json")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf-8 path")
}

#[test]
fn audit_passes_clean_store() {
    let fx = setup();
    let output = strata(&fx)
        .args(["--format", "json", "audit"])
        .arg(&fx.store)
        .arg("--schema")
        .arg(&fx.schema)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_stdout(&output);
    assert_eq!(json["success"], Value::Bool(true));
    assert_eq!(json["totals"]["bundles"], 3);
    let messy = &json["bundles"]["messy"]["findings"];
    assert_eq!(messy[0]["kind"], "ownership");
    assert_eq!(messy[0]["severity"], "warning");
}

#[test]
fn audit_with_errors_exits_with_code_two() {
    let fx = setup();
    add_broken(&fx);
    let output = strata(&fx)
        .args(["--format", "json", "audit", "--level", "full"])
        .arg(&fx.store)
        .arg("--schema")
        .arg(&fx.schema)
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let json = json_stdout(&output);
    assert_eq!(json["success"], Value::Bool(false));
    assert_eq!(json["level"], "full");
    assert_eq!(json["totals"]["failed"], 1);
    assert_eq!(json["bundles"]["broken"]["findings"][0]["kind"], "dangling_reference");
}

#[test]
fn verify_prints_text_report() {
    let fx = setup();
    let output = strata(&fx)
        .args(["verify", "app"])
        .arg(&fx.store)
        .arg("--schema")
        .arg(&fx.schema)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf-8");
    assert!(text.contains("Verify app"), "{text}");
    assert!(text.contains("cross_references: 1"), "{text}");
}

#[test]
fn stats_emits_json() {
    let fx = setup();
    let output = strata(&fx)
        .args(["--format", "json", "stats", "lib"])
        .arg(&fx.store)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_stdout(&output);
    assert_eq!(json["classes"]["Node"], 2);
    assert_eq!(json["references"]["local"], 1);
    assert_eq!(json["digest"].as_str().map(str::len), Some(16));
}

#[test]
fn deps_lists_load_order() {
    let fx = setup();
    let output = strata(&fx)
        .args(["--format", "json", "deps", "app"])
        .arg(&fx.store)
        .arg("--schema")
        .arg(&fx.schema)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_stdout(&output);
    assert_eq!(json["order"], serde_json::json!(["lib", "app"]));
}

#[test]
fn prune_dry_run_then_apply() {
    let fx = setup();
    let file = fx.store.join("messy.json");
    let before = fs::read(&file).expect("read bundle");

    let output = strata(&fx)
        .args(["--format", "json", "prune", "messy", "--dry-run"])
        .arg(&fx.store)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(json_stdout(&output)["removed"], 1);
    assert_eq!(fs::read(&file).expect("read bundle"), before);

    strata(&fx)
        .args(["prune", "messy"])
        .arg(&fx.store)
        .assert()
        .success();
    let raw = RawBundle::from_json_slice(&fs::read(&file).expect("read bundle")).expect("parse");
    assert_eq!(raw.len(), 1);
}

#[test]
fn profiles_supply_store_and_schema() {
    let fx = setup();
    strata(&fx)
        .args(["config", "upsert", "ci", "--level", "full", "--jobs", "2"])
        .args(["--store", path_arg(&fx.store)])
        .args(["--schema", path_arg(&fx.schema)])
        .assert()
        .success();
    strata(&fx)
        .args(["config", "set-default", "ci"])
        .assert()
        .success();

    let output = strata(&fx)
        .args(["--format", "json", "audit"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(json_stdout(&output)["level"], "full");

    let output = strata(&fx)
        .args(["--format", "json", "config", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_stdout(&output);
    assert_eq!(json["default_profile"], "ci");
    assert_eq!(json["profiles"][0]["jobs"], 2);

    strata(&fx)
        .args(["config", "delete", "ci"])
        .assert()
        .success();
    strata(&fx).args(["audit"]).assert().code(1);
    assert!(fx.dir.path().join("cli.toml").exists());
}

#[test]
fn unknown_profile_and_missing_store_fail() {
    let fx = setup();
    strata(&fx)
        .args(["--profile", "nope", "stats", "lib"])
        .arg(&fx.store)
        .assert()
        .code(1);
    strata(&fx)
        .args(["stats", "lib"])
        .arg(fx.dir.path().join("missing"))
        .assert()
        .code(1);
}

#[test]
fn help_explains_missing_migrations() {
    let fx = setup();
    let output = strata(&fx)
        .args(["audit", "--help"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf-8");
    assert!(text.contains("no_migration_path"), "{text}");
    assert!(text.contains("strata::admin::audit"), "{text}");
}

#[test]
fn older_bundles_report_no_migration_path() {
    let fx = setup();
    let store = DirStore::open(&fx.store).expect("open store");
    let old = RawBundle {
        version: 0,
        instances: vec![node("root", &[])],
        roots: vec![Iid(0)],
        deps: vec![],
    };
    store
        .save_raw_bundle(&BundleId::new("old"), &old)
        .expect("save bundle");

    let output = strata(&fx)
        .args(["--format", "json", "verify", "old"])
        .arg(&fx.store)
        .arg("--schema")
        .arg(&fx.schema)
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let json = json_stdout(&output);
    assert_eq!(json["findings"][0]["kind"], "no_migration_path");
}
