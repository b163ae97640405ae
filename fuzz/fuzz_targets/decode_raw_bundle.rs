#![no_main]

use libfuzzer_sys::fuzz_target;
use strata::check::{check_raw, CheckOptions};
use strata::raw::RawBundle;
use strata::schema::{FieldSpec, SchemaBuilder, SchemaRegistry};
use strata::types::BundleId;

fn registry() -> SchemaRegistry {
    let mut builder = SchemaBuilder::new(1);
    builder
        .register_class(
            "Node",
            vec![
                FieldSpec::scalar("name"),
                FieldSpec::owned_list("children", "Node"),
                FieldSpec::weak("link", "Node").optional(),
                FieldSpec::map("props"),
            ],
        )
        .expect("register");
    builder.build().expect("schema")
}

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = RawBundle::from_json_slice(data) else {
        return;
    };
    let opts = CheckOptions {
        max_findings: Some(32),
        ..CheckOptions::default()
    };
    let report = check_raw(&BundleId::new("fuzz"), &registry(), &raw, None, &opts);
    assert!(report.findings.len() <= 32);

    let mut pruned = raw.clone();
    if let Ok(removed) = pruned.prune_unreachable() {
        assert_eq!(pruned.len() + removed, raw.len());
        assert_eq!(pruned.reachable().len(), pruned.len());
    }
});
