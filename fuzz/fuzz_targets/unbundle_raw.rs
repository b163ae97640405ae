#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use strata::raw::RawBundle;
use strata::runtime::Runtime;
use strata::schema::{FieldSpec, SchemaBuilder};
use strata::types::BundleId;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = RawBundle::from_json_slice(data) else {
        return;
    };
    let mut builder = SchemaBuilder::new(raw.version);
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
    let mut rt = Runtime::new(Arc::new(builder.build().expect("schema")));
    let id = BundleId::new("fuzz");

    // A rejected bundle must leave nothing behind.
    match rt.unbundle(&id, &raw) {
        Ok(roots) => {
            assert!(rt.is_loaded(&id));
            let _ = rt.bundle(&id, &roots);
        }
        Err(_) => {
            assert!(rt.is_empty());
            assert!(!rt.is_loaded(&id));
        }
    }
});
