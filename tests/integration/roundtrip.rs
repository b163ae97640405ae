use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use strata::check::{check_raw, CheckOptions};
use strata::raw::RawBundle;
use strata::runtime::{Runtime, Value};
use strata::schema::{FieldSpec, SchemaBuilder, SchemaRegistry};
use strata::types::{BundleId, ObjId};

fn registry() -> Arc<SchemaRegistry> {
    let mut builder = SchemaBuilder::new(1);
    builder
        .register_class(
            "Node",
            vec![
                FieldSpec::scalar("name"),
                FieldSpec::owned_list("children", "Node"),
                FieldSpec::weak("link", "Node").optional(),
                FieldSpec::list("tags"),
                FieldSpec::map("props"),
            ],
        )
        .unwrap();
    Arc::new(builder.build().unwrap())
}

#[derive(Debug, Clone)]
struct GraphShape {
    parents: Vec<usize>,
    links: Vec<Option<usize>>,
    names: Vec<String>,
    tags: Vec<Vec<i64>>,
}

fn arb_graph() -> impl Strategy<Value = GraphShape> {
    (1usize..24)
        .prop_flat_map(|n| {
            let parents: Vec<std::ops::Range<usize>> = (1..n).map(|i| 0..i).collect();
            (
                parents,
                prop::collection::vec(prop::option::of(0..n), n),
                prop::collection::vec("[a-z]{1,8}", n),
                prop::collection::vec(prop::collection::vec(any::<i64>(), 0..4), n),
            )
        })
        .prop_map(|(parents, links, names, tags)| GraphShape {
            parents,
            links,
            names,
            tags,
        })
}

/// Node 0 is the root; node `i > 0` is owned by `parents[i - 1]`.
fn build(rt: &mut Runtime, shape: &GraphShape) -> Vec<ObjId> {
    let ids: Vec<ObjId> = shape
        .names
        .iter()
        .map(|_| rt.create("Node").unwrap())
        .collect();
    for (idx, id) in ids.iter().enumerate() {
        rt.set(*id, "name", shape.names[idx].as_str()).unwrap();
        let tags: Vec<Value> = shape.tags[idx].iter().map(|t| Value::Int(*t)).collect();
        rt.set(*id, "tags", tags).unwrap();
        let props = BTreeMap::from([("index".to_string(), Value::Int(idx as i64))]);
        rt.set(*id, "props", Value::Map(props)).unwrap();
        if let Some(target) = shape.links[idx] {
            rt.set(*id, "link", ids[target]).unwrap();
        }
    }
    for (offset, parent) in shape.parents.iter().enumerate() {
        rt.push(ids[*parent], "children", ids[offset + 1]).unwrap();
    }
    ids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_rebundling_a_decoded_graph_is_byte_identical(shape in arb_graph()) {
        let id = BundleId::new("doc");
        let mut rt = Runtime::new(registry());
        let ids = build(&mut rt, &shape);
        let raw = rt.bundle(&id, &[ids[0]]).unwrap();
        prop_assert_eq!(raw.len(), shape.names.len());

        let report = check_raw(&id, rt.registry(), &raw, None, &CheckOptions::default());
        prop_assert!(report.success, "{:?}", report.findings);

        let bytes = raw.to_json_vec().unwrap();
        let parsed = RawBundle::from_json_slice(&bytes).unwrap();
        prop_assert_eq!(&parsed, &raw);

        let mut fresh = Runtime::new(registry());
        let roots = fresh.unbundle(&id, &parsed).unwrap();
        let again = fresh.bundle(&id, &roots).unwrap();
        prop_assert_eq!(again.to_json_vec().unwrap(), bytes);
    }

    #[test]
    fn prop_weak_links_keep_their_targets(shape in arb_graph()) {
        let id = BundleId::new("doc");
        let mut rt = Runtime::new(registry());
        let ids = build(&mut rt, &shape);
        let raw = rt.bundle(&id, &[ids[0]]).unwrap();

        let mut fresh = Runtime::new(registry());
        fresh.unbundle(&id, &raw).unwrap();
        for (idx, original) in ids.iter().enumerate() {
            let addr = rt.addr(*original).unwrap().clone();
            let decoded = fresh.resolve(&addr).unwrap();
            let name = fresh.get(decoded, "name").unwrap().as_str().map(str::to_string);
            prop_assert_eq!(name, Some(shape.names[idx].clone()));
            let link = fresh
                .get_ref(decoded, "link")
                .unwrap()
                .map(|target| fresh.addr(target).unwrap().clone());
            let expected = shape.links[idx].map(|target| rt.addr(ids[target]).unwrap().clone());
            prop_assert_eq!(link, expected);
        }
    }
}

#[test]
fn unbundling_twice_reuses_live_instances() {
    let id = BundleId::new("doc");
    let mut rt = Runtime::new(registry());
    let shape = GraphShape {
        parents: vec![0, 0, 1],
        links: vec![Some(3), None, Some(0), Some(3)],
        names: vec!["root".into(), "a".into(), "b".into(), "c".into()],
        tags: vec![vec![], vec![1], vec![2, 3], vec![]],
    };
    let ids = build(&mut rt, &shape);
    let raw = rt.bundle(&id, &[ids[0]]).unwrap();

    rt.set(ids[1], "name", "renamed").unwrap();
    let roots = rt.unbundle(&id, &raw).unwrap();
    assert_eq!(roots, vec![ids[0]]);
    assert_eq!(rt.len(), 4);
    assert_eq!(rt.get(ids[1], "name").unwrap().as_str(), Some("a"));
    assert_eq!(rt.owned_children(ids[0]).unwrap(), vec![ids[1], ids[2]]);
}
