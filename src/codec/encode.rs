use std::collections::{BTreeMap, BTreeSet};

use rand::distributions::Alphanumeric;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{BundleError, Result};
use crate::raw::{CrossRef, LocalRef, ObjInst, RawBundle, RawValue};
use crate::runtime::{Runtime, Value};
use crate::types::{Addr, BundleId, Iid, ObjId};

const UUID_LEN: usize = 12;

struct EncodeCtx<'a> {
    rt: &'a Runtime,
    bundle_id: &'a BundleId,
    iids: FxHashMap<ObjId, Iid>,
    deps: BTreeSet<BundleId>,
}

pub(crate) fn encode(rt: &mut Runtime, bundle_id: &BundleId, roots: &[ObjId]) -> Result<RawBundle> {
    let order = ownership_closure(rt, bundle_id, roots)?;
    let iids: FxHashMap<ObjId, Iid> = order
        .iter()
        .enumerate()
        .map(|(idx, id)| (*id, Iid(idx as u32)))
        .collect();

    let uuids = assign_uuids(rt, bundle_id, &order);
    let registry = rt.shared_registry();
    let view: &Runtime = rt;
    let mut ctx = EncodeCtx {
        rt: view,
        bundle_id,
        iids,
        deps: BTreeSet::new(),
    };

    let mut instances = Vec::with_capacity(order.len());
    for (id, uuid) in order.iter().zip(&uuids) {
        let inst = view.instance(*id)?;
        let class = registry.class(inst.class());
        let mut fields = BTreeMap::new();
        for (spec, value) in class.fields().iter().zip(inst.fields()) {
            if spec.transient || (spec.optional && value.is_null()) {
                continue;
            }
            if let Some(detail) = view.field_error(spec, value) {
                return Err(BundleError::mismatch(class.name(), &spec.name, detail));
            }
            let location = format!("{} {uuid} field {}", class.name(), spec.name);
            fields.insert(spec.name.clone(), ctx.to_raw(value, &location)?);
        }
        tracing::trace!(object = %id, class = class.name(), uuid = %uuid, "codec.encode.instance");
        instances.push(ObjInst {
            uuid: uuid.clone(),
            class_name: class.name().to_string(),
            fields,
        });
    }

    let roots = roots.iter().map(|root| ctx.iids[root]).collect();
    let deps: Vec<BundleId> = ctx.deps.into_iter().collect();

    let mut fresh = 0usize;
    for (id, uuid) in order.iter().zip(uuids) {
        if rt.addr(*id).map(|addr| &addr.bundle_id) != Some(bundle_id) {
            rt.assign_addr(*id, Addr::new(bundle_id.clone(), uuid));
            fresh += 1;
        }
    }

    tracing::debug!(
        bundle = %bundle_id,
        instances = instances.len(),
        fresh,
        deps = deps.len(),
        "codec.bundle"
    );
    Ok(RawBundle {
        version: registry.version(),
        instances,
        roots,
        deps,
    })
}

impl EncodeCtx<'_> {
    fn to_raw(&mut self, value: &Value, location: &str) -> Result<RawValue> {
        Ok(match value {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(*b),
            Value::Int(i) => RawValue::Int(*i),
            Value::Float(f) => RawValue::Float(*f),
            Value::Str(s) => RawValue::Str(s.clone()),
            Value::List(items) => RawValue::List(
                items
                    .iter()
                    .map(|item| self.to_raw(item, location))
                    .collect::<Result<_>>()?,
            ),
            Value::Map(entries) => RawValue::Map(
                entries
                    .iter()
                    .map(|(key, item)| Ok((key.clone(), self.to_raw(item, location)?)))
                    .collect::<Result<_>>()?,
            ),
            Value::Ref(target) => self.reference(*target, location)?,
        })
    }

    fn reference(&mut self, target: ObjId, location: &str) -> Result<RawValue> {
        if let Some(iid) = self.iids.get(&target) {
            return Ok(RawValue::Ref(LocalRef { iid: *iid }));
        }
        match self.rt.addr(target) {
            Some(addr) if addr.bundle_id != *self.bundle_id => {
                self.deps.insert(addr.bundle_id.clone());
                Ok(RawValue::XRef(CrossRef { addr: addr.clone() }))
            }
            _ => Err(BundleError::dangling(
                self.bundle_id,
                location,
                format!("object {target} is not owned by any bundled instance"),
            )),
        }
    }
}

/// Depth-first preorder over owning edges, stopping at other bundles.
fn ownership_closure(rt: &Runtime, bundle_id: &BundleId, roots: &[ObjId]) -> Result<Vec<ObjId>> {
    let foreign = |id: ObjId| {
        rt.addr(id)
            .is_some_and(|addr| addr.bundle_id != *bundle_id)
    };
    for root in roots {
        rt.instance(*root)
            .map_err(|_| BundleError::InvalidArgument(format!("root {root} does not exist")))?;
        if foreign(*root) {
            return Err(BundleError::InvalidArgument(format!(
                "root {root} is owned by bundle {}",
                rt.addr(*root).map(|a| a.bundle_id.as_str()).unwrap_or_default()
            )));
        }
    }

    let mut seen = FxHashSet::default();
    let mut order = Vec::new();
    let mut stack: Vec<ObjId> = roots.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id);
        let children = rt.owned_children(id)?;
        for child in children.into_iter().rev() {
            if !seen.contains(&child) && !foreign(child) {
                stack.push(child);
            }
        }
    }
    Ok(order)
}

fn assign_uuids(rt: &Runtime, bundle_id: &BundleId, order: &[ObjId]) -> Vec<String> {
    let mut used: FxHashSet<String> = order
        .iter()
        .filter_map(|id| rt.addr(*id))
        .filter(|addr| addr.bundle_id == *bundle_id)
        .map(|addr| addr.uuid.clone())
        .collect();
    let mut rng = rand::thread_rng();
    order
        .iter()
        .map(|id| match rt.addr(*id) {
            Some(addr) if addr.bundle_id == *bundle_id => addr.uuid.clone(),
            _ => loop {
                let candidate: String = (&mut rng)
                    .sample_iter(&Alphanumeric)
                    .take(UUID_LEN)
                    .map(char::from)
                    .collect();
                if !used.contains(&candidate) && !rt.uuid_taken(bundle_id, &candidate) {
                    used.insert(candidate.clone());
                    break candidate;
                }
            },
        })
        .collect()
}
