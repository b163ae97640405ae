use rustc_hash::FxHashMap;

use crate::error::{BundleError, Result};
use crate::raw::{RawBundle, RawValue};
use crate::runtime::{Runtime, Value};
use crate::schema::ClassId;
use crate::types::{Addr, BundleId, ObjId};

/// Where an instance of the bundle will live once committed.
struct Slot {
    id: ObjId,
    class: ClassId,
    fresh: bool,
}

struct DecodeCtx<'a> {
    rt: &'a Runtime,
    bundle_id: &'a BundleId,
    slots: &'a [Slot],
    local_uuids: &'a FxHashMap<&'a str, usize>,
}

pub(crate) fn decode(rt: &mut Runtime, bundle_id: &BundleId, raw: &RawBundle) -> Result<Vec<ObjId>> {
    let registry = rt.shared_registry();
    if raw.version != registry.version() {
        return Err(BundleError::VersionMismatch {
            bundle: bundle_id.clone(),
            found: raw.version,
            expected: registry.version(),
        });
    }

    // Allocation pass: decide which arena slot every instance maps to.
    let base = rt.len();
    let mut slots = Vec::with_capacity(raw.instances.len());
    let mut local_uuids: FxHashMap<&str, usize> = FxHashMap::default();
    let mut fresh = 0usize;
    for (idx, inst) in raw.instances.iter().enumerate() {
        let class = registry.lookup(&inst.class_name)?;
        if local_uuids.insert(inst.uuid.as_str(), idx).is_some() {
            return Err(BundleError::InvalidArgument(format!(
                "bundle {bundle_id} contains uuid {} more than once",
                inst.uuid
            )));
        }
        let addr = Addr::new(bundle_id.clone(), inst.uuid.as_str());
        match rt.resolve(&addr) {
            Some(existing) => {
                let live = rt.class_of(existing)?;
                if live.id() != class.id() {
                    return Err(BundleError::mismatch(
                        &inst.class_name,
                        "className",
                        format!("{addr} is already live as {}", live.name()),
                    ));
                }
                slots.push(Slot {
                    id: existing,
                    class: class.id(),
                    fresh: false,
                });
            }
            None => {
                slots.push(Slot {
                    id: ObjId((base + fresh) as u32),
                    class: class.id(),
                    fresh: true,
                });
                fresh += 1;
            }
        }
    }

    // Population pass: build every field value before touching the arena.
    let ctx = DecodeCtx {
        rt: &*rt,
        bundle_id,
        slots: &slots,
        local_uuids: &local_uuids,
    };
    let mut staged = Vec::with_capacity(raw.instances.len());
    for (idx, (inst, slot)) in raw.instances.iter().zip(&slots).enumerate() {
        let class = registry.class(slot.class);
        let mut fields = Vec::with_capacity(class.fields().len());
        for (pos, spec) in class.fields().iter().enumerate() {
            let value = if spec.transient {
                if slot.fresh {
                    Value::default_for(spec)
                } else {
                    ctx.rt.instance(slot.id)?.fields()[pos].clone()
                }
            } else {
                match inst.fields.get(&spec.name) {
                    Some(raw_value) => {
                        let location =
                            format!("instance {idx} ({}) field {}", inst.uuid, spec.name);
                        ctx.to_live(raw_value, &location)?
                    }
                    None => Value::default_for(spec),
                }
            };
            fields.push(value);
        }
        for name in inst.fields.keys() {
            if class.field(name).is_none() {
                tracing::trace!(class = class.name(), field = %name, "codec.decode.unknown_field");
            }
        }
        staged.push(fields);
    }

    let mut roots = Vec::with_capacity(raw.roots.len());
    for root in &raw.roots {
        let slot = slots.get(root.index()).ok_or_else(|| {
            BundleError::dangling(
                bundle_id,
                "roots",
                format!(
                    "root iid {root} is outside the instance table ({} instances)",
                    slots.len()
                ),
            )
        })?;
        roots.push(slot.id);
    }

    // Commit.
    for (inst, slot) in raw.instances.iter().zip(&slots) {
        if slot.fresh {
            let id = rt.alloc(slot.class, Some(Addr::new(bundle_id.clone(), inst.uuid.as_str())));
            debug_assert_eq!(id, slot.id);
        }
    }
    let reused = slots.len() - fresh;
    for (slot, fields) in slots.iter().zip(staged) {
        rt.replace_fields(slot.id, fields);
    }
    rt.mark_loaded(bundle_id, roots.clone());

    tracing::debug!(
        bundle = %bundle_id,
        instances = slots.len(),
        reused,
        roots = roots.len(),
        "codec.unbundle"
    );
    Ok(roots)
}

impl DecodeCtx<'_> {
    fn to_live(&self, value: &RawValue, location: &str) -> Result<Value> {
        Ok(match value {
            RawValue::Null => Value::Null,
            RawValue::Bool(b) => Value::Bool(*b),
            RawValue::Int(i) => Value::Int(*i),
            RawValue::Float(f) => Value::Float(*f),
            RawValue::Str(s) => Value::Str(s.clone()),
            RawValue::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.to_live(item, location))
                    .collect::<Result<_>>()?,
            ),
            RawValue::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(key, item)| Ok((key.clone(), self.to_live(item, location)?)))
                    .collect::<Result<_>>()?,
            ),
            RawValue::Ref(local) => {
                let slot = self.slots.get(local.iid.index()).ok_or_else(|| {
                    BundleError::dangling(
                        self.bundle_id,
                        location,
                        format!(
                            "iid {} is outside the instance table ({} instances)",
                            local.iid,
                            self.slots.len()
                        ),
                    )
                })?;
                Value::Ref(slot.id)
            }
            RawValue::XRef(cross) => Value::Ref(self.resolve_cross(&cross.addr, location)?),
        })
    }

    fn resolve_cross(&self, addr: &Addr, location: &str) -> Result<ObjId> {
        if addr.bundle_id == *self.bundle_id {
            return self
                .local_uuids
                .get(addr.uuid.as_str())
                .map(|idx| self.slots[*idx].id)
                .ok_or_else(|| {
                    BundleError::dangling(
                        self.bundle_id,
                        location,
                        format!("no instance with uuid {}", addr.uuid),
                    )
                });
        }
        if let Some(id) = self.rt.resolve(addr) {
            return Ok(id);
        }
        let detail = if self.rt.is_loaded(&addr.bundle_id) {
            format!("dependency {} has no instance {}", addr.bundle_id, addr.uuid)
        } else {
            format!("dependency {} is not loaded", addr.bundle_id)
        };
        Err(BundleError::dangling(self.bundle_id, location, detail))
    }
}
