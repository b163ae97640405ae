use rustc_hash::FxHashMap;

use crate::check::report::{Finding, FindingKind, Findings};
use crate::runtime::{Runtime, Value};
use crate::types::ObjId;

/// A domain rule evaluated against the live graph after unbundling.
pub trait Invariant: Send + Sync {
    /// Short name used in findings.
    fn name(&self) -> &str;

    /// Records a finding for every violation.
    fn check(&self, rt: &Runtime, findings: &mut Findings);
}

/// No two children in an owned list may share the same key field value.
#[derive(Clone, Debug)]
pub struct UniqueKey {
    class: String,
    list_field: String,
    key_field: String,
    name: String,
}

impl UniqueKey {
    /// Requires the children in `class.list_field` to have distinct `key_field`s.
    ///
    /// Applies to subclasses of `class` as well.
    pub fn new(
        class: impl Into<String>,
        list_field: impl Into<String>,
        key_field: impl Into<String>,
    ) -> Self {
        let class = class.into();
        let list_field = list_field.into();
        let key_field = key_field.into();
        let name = format!("unique {key_field} in {class}.{list_field}");
        Self {
            class,
            list_field,
            key_field,
            name,
        }
    }
}

impl Invariant for UniqueKey {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, rt: &Runtime, findings: &mut Findings) {
        let registry = rt.registry();
        for (id, inst) in rt.iter() {
            let class = registry.class(inst.class());
            if !registry.is_subclass_name(class.name(), &self.class) {
                continue;
            }
            let Ok(Value::List(children)) = rt.get(id, &self.list_field) else {
                continue;
            };
            let mut seen: FxHashMap<String, ObjId> = FxHashMap::default();
            for child in children.iter().filter_map(Value::as_obj) {
                let Some(key) = rt.get(child, &self.key_field).ok().and_then(key_of) else {
                    continue;
                };
                if let Some(first) = seen.insert(key.clone(), child) {
                    if first == child {
                        continue;
                    }
                    let mut finding = Finding::error(
                        FindingKind::DomainInvariant,
                        format!(
                            "{}: {first} and {child} share {} {key:?} in {id}",
                            self.name, self.key_field
                        ),
                    )
                    .in_field(&self.list_field);
                    if let Some(addr) = inst.addr() {
                        finding = finding.with_uuid(&addr.uuid);
                    }
                    findings.push(finding);
                }
            }
        }
    }
}

fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Str(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(format!("{other:?}")),
    }
}

/// Checks the live graph: identity cache consistency, value conformance,
/// single ownership, sibling uniqueness, and any domain invariants.
pub fn check_live(rt: &Runtime, invariants: &[&dyn Invariant], findings: &mut Findings) {
    let registry = rt.registry();
    let mut owner_of: FxHashMap<ObjId, (ObjId, String)> = FxHashMap::default();

    for (id, inst) in rt.iter() {
        findings.counts_mut().instances += 1;
        let class = registry.class(inst.class());
        let uuid = inst.addr().map(|addr| addr.uuid.clone());
        let locate = |finding: Finding| match &uuid {
            Some(uuid) => finding.with_uuid(uuid),
            None => finding,
        };

        if let Some(addr) = inst.addr() {
            if rt.resolve(addr) != Some(id) {
                findings.push(locate(Finding::error(
                    FindingKind::DuplicateUuid,
                    format!("{id} claims {addr} but the identity cache maps it elsewhere"),
                )));
            }
        }

        for (spec, value) in class.fields().iter().zip(inst.fields()) {
            let mut dangling = false;
            value.for_each_ref(&mut |target| {
                if rt.instance(target).is_err() {
                    dangling = true;
                }
            });
            if dangling {
                findings.push(locate(
                    Finding::error(
                        FindingKind::DanglingReference,
                        format!("{id} references an object that does not exist"),
                    )
                    .in_field(&spec.name),
                ));
                continue;
            }
            if let Some(detail) = rt.field_error(spec, value) {
                findings.push(locate(
                    Finding::error(FindingKind::SchemaMismatch, format!("{id}: {detail}"))
                        .in_field(&spec.name),
                ));
            }
            if !spec.is_owning() {
                continue;
            }

            let mut sibling_uuids: FxHashMap<&str, ObjId> = FxHashMap::default();
            value.for_each_ref(&mut |child| {
                if let Some((parent, field)) = owner_of.get(&child) {
                    findings.push(locate(
                        Finding::error(
                            FindingKind::SchemaMismatch,
                            format!(
                                "{child} is owned by both {parent}.{field} and {id}.{}",
                                spec.name
                            ),
                        )
                        .in_field(&spec.name),
                    ));
                } else {
                    owner_of.insert(child, (id, spec.name.clone()));
                }
                let Some(child_addr) = rt.addr(child) else {
                    return;
                };
                if let Some(other) = sibling_uuids.insert(child_addr.uuid.as_str(), child) {
                    if other != child {
                        findings.push(locate(
                            Finding::error(
                                FindingKind::DuplicateUuid,
                                format!("siblings {other} and {child} share uuid {}", child_addr.uuid),
                            )
                            .in_field(&spec.name),
                        ));
                    }
                }
                if let Some(addr) = inst.addr() {
                    if addr.bundle_id != child_addr.bundle_id {
                        findings.push(locate(
                            Finding::warning(
                                FindingKind::Ownership,
                                format!(
                                    "{id} in bundle {} owns {child} from bundle {}",
                                    addr.bundle_id, child_addr.bundle_id
                                ),
                            )
                            .in_field(&spec.name),
                        ));
                    }
                }
            });
        }
    }

    for invariant in invariants {
        tracing::trace!(invariant = invariant.name(), "check.invariant");
        invariant.check(rt, findings);
    }
}
