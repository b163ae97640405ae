use crate::check::report::{Finding, FindingKind, Findings};
use crate::raw::{RawBundle, RawValue};
use crate::schema::{ElemKind, FieldKind, FieldSpec, SchemaRegistry};
use crate::types::Iid;

/// Checks every raw instance against its class: unknown classes, stray or
/// transient fields, missing required fields and value shapes.
pub fn check_bundle_fields(registry: &SchemaRegistry, raw: &RawBundle, findings: &mut Findings) {
    for (idx, inst) in raw.instances.iter().enumerate() {
        let iid = Iid(idx as u32);
        let class = match registry.lookup(&inst.class_name) {
            Ok(class) => class,
            Err(_) => {
                findings.push(
                    Finding::error(
                        FindingKind::UnregisteredClass,
                        format!("class {} is not registered", inst.class_name),
                    )
                    .at(iid, &inst.uuid),
                );
                continue;
            }
        };

        for (name, value) in &inst.fields {
            let Some(spec) = class.field(name) else {
                findings.push(
                    Finding::error(
                        FindingKind::SchemaMismatch,
                        format!("{} has no field {name}", class.name()),
                    )
                    .at(iid, &inst.uuid)
                    .in_field(name),
                );
                continue;
            };
            if spec.transient {
                findings.push(
                    Finding::warning(FindingKind::SchemaMismatch, "transient field was serialized")
                        .at(iid, &inst.uuid)
                        .in_field(name),
                );
                continue;
            }
            if let Some(detail) = raw_shape_error(registry, raw, spec, value) {
                findings.push(
                    Finding::error(FindingKind::SchemaMismatch, detail)
                        .at(iid, &inst.uuid)
                        .in_field(name),
                );
            }
        }

        for spec in class.fields() {
            if !spec.optional && !spec.transient && !inst.fields.contains_key(&spec.name) {
                findings.push(
                    Finding::error(FindingKind::SchemaMismatch, "required field is missing")
                        .at(iid, &inst.uuid)
                        .in_field(&spec.name),
                );
            }
        }
    }
}

fn raw_shape_error(
    registry: &SchemaRegistry,
    raw: &RawBundle,
    spec: &FieldSpec,
    value: &RawValue,
) -> Option<String> {
    if matches!(value, RawValue::Null) {
        return None;
    }
    match spec.kind {
        FieldKind::Scalar => scalar_error(value),
        FieldKind::OwnedRef | FieldKind::WeakRef => ref_error(registry, raw, spec, value),
        FieldKind::List => match value {
            RawValue::List(items) => items.iter().enumerate().find_map(|(idx, item)| {
                elem_error(registry, raw, spec, item).map(|err| format!("element {idx}: {err}"))
            }),
            other => Some(format!("expected list, found {}", other.kind_name())),
        },
        FieldKind::Map => match value {
            RawValue::Map(entries) => entries.iter().find_map(|(key, item)| {
                elem_error(registry, raw, spec, item).map(|err| format!("entry {key:?}: {err}"))
            }),
            other => Some(format!("expected map, found {}", other.kind_name())),
        },
    }
}

fn elem_error(
    registry: &SchemaRegistry,
    raw: &RawBundle,
    spec: &FieldSpec,
    value: &RawValue,
) -> Option<String> {
    match spec.elem {
        ElemKind::Scalar => scalar_error(value),
        ElemKind::Owned | ElemKind::Weak => ref_error(registry, raw, spec, value),
    }
}

fn scalar_error(value: &RawValue) -> Option<String> {
    if value.is_scalar() {
        None
    } else {
        Some(format!("expected scalar, found {}", value.kind_name()))
    }
}

fn ref_error(
    registry: &SchemaRegistry,
    raw: &RawBundle,
    spec: &FieldSpec,
    value: &RawValue,
) -> Option<String> {
    match value {
        RawValue::Ref(local) => {
            // Out-of-range iids are reported by the reference check.
            let target = raw.instance(local.iid)?;
            let expected = spec.target_class.as_deref()?;
            if registry.lookup(&target.class_name).is_ok()
                && !registry.is_subclass_name(&target.class_name, expected)
            {
                Some(format!(
                    "iid {} is a {}, expected {expected}",
                    local.iid, target.class_name
                ))
            } else {
                None
            }
        }
        RawValue::XRef(_) => None,
        other => Some(format!("expected reference, found {}", other.kind_name())),
    }
}
