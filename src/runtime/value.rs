use std::collections::BTreeMap;

use crate::schema::{ElemKind, FieldKind, FieldSpec};
use crate::types::ObjId;

/// Field value of a live instance.
///
/// References are arena handles, so two fields pointing at the same object
/// hold equal [`ObjId`]s and see each other's mutations.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Float(f64),
    /// String scalar.
    Str(String),
    /// Ordered collection.
    List(Vec<Value>),
    /// String-keyed collection.
    Map(BTreeMap<String, Value>),
    /// Reference to another live instance.
    Ref(ObjId),
}

impl Value {
    /// Default value of a freshly allocated field.
    pub fn default_for(spec: &FieldSpec) -> Self {
        match spec.kind {
            FieldKind::List => Value::List(Vec::new()),
            FieldKind::Map => Value::Map(BTreeMap::new()),
            _ => Value::Null,
        }
    }

    /// Returns the referenced handle, if this is a reference.
    pub fn as_obj(&self) -> Option<ObjId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Short description used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Ref(_) => "ref",
        }
    }

    /// Calls `visit` for every handle nested in this value, in field order.
    pub fn for_each_ref<F: FnMut(ObjId)>(&self, visit: &mut F) {
        match self {
            Value::Ref(id) => visit(*id),
            Value::List(items) => items.iter().for_each(|item| item.for_each_ref(visit)),
            Value::Map(entries) => entries.values().for_each(|item| item.for_each_ref(visit)),
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<ObjId> for Value {
    fn from(value: ObjId) -> Self {
        Value::Ref(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

/// Describes why `value` cannot be stored in a field shaped like `spec`.
///
/// `target_ok` decides whether a referenced handle is an acceptable target
/// for the field; it is only consulted for reference positions.
pub(crate) fn shape_error<F>(spec: &FieldSpec, value: &Value, target_ok: &F) -> Option<String>
where
    F: Fn(ObjId) -> Option<String>,
{
    if value.is_null() {
        return None;
    }
    match spec.kind {
        FieldKind::Scalar => scalar_error(value),
        FieldKind::OwnedRef | FieldKind::WeakRef => ref_error(value, target_ok),
        FieldKind::List => match value {
            Value::List(items) => items
                .iter()
                .enumerate()
                .find_map(|(idx, item)| {
                    elem_error(spec.elem, item, target_ok).map(|err| format!("element {idx}: {err}"))
                }),
            other => Some(format!("expected list, found {}", other.kind_name())),
        },
        FieldKind::Map => match value {
            Value::Map(entries) => entries.iter().find_map(|(key, item)| {
                elem_error(spec.elem, item, target_ok).map(|err| format!("entry {key:?}: {err}"))
            }),
            other => Some(format!("expected map, found {}", other.kind_name())),
        },
    }
}

fn scalar_error(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Str(_) => None,
        Value::Float(f) if f.is_finite() => None,
        Value::Float(f) => Some(format!("non-finite float {f}")),
        other => Some(format!("expected scalar, found {}", other.kind_name())),
    }
}

fn ref_error<F>(value: &Value, target_ok: &F) -> Option<String>
where
    F: Fn(ObjId) -> Option<String>,
{
    match value {
        Value::Ref(id) => target_ok(*id),
        other => Some(format!("expected reference, found {}", other.kind_name())),
    }
}

fn elem_error<F>(elem: ElemKind, value: &Value, target_ok: &F) -> Option<String>
where
    F: Fn(ObjId) -> Option<String>,
{
    match elem {
        ElemKind::Scalar => scalar_error(value),
        ElemKind::Owned | ElemKind::Weak => ref_error(value, target_ok),
    }
}
