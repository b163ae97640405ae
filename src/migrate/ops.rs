//! Field-level rewrites for use inside migration transforms.
//!
//! Every helper matches instances by exact class name and returns how many
//! instances it touched.

use crate::error::Result;
use crate::raw::{ObjInst, RawBundle, RawValue};

fn instances_of<'a>(
    raw: &'a mut RawBundle,
    class: &'a str,
) -> impl Iterator<Item = &'a mut ObjInst> + 'a {
    raw.instances
        .iter_mut()
        .filter(move |inst| inst.class_name == class)
}

/// Renames every instance of class `from` to `to`.
pub fn rename_class(raw: &mut RawBundle, from: &str, to: &str) -> usize {
    let mut touched = 0;
    for inst in instances_of(raw, from) {
        inst.class_name = to.to_string();
        touched += 1;
    }
    touched
}

/// Renames a field on every instance of `class` that has it.
pub fn rename_field(raw: &mut RawBundle, class: &str, from: &str, to: &str) -> usize {
    let mut touched = 0;
    for inst in instances_of(raw, class) {
        if let Some(value) = inst.fields.remove(from) {
            inst.fields.insert(to.to_string(), value);
            touched += 1;
        }
    }
    touched
}

/// Adds `field` with `default` to every instance of `class` lacking it.
pub fn add_field(raw: &mut RawBundle, class: &str, field: &str, default: RawValue) -> usize {
    let mut touched = 0;
    for inst in instances_of(raw, class) {
        if !inst.fields.contains_key(field) {
            inst.fields.insert(field.to_string(), default.clone());
            touched += 1;
        }
    }
    touched
}

/// Drops `field` from every instance of `class`.
pub fn remove_field(raw: &mut RawBundle, class: &str, field: &str) -> usize {
    instances_of(raw, class)
        .filter_map(|inst| inst.fields.remove(field))
        .count()
}

/// Rewrites `field` on every instance of `class` that has it.
pub fn map_field<F>(raw: &mut RawBundle, class: &str, field: &str, mut rewrite: F) -> Result<usize>
where
    F: FnMut(RawValue) -> Result<RawValue>,
{
    let mut touched = 0;
    for inst in instances_of(raw, class) {
        // The field stays untouched if `rewrite` fails.
        if let Some(slot) = inst.fields.get_mut(field) {
            *slot = rewrite(slot.clone())?;
            touched += 1;
        }
    }
    Ok(touched)
}
