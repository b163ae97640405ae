#![forbid(unsafe_code)]

//! Untyped bundle representation.
//!
//! This is the shape bundles have on disk and the only shape migrations ever
//! see. Values are a closed tagged union so that code rewriting old data can
//! match on them exhaustively without consulting live class definitions.
//!
//! In JSON a local reference is written `{"__ref": <iid>}` and a cross-bundle
//! reference `{"__xref": {"bundleId": .., "uuid": ..}}`. Every other value is
//! plain JSON.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{de, Deserialize, Deserializer, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::error::{BundleError, Result};
use crate::types::{Addr, BundleId, Iid};

const DIGEST_SEED: u64 = 0x5354_5241_5441_0001;

/// Reference to an instance of the same bundle, by table index.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalRef {
    /// Index into the bundle's instance table.
    #[serde(rename = "__ref")]
    pub iid: Iid,
}

/// Reference to an instance owned by another bundle.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossRef {
    /// Address of the target.
    #[serde(rename = "__xref")]
    pub addr: Addr,
}

/// Serialized field value.
///
/// A `{"__ref": n}` whose index does not fit an [`Iid`] still parses as a
/// local reference, to [`LocalRef::UNRESOLVABLE`], so decoding and checking
/// report it as dangling. A lone `__xref` key with a malformed address is a
/// parse error.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
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
    /// Reference into the same bundle.
    Ref(LocalRef),
    /// Reference into a dependency bundle.
    XRef(CrossRef),
    /// Ordered collection.
    List(Vec<RawValue>),
    /// String-keyed collection.
    Map(BTreeMap<String, RawValue>),
}

impl LocalRef {
    /// Index standing in for a reference that can never resolve.
    pub const UNRESOLVABLE: Iid = Iid(u32::MAX);
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValueRepr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ref(LocalRef),
    XRef(CrossRef),
    List(Vec<RawValue>),
    Map(BTreeMap<String, RawValue>),
}

impl<'de> Deserialize<'de> for RawValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawValueRepr::deserialize(deserializer)? {
            RawValueRepr::Null => RawValue::Null,
            RawValueRepr::Bool(b) => RawValue::Bool(b),
            RawValueRepr::Int(i) => RawValue::Int(i),
            RawValueRepr::Float(f) => RawValue::Float(f),
            RawValueRepr::Str(s) => RawValue::Str(s),
            RawValueRepr::Ref(local) => RawValue::Ref(local),
            RawValueRepr::XRef(cross) => RawValue::XRef(cross),
            RawValueRepr::List(items) => RawValue::List(items),
            RawValueRepr::Map(entries) => malformed_ref(entries)?,
        })
    }
}

/// Maps that look like a reference but did not parse as one.
fn malformed_ref<E: de::Error>(
    entries: BTreeMap<String, RawValue>,
) -> std::result::Result<RawValue, E> {
    if entries.len() != 1 {
        return Ok(RawValue::Map(entries));
    }
    match entries.iter().next() {
        Some((key, RawValue::Int(_))) if key == "__ref" => Ok(RawValue::Ref(LocalRef {
            iid: LocalRef::UNRESOLVABLE,
        })),
        Some((key, RawValue::Float(f))) if key == "__ref" && f.fract() == 0.0 => {
            Ok(RawValue::Ref(LocalRef {
                iid: LocalRef::UNRESOLVABLE,
            }))
        }
        Some((key, value)) if key == "__ref" || key == "__xref" => Err(E::custom(format!(
            "malformed {key} reference: {}",
            value.kind_name()
        ))),
        _ => Ok(RawValue::Map(entries)),
    }
}

/// A reference found while walking raw values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RawRef<'a> {
    /// Same-bundle reference.
    Local(Iid),
    /// Cross-bundle reference.
    Cross(&'a Addr),
}

impl RawValue {
    /// Builds a local reference.
    pub fn local(iid: u32) -> Self {
        RawValue::Ref(LocalRef { iid: Iid(iid) })
    }

    /// Builds a cross-bundle reference.
    pub fn xref(bundle_id: impl Into<BundleId>, uuid: impl Into<String>) -> Self {
        RawValue::XRef(CrossRef {
            addr: Addr::new(bundle_id.into(), uuid),
        })
    }

    /// Returns true for null, booleans, numbers and strings.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            RawValue::Null
                | RawValue::Bool(_)
                | RawValue::Int(_)
                | RawValue::Float(_)
                | RawValue::Str(_)
        )
    }

    /// Returns true for either kind of reference.
    pub fn is_ref(&self) -> bool {
        matches!(self, RawValue::Ref(_) | RawValue::XRef(_))
    }

    /// Short description used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            RawValue::Null => "null",
            RawValue::Bool(_) => "bool",
            RawValue::Int(_) => "int",
            RawValue::Float(_) => "float",
            RawValue::Str(_) => "string",
            RawValue::Ref(_) => "ref",
            RawValue::XRef(_) => "xref",
            RawValue::List(_) => "list",
            RawValue::Map(_) => "map",
        }
    }

    /// Calls `visit` for every reference nested in this value.
    pub fn visit_refs<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(RawRef<'a>),
    {
        match self {
            RawValue::Ref(local) => visit(RawRef::Local(local.iid)),
            RawValue::XRef(cross) => visit(RawRef::Cross(&cross.addr)),
            RawValue::List(items) => items.iter().for_each(|item| item.visit_refs(visit)),
            RawValue::Map(entries) => entries.values().for_each(|item| item.visit_refs(visit)),
            _ => {}
        }
    }

    /// Rewrites every local reference nested in this value.
    pub fn remap_local<F>(&mut self, remap: &mut F)
    where
        F: FnMut(Iid) -> Iid,
    {
        match self {
            RawValue::Ref(local) => local.iid = remap(local.iid),
            RawValue::List(items) => items.iter_mut().for_each(|item| item.remap_local(remap)),
            RawValue::Map(entries) => entries
                .values_mut()
                .for_each(|item| item.remap_local(remap)),
            _ => {}
        }
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Str(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Str(value)
    }
}

/// One serialized instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjInst {
    /// Identifier, unique within the bundle.
    pub uuid: String,
    /// Name of the instance's model class.
    pub class_name: String,
    /// Field values keyed by field name.
    #[serde(default)]
    pub fields: BTreeMap<String, RawValue>,
}

impl ObjInst {
    /// Creates an instance with no fields.
    pub fn new(uuid: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            class_name: class_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: RawValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// Versioned, flat container of serialized instances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawBundle {
    /// Schema version the bundle was written with.
    pub version: u32,
    /// Instance table; a local reference is an index into it.
    pub instances: Vec<ObjInst>,
    /// Entry points of the bundle.
    #[serde(default)]
    pub roots: Vec<Iid>,
    /// Bundles this one holds cross references into.
    #[serde(default)]
    pub deps: Vec<BundleId>,
}

impl RawBundle {
    /// Creates an empty bundle stamped with `version`.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            instances: Vec::new(),
            roots: Vec::new(),
            deps: Vec::new(),
        }
    }

    /// Returns the instance at `iid`, if it exists.
    pub fn instance(&self, iid: Iid) -> Option<&ObjInst> {
        self.instances.get(iid.index())
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true when the bundle holds no instances.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Calls `visit(holder, field, reference)` for every reference in the bundle.
    pub fn visit_refs<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(Iid, &'a str, RawRef<'a>),
    {
        for (idx, inst) in self.instances.iter().enumerate() {
            let holder = Iid(idx as u32);
            for (field, value) in &inst.fields {
                value.visit_refs(&mut |reference| visit(holder, field.as_str(), reference));
            }
        }
    }

    /// Bundle ids named by cross references, sorted.
    pub fn referenced_bundles(&self) -> BTreeSet<BundleId> {
        let mut bundles = BTreeSet::new();
        self.visit_refs(|_, _, reference| {
            if let RawRef::Cross(addr) = reference {
                bundles.insert(addr.bundle_id.clone());
            }
        });
        bundles
    }

    /// Replaces `deps` with the bundles actually referenced.
    pub fn recompute_deps(&mut self) {
        self.deps = self.referenced_bundles().into_iter().collect();
    }

    /// Iids reachable from the roots through local references of any strength.
    pub fn reachable(&self) -> BTreeSet<Iid> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<Iid> = VecDeque::new();
        for root in &self.roots {
            if root.index() < self.instances.len() && seen.insert(*root) {
                queue.push_back(*root);
            }
        }
        while let Some(iid) = queue.pop_front() {
            let inst = &self.instances[iid.index()];
            for value in inst.fields.values() {
                value.visit_refs(&mut |reference| {
                    if let RawRef::Local(target) = reference {
                        if target.index() < self.instances.len() && seen.insert(target) {
                            queue.push_back(target);
                        }
                    }
                });
            }
        }
        seen
    }

    /// Drops instances unreachable from the roots and renumbers the rest.
    ///
    /// Returns the number of instances removed.
    ///
    /// # Errors
    ///
    /// Fails without modifying the bundle if a root or a local reference
    /// points past the instance table, since renumbering would silently
    /// retarget it.
    pub fn prune_unreachable(&mut self) -> Result<usize> {
        let len = self.instances.len();
        if let Some(root) = self.roots.iter().find(|root| root.index() >= len) {
            return Err(BundleError::InvalidArgument(format!(
                "root iid {root} is outside the instance table ({len} instances)"
            )));
        }
        let mut dangling = None;
        self.visit_refs(|holder, field, reference| {
            if let RawRef::Local(target) = reference {
                if target.index() >= len && dangling.is_none() {
                    dangling = Some((holder, field.to_string(), target));
                }
            }
        });
        if let Some((holder, field, target)) = dangling {
            return Err(BundleError::InvalidArgument(format!(
                "instance {holder} field {field} references missing iid {target}"
            )));
        }

        let reachable = self.reachable();
        let removed = len - reachable.len();
        if removed == 0 {
            return Ok(0);
        }
        let mut remap = vec![None; len];
        let mut kept = Vec::with_capacity(reachable.len());
        for (idx, inst) in std::mem::take(&mut self.instances).into_iter().enumerate() {
            if reachable.contains(&Iid(idx as u32)) {
                remap[idx] = Some(Iid(kept.len() as u32));
                kept.push(inst);
            }
        }
        let mut apply = |iid: Iid| remap[iid.index()].unwrap_or(iid);
        for inst in &mut kept {
            for value in inst.fields.values_mut() {
                value.remap_local(&mut apply);
            }
        }
        for root in &mut self.roots {
            *root = apply(*root);
        }
        self.instances = kept;
        tracing::debug!(removed, remaining = self.instances.len(), "raw.prune");
        Ok(removed)
    }

    /// Serializes to compact JSON.
    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Serializes to indented JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a bundle from JSON bytes.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Content hash of the compact JSON encoding.
    ///
    /// Equal digests mean byte-identical serialized bundles.
    pub fn digest(&self) -> Result<u64> {
        Ok(xxh64(&self.to_json_vec()?, DIGEST_SEED))
    }
}
