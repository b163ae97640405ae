#![forbid(unsafe_code)]

//! Live object graph.
//!
//! A [`Runtime`] is an arena of instances plus the identity cache mapping
//! `(bundle, uuid)` addresses to arena handles. It is created per workspace,
//! grows as bundles are unbundled into it and releases everything when it is
//! dropped. Links between instances are [`ObjId`] handles, never pointers, so
//! cyclic graphs need no special treatment.
//!
//! Mutations performed inside [`Runtime::transaction`] are journaled and
//! undone if the closure fails, which is how a failed dependency load avoids
//! leaving half-populated instances behind.

mod value;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::codec;
use crate::error::{BundleError, Result};
use crate::raw::RawBundle;
use crate::schema::{ClassId, FieldSpec, ModelClass, SchemaRegistry};
use crate::types::{Addr, BundleId, ObjId};

pub use value::Value;
use value::shape_error;

/// One live instance.
#[derive(Clone, Debug)]
pub struct Instance {
    class: ClassId,
    addr: Option<Addr>,
    fields: Vec<Value>,
}

impl Instance {
    /// Class of the instance.
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Owning bundle and uuid, once the instance has been bundled or unbundled.
    pub fn addr(&self) -> Option<&Addr> {
        self.addr.as_ref()
    }

    /// Field values in schema order.
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }
}

#[derive(Debug)]
enum Undo {
    Field { id: ObjId, pos: usize, old: Value },
    Fields { id: ObjId, old: Vec<Value> },
    Addr { id: ObjId, old: Option<Addr> },
    Loaded { bundle: BundleId, old: Option<Vec<ObjId>> },
}

/// Arena of live instances with an identity cache.
#[derive(Debug)]
pub struct Runtime {
    registry: Arc<SchemaRegistry>,
    objects: Vec<Instance>,
    by_addr: FxHashMap<Addr, ObjId>,
    loaded: FxHashMap<BundleId, Vec<ObjId>>,
    journal: Option<Vec<Undo>>,
}

impl Runtime {
    /// Creates an empty runtime bound to a frozen schema.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            objects: Vec::new(),
            by_addr: FxHashMap::default(),
            loaded: FxHashMap::default(),
            journal: None,
        }
    }

    /// Schema this runtime was created with.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub(crate) fn shared_registry(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.registry)
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterates every live instance in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjId, &Instance)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(idx, inst)| (ObjId(idx as u32), inst))
    }

    /// Allocates a new instance of `class` with default field values.
    ///
    /// The instance has no address until it is bundled.
    pub fn create(&mut self, class: &str) -> Result<ObjId> {
        let class = self.registry.lookup(class)?.id();
        Ok(self.alloc(class, None))
    }

    /// Returns the instance behind a handle.
    pub fn instance(&self, id: ObjId) -> Result<&Instance> {
        self.objects
            .get(id.index())
            .ok_or_else(|| BundleError::NotFound(format!("object {id}")))
    }

    /// Returns the class of an instance.
    pub fn class_of(&self, id: ObjId) -> Result<&ModelClass> {
        let class = self.instance(id)?.class;
        Ok(self.registry.class(class))
    }

    /// Returns the address of an instance, if it has one.
    pub fn addr(&self, id: ObjId) -> Option<&Addr> {
        self.objects.get(id.index()).and_then(|inst| inst.addr.as_ref())
    }

    /// Looks an address up in the identity cache.
    pub fn resolve(&self, addr: &Addr) -> Option<ObjId> {
        self.by_addr.get(addr).copied()
    }

    /// Reads a field.
    pub fn get(&self, id: ObjId, field: &str) -> Result<&Value> {
        let inst = self.instance(id)?;
        let class = self.registry.class(inst.class);
        let pos = class
            .field_position(field)
            .ok_or_else(|| unknown_field(class, field))?;
        Ok(&inst.fields[pos])
    }

    /// Reads a reference field, returning `None` when it is null.
    pub fn get_ref(&self, id: ObjId, field: &str) -> Result<Option<ObjId>> {
        Ok(self.get(id, field)?.as_obj())
    }

    /// Writes a field after checking the value against the schema.
    pub fn set(&mut self, id: ObjId, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let class = self.class_of(id)?;
        let pos = class
            .field_position(field)
            .ok_or_else(|| unknown_field(class, field))?;
        if let Some(detail) = self.field_error(&class.fields()[pos], &value) {
            return Err(BundleError::mismatch(class.name(), field, detail));
        }
        let old = std::mem::replace(&mut self.objects[id.index()].fields[pos], value);
        self.record(|| Undo::Field { id, pos, old });
        Ok(())
    }

    /// Appends to a list field.
    pub fn push(&mut self, id: ObjId, field: &str, item: impl Into<Value>) -> Result<()> {
        let mut items = match self.get(id, field)? {
            Value::List(items) => items.clone(),
            other => {
                let class = self.class_of(id)?;
                return Err(BundleError::mismatch(
                    class.name(),
                    field,
                    format!("cannot push onto {}", other.kind_name()),
                ));
            }
        };
        items.push(item.into());
        self.set(id, field, Value::List(items))
    }

    /// Targets of the owning fields of `id`, in field order.
    pub fn owned_children(&self, id: ObjId) -> Result<Vec<ObjId>> {
        let inst = self.instance(id)?;
        let class = self.registry.class(inst.class);
        let mut children = Vec::new();
        for (spec, value) in class.fields().iter().zip(&inst.fields) {
            if spec.is_owning() {
                value.for_each_ref(&mut |child| children.push(child));
            }
        }
        Ok(children)
    }

    /// Returns true if `bundle_id` has been unbundled into this runtime.
    pub fn is_loaded(&self, bundle_id: &BundleId) -> bool {
        self.loaded.contains_key(bundle_id)
    }

    /// Roots produced by the last unbundle of `bundle_id`.
    pub fn roots(&self, bundle_id: &BundleId) -> Option<&[ObjId]> {
        self.loaded.get(bundle_id).map(Vec::as_slice)
    }

    /// Iterates the ids of every loaded bundle, in no particular order.
    pub fn loaded_bundles(&self) -> impl Iterator<Item = &BundleId> {
        self.loaded.keys()
    }

    /// Serializes the ownership closure of `roots` as bundle `bundle_id`.
    ///
    /// Instances reached for the first time are assigned addresses in
    /// `bundle_id`; instances owned by other bundles become cross references.
    /// Nothing is modified if encoding fails.
    pub fn bundle(&mut self, bundle_id: &BundleId, roots: &[ObjId]) -> Result<RawBundle> {
        codec::encode(self, bundle_id, roots)
    }

    /// Materializes a migrated raw bundle, returning its roots.
    ///
    /// Cross references must point into bundles already unbundled into this
    /// runtime. On error the runtime is left untouched.
    pub fn unbundle(&mut self, bundle_id: &BundleId, raw: &RawBundle) -> Result<Vec<ObjId>> {
        codec::decode(self, bundle_id, raw)
    }

    /// Runs `f` and undoes every change it made to the runtime if it fails.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let outer = self.journal.replace(Vec::new());
        let len = self.objects.len();
        let result = f(self);
        let journal = self.journal.take().unwrap_or_default();
        match result {
            Ok(value) => {
                self.journal = outer.map(|mut entries| {
                    entries.extend(journal);
                    entries
                });
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(undo = journal.len(), keep = len, error = %err, "runtime.rollback");
                self.rollback(len, journal);
                self.journal = outer;
                Err(err)
            }
        }
    }

    fn rollback(&mut self, len: usize, journal: Vec<Undo>) {
        for entry in journal.into_iter().rev() {
            match entry {
                Undo::Field { id, pos, old } => self.objects[id.index()].fields[pos] = old,
                Undo::Fields { id, old } => self.objects[id.index()].fields = old,
                Undo::Addr { id, old } => {
                    if let Some(addr) = self.objects[id.index()].addr.take() {
                        self.by_addr.remove(&addr);
                    }
                    if let Some(addr) = &old {
                        self.by_addr.insert(addr.clone(), id);
                    }
                    self.objects[id.index()].addr = old;
                }
                Undo::Loaded { bundle, old } => match old {
                    Some(roots) => {
                        self.loaded.insert(bundle, roots);
                    }
                    None => {
                        self.loaded.remove(&bundle);
                    }
                },
            }
        }
        for inst in self.objects.drain(len..) {
            if let Some(addr) = inst.addr {
                self.by_addr.remove(&addr);
            }
        }
    }

    fn record(&mut self, undo: impl FnOnce() -> Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(undo());
        }
    }

    pub(crate) fn alloc(&mut self, class: ClassId, addr: Option<Addr>) -> ObjId {
        let id = ObjId(self.objects.len() as u32);
        let fields = self
            .registry
            .class(class)
            .fields()
            .iter()
            .map(Value::default_for)
            .collect();
        if let Some(addr) = &addr {
            self.by_addr.insert(addr.clone(), id);
        }
        self.objects.push(Instance {
            class,
            addr,
            fields,
        });
        id
    }

    pub(crate) fn replace_fields(&mut self, id: ObjId, fields: Vec<Value>) {
        let old = std::mem::replace(&mut self.objects[id.index()].fields, fields);
        self.record(|| Undo::Fields { id, old });
    }

    pub(crate) fn assign_addr(&mut self, id: ObjId, addr: Addr) {
        let old = self.objects[id.index()].addr.replace(addr.clone());
        if let Some(previous) = &old {
            self.by_addr.remove(previous);
        }
        self.by_addr.insert(addr, id);
        self.record(|| Undo::Addr { id, old });
    }

    pub(crate) fn mark_loaded(&mut self, bundle_id: &BundleId, roots: Vec<ObjId>) {
        let old = self.loaded.insert(bundle_id.clone(), roots);
        self.record(|| Undo::Loaded {
            bundle: bundle_id.clone(),
            old,
        });
    }

    pub(crate) fn uuid_taken(&self, bundle_id: &BundleId, uuid: &str) -> bool {
        self.by_addr
            .contains_key(&Addr::new(bundle_id.clone(), uuid))
    }

    pub(crate) fn field_error(&self, spec: &FieldSpec, value: &Value) -> Option<String> {
        let target = spec
            .target_class
            .as_deref()
            .and_then(|name| self.registry.lookup(name).ok())
            .map(ModelClass::id);
        shape_error(spec, value, &|id: ObjId| {
            let Some(inst) = self.objects.get(id.index()) else {
                return Some(format!("reference to unknown object {id}"));
            };
            match target {
                Some(target) if !self.registry.is_subclass(inst.class, target) => Some(format!(
                    "{} is not a {}",
                    self.registry.class(inst.class).name(),
                    self.registry.class(target).name()
                )),
                _ => None,
            }
        })
    }
}

fn unknown_field(class: &ModelClass, field: &str) -> BundleError {
    BundleError::mismatch(class.name(), field, "no such field")
}
