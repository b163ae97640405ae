#![forbid(unsafe_code)]

//! Static description of every model class.
//!
//! A [`SchemaRegistry`] is assembled once through a [`SchemaBuilder`] and is
//! immutable afterwards, so it can be shared between threads behind an `Arc`
//! without locking. Every other layer consults it to learn which fields a
//! class has and which of those fields own the instances they point at.

use std::fs;
use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{BundleError, Result};

/// Shape of a field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Null, boolean, number or string.
    Scalar,
    /// Ordered list of elements described by [`FieldSpec::elem`].
    List,
    /// String-keyed map of elements described by [`FieldSpec::elem`].
    Map,
    /// Reference to an instance that belongs to the referencing one.
    OwnedRef,
    /// Back-pointer or auxiliary reference, never an owner.
    WeakRef,
}

/// Element shape of a [`FieldKind::List`] or [`FieldKind::Map`] field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElemKind {
    /// Elements are scalars.
    #[default]
    Scalar,
    /// Elements are owned references.
    Owned,
    /// Elements are weak references.
    Weak,
}

/// Declaration of one field of a [`ModelClass`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Field shape.
    pub kind: FieldKind,
    /// Referenced class for reference fields and reference collections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_class: Option<String>,
    /// Element shape for lists and maps.
    #[serde(default, skip_serializing_if = "is_scalar_elem")]
    pub elem: ElemKind,
    /// Whether the field may be absent or null.
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    /// Whether the field lives only in memory and is never bundled.
    #[serde(default, skip_serializing_if = "is_false")]
    pub transient: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_scalar_elem(elem: &ElemKind) -> bool {
    *elem == ElemKind::Scalar
}

impl FieldSpec {
    fn with(name: impl Into<String>, kind: FieldKind, elem: ElemKind, target: Option<&str>) -> Self {
        Self {
            name: name.into(),
            kind,
            target_class: target.map(str::to_string),
            elem,
            optional: false,
            transient: false,
        }
    }

    /// Scalar field.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::with(name, FieldKind::Scalar, ElemKind::Scalar, None)
    }

    /// Owned reference to an instance of `target`.
    pub fn owned(name: impl Into<String>, target: &str) -> Self {
        Self::with(name, FieldKind::OwnedRef, ElemKind::Scalar, Some(target))
    }

    /// Weak reference to an instance of `target`.
    pub fn weak(name: impl Into<String>, target: &str) -> Self {
        Self::with(name, FieldKind::WeakRef, ElemKind::Scalar, Some(target))
    }

    /// List of scalars.
    pub fn list(name: impl Into<String>) -> Self {
        Self::with(name, FieldKind::List, ElemKind::Scalar, None)
    }

    /// List of owned references.
    pub fn owned_list(name: impl Into<String>, target: &str) -> Self {
        Self::with(name, FieldKind::List, ElemKind::Owned, Some(target))
    }

    /// List of weak references.
    pub fn weak_list(name: impl Into<String>, target: &str) -> Self {
        Self::with(name, FieldKind::List, ElemKind::Weak, Some(target))
    }

    /// Map of scalars.
    pub fn map(name: impl Into<String>) -> Self {
        Self::with(name, FieldKind::Map, ElemKind::Scalar, None)
    }

    /// Map of owned references.
    pub fn owned_map(name: impl Into<String>, target: &str) -> Self {
        Self::with(name, FieldKind::Map, ElemKind::Owned, Some(target))
    }

    /// Map of weak references.
    pub fn weak_map(name: impl Into<String>, target: &str) -> Self {
        Self::with(name, FieldKind::Map, ElemKind::Weak, Some(target))
    }

    /// Marks the field optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Marks the field transient.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// True when the field's values are (or contain) references.
    pub fn holds_refs(&self) -> bool {
        match self.kind {
            FieldKind::OwnedRef | FieldKind::WeakRef => true,
            FieldKind::List | FieldKind::Map => self.elem != ElemKind::Scalar,
            FieldKind::Scalar => false,
        }
    }

    /// True when references held by this field make their targets part of
    /// the holder's ownership closure.
    pub fn is_owning(&self) -> bool {
        match self.kind {
            FieldKind::OwnedRef => true,
            FieldKind::List | FieldKind::Map => self.elem == ElemKind::Owned,
            _ => false,
        }
    }

    /// True when the field holds weak references.
    pub fn is_weak(&self) -> bool {
        match self.kind {
            FieldKind::WeakRef => true,
            FieldKind::List | FieldKind::Map => self.elem == ElemKind::Weak,
            _ => false,
        }
    }
}

/// Dense index of a class inside its registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ClassId(pub u32);

/// Frozen class record with inherited fields flattened in.
#[derive(Clone, Debug)]
pub struct ModelClass {
    id: ClassId,
    name: String,
    base: Option<ClassId>,
    fields: Vec<FieldSpec>,
    field_index: FxHashMap<String, usize>,
}

impl ModelClass {
    /// Registry index of this class.
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct base class, if any.
    pub fn base(&self) -> Option<ClassId> {
        self.base
    }

    /// All fields, base class fields first.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.field_index.get(name).map(|&idx| &self.fields[idx])
    }

    /// Position of a field in [`ModelClass::fields`].
    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }
}

/// Serializable class definition, as written in schema documents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassDef {
    /// Class name.
    pub name: String,
    /// Base class name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Fields declared directly on this class.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// Serializable schema: a version stamp plus class definitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaDoc {
    /// Current bundle version described by this schema.
    pub version: u32,
    /// Class definitions.
    #[serde(default)]
    pub classes: Vec<ClassDef>,
}

/// Collects class definitions before freezing them into a [`SchemaRegistry`].
#[derive(Debug)]
pub struct SchemaBuilder {
    version: u32,
    defs: Vec<ClassDef>,
    names: FxHashSet<String>,
}

impl SchemaBuilder {
    /// Starts a schema describing bundles of `version`.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            defs: Vec::new(),
            names: FxHashSet::default(),
        }
    }

    /// Registers a class without a base class.
    pub fn register_class(
        &mut self,
        name: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Result<&mut Self> {
        self.register(ClassDef {
            name: name.into(),
            extends: None,
            fields,
        })
    }

    /// Registers a class that inherits the fields of `base`.
    pub fn register_subclass(
        &mut self,
        name: impl Into<String>,
        base: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Result<&mut Self> {
        self.register(ClassDef {
            name: name.into(),
            extends: Some(base.into()),
            fields,
        })
    }

    /// Registers a class definition.
    pub fn register(&mut self, def: ClassDef) -> Result<&mut Self> {
        if def.name.is_empty() {
            return Err(BundleError::InvalidSchema("class name must be non-empty".into()));
        }
        if !self.names.insert(def.name.clone()) {
            return Err(BundleError::InvalidSchema(format!(
                "class {} registered twice",
                def.name
            )));
        }
        self.defs.push(def);
        Ok(self)
    }

    /// Validates every definition and freezes the registry.
    pub fn build(self) -> Result<SchemaRegistry> {
        let by_name: FxHashMap<String, ClassId> = self
            .defs
            .iter()
            .enumerate()
            .map(|(idx, def)| (def.name.clone(), ClassId(idx as u32)))
            .collect();

        let mut bases = Vec::with_capacity(self.defs.len());
        for def in &self.defs {
            let base = match &def.extends {
                Some(base) => Some(*by_name.get(base).ok_or_else(|| {
                    BundleError::InvalidSchema(format!(
                        "class {} extends unknown class {base}",
                        def.name
                    ))
                })?),
                None => None,
            };
            bases.push(base);
        }

        let mut classes = Vec::with_capacity(self.defs.len());
        for (idx, def) in self.defs.iter().enumerate() {
            let chain = ancestor_chain(&self.defs, &bases, idx)?;
            let mut fields: Vec<FieldSpec> = Vec::new();
            let mut field_index = FxHashMap::default();
            for class_idx in chain.iter().rev() {
                for field in &self.defs[*class_idx].fields {
                    validate_field(&def.name, field, &by_name)?;
                    if field_index.insert(field.name.clone(), fields.len()).is_some() {
                        return Err(BundleError::InvalidSchema(format!(
                            "class {} declares field {} more than once",
                            def.name, field.name
                        )));
                    }
                    fields.push(field.clone());
                }
            }
            classes.push(ModelClass {
                id: ClassId(idx as u32),
                name: def.name.clone(),
                base: bases[idx],
                fields,
                field_index,
            });
        }

        tracing::debug!(
            version = self.version,
            classes = classes.len(),
            "schema.build"
        );
        Ok(SchemaRegistry {
            version: self.version,
            classes,
            by_name,
            defs: self.defs,
        })
    }
}

fn ancestor_chain(defs: &[ClassDef], bases: &[Option<ClassId>], start: usize) -> Result<Vec<usize>> {
    let mut chain = vec![start];
    let mut current = start;
    while let Some(base) = bases[current] {
        let base = base.0 as usize;
        if chain.contains(&base) {
            return Err(BundleError::InvalidSchema(format!(
                "inheritance cycle through class {}",
                defs[start].name
            )));
        }
        chain.push(base);
        current = base;
    }
    Ok(chain)
}

fn validate_field(
    class: &str,
    field: &FieldSpec,
    by_name: &FxHashMap<String, ClassId>,
) -> Result<()> {
    if field.name.is_empty() {
        return Err(BundleError::InvalidSchema(format!(
            "class {class} has a field with an empty name"
        )));
    }
    if field.kind == FieldKind::Scalar && field.elem != ElemKind::Scalar {
        return Err(BundleError::InvalidSchema(format!(
            "{class}.{} is scalar but declares an element kind",
            field.name
        )));
    }
    match (field.holds_refs(), &field.target_class) {
        (true, Some(target)) => {
            if !by_name.contains_key(target) {
                return Err(BundleError::InvalidSchema(format!(
                    "{class}.{} targets unknown class {target}",
                    field.name
                )));
            }
        }
        (true, None) => {
            return Err(BundleError::InvalidSchema(format!(
                "{class}.{} holds references but names no target class",
                field.name
            )));
        }
        (false, Some(target)) => {
            return Err(BundleError::InvalidSchema(format!(
                "{class}.{} holds scalars but targets class {target}",
                field.name
            )));
        }
        (false, None) => {}
    }
    Ok(())
}

/// Frozen, thread-safe table of model classes.
#[derive(Debug)]
pub struct SchemaRegistry {
    version: u32,
    classes: Vec<ModelClass>,
    by_name: FxHashMap<String, ClassId>,
    defs: Vec<ClassDef>,
}

impl SchemaRegistry {
    /// Bundle version this schema describes.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Looks up a class by name.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::UnregisteredClass`] if no such class exists.
    pub fn lookup(&self, name: &str) -> Result<&ModelClass> {
        self.by_name
            .get(name)
            .map(|id| &self.classes[id.0 as usize])
            .ok_or_else(|| BundleError::unregistered(name))
    }

    /// Returns the class with the given id.
    ///
    /// Ids are only ever handed out by this registry, so the lookup cannot miss.
    pub fn class(&self, id: ClassId) -> &ModelClass {
        &self.classes[id.0 as usize]
    }

    /// Returns true when `class` is `ancestor` or inherits from it.
    pub fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.class(id).base;
        }
        false
    }

    /// Name-based variant of [`SchemaRegistry::is_subclass`].
    pub fn is_subclass_name(&self, class: &str, ancestor: &str) -> bool {
        match (self.by_name.get(class), self.by_name.get(ancestor)) {
            (Some(class), Some(ancestor)) => self.is_subclass(*class, *ancestor),
            _ => false,
        }
    }

    /// Iterates every registered class in registration order.
    pub fn classes(&self) -> impl Iterator<Item = &ModelClass> {
        self.classes.iter()
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if no class is registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Builds a registry from a schema document.
    pub fn from_doc(doc: SchemaDoc) -> Result<Self> {
        let mut builder = SchemaBuilder::new(doc.version);
        for def in doc.classes {
            builder.register(def)?;
        }
        builder.build()
    }

    /// Returns the schema document this registry was built from.
    pub fn to_doc(&self) -> SchemaDoc {
        SchemaDoc {
            version: self.version,
            classes: self.defs.clone(),
        }
    }

    /// Loads a schema document from a `.json` or `.toml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let doc: SchemaDoc = if is_toml {
            toml::from_str(&contents).map_err(|err| {
                BundleError::InvalidSchema(format!("{}: {err}", path.display()))
            })?
        } else {
            serde_json::from_str(&contents)?
        };
        Self::from_doc(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        let mut builder = SchemaBuilder::new(7);
        builder
            .register_class(
                "Node",
                vec![FieldSpec::scalar("name"), FieldSpec::weak("parent", "Node").optional()],
            )
            .unwrap()
            .register_subclass(
                "Group",
                "Node",
                vec![FieldSpec::owned_list("children", "Node")],
            )
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn lookup_unknown_class_fails() {
        let registry = registry();
        let err = registry.lookup("Missing").unwrap_err();
        assert!(matches!(err, BundleError::UnregisteredClass { class } if class == "Missing"));
    }

    #[test]
    fn subclass_inherits_base_fields_first() {
        let registry = registry();
        let group = registry.lookup("Group").unwrap();
        let names: Vec<&str> = group.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "parent", "children"]);
        assert_eq!(group.field_position("children"), Some(2));
        let node = registry.lookup("Node").unwrap();
        assert!(registry.is_subclass(group.id(), node.id()));
        assert!(!registry.is_subclass(node.id(), group.id()));
    }

    #[test]
    fn ownership_flags_follow_kind() {
        assert!(FieldSpec::owned("a", "X").is_owning());
        assert!(FieldSpec::owned_map("a", "X").is_owning());
        assert!(!FieldSpec::weak_list("a", "X").is_owning());
        assert!(FieldSpec::weak_list("a", "X").is_weak());
        assert!(!FieldSpec::list("a").holds_refs());
    }

    #[test]
    fn rejects_unknown_targets_and_duplicates() {
        let mut builder = SchemaBuilder::new(1);
        builder
            .register_class("A", vec![FieldSpec::owned("b", "B")])
            .unwrap();
        assert!(matches!(builder.build(), Err(BundleError::InvalidSchema(_))));

        let mut builder = SchemaBuilder::new(1);
        builder.register_class("A", vec![]).unwrap();
        assert!(builder.register_class("A", vec![]).is_err());

        let mut builder = SchemaBuilder::new(1);
        builder
            .register_class("A", vec![FieldSpec::scalar("x"), FieldSpec::scalar("x")])
            .unwrap();
        assert!(builder.build().is_err());
    }

    #[test]
    fn rejects_inheritance_cycles() {
        let mut builder = SchemaBuilder::new(1);
        builder.register_subclass("A", "B", vec![]).unwrap();
        builder.register_subclass("B", "A", vec![]).unwrap();
        assert!(matches!(builder.build(), Err(BundleError::InvalidSchema(_))));
    }

    #[test]
    fn schema_doc_roundtrips_through_json() {
        let registry = registry();
        let json = serde_json::to_string(&registry.to_doc()).unwrap();
        let reloaded = SchemaRegistry::from_doc(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(reloaded.version(), 7);
        assert_eq!(reloaded.len(), 2);
        let field = reloaded.lookup("Node").unwrap().field("parent").unwrap();
        assert_eq!(field.kind, FieldKind::WeakRef);
        assert!(field.optional);
    }

    #[test]
    fn parses_toml_schema_documents() {
        let text = r#"
            version = 3

            [[classes]]
            name = "Box"
            fields = [
                { name = "child", kind = "owned_ref", targetClass = "Box", optional = true },
                { name = "tags", kind = "list" },
            ]
        "#;
        let doc: SchemaDoc = toml::from_str(text).unwrap();
        let registry = SchemaRegistry::from_doc(doc).unwrap();
        let class = registry.lookup("Box").unwrap();
        assert!(class.field("child").unwrap().is_owning());
        assert_eq!(class.field("tags").unwrap().kind, FieldKind::List);
    }
}
