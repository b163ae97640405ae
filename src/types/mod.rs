#![forbid(unsafe_code)]

//! Identifier types shared by every layer of the bundler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a stored bundle (a project revision, a package version, ...).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(pub String);

/// Index of an instance inside one bundle's instance table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Iid(pub u32);

/// Handle of a live instance inside a [`crate::runtime::Runtime`] arena.
///
/// Two handles are equal exactly when they denote the same live object.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ObjId(pub u32);

/// Stable address of an instance: the bundle that owns it plus its uuid.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addr {
    /// Bundle that owns the instance.
    pub bundle_id: BundleId,
    /// Identifier of the instance, unique within its bundle.
    pub uuid: String,
}

impl BundleId {
    /// Creates a bundle id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        BundleId(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Iid {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl ObjId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl Addr {
    /// Builds an address from its parts.
    pub fn new(bundle_id: BundleId, uuid: impl Into<String>) -> Self {
        Self {
            bundle_id,
            uuid: uuid.into(),
        }
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bundle_id, self.uuid)
    }
}

impl From<&str> for BundleId {
    fn from(value: &str) -> Self {
        BundleId(value.to_string())
    }
}

impl From<String> for BundleId {
    fn from(value: String) -> Self {
        BundleId(value)
    }
}

impl From<u32> for Iid {
    fn from(value: u32) -> Self {
        Iid(value)
    }
}

impl From<Iid> for u32 {
    fn from(value: Iid) -> Self {
        value.0
    }
}
