//! Strata: a schema-driven bundler for cyclic object graphs.
//!
//! Live graphs are serialized into flat, versioned [`raw::RawBundle`]s and
//! materialized back with identity preserved. Old bundles are brought up to
//! date by a [`migrate::Migrator`] before they are unbundled, bundles may
//! reference each other through cross-bundle references resolved by the
//! [`deps::DependencyLoader`], and the [`check`] module reports every
//! invariant violation in a bundle instead of stopping at the first one.
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata::runtime::Runtime;
//! use strata::schema::{FieldSpec, SchemaBuilder};
//! use strata::types::BundleId;
//!
//! # fn main() -> strata::error::Result<()> {
//! let mut schema = SchemaBuilder::new(1);
//! schema.register_class("Box", vec![FieldSpec::owned("child", "Box").optional()])?;
//! let mut rt = Runtime::new(Arc::new(schema.build()?));
//! let a = rt.create("Box")?;
//! let b = rt.create("Box")?;
//! rt.set(a, "child", b)?;
//! rt.set(b, "child", a)?;
//! let raw = rt.bundle(&BundleId::new("doc"), &[a])?;
//! assert_eq!(raw.instances.len(), 2);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod admin;
pub mod check;
mod codec;
pub mod deps;
pub mod error;
pub mod logging;
pub mod migrate;
pub mod raw;
pub mod runtime;
pub mod schema;
pub mod store;
pub mod types;

pub use error::{BundleError, Result};
