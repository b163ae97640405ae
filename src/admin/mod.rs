#![forbid(unsafe_code)]

//! Store administration and maintenance utilities.
//!
//! This module provides the operations behind the command line tool:
//! auditing a whole store, verifying one bundle, reporting statistics and
//! pruning unreachable instances.

mod audit;
mod error;
mod options;
mod prune;
mod stats;

/// Store-wide and single-bundle audits.
///
/// Every bundle is migrated and checked; problems are reported as findings
/// rather than errors.
pub use audit::{audit, verify, AuditReport, AuditTotals};

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Options controlling audit depth and parallelism.
pub use options::{AuditLevel, AuditOptions};

/// Removal of unreachable instances from stored bundles.
pub use prune::{prune, PruneReport};

/// Statistics about a stored bundle.
pub use stats::{stats, ReferenceStats, StatsReport};

use std::path::Path;

use crate::store::DirStore;

/// Opens an existing bundle directory, failing if it does not exist.
pub fn open_store(path: impl AsRef<Path>) -> Result<DirStore> {
    let path = path.as_ref();
    if !path.is_dir() {
        return Err(AdminError::missing_store(path));
    }
    Ok(DirStore::open(path)?)
}
