use std::io;

use thiserror::Error;

use crate::types::BundleId;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, BundleError>;

/// Errors raised while bundling, unbundling, migrating or loading bundles.
#[derive(Debug, Error)]
pub enum BundleError {
    /// A class name is not present in the schema registry.
    #[error("class {class} is not registered")]
    UnregisteredClass {
        /// Offending class name.
        class: String,
    },
    /// A field value does not match its schema declaration.
    #[error("schema mismatch on {class}.{field}: {detail}")]
    SchemaMismatch {
        /// Class owning the field.
        class: String,
        /// Field name.
        field: String,
        /// What was wrong.
        detail: String,
    },
    /// A reference does not resolve to an instance in scope.
    #[error("dangling reference in bundle {bundle} at {location}: {detail}")]
    DanglingReference {
        /// Bundle being processed.
        bundle: BundleId,
        /// Instance and field holding the reference.
        location: String,
        /// Description of the missing target.
        detail: String,
    },
    /// A declared dependency is never referenced.
    #[error("bundle {bundle} declares unused dependency {dep}")]
    UnusedDependency {
        /// Bundle declaring the dependency.
        bundle: BundleId,
        /// The unused dependency.
        dep: BundleId,
    },
    /// No registered migration starts at the bundle's version.
    #[error("no migration path from version {from} to version {to}")]
    NoMigrationPath {
        /// Version the bundle was stuck at.
        from: u32,
        /// Current version.
        to: u32,
    },
    /// The dependency graph between bundles contains a cycle.
    #[error("cyclic bundle dependency: {}", format_cycle(.cycle))]
    CyclicDependency {
        /// Bundles forming the cycle, first element repeated at the end.
        cycle: Vec<BundleId>,
    },
    /// A bundle was handed to the unbundler before being migrated.
    #[error("bundle {bundle} has version {found}, expected {expected}")]
    VersionMismatch {
        /// Bundle being unbundled.
        bundle: BundleId,
        /// Version recorded in the bundle.
        found: u32,
        /// Version of the registry.
        expected: u32,
    },
    /// The schema definition itself is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// Registered migrations do not form a valid chain.
    #[error("invalid migration chain: {0}")]
    InvalidMigrationChain(String),
    /// A migration transform reported a failure.
    #[error("migration {name} ({from} -> {to}) failed: {detail}")]
    MigrationFailed {
        /// Migration name.
        name: String,
        /// Source version.
        from: u32,
        /// Target version.
        to: u32,
        /// Failure description.
        detail: String,
    },
    /// Caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A requested item does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The operation was abandoned through its cancel token.
    #[error("operation cancelled")]
    Cancelled,
    /// Raw bundle (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Underlying storage I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BundleError {
    pub(crate) fn unregistered(class: impl Into<String>) -> Self {
        BundleError::UnregisteredClass {
            class: class.into(),
        }
    }

    pub(crate) fn mismatch(
        class: impl Into<String>,
        field: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        BundleError::SchemaMismatch {
            class: class.into(),
            field: field.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn dangling(
        bundle: &BundleId,
        location: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        BundleError::DanglingReference {
            bundle: bundle.clone(),
            location: location.into(),
            detail: detail.into(),
        }
    }

    /// Returns true for data-integrity failures that retrying cannot fix.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            BundleError::UnregisteredClass { .. }
                | BundleError::SchemaMismatch { .. }
                | BundleError::DanglingReference { .. }
                | BundleError::UnusedDependency { .. }
                | BundleError::NoMigrationPath { .. }
                | BundleError::CyclicDependency { .. }
                | BundleError::VersionMismatch { .. }
        )
    }
}

fn format_cycle(cycle: &[BundleId]) -> String {
    cycle
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
