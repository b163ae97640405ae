#![forbid(unsafe_code)]

//! Version-to-version rewriting of raw bundles.
//!
//! Migrations only ever see [`RawBundle`]s, never live classes, so data
//! written by old schemas stays loadable after the classes change. A
//! [`Migrator`] holds at most one migration per source version and applies
//! them in sequence until the bundle reaches the current version.

pub mod ops;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BundleError, Result};
use crate::raw::RawBundle;

type Transform = dyn Fn(RawBundle) -> Result<RawBundle> + Send + Sync;

/// A single `from -> to` rewrite step.
pub struct Migration {
    from: u32,
    to: u32,
    name: String,
    transform: Box<Transform>,
}

impl Migration {
    /// Creates a migration step.
    ///
    /// The transform does not need to stamp the version; the migrator sets
    /// `version = to` on whatever the transform returns.
    pub fn new<F>(from: u32, to: u32, name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(RawBundle) -> Result<RawBundle> + Send + Sync + 'static,
    {
        Self {
            from,
            to,
            name: name.into(),
            transform: Box::new(transform),
        }
    }

    /// Source version.
    pub fn from_version(&self) -> u32 {
        self.from
    }

    /// Target version.
    pub fn to_version(&self) -> u32 {
        self.to
    }

    /// Human-readable name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, raw: RawBundle) -> Result<RawBundle> {
        let mut out = (self.transform)(raw).map_err(|err| match err {
            err @ BundleError::MigrationFailed { .. } => err,
            other => BundleError::MigrationFailed {
                name: self.name.clone(),
                from: self.from,
                to: self.to,
                detail: other.to_string(),
            },
        })?;
        out.version = self.to;
        Ok(out)
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered set of migrations leading up to the current version.
#[derive(Debug)]
pub struct Migrator {
    current: u32,
    steps: BTreeMap<u32, Migration>,
}

impl Migrator {
    /// Creates a migrator with no steps; only current bundles pass through it.
    pub fn new(current: u32) -> Self {
        Self {
            current,
            steps: BTreeMap::new(),
        }
    }

    /// Creates a migrator and validates that the steps form a proper chain.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::InvalidMigrationChain`] when two steps share a
    /// source version, a step does not move forward, a step overshoots the
    /// current version, or a step ends at a version nothing continues from.
    pub fn with_migrations(current: u32, migrations: Vec<Migration>) -> Result<Self> {
        let mut migrator = Self::new(current);
        for migration in migrations {
            migrator.register(migration)?;
        }
        migrator.validate()?;
        Ok(migrator)
    }

    /// Adds one step.
    pub fn register(&mut self, migration: Migration) -> Result<&mut Self> {
        if migration.from >= migration.to {
            return Err(BundleError::InvalidMigrationChain(format!(
                "{} goes from {} to {}",
                migration.name, migration.from, migration.to
            )));
        }
        if migration.to > self.current {
            return Err(BundleError::InvalidMigrationChain(format!(
                "{} targets version {} beyond current version {}",
                migration.name, migration.to, self.current
            )));
        }
        if let Some(existing) = self.steps.get(&migration.from) {
            return Err(BundleError::InvalidMigrationChain(format!(
                "{} and {} both start at version {}",
                existing.name, migration.name, migration.from
            )));
        }
        self.steps.insert(migration.from, migration);
        Ok(self)
    }

    /// Checks that every step leads, through other steps, to the current version.
    pub fn validate(&self) -> Result<()> {
        for step in self.steps.values() {
            if step.to != self.current && !self.steps.contains_key(&step.to) {
                return Err(BundleError::InvalidMigrationChain(format!(
                    "{} ends at version {} but no migration continues from it",
                    step.name, step.to
                )));
            }
        }
        Ok(())
    }

    /// Version every migrated bundle ends up at.
    pub fn current_version(&self) -> u32 {
        self.current
    }

    /// Iterates registered steps by source version.
    pub fn migrations(&self) -> impl Iterator<Item = &Migration> {
        self.steps.values()
    }

    /// Oldest version this migrator can bring up to date.
    pub fn oldest_supported(&self) -> u32 {
        let mut version = self.current;
        while let Some((from, _)) = self.steps.iter().find(|(_, step)| step.to == version) {
            version = *from;
        }
        version
    }

    /// Steps that would be applied to a bundle at `version`.
    pub fn plan(&self, version: u32) -> Result<Vec<&Migration>> {
        if version > self.current {
            return Err(BundleError::NoMigrationPath {
                from: version,
                to: self.current,
            });
        }
        let mut plan = Vec::new();
        let mut at = version;
        while at != self.current {
            let step = self.steps.get(&at).ok_or(BundleError::NoMigrationPath {
                from: at,
                to: self.current,
            })?;
            plan.push(step);
            at = step.to;
        }
        Ok(plan)
    }

    /// Brings `raw` up to the current version.
    ///
    /// A bundle already at the current version is returned unchanged.
    ///
    /// # Errors
    ///
    /// [`BundleError::NoMigrationPath`] if some intermediate version has no
    /// step (or the bundle is newer than this build), and
    /// [`BundleError::MigrationFailed`] if a transform fails.
    pub fn migrate(&self, raw: RawBundle) -> Result<RawBundle> {
        let start = raw.version;
        let plan = self.plan(start)?;
        let mut raw = raw;
        for step in plan {
            let before = raw.instances.clone();
            raw = step.apply(raw)?;
            if raw.instances == before {
                tracing::warn!(migration = step.name(), from = step.from, to = step.to, "migrate.step.unchanged");
            } else {
                tracing::trace!(migration = step.name(), from = step.from, to = step.to, "migrate.step");
            }
        }
        if start != raw.version {
            tracing::debug!(from = start, to = raw.version, "migrate.done");
        }
        Ok(raw)
    }
}
