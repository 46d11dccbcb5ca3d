use serde::{Deserialize, Serialize};

/// Integer tag describing the expected shape of the store's structure.
/// Persisted inside the database itself via `PRAGMA user_version`.
pub type SchemaVersion = u32;

/// A complete schema script together with the version it produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub version: SchemaVersion,
    pub sql: String,
}

/// SQL statements that carry a store from one schema version to the next.
/// `from` must equal the store's current persisted version at apply time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSet {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub sql: String,
}

/// Outcome of comparing the store's persisted version against the version
/// the application requires. Both non-`Compatible` variants are expected,
/// recoverable signals, not faults — the caller picks a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Persisted and required versions match; the store is usable as-is.
    Compatible,
    /// The store is initialized but behind; the caller must supply a
    /// migration set starting at `database_version`.
    MigrationNeeded { database_version: SchemaVersion },
    /// The store is uninitialized (version 0) or newer than the app
    /// supports; the caller must perform a destructive reset.
    SchemaNeeded,
}

/// Decide how a store at `database_version` relates to `required_version`.
/// Pure decision function, no mutation.
pub fn check_compatibility(
    database_version: SchemaVersion,
    required_version: SchemaVersion,
) -> Compatibility {
    if database_version == required_version {
        Compatibility::Compatible
    } else if database_version > 0 && database_version < required_version {
        Compatibility::MigrationNeeded { database_version }
    } else {
        if database_version > required_version {
            log::warn!(
                "database is at version {database_version}, newer than the required {required_version}; a reset is needed"
            );
        }
        Compatibility::SchemaNeeded
    }
}
