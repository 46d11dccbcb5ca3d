use crate::database::{is_shared_memory_name, Database};
use crate::error::{Result, SiltDbError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared-ownership handle to an open connection.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Process-wide registry of shared in-memory connections, keyed by logical
/// name. Drivers that open the same shared in-memory name resolve to the
/// same underlying connection; every other name gets an independent one.
///
/// The registry lives as long as the host keeps it alive and is torn down
/// only by an explicit [`ConnectionRegistry::clear`], never implicitly.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, SharedDatabase>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection for `name`, reusing the registered one when the
    /// name denotes a shared in-memory store.
    pub fn open(&self, name: &str, encryption_key: Option<&str>) -> Result<SharedDatabase> {
        if !is_shared_memory_name(name) {
            return Ok(Arc::new(Mutex::new(Database::open(name, encryption_key)?)));
        }

        let mut connections = self
            .connections
            .lock()
            .map_err(|_| SiltDbError::Lock("connection registry".to_string()))?;

        if let Some(existing) = connections.get(name) {
            log::debug!("reusing shared in-memory connection for {name}");
            return Ok(Arc::clone(existing));
        }

        log::debug!("creating shared in-memory connection for {name}");
        let database = Arc::new(Mutex::new(Database::open(name, encryption_key)?));
        connections.insert(name.to_string(), Arc::clone(&database));
        Ok(database)
    }

    /// Drop every registered shared connection. Host-driven teardown only.
    pub fn clear(&self) -> Result<()> {
        let mut connections = self
            .connections
            .lock()
            .map_err(|_| SiltDbError::Lock("connection registry".to_string()))?;
        connections.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_name_is_shared() {
        let registry = ConnectionRegistry::new();
        let first = registry.open(":memory:", None).unwrap();
        let second = registry.open(":memory:", None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_file_names_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("app").to_string_lossy().to_string();

        let registry = ConnectionRegistry::new();
        let first = registry.open(&name, None).unwrap();
        let second = registry.open(&name, None).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_clear_forgets_shared_connections() {
        let registry = ConnectionRegistry::new();
        let first = registry.open(":memory:", None).unwrap();
        registry.clear().unwrap();
        let second = registry.open(":memory:", None).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_separate_registries_do_not_share() {
        let first = ConnectionRegistry::new().open(":memory:", None).unwrap();
        let second = ConnectionRegistry::new().open(":memory:", None).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
