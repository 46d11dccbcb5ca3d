use crate::cache::RecordCache;
use crate::database::{Database, Row};
use crate::error::{Result, SiltDbError};
use crate::registry::{ConnectionRegistry, SharedDatabase};
use crate::schema::{check_compatibility, Compatibility, MigrationSet, Schema, SchemaVersion};
use serde_json::Value as JsonValue;
use std::sync::{Arc, MutexGuard};

/// A record lookup result: the bare id when this session has already
/// materialized the row, the full row otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordResult {
    Id(String),
    Row(Row),
}

/// How a committed batch statement affects the existence cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEffect {
    /// The statement inserts the record; mark it cached after commit.
    Insert,
    /// The statement deletes the record; evict it after commit.
    Delete,
    /// The statement does not change record presence.
    None,
}

/// One statement of a batch, executed once per argument list. By
/// convention the first argument of each list is the record id.
#[derive(Debug, Clone)]
pub struct BatchOperation {
    pub effect: CacheEffect,
    pub table: String,
    pub sql: String,
    pub arg_batches: Vec<Vec<JsonValue>>,
}

/// Session-level orchestrator: opens a connection through the registry,
/// gates it on schema compatibility, and serves finds, cached queries and
/// atomic write batches against it.
///
/// Each driver owns its existence cache exclusively; only the connection
/// is ever shared (and only for shared in-memory names).
pub struct Driver {
    registry: Arc<ConnectionRegistry>,
    database: Option<SharedDatabase>,
    cache: RecordCache,
}

impl Driver {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Driver {
            registry,
            database: None,
            cache: RecordCache::new(),
        }
    }

    // ── Setup paths ──────────────────────────────────────────────────

    /// Open (or reuse) the connection for `name` and check whether its
    /// persisted version matches `required_version`. The gate's signal is
    /// returned unchanged; no recovery is attempted here.
    pub fn initialize(
        &mut self,
        name: &str,
        required_version: SchemaVersion,
        encryption_key: Option<&str>,
    ) -> Result<Compatibility> {
        log::debug!("initializing driver for {name}");
        self.init(name, encryption_key)?;
        self.check_version(required_version)
    }

    /// Destructively reset the store to a fresh schema, then re-run the
    /// compatibility gate against `required_version` — a schema script
    /// that declares the wrong target version is caught here.
    pub fn setup_with_schema(
        &mut self,
        name: &str,
        schema: &Schema,
        required_version: SchemaVersion,
        encryption_key: Option<&str>,
    ) -> Result<Compatibility> {
        log::debug!("setting up {name} with a fresh schema at version {}", schema.version);
        self.init(name, encryption_key)?;
        self.reset_with_schema(schema)?;
        self.check_version(required_version)
    }

    /// Apply a migration set, then re-run the compatibility gate against
    /// its target version.
    pub fn setup_with_migrations(
        &mut self,
        name: &str,
        migrations: &MigrationSet,
        encryption_key: Option<&str>,
    ) -> Result<Compatibility> {
        log::debug!(
            "setting up {name} with migrations {} -> {}",
            migrations.from,
            migrations.to
        );
        self.init(name, encryption_key)?;
        self.migrate(migrations)?;
        self.check_version(migrations.to)
    }

    fn init(&mut self, name: &str, encryption_key: Option<&str>) -> Result<()> {
        if self.database.is_some() {
            return Ok(());
        }
        self.database = Some(self.registry.open(name, encryption_key)?);
        Ok(())
    }

    fn check_version(&self, required_version: SchemaVersion) -> Result<Compatibility> {
        let handle = Arc::clone(self.handle()?);
        let database = lock_database(&handle)?;
        Ok(check_compatibility(
            database.user_version()?,
            required_version,
        ))
    }

    /// Destroy all existing structure, forget every cached record, then
    /// atomically apply the fresh schema and its version.
    fn reset_with_schema(&mut self, schema: &Schema) -> Result<()> {
        log::warn!("destructive reset to schema version {}", schema.version);
        let handle = Arc::clone(self.handle()?);
        let database = lock_database(&handle)?;

        database.destroy_everything()?;
        self.cache.clear();

        database.with_transaction(|db| {
            db.execute_script(&schema.sql)?;
            db.set_user_version(schema.version)
        })
    }

    /// Apply a migration set atomically. Rejected without side effect when
    /// its starting version does not match the store.
    fn migrate(&self, migrations: &MigrationSet) -> Result<()> {
        let handle = Arc::clone(self.handle()?);
        let database = lock_database(&handle)?;

        let database_version = database.user_version()?;
        if database_version != migrations.from {
            return Err(SiltDbError::IncompatibleMigration {
                database_version,
                migration_from: migrations.from,
            });
        }

        database.with_transaction(|db| {
            db.execute_script(&migrations.sql)?;
            db.set_user_version(migrations.to)
        })
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Look up one record by id. Returns the bare id when the session has
    /// already materialized it, the full row on first sight, `None` when
    /// the row does not exist.
    pub fn find(&mut self, table: &str, id: &str) -> Result<Option<RecordResult>> {
        if self.cache.is_cached(table, id) {
            return Ok(Some(RecordResult::Id(id.to_string())));
        }

        let handle = Arc::clone(self.handle()?);
        let sql = format!("SELECT * FROM \"{table}\" WHERE id == ?1 LIMIT 1");
        let rows = lock_database(&handle)?.query_raw(&sql, &[JsonValue::String(id.to_string())])?;

        match rows.into_iter().next() {
            Some(row) => {
                self.cache.mark_cached(table, id);
                Ok(Some(RecordResult::Row(row)))
            }
            None => Ok(None),
        }
    }

    /// Run a record query, substituting bare ids for rows the session has
    /// already seen. Row order from the underlying query is preserved;
    /// rows without an `id` column are returned whole and never cached.
    pub fn cached_query(
        &mut self,
        table: &str,
        sql: &str,
        args: &[JsonValue],
    ) -> Result<Vec<RecordResult>> {
        let handle = Arc::clone(self.handle()?);
        let rows = lock_database(&handle)?.query_raw(sql, args)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            match row_id(&row) {
                Some(id) if self.cache.is_cached(table, &id) => {
                    results.push(RecordResult::Id(id));
                }
                Some(id) => {
                    self.cache.mark_cached(table, &id);
                    results.push(RecordResult::Row(row));
                }
                None => results.push(RecordResult::Row(row)),
            }
        }
        Ok(results)
    }

    /// Run a query and return bare ids only, regardless of cache state.
    pub fn query_ids(&self, sql: &str, args: &[JsonValue]) -> Result<Vec<String>> {
        let handle = Arc::clone(self.handle()?);
        let rows = lock_database(&handle)?.query_raw(sql, args)?;
        Ok(rows.iter().filter_map(row_id).collect())
    }

    /// Run a query and return raw rows with no cache interaction.
    pub fn unsafe_query_raw(&self, sql: &str, args: &[JsonValue]) -> Result<Vec<Row>> {
        let handle = Arc::clone(self.handle()?);
        let rows = lock_database(&handle)?.query_raw(sql, args)?;
        Ok(rows)
    }

    /// Run a counting query.
    pub fn count(&self, sql: &str, args: &[JsonValue]) -> Result<i64> {
        let handle = Arc::clone(self.handle()?);
        let count = lock_database(&handle)?.count(sql, args)?;
        Ok(count)
    }

    /// Single-row lookup against the reserved key-value area. Bypasses the
    /// existence cache entirely — local storage is not a record table.
    pub fn get_local(&self, key: &str) -> Result<Option<String>> {
        let handle = Arc::clone(self.handle()?);
        let value = lock_database(&handle)?.get_local(key)?;
        Ok(value)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Execute every statement of every operation inside one transaction.
    /// Cache mutations are applied only after the transaction commits, in
    /// operation order; a failed batch leaves both the store and the cache
    /// untouched.
    pub fn batch(&mut self, operations: &[BatchOperation]) -> Result<()> {
        let handle = Arc::clone(self.handle()?);
        let database = lock_database(&handle)?;

        let mut new_ids = Vec::new();
        let mut removed_ids = Vec::new();

        database.with_transaction(|db| {
            for operation in operations {
                for args in &operation.arg_batches {
                    db.execute(&operation.sql, args)?;
                    if operation.effect == CacheEffect::None {
                        continue;
                    }
                    let Some(id) = args.first().and_then(value_id) else {
                        continue;
                    };
                    match operation.effect {
                        CacheEffect::Insert => new_ids.push((operation.table.clone(), id)),
                        CacheEffect::Delete => removed_ids.push((operation.table.clone(), id)),
                        CacheEffect::None => {}
                    }
                }
            }
            Ok(())
        })?;
        drop(database);

        for (table, id) in new_ids {
            self.cache.mark_cached(&table, &id);
        }
        for (table, id) in removed_ids {
            self.cache.evict(&table, &id);
        }
        Ok(())
    }

    fn handle(&self) -> Result<&SharedDatabase> {
        self.database.as_ref().ok_or(SiltDbError::NotInitialized)
    }
}

fn lock_database(handle: &SharedDatabase) -> Result<MutexGuard<'_, Database>> {
    handle
        .lock()
        .map_err(|_| SiltDbError::Lock("database connection".to_string()))
}

fn row_id(row: &Row) -> Option<String> {
    row.get("id").and_then(value_id)
}

fn value_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(id) => Some(id.clone()),
        JsonValue::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
