use crate::error::Result;
use crate::schema::SchemaVersion;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// A single result row, keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// Thin wrapper around a SQLite connection: raw statements, raw queries,
/// script execution, an atomic transaction scope, and the persisted
/// `user_version` counter. Knows nothing about caching or compatibility.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the store identified by a logical name.
    ///
    /// `:memory:` and `file::memory:` names open a transient in-memory
    /// store; all other names are treated as file paths, with a `.db`
    /// suffix appended when missing.
    pub fn open(name: &str, encryption_key: Option<&str>) -> Result<Self> {
        let conn = if name == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(resolve_path(name))?
        };
        let db = Database { conn };
        db.configure(encryption_key)?;
        Ok(db)
    }

    fn configure(&self, encryption_key: Option<&str>) -> Result<()> {
        if let Some(key) = encryption_key {
            self.conn.pragma_update(None, "key", key)?;
            self.conn.pragma_update(None, "cipher_compatibility", 4)?;
            self.conn.pragma_update(None, "cipher_page_size", 4096)?;
            self.conn.pragma_update(None, "kdf_iter", 64000)?;
        }
        // journal_mode reports the resulting mode as a row, so it has to go
        // through query_row.
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        self.conn.busy_timeout(Duration::from_millis(5000))?;
        Ok(())
    }

    // ── Persisted version counter ────────────────────────────────────

    pub fn user_version(&self) -> Result<SchemaVersion> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(SchemaVersion::try_from(version).unwrap_or(0))
    }

    pub fn set_user_version(&self, version: SchemaVersion) -> Result<()> {
        self.conn
            .execute_batch(&format!("PRAGMA user_version = {version}"))?;
        Ok(())
    }

    // ── Statement execution ──────────────────────────────────────────

    /// Execute a single statement with positional arguments.
    pub fn execute(&self, sql: &str, args: &[JsonValue]) -> Result<usize> {
        let changed = self
            .conn
            .execute(sql, params_from_iter(args.iter().map(bind_value)))?;
        Ok(changed)
    }

    /// Execute a multi-statement SQL script.
    pub fn execute_script(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run a query and return every row, column values converted to JSON.
    pub fn query_raw(&self, sql: &str, args: &[JsonValue]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let rows = stmt.query_map(params_from_iter(args.iter().map(bind_value)), |row| {
            let mut record = Row::new();
            for (i, name) in column_names.iter().enumerate() {
                let value: SqlValue = row.get(i)?;
                record.insert(name.clone(), column_to_json(value));
            }
            Ok(record)
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Run a counting query and return the first column of the first row.
    pub fn count(&self, sql: &str, args: &[JsonValue]) -> Result<i64> {
        let count = self.conn.query_row(
            sql,
            params_from_iter(args.iter().map(bind_value)),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Transaction support ──────────────────────────────────────────

    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Run `f` inside a transaction: commit on success, roll back on error.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        self.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit_transaction()?;
                Ok(value)
            }
            Err(err) => {
                // keep the original error even if the rollback itself fails
                let _ = self.rollback_transaction();
                Err(err)
            }
        }
    }

    // ── Destructive operations ───────────────────────────────────────

    /// Drop every user table and view and reset the version counter to 0,
    /// all inside one transaction.
    pub fn destroy_everything(&self) -> Result<()> {
        self.with_transaction(|db| {
            for (name, kind) in db.all_relations()? {
                let drop = if kind == "view" {
                    format!("DROP VIEW IF EXISTS \"{name}\"")
                } else {
                    format!("DROP TABLE IF EXISTS \"{name}\"")
                };
                db.conn.execute_batch(&drop)?;
            }
            db.set_user_version(0)?;
            Ok(())
        })
    }

    fn all_relations(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, type FROM sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut relations = Vec::new();
        for row in rows {
            relations.push(row?);
        }
        Ok(relations)
    }

    // ── Local storage ────────────────────────────────────────────────

    /// Single-row lookup in the reserved `local_storage` key-value table.
    /// The table is created by the application's schema script.
    pub fn get_local(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

/// Whether a logical name denotes a shared in-memory store: multiple
/// drivers opening it must resolve to one underlying connection.
pub fn is_shared_memory_name(name: &str) -> bool {
    name == ":memory:" || name.contains("?mode=memory")
}

/// Resolve a logical name to the path handed to SQLite. Memory names pass
/// through untouched; file names get a `.db` suffix when missing, placed
/// before any `?query` part.
pub fn resolve_path(name: &str) -> String {
    if name == ":memory:" || name.starts_with("file::memory:") {
        return name.to_string();
    }
    if name.contains(".db") {
        return name.to_string();
    }
    match name.find('?') {
        Some(index) => format!("{}.db{}", &name[..index], &name[index..]),
        None => format!("{name}.db"),
    }
}

fn bind_value(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        JsonValue::Number(number) => {
            if let Some(int) = number.as_i64() {
                SqlValue::Integer(int)
            } else {
                SqlValue::Real(number.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(text) => SqlValue::Text(text.clone()),
        // arrays and objects are stored as JSON text
        other => SqlValue::Text(other.to_string()),
    }
}

fn column_to_json(value: SqlValue) -> JsonValue {
    match value {
        SqlValue::Null => JsonValue::Null,
        SqlValue::Integer(int) => JsonValue::Number(int.into()),
        SqlValue::Real(float) => serde_json::Number::from_f64(float)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        SqlValue::Text(text) => JsonValue::String(text),
        SqlValue::Blob(bytes) => JsonValue::String(String::from_utf8_lossy(&bytes).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_db() -> Database {
        Database::open(":memory:", None).unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let db = memory_db();
        assert_eq!(db.user_version().unwrap(), 0);
    }

    #[test]
    fn test_user_version_roundtrip() {
        let db = memory_db();
        db.set_user_version(7).unwrap();
        assert_eq!(db.user_version().unwrap(), 7);
    }

    #[test]
    fn test_execute_and_query_raw() {
        let db = memory_db();
        db.execute_script("CREATE TABLE tasks (id TEXT PRIMARY KEY, name TEXT, done INTEGER)")
            .unwrap();
        db.execute(
            "INSERT INTO tasks (id, name, done) VALUES (?1, ?2, ?3)",
            &[json!("t1"), json!("write tests"), json!(false)],
        )
        .unwrap();

        let rows = db.query_raw("SELECT * FROM tasks", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("t1"));
        assert_eq!(rows[0]["name"], json!("write tests"));
        assert_eq!(rows[0]["done"], json!(0));
    }

    #[test]
    fn test_query_raw_null_and_real() {
        let db = memory_db();
        db.execute_script("CREATE TABLE samples (id TEXT, weight REAL, note TEXT)")
            .unwrap();
        db.execute(
            "INSERT INTO samples (id, weight, note) VALUES (?1, ?2, ?3)",
            &[json!("s1"), json!(2.5), JsonValue::Null],
        )
        .unwrap();

        let rows = db.query_raw("SELECT * FROM samples", &[]).unwrap();
        assert_eq!(rows[0]["weight"], json!(2.5));
        assert_eq!(rows[0]["note"], JsonValue::Null);
    }

    #[test]
    fn test_count() {
        let db = memory_db();
        db.execute_script(
            "CREATE TABLE tasks (id TEXT PRIMARY KEY);
             INSERT INTO tasks (id) VALUES ('a');
             INSERT INTO tasks (id) VALUES ('b');",
        )
        .unwrap();
        assert_eq!(db.count("SELECT count(*) FROM tasks", &[]).unwrap(), 2);
    }

    #[test]
    fn test_with_transaction_commits() {
        let db = memory_db();
        db.execute_script("CREATE TABLE tasks (id TEXT PRIMARY KEY)")
            .unwrap();

        db.with_transaction(|db| {
            db.execute("INSERT INTO tasks (id) VALUES (?1)", &[json!("a")])?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.count("SELECT count(*) FROM tasks", &[]).unwrap(), 1);
    }

    #[test]
    fn test_with_transaction_rolls_back_on_error() {
        let db = memory_db();
        db.execute_script("CREATE TABLE tasks (id TEXT PRIMARY KEY)")
            .unwrap();

        let result = db.with_transaction(|db| {
            db.execute("INSERT INTO tasks (id) VALUES (?1)", &[json!("a")])?;
            db.execute("INSERT INTO no_such_table (id) VALUES (?1)", &[json!("b")])?;
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(db.count("SELECT count(*) FROM tasks", &[]).unwrap(), 0);
    }

    #[test]
    fn test_destroy_everything() {
        let db = memory_db();
        db.execute_script(
            "CREATE TABLE tasks (id TEXT PRIMARY KEY);
             CREATE TABLE projects (id TEXT PRIMARY KEY);
             CREATE VIEW open_tasks AS SELECT id FROM tasks;",
        )
        .unwrap();
        db.set_user_version(3).unwrap();

        db.destroy_everything().unwrap();

        assert_eq!(db.user_version().unwrap(), 0);
        assert!(db.all_relations().unwrap().is_empty());
    }

    #[test]
    fn test_get_local() {
        let db = memory_db();
        db.execute_script(
            "CREATE TABLE local_storage (key TEXT PRIMARY KEY, value TEXT);
             INSERT INTO local_storage (key, value) VALUES ('theme', 'dark');",
        )
        .unwrap();

        assert_eq!(db.get_local("theme").unwrap(), Some("dark".to_string()));
        assert_eq!(db.get_local("missing").unwrap(), None);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("app").to_string_lossy().to_string();

        {
            let db = Database::open(&name, None).unwrap();
            db.execute_script("CREATE TABLE tasks (id TEXT PRIMARY KEY)")
                .unwrap();
            db.set_user_version(1).unwrap();
        }

        let db = Database::open(&name, None).unwrap();
        assert_eq!(db.user_version().unwrap(), 1);
        assert!(dir.path().join("app.db").exists());
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path(":memory:"), ":memory:");
        assert_eq!(
            resolve_path("file::memory:?cache=shared"),
            "file::memory:?cache=shared"
        );
        assert_eq!(resolve_path("mydb"), "mydb.db");
        assert_eq!(resolve_path("mydb.db"), "mydb.db");
        assert_eq!(resolve_path("mydb?x=1"), "mydb.db?x=1");
    }

    #[test]
    fn test_shared_memory_names() {
        assert!(is_shared_memory_name(":memory:"));
        assert!(is_shared_memory_name("file:app?mode=memory&cache=shared"));
        assert!(!is_shared_memory_name("app"));
        assert!(!is_shared_memory_name("app.db"));
    }
}
