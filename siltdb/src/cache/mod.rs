use std::collections::{HashMap, HashSet};

/// Session-scoped ledger of record ids known to exist, keyed by table.
///
/// This tracks presence only, never row contents: an entry means "this row
/// has already been materialized in this session, a bare id is enough".
/// There is no eviction by size or time — entries leave only through
/// [`RecordCache::evict`] or a full [`RecordCache::clear`] on reset.
#[derive(Debug, Default)]
pub struct RecordCache {
    tables: HashMap<String, HashSet<String>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the row was already observed to exist in this session.
    pub fn is_cached(&self, table: &str, id: &str) -> bool {
        self.tables.get(table).is_some_and(|ids| ids.contains(id))
    }

    /// Record that a row is known to exist. Idempotent.
    pub fn mark_cached(&mut self, table: &str, id: &str) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string());
    }

    /// Forget a row. No-op when the table or id was never cached.
    pub fn evict(&mut self, table: &str, id: &str) {
        if let Some(ids) = self.tables.get_mut(table) {
            ids.remove(id);
        }
    }

    /// Drop every entry. Called on destructive reset.
    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
