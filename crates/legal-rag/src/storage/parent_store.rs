//! Parent-Context Resolver (C11, spec §4.11).
//!
//! A read-only, lazily-opened SQLite connection mapping `parent_id ->
//! ParentContext` and `child_chunk_id -> parent_id`, directly grounded on
//! `original_source`'s `parent_store_service.py`: the same URI-mode
//! read-only open, the same two-phase resolution (`resolve_parents` via
//! the join table, `get_parents_by_ids` as a direct lookup used when child
//! ids are reconstructed from the chunk-id grammar), and the same
//! dedup-by-parent behavior. A missing store is not a failure — it
//! degrades to "no expansion", matching the Python service's
//! `is_available()` gate.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};

use crate::types::ParentContext;

pub struct ParentStore {
    db_path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl ParentStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            conn: Mutex::new(None),
        }
    }

    fn open(&self) -> Option<()> {
        let mut guard = self.conn.lock().expect("parent store mutex poisoned");
        if guard.is_some() {
            return Some(());
        }
        if !self.db_path.exists() {
            tracing::info!(path = %self.db_path.display(), "parent store db not found");
            return None;
        }
        let uri = format!("file:{}?mode=ro", self.db_path.display());
        match Connection::open_with_flags(
            &uri,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ) {
            Ok(conn) => {
                tracing::info!(path = %self.db_path.display(), "parent store connected");
                *guard = Some(conn);
                Some(())
            }
            Err(e) => {
                tracing::warn!("failed to open parent store: {}", e);
                None
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.open().is_some()
    }

    /// Phase 1: resolve child chunk ids through `child_parent_map`, joined
    /// against `parents`, deduplicated on `parent_id`.
    pub fn resolve_parents(&self, child_chunk_ids: &[String]) -> Vec<ParentContext> {
        if child_chunk_ids.is_empty() || self.open().is_none() {
            return Vec::new();
        }
        let guard = self.conn.lock().expect("parent store mutex poisoned");
        let conn = guard.as_ref().expect("checked is_some above");

        let placeholders = vec!["?"; child_chunk_ids.len()].join(",");
        let sql = format!(
            "SELECT DISTINCT p.parent_id, p.sfs_nummer, p.law_name, p.kortnamn, p.kapitel, \
             p.kapitel_rubrik, p.full_text, p.child_count, p.references_json \
             FROM child_parent_map cm JOIN parents p ON cm.parent_id = p.parent_id \
             WHERE cm.child_chunk_id IN ({placeholders})"
        );
        run_parent_query(conn, &sql, child_chunk_ids)
    }

    /// Phase 2: fetch parents directly by id, bypassing the child map —
    /// used when child ids are reconstructed from the chunk-id grammar
    /// (§3) rather than taken verbatim from the vector store.
    pub fn get_parents_by_ids(&self, parent_ids: &[String]) -> Vec<ParentContext> {
        if parent_ids.is_empty() || self.open().is_none() {
            return Vec::new();
        }
        let guard = self.conn.lock().expect("parent store mutex poisoned");
        let conn = guard.as_ref().expect("checked is_some above");

        let placeholders = vec!["?"; parent_ids.len()].join(",");
        let sql = format!(
            "SELECT parent_id, sfs_nummer, law_name, kortnamn, kapitel, kapitel_rubrik, \
             full_text, child_count, references_json FROM parents WHERE parent_id IN ({placeholders})"
        );
        run_parent_query(conn, &sql, parent_ids)
    }
}

fn run_parent_query(conn: &Connection, sql: &str, params: &[String]) -> Vec<ParentContext> {
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("parent store query prepare failed: {}", e);
            return Vec::new();
        }
    };
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        let references_json: Option<String> = row.get(8)?;
        let references: Vec<String> = references_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Ok(ParentContext {
            parent_id: row.get(0)?,
            sfs_nummer: row.get(1)?,
            law_name: row.get(2)?,
            kortnamn: row.get(3)?,
            kapitel: row.get(4)?,
            kapitel_rubrik: row.get(5)?,
            full_text: row.get(6)?,
            child_count: row.get(7)?,
            references,
        })
    });

    match rows {
        Ok(mapped) => mapped.filter_map(|r| r.ok()).collect(),
        Err(e) => {
            tracing::warn!("parent store query execution failed: {}", e);
            Vec::new()
        }
    }
}

pub fn db_exists(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_db(path: &Path) {
        let conn = Connection::open(path).expect("open temp db");
        conn.execute_batch(
            "CREATE TABLE parents (
                parent_id TEXT PRIMARY KEY, sfs_nummer TEXT, law_name TEXT, kortnamn TEXT,
                kapitel TEXT, kapitel_rubrik TEXT, full_text TEXT, child_count INTEGER, references_json TEXT
            );
            CREATE TABLE child_parent_map (child_chunk_id TEXT PRIMARY KEY, parent_id TEXT);
            INSERT INTO parents VALUES ('1974:152_2_kap', '1974:152', 'Regeringsformen', 'RF', '2', 'Grundläggande fri- och rättigheter', 'fulltext här', 3, '[]');
            INSERT INTO child_parent_map VALUES ('sfs_1974_152_2kap_1§_abcd', '1974:152_2_kap');
            INSERT INTO child_parent_map VALUES ('sfs_1974_152_2kap_3§_ef01', '1974:152_2_kap');",
        )
        .expect("seed schema");
    }

    #[test]
    fn missing_db_is_unavailable_not_a_failure() {
        let store = ParentStore::new("/nonexistent/path/parents.db");
        assert!(!store.is_available());
        assert!(store.resolve_parents(&["x".to_string()]).is_empty());
    }

    #[test]
    fn resolve_parents_dedups_siblings_from_same_kapitel() {
        let dir = std::env::temp_dir().join(format!("parent-store-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let db_path = dir.join("parents.db");
        seed_db(&db_path);

        let store = ParentStore::new(&db_path);
        let parents = store.resolve_parents(&[
            "sfs_1974_152_2kap_1§_abcd".to_string(),
            "sfs_1974_152_2kap_3§_ef01".to_string(),
        ]);
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].parent_id, "1974:152_2_kap");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn get_parents_by_ids_direct_lookup() {
        let dir = std::env::temp_dir().join(format!("parent-store-test-direct-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let db_path = dir.join("parents.db");
        seed_db(&db_path);

        let store = ParentStore::new(&db_path);
        let parents = store.get_parents_by_ids(&["1974:152_2_kap".to_string()]);
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].law_name, "Regeringsformen");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
