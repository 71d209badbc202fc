use super::{with_id, AssignedRecord, PendingRecord, Store, StoreError};
use crate::model::EntityType;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub const DB_FILE: &str = "flockport.sqlite3";

/// Workspace store: one document table keyed by entity type, plus photos and
/// the fingerprints of archives already imported.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(workspace: &Path) -> anyhow::Result<SqliteStore> {
        std::fs::create_dir_all(workspace)?;
        let conn = Connection::open(workspace.join(DB_FILE))?;
        init_schema(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<SqliteStore> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn count(&self, kind: EntityType) -> Result<usize, StoreError> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM records WHERE entity_type = ?",
            [kind.step_name()],
            |r| r.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS records(
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            seq INTEGER NOT NULL,
            body TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_type_seq ON records(entity_type, seq)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS photos(
            person_id TEXT PRIMARY KEY,
            bytes BLOB NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs(
            fingerprint TEXT PRIMARY KEY,
            started_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

impl Store for SqliteStore {
    fn fetch_all(&self, kind: EntityType) -> Result<Vec<serde_json::Value>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, body FROM records WHERE entity_type = ? ORDER BY seq")?;
        let rows = stmt
            .query_map([kind.step_name()], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(rows.len());
        for (id, body) in rows {
            let doc: serde_json::Value = serde_json::from_str(&body)?;
            out.push(with_id(&doc, &id));
        }
        Ok(out)
    }

    fn create_batch(
        &self,
        kind: EntityType,
        records: &[PendingRecord],
    ) -> Result<Vec<AssignedRecord>, StoreError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let mut seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM records WHERE entity_type = ?",
            [kind.step_name()],
            |r| r.get(0),
        )?;
        let mut assigned = Vec::with_capacity(records.len());
        for rec in records {
            let id = Uuid::new_v4().to_string();
            seq += 1;
            let res = tx.execute(
                "INSERT INTO records(id, entity_type, seq, body) VALUES(?, ?, ?, ?)",
                (&id, kind.step_name(), seq, rec.body.to_string()),
            );
            if let Err(e) = res {
                let _ = tx.rollback();
                return Err(StoreError::Rejected(e.to_string()));
            }
            assigned.push(AssignedRecord {
                id,
                correlation: Some(rec.correlation.clone()),
            });
        }
        tx.commit()?;
        Ok(assigned)
    }

    fn fetch_photo(&self, person_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let bytes = self
            .conn()
            .query_row(
                "SELECT bytes FROM photos WHERE person_id = ?",
                [person_id],
                |r| r.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(bytes)
    }

    fn save_photo(&self, person_id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO photos(person_id, bytes) VALUES(?, ?)
             ON CONFLICT(person_id) DO UPDATE SET bytes = excluded.bytes",
            (person_id, bytes),
        )?;
        Ok(())
    }

    fn claim_import(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO import_runs(fingerprint, started_at) VALUES(?, ?)",
            (fingerprint, &started_at),
        )?;
        Ok(inserted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batches_keep_insertion_order_across_calls() {
        let store = SqliteStore::open_in_memory().expect("open");
        let first = vec![PendingRecord {
            correlation: "1".into(),
            body: json!({ "name": "General" }),
        }];
        let second = vec![
            PendingRecord {
                correlation: "2".into(),
                body: json!({ "name": "Missions" }),
            },
            PendingRecord {
                correlation: "3".into(),
                body: json!({ "name": "Building" }),
            },
        ];
        store.create_batch(EntityType::Fund, &first).expect("first");
        let ids = store.create_batch(EntityType::Fund, &second).expect("second");

        let live = store.fetch_all(EntityType::Fund).expect("fetch");
        let names: Vec<&str> = live.iter().filter_map(|d| d["name"].as_str()).collect();
        assert_eq!(names, vec!["General", "Missions", "Building"]);
        assert_eq!(live[2]["id"], json!(ids[1].id));
        assert_eq!(store.count(EntityType::Fund).expect("count"), 3);
        assert_eq!(store.count(EntityType::Campus).expect("count"), 0);
    }

    #[test]
    fn photos_and_import_claims_persist() {
        let store = SqliteStore::open_in_memory().expect("open");
        store.save_photo("p-1", b"png").expect("save");
        assert_eq!(store.fetch_photo("p-1").expect("fetch"), Some(b"png".to_vec()));
        assert_eq!(store.fetch_photo("p-2").expect("fetch"), None);
        assert!(store.claim_import("f1").expect("claim"));
        assert!(!store.claim_import("f1").expect("claim twice"));
    }
}
