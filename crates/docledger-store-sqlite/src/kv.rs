//! KV repository over the `kv_entries` table.

use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use docledger_core::domain::{Item, ScanFilter};
use docledger_core::ports::KvRepository;
use docledger_core::Error;
use time::OffsetDateTime;

use crate::db::{encode_json, encode_ts, map_sqlite_error, parse_json, parse_ts, Db};

pub struct SqliteKvRepository {
    db: Arc<Db>,
}

impl SqliteKvRepository {
    #[must_use]
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

impl KvRepository for SqliteKvRepository {
    fn upsert(&self, item: Item) -> Result<Item, Error> {
        let value = encode_json(&item.value)?;
        let now = encode_ts(OffsetDateTime::now_utc())?;

        self.db.with_write(|tx| {
            tx.execute(
                "INSERT INTO kv_entries (key, category, value, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                   category = excluded.category,
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![item.key, item.category, value, now],
            )
            .map_err(map_sqlite_error)?;

            load_item(tx, &item.key)?
                .ok_or_else(|| Error::FatalStore("entry missing after upsert".into()))
        })
    }

    fn get(&self, key: &str) -> Result<Item, Error> {
        self.db
            .with_read(|conn| load_item(conn, key))?
            .ok_or(Error::NotFound)
    }

    fn delete(&self, key: &str) -> Result<bool, Error> {
        self.db.with_write(|tx| {
            let affected = tx
                .execute("DELETE FROM kv_entries WHERE key = ?1", [key])
                .map_err(map_sqlite_error)?;
            Ok(affected > 0)
        })
    }

    fn scan(&self, filter: &ScanFilter) -> Result<Vec<Item>, Error> {
        self.db.with_read(|conn| {
            let mut sql = String::from(
                "SELECT key, category, value, created_at, updated_at FROM kv_entries",
            );
            let mut clauses: Vec<String> = Vec::new();
            let mut params: Vec<SqlValue> = Vec::new();

            if !filter.category.is_empty() {
                params.push(SqlValue::Text(filter.category.clone()));
                clauses.push(format!("category = ?{}", params.len()));
            }
            if !filter.prefix.is_empty() {
                params.push(SqlValue::Text(filter.prefix.clone()));
                clauses.push(format!("key >= ?{}", params.len()));
                params.push(SqlValue::Text(format!("{}\u{ffff}", filter.prefix)));
                clauses.push(format!("key < ?{}", params.len()));
            }
            if !filter.after_key.is_empty() {
                params.push(SqlValue::Text(filter.after_key.clone()));
                clauses.push(format!("key > ?{}", params.len()));
            }

            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            params.push(SqlValue::Integer(filter.limit as i64));
            sql.push_str(&format!(" ORDER BY key ASC LIMIT ?{}", params.len()));

            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(params_from_iter(params), row_to_raw)
                .map_err(map_sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_error)?;

            rows.into_iter().map(raw_to_item).collect()
        })
    }
}

type RawEntry = (String, String, String, String, String);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn raw_to_item(raw: RawEntry) -> Result<Item, Error> {
    let (key, category, value, created_at, updated_at) = raw;
    Ok(Item {
        key,
        category,
        value: parse_json(&value)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub(crate) fn load_item(conn: &Connection, key: &str) -> Result<Option<Item>, Error> {
    conn.query_row(
        "SELECT key, category, value, created_at, updated_at FROM kv_entries WHERE key = ?1",
        [key],
        row_to_raw,
    )
    .optional()
    .map_err(map_sqlite_error)?
    .map(raw_to_item)
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;
    use serde_json::json;

    fn repo() -> (tempfile::TempDir, SqliteKvRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&dir.path().join("test.sqlite3")).unwrap());
        migrations::run(&db).unwrap();
        (dir, SqliteKvRepository::new(db))
    }

    #[test]
    fn upsert_then_get_round_trips_value() {
        let (_dir, repo) = repo();
        let stored = repo
            .upsert(Item::new("k1", "cat", json!({"a": [1, 2, 3]})))
            .unwrap();
        assert_eq!(stored.value, json!({"a": [1, 2, 3]}));

        let fetched = repo.get("k1").unwrap();
        assert_eq!(fetched.value, stored.value);
        assert_eq!(fetched.created_at, stored.created_at);
    }

    #[test]
    fn upsert_preserves_created_at_and_advances_updated_at() {
        let (_dir, repo) = repo();
        let first = repo.upsert(Item::new("k1", "cat", json!(1))).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = repo.upsert(Item::new("k1", "cat", json!(2))).unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.value, json!(2));
    }

    #[test]
    fn get_missing_returns_not_found() {
        let (_dir, repo) = repo();
        assert!(matches!(repo.get("nope"), Err(Error::NotFound)));
    }

    #[test]
    fn delete_reports_whether_a_row_existed() {
        let (_dir, repo) = repo();
        repo.upsert(Item::new("k1", "cat", json!(1))).unwrap();
        assert!(repo.delete("k1").unwrap());
        assert!(!repo.delete("k1").unwrap());
    }

    #[test]
    fn scan_filters_by_category_prefix_and_cursor() {
        let (_dir, repo) = repo();
        for (key, category) in [
            ("a/1", "a"),
            ("a/2", "a"),
            ("a/3", "a"),
            ("b/1", "b"),
        ] {
            repo.upsert(Item::new(key, category, json!(null))).unwrap();
        }

        let all_a = repo
            .scan(&ScanFilter { category: "a".into(), limit: 10, ..ScanFilter::default() })
            .unwrap();
        assert_eq!(
            all_a.iter().map(|i| i.key.as_str()).collect::<Vec<_>>(),
            vec!["a/1", "a/2", "a/3"]
        );

        let prefixed = repo
            .scan(&ScanFilter { prefix: "a/".into(), limit: 10, ..ScanFilter::default() })
            .unwrap();
        assert_eq!(prefixed.len(), 3);

        let after = repo
            .scan(&ScanFilter {
                prefix: "a/".into(),
                after_key: "a/1".into(),
                limit: 10,
                ..ScanFilter::default()
            })
            .unwrap();
        assert_eq!(
            after.iter().map(|i| i.key.as_str()).collect::<Vec<_>>(),
            vec!["a/2", "a/3"]
        );

        let limited = repo
            .scan(&ScanFilter { prefix: "a/".into(), limit: 2, ..ScanFilter::default() })
            .unwrap();
        assert_eq!(limited.len(), 2);
    }
}
