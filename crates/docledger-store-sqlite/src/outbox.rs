//! Outbox queue status transitions. Rows are created by the record event
//! store; this repository only fetches due work and moves rows between
//! `pending`, `dispatched`, and `dead`.

use std::sync::Arc;

use rusqlite::params;
use time::OffsetDateTime;

use docledger_core::event::{OutboxEvent, OutboxStatus};
use docledger_core::ports::OutboxRepository;
use docledger_core::Error;

use crate::db::{encode_ts, map_sqlite_error, parse_ts, Db};

pub struct SqliteOutboxRepository {
    db: Arc<Db>,
}

impl SqliteOutboxRepository {
    #[must_use]
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

impl OutboxRepository for SqliteOutboxRepository {
    fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>, Error> {
        let limit = if limit == 0 { 50 } else { limit };
        let now = encode_ts(OffsetDateTime::now_utc())?;

        let rows = self.db.with_read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, event_id, tenant_id, topic, payload_json, status, attempts,
                            next_attempt_at, last_error, created_at, dispatched_at
                     FROM outbox_events
                     WHERE status = 'pending' AND next_attempt_at <= ?1
                     ORDER BY id ASC LIMIT ?2",
                )
                .map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(params![now, limit as i64], row_to_raw)
                .map_err(map_sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_error)?;
            Ok(rows)
        })?;

        rows.into_iter().map(raw_to_event).collect()
    }

    fn mark_dispatched(&self, id: i64) -> Result<(), Error> {
        let now = encode_ts(OffsetDateTime::now_utc())?;
        self.db.with_write(|tx| {
            tx.execute(
                "UPDATE outbox_events
                 SET status = 'dispatched', dispatched_at = ?1, last_error = ''
                 WHERE id = ?2",
                params![now, id],
            )
            .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    fn mark_failed(
        &self,
        id: i64,
        attempts: u32,
        next_attempt_at: OffsetDateTime,
        error: &str,
    ) -> Result<(), Error> {
        let next = encode_ts(next_attempt_at)?;
        self.db.with_write(|tx| {
            tx.execute(
                "UPDATE outbox_events
                 SET attempts = ?1, next_attempt_at = ?2, last_error = ?3
                 WHERE id = ?4",
                params![attempts, next, error, id],
            )
            .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    fn mark_dead(&self, id: i64, attempts: u32, error: &str) -> Result<(), Error> {
        self.db.with_write(|tx| {
            tx.execute(
                "UPDATE outbox_events
                 SET status = 'dead', attempts = ?1, last_error = ?2
                 WHERE id = ?3",
                params![attempts, error, id],
            )
            .map_err(map_sqlite_error)?;
            Ok(())
        })
    }
}

struct RawOutboxRow {
    id: i64,
    event_id: String,
    tenant_id: String,
    topic: String,
    payload_json: String,
    status: String,
    attempts: u32,
    next_attempt_at: String,
    last_error: String,
    created_at: String,
    dispatched_at: Option<String>,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOutboxRow> {
    Ok(RawOutboxRow {
        id: row.get(0)?,
        event_id: row.get(1)?,
        tenant_id: row.get(2)?,
        topic: row.get(3)?,
        payload_json: row.get(4)?,
        status: row.get(5)?,
        attempts: row.get(6)?,
        next_attempt_at: row.get(7)?,
        last_error: row.get(8)?,
        created_at: row.get(9)?,
        dispatched_at: row.get(10)?,
    })
}

fn raw_to_event(raw: RawOutboxRow) -> Result<OutboxEvent, Error> {
    let status = OutboxStatus::parse(&raw.status)
        .ok_or_else(|| Error::FatalStore(format!("unknown outbox status {:?}", raw.status)))?;
    Ok(OutboxEvent {
        id: raw.id,
        event_id: raw.event_id,
        tenant_id: raw.tenant_id,
        topic: raw.topic,
        payload_json: raw.payload_json,
        status,
        attempts: raw.attempts,
        next_attempt_at: parse_ts(&raw.next_attempt_at)?,
        last_error: raw.last_error,
        created_at: parse_ts(&raw.created_at)?,
        dispatched_at: raw.dispatched_at.as_deref().map(parse_ts).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;
    use crate::record_events::SqliteRecordEventStore;
    use docledger_core::domain::Record;
    use docledger_core::event::MutationMetadata;
    use docledger_core::ports::RecordMutationStore;
    use serde_json::json;
    use std::time::Duration;

    fn seeded(count: usize) -> (tempfile::TempDir, Arc<Db>, SqliteOutboxRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&dir.path().join("test.sqlite3")).unwrap());
        migrations::run(&db).unwrap();

        let store = SqliteRecordEventStore::new(db.clone());
        for i in 0..count {
            store
                .upsert_with_events(
                    Record::new("t1", "users", format!("u{i}"), json!({"i": i})),
                    MutationMetadata::default(),
                )
                .unwrap();
        }

        (dir, db.clone(), SqliteOutboxRepository::new(db))
    }

    #[test]
    fn fetch_pending_orders_by_id_and_respects_limit() {
        let (_dir, _db, repo) = seeded(3);
        let all = repo.fetch_pending(10).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        let limited = repo.fetch_pending(2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn mark_dispatched_removes_row_from_pending_set() {
        let (_dir, _db, repo) = seeded(2);
        let pending = repo.fetch_pending(10).unwrap();
        repo.mark_dispatched(pending[0].id).unwrap();

        let rest = repo.fetch_pending(10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, pending[1].id);
    }

    #[test]
    fn mark_failed_defers_row_until_next_attempt_time() {
        let (_dir, _db, repo) = seeded(1);
        let pending = repo.fetch_pending(10).unwrap();

        let future = OffsetDateTime::now_utc() + Duration::from_secs(60);
        repo.mark_failed(pending[0].id, 1, future, "publisher down").unwrap();

        assert!(repo.fetch_pending(10).unwrap().is_empty(), "row is not due yet");

        let past = OffsetDateTime::now_utc() - Duration::from_secs(1);
        repo.mark_failed(pending[0].id, 1, past, "publisher down").unwrap();
        let due = repo.fetch_pending(10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 1);
        assert_eq!(due[0].last_error, "publisher down");
    }

    #[test]
    fn mark_dead_removes_row_permanently() {
        let (_dir, db, repo) = seeded(1);
        let pending = repo.fetch_pending(10).unwrap();
        repo.mark_dead(pending[0].id, 5, "gave up").unwrap();

        assert!(repo.fetch_pending(10).unwrap().is_empty());

        let (status, attempts, last_error): (String, u32, String) = db
            .with_read(|conn| {
                conn.query_row(
                    "SELECT status, attempts, last_error FROM outbox_events WHERE id = ?1",
                    [pending[0].id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(map_sqlite_error)
            })
            .unwrap();
        assert_eq!(status, "dead");
        assert_eq!(attempts, 5);
        assert_eq!(last_error, "gave up");
    }
}
