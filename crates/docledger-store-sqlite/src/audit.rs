//! Read access to the append-only `audit_events` table.

use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter};

use docledger_core::event::{AuditFilter, AuditTrailEvent};
use docledger_core::ports::AuditTrailRepository;
use docledger_core::Error;

use crate::db::{map_sqlite_error, parse_json, parse_ts, Db};

const AUDIT_COLUMNS: &str = "id, event_id, schema_version, tenant_id, aggregate_type, \
     aggregate_id, aggregate_version, action, actor, source, request_id, correlation_id, \
     causation_id, idempotency_key, before_json, after_json, changed_fields_json, occurred_at";

pub struct SqliteAuditTrailRepository {
    db: Arc<Db>,
}

impl SqliteAuditTrailRepository {
    #[must_use]
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

impl AuditTrailRepository for SqliteAuditTrailRepository {
    fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditTrailEvent>, Error> {
        let rows = self.db.with_read(|conn| {
            let mut sql =
                format!("SELECT {AUDIT_COLUMNS} FROM audit_events WHERE tenant_id = ?1");
            let mut params: Vec<SqlValue> = vec![SqlValue::Text(filter.tenant_id.clone())];

            if !filter.aggregate_type.is_empty() {
                params.push(SqlValue::Text(filter.aggregate_type.clone()));
                sql.push_str(&format!(" AND aggregate_type = ?{}", params.len()));
            }
            if !filter.aggregate_id.is_empty() {
                params.push(SqlValue::Text(filter.aggregate_id.clone()));
                sql.push_str(&format!(" AND aggregate_id = ?{}", params.len()));
            }
            if !filter.action.is_empty() {
                params.push(SqlValue::Text(filter.action.clone()));
                sql.push_str(&format!(" AND action = ?{}", params.len()));
            }
            if filter.after_id > 0 {
                params.push(SqlValue::Integer(filter.after_id));
                sql.push_str(&format!(" AND id < ?{}", params.len()));
            }

            params.push(SqlValue::Integer(filter.limit as i64));
            sql.push_str(&format!(" ORDER BY id DESC LIMIT ?{}", params.len()));

            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(params_from_iter(params), row_to_raw)
                .map_err(map_sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_error)?;
            Ok(rows)
        })?;

        rows.into_iter().map(raw_to_event).collect()
    }

    fn list_since(
        &self,
        tenant_id: &str,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<AuditTrailEvent>, Error> {
        let rows = self.db.with_read(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_events
                     WHERE tenant_id = ?1 AND id > ?2
                     ORDER BY id ASC LIMIT ?3"
                ))
                .map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(params![tenant_id, since_id, limit as i64], row_to_raw)
                .map_err(map_sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_error)?;
            Ok(rows)
        })?;

        rows.into_iter().map(raw_to_event).collect()
    }
}

#[allow(clippy::type_complexity)]
struct RawAuditRow {
    id: i64,
    event_id: String,
    schema_version: u32,
    tenant_id: String,
    aggregate_type: String,
    aggregate_id: String,
    aggregate_version: i64,
    action: String,
    actor: String,
    source: String,
    request_id: String,
    correlation_id: String,
    causation_id: String,
    idempotency_key: String,
    before_json: Option<String>,
    after_json: Option<String>,
    changed_fields_json: Option<String>,
    occurred_at: String,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAuditRow> {
    Ok(RawAuditRow {
        id: row.get(0)?,
        event_id: row.get(1)?,
        schema_version: row.get(2)?,
        tenant_id: row.get(3)?,
        aggregate_type: row.get(4)?,
        aggregate_id: row.get(5)?,
        aggregate_version: row.get(6)?,
        action: row.get(7)?,
        actor: row.get(8)?,
        source: row.get(9)?,
        request_id: row.get(10)?,
        correlation_id: row.get(11)?,
        causation_id: row.get(12)?,
        idempotency_key: row.get(13)?,
        before_json: row.get(14)?,
        after_json: row.get(15)?,
        changed_fields_json: row.get(16)?,
        occurred_at: row.get(17)?,
    })
}

fn raw_to_event(raw: RawAuditRow) -> Result<AuditTrailEvent, Error> {
    Ok(AuditTrailEvent {
        id: raw.id,
        event_id: raw.event_id,
        schema_version: raw.schema_version,
        tenant_id: raw.tenant_id,
        aggregate_type: raw.aggregate_type,
        aggregate_id: raw.aggregate_id,
        aggregate_version: raw.aggregate_version,
        action: raw.action,
        actor: raw.actor,
        source: raw.source,
        request_id: raw.request_id,
        correlation_id: raw.correlation_id,
        causation_id: raw.causation_id,
        idempotency_key: raw.idempotency_key,
        before: raw.before_json.as_deref().map(parse_json).transpose()?,
        after: raw.after_json.as_deref().map(parse_json).transpose()?,
        changed_fields: raw.changed_fields_json.as_deref().map(parse_json).transpose()?,
        occurred_at: parse_ts(&raw.occurred_at)?,
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

    fn seeded() -> (tempfile::TempDir, SqliteAuditTrailRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open(&dir.path().join("test.sqlite3")).unwrap());
        migrations::run(&db).unwrap();

        let store = SqliteRecordEventStore::new(db.clone());
        let meta = MutationMetadata::default;
        store.upsert_with_events(Record::new("t1", "users", "u1", json!(1)), meta()).unwrap();
        store.upsert_with_events(Record::new("t1", "users", "u1", json!(2)), meta()).unwrap();
        store.upsert_with_events(Record::new("t1", "orders", "o1", json!(1)), meta()).unwrap();
        store.upsert_with_events(Record::new("t2", "users", "x1", json!(1)), meta()).unwrap();

        (dir, SqliteAuditTrailRepository::new(db))
    }

    #[test]
    fn list_is_descending_and_tenant_scoped() {
        let (_dir, repo) = seeded();
        let events = repo
            .list(&AuditFilter { tenant_id: "t1".into(), limit: 10, ..AuditFilter::default() })
            .unwrap();

        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].id > w[1].id));
        assert!(events.iter().all(|e| e.tenant_id == "t1"));
    }

    #[test]
    fn list_applies_aggregate_and_action_filters() {
        let (_dir, repo) = seeded();

        let users = repo
            .list(&AuditFilter {
                tenant_id: "t1".into(),
                aggregate_type: "users".into(),
                limit: 10,
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(users.len(), 2);

        let created = repo
            .list(&AuditFilter {
                tenant_id: "t1".into(),
                action: "record.created".into(),
                limit: 10,
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(created.len(), 2);
    }

    #[test]
    fn list_after_id_pages_downward() {
        let (_dir, repo) = seeded();
        let all = repo
            .list(&AuditFilter { tenant_id: "t1".into(), limit: 10, ..AuditFilter::default() })
            .unwrap();
        let cursor = all[0].id;

        let older = repo
            .list(&AuditFilter {
                tenant_id: "t1".into(),
                after_id: cursor,
                limit: 10,
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(older.len(), 2);
        assert!(older.iter().all(|e| e.id < cursor));
    }

    #[test]
    fn list_since_is_ascending_and_exclusive() {
        let (_dir, repo) = seeded();
        let page = repo.list_since("t1", 0, 10).unwrap();
        assert_eq!(page.len(), 3);
        assert!(page.windows(2).all(|w| w[0].id < w[1].id));

        let rest = repo.list_since("t1", page[0].id, 10).unwrap();
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|e| e.id > page[0].id));
    }
}
