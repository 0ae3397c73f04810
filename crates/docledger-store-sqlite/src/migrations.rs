//! Forward-only, idempotent schema migrations.
//!
//! Applied versions are recorded in `schema_migrations`; re-running the
//! runner on an up-to-date database is a no-op.

use rusqlite::params;
use time::OffsetDateTime;

use docledger_core::Error;

use crate::db::{encode_ts, map_sqlite_error, Db};

const CREATE_MIGRATIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r#"
CREATE TABLE kv_entries (
  key TEXT PRIMARY KEY,
  category TEXT NOT NULL,
  value TEXT NOT NULL CHECK (json_valid(value)),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX idx_kv_entries_category_key ON kv_entries(category, key);

CREATE TABLE api_keys (
  token_hash TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  name TEXT NOT NULL,
  active INTEGER NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE audit_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  event_id TEXT NOT NULL,
  schema_version INTEGER NOT NULL,
  tenant_id TEXT NOT NULL,
  aggregate_type TEXT NOT NULL,
  aggregate_id TEXT NOT NULL,
  aggregate_version INTEGER NOT NULL,
  action TEXT NOT NULL,
  actor TEXT NOT NULL,
  source TEXT NOT NULL,
  request_id TEXT NOT NULL,
  correlation_id TEXT NOT NULL,
  causation_id TEXT NOT NULL,
  idempotency_key TEXT NOT NULL,
  before_json TEXT,
  after_json TEXT,
  changed_fields_json TEXT,
  occurred_at TEXT NOT NULL
);

CREATE INDEX idx_audit_events_tenant_occurred
  ON audit_events(tenant_id, occurred_at DESC, id DESC);
CREATE INDEX idx_audit_events_aggregate
  ON audit_events(tenant_id, aggregate_type, aggregate_id, id DESC);
CREATE INDEX idx_audit_events_action
  ON audit_events(tenant_id, action, id DESC);

-- The audit trail is append-only; the store itself rejects rewrites.
CREATE TRIGGER audit_events_block_update
BEFORE UPDATE ON audit_events
BEGIN
  SELECT RAISE(ABORT, 'audit events are append-only');
END;

CREATE TRIGGER audit_events_block_delete
BEFORE DELETE ON audit_events
BEGIN
  SELECT RAISE(ABORT, 'audit events are append-only');
END;

CREATE TABLE outbox_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  event_id TEXT NOT NULL UNIQUE,
  tenant_id TEXT NOT NULL,
  topic TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('pending', 'dispatched', 'dead')),
  attempts INTEGER NOT NULL,
  next_attempt_at TEXT NOT NULL,
  last_error TEXT NOT NULL,
  created_at TEXT NOT NULL,
  dispatched_at TEXT
);

CREATE INDEX idx_outbox_events_due ON outbox_events(status, next_attempt_at, id);
CREATE INDEX idx_outbox_events_tenant ON outbox_events(tenant_id, status, id);

CREATE TABLE collection_schemas (
  tenant_id TEXT NOT NULL,
  collection TEXT NOT NULL,
  schema_json TEXT NOT NULL CHECK (json_valid(schema_json)),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (tenant_id, collection)
);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_001_SQL)];

/// Apply all pending migrations inside one write transaction.
pub fn run(db: &Db) -> Result<(), Error> {
    db.with_write(|tx| {
        tx.execute_batch(CREATE_MIGRATIONS_TABLE)
            .map_err(map_sqlite_error)?;

        for (version, sql) in MIGRATIONS {
            let applied: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
                    [version],
                    |row| row.get(0),
                )
                .map_err(map_sqlite_error)?;
            if applied {
                continue;
            }

            tx.execute_batch(sql).map_err(map_sqlite_error)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, encode_ts(OffsetDateTime::now_utc())?],
            )
            .map_err(map_sqlite_error)?;
        }

        Ok(())
    })
}
