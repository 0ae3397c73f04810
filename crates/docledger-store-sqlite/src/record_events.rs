//! Event-atomic record store.
//!
//! Each mutation commits three effects in one writer transaction: the state
//! change on `kv_entries`, an append to `audit_events`, and an enqueue on
//! `outbox_events`. The transaction boundary is the atomicity guarantee;
//! there are no compensating actions.

use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use docledger_core::domain::{split_json_path, Record, RecordListFilter};
use docledger_core::event::{
    outbox_topic, EventEnvelope, MutationMetadata, CURRENT_EVENT_SCHEMA_VERSION,
    EVENT_RECORD_CREATED, EVENT_RECORD_DELETED, EVENT_RECORD_UPDATED,
};
use docledger_core::ports::RecordMutationStore;
use docledger_core::Error;

use crate::db::{encode_json, encode_ts, map_sqlite_error, parse_json, parse_ts, Db};

pub struct SqliteRecordEventStore {
    db: Arc<Db>,
}

impl SqliteRecordEventStore {
    #[must_use]
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

struct StoredEntry {
    value: String,
    created_at: String,
    updated_at: String,
}

impl RecordMutationStore for SqliteRecordEventStore {
    fn upsert_with_events(&self, record: Record, meta: MutationMetadata) -> Result<Record, Error> {
        let meta = meta.normalize();
        let occurred_at = meta.occurred_at.unwrap_or_else(OffsetDateTime::now_utc);
        let data_json = encode_json(&record.data)?;

        self.db.with_write(|tx| {
            let key = Record::storage_key(&record.tenant_id, &record.collection, &record.id);
            let category = Record::storage_category(&record.tenant_id, &record.collection);

            let before = load_entry(tx, &key)?;
            let now = encode_ts(occurred_at)?;

            tx.execute(
                "INSERT INTO kv_entries (key, category, value, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                   category = excluded.category,
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, category, data_json, now],
            )
            .map_err(map_sqlite_error)?;

            let after = load_entry(tx, &key)?
                .ok_or_else(|| Error::FatalStore("record missing after upsert".into()))?;
            let after_value = parse_json(&after.value)?;

            let event_type = if before.is_none() {
                EVENT_RECORD_CREATED
            } else {
                EVENT_RECORD_UPDATED
            };
            let aggregate_version =
                next_aggregate_version(tx, &record.tenant_id, &record.collection, &record.id)?;

            let envelope = EventEnvelope {
                event_id: Uuid::new_v4().to_string(),
                event_type: event_type.to_string(),
                schema_version: CURRENT_EVENT_SCHEMA_VERSION,
                tenant_id: record.tenant_id.clone(),
                aggregate_type: record.collection.clone(),
                aggregate_id: record.id.clone(),
                aggregate_version,
                occurred_at,
                correlation_id: meta.correlation_id.clone(),
                causation_id: meta.causation_id.clone(),
                actor: meta.actor.clone(),
                source: meta.source.clone(),
                payload: json!({
                    "record_id": record.id.clone(),
                    "collection": record.collection.clone(),
                    "data": after_value.clone(),
                }),
            };

            insert_audit_and_outbox(
                tx,
                &meta,
                before.as_ref().map(|e| e.value.as_str()),
                Some(after.value.as_str()),
                &envelope,
            )?;

            Ok(Record {
                tenant_id: record.tenant_id.clone(),
                collection: record.collection.clone(),
                id: record.id.clone(),
                data: after_value,
                created_at: parse_ts(&after.created_at)?,
                updated_at: parse_ts(&after.updated_at)?,
            })
        })
    }

    fn delete_with_events(
        &self,
        tenant_id: &str,
        collection: &str,
        id: &str,
        meta: MutationMetadata,
    ) -> Result<bool, Error> {
        let meta = meta.normalize();
        let occurred_at = meta.occurred_at.unwrap_or_else(OffsetDateTime::now_utc);

        self.db.with_write(|tx| {
            let key = Record::storage_key(tenant_id, collection, id);

            let Some(before) = load_entry(tx, &key)? else {
                // Nothing to delete: commit without audit or outbox rows.
                return Ok(false);
            };

            tx.execute("DELETE FROM kv_entries WHERE key = ?1", [&key])
                .map_err(map_sqlite_error)?;

            let aggregate_version = next_aggregate_version(tx, tenant_id, collection, id)?;
            let envelope = EventEnvelope {
                event_id: Uuid::new_v4().to_string(),
                event_type: EVENT_RECORD_DELETED.to_string(),
                schema_version: CURRENT_EVENT_SCHEMA_VERSION,
                tenant_id: tenant_id.to_string(),
                aggregate_type: collection.to_string(),
                aggregate_id: id.to_string(),
                aggregate_version,
                occurred_at,
                correlation_id: meta.correlation_id.clone(),
                causation_id: meta.causation_id.clone(),
                actor: meta.actor.clone(),
                source: meta.source.clone(),
                payload: json!({
                    "record_id": id,
                    "collection": collection,
                }),
            };

            insert_audit_and_outbox(tx, &meta, Some(before.value.as_str()), None, &envelope)?;
            Ok(true)
        })
    }

    fn get(&self, tenant_id: &str, collection: &str, id: &str) -> Result<Record, Error> {
        let key = Record::storage_key(tenant_id, collection, id);
        let entry = self
            .db
            .with_read(|conn| load_entry(conn, &key))?
            .ok_or(Error::NotFound)?;

        Ok(Record {
            tenant_id: tenant_id.to_string(),
            collection: collection.to_string(),
            id: id.to_string(),
            data: parse_json(&entry.value)?,
            created_at: parse_ts(&entry.created_at)?,
            updated_at: parse_ts(&entry.updated_at)?,
        })
    }

    fn list(
        &self,
        tenant_id: &str,
        collection: &str,
        filter: &RecordListFilter,
    ) -> Result<Vec<Record>, Error> {
        let key_prefix = Record::storage_prefix(tenant_id, collection);

        let rows = self.db.with_read(|conn| {
            let mut sql = String::from(
                "SELECT key, value, created_at, updated_at FROM kv_entries WHERE category = ?1",
            );
            let mut params: Vec<SqlValue> = vec![SqlValue::Text(Record::storage_category(
                tenant_id, collection,
            ))];

            let range_start = format!("{key_prefix}{}", filter.prefix);
            params.push(SqlValue::Text(range_start.clone()));
            sql.push_str(&format!(" AND key >= ?{}", params.len()));
            params.push(SqlValue::Text(format!("{range_start}\u{ffff}")));
            sql.push_str(&format!(" AND key < ?{}", params.len()));

            if !filter.after.is_empty() {
                params.push(SqlValue::Text(format!("{key_prefix}{}", filter.after)));
                sql.push_str(&format!(" AND key > ?{}", params.len()));
            }

            if !filter.json.path.is_empty() {
                let json_path = sqlite_json_path(&filter.json.path).ok_or(Error::InvalidFilter)?;
                match filter.json.op.as_str() {
                    "eq" => {
                        params.push(SqlValue::Text(json_path));
                        let path_index = params.len();
                        params.push(SqlValue::Text(filter.json.value.clone()));
                        sql.push_str(&format!(
                            " AND CAST(json_extract(value, ?{path_index}) AS TEXT) = ?{}",
                            params.len()
                        ));
                    }
                    "ne" => {
                        params.push(SqlValue::Text(json_path));
                        let path_index = params.len();
                        params.push(SqlValue::Text(filter.json.value.clone()));
                        sql.push_str(&format!(
                            " AND CAST(json_extract(value, ?{path_index}) AS TEXT) <> ?{}",
                            params.len()
                        ));
                    }
                    "contains" => {
                        params.push(SqlValue::Text(json_path));
                        let path_index = params.len();
                        params.push(SqlValue::Text(filter.json.value.clone()));
                        sql.push_str(&format!(
                            " AND instr(lower(CAST(json_extract(value, ?{path_index}) AS TEXT)), lower(?{})) > 0",
                            params.len()
                        ));
                    }
                    "exists" => {
                        params.push(SqlValue::Text(json_path));
                        sql.push_str(&format!(
                            " AND json_type(value, ?{}) IS NOT NULL",
                            params.len()
                        ));
                    }
                    _ => return Err(Error::InvalidFilter),
                }
            }

            params.push(SqlValue::Integer(filter.limit as i64));
            sql.push_str(&format!(" ORDER BY key ASC LIMIT ?{}", params.len()));

            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(params_from_iter(params), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(map_sqlite_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_error)?;
            Ok(rows)
        })?;

        let mut records = Vec::with_capacity(rows.len());
        for (key, value, created_at, updated_at) in rows {
            let Some(id) = key.strip_prefix(&key_prefix) else {
                continue;
            };
            records.push(Record {
                tenant_id: tenant_id.to_string(),
                collection: collection.to_string(),
                id: id.to_string(),
                data: parse_json(&value)?,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_ts(&updated_at)?,
            });
        }
        Ok(records)
    }
}

fn load_entry(conn: &Connection, key: &str) -> Result<Option<StoredEntry>, Error> {
    conn.query_row(
        "SELECT value, created_at, updated_at FROM kv_entries WHERE key = ?1",
        [key],
        |row| {
            Ok(StoredEntry {
                value: row.get(0)?,
                created_at: row.get(1)?,
                updated_at: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(map_sqlite_error)
}

/// Next `aggregate_version` for an aggregate, derived from the audit stream
/// inside the same write transaction that appends the event.
fn next_aggregate_version(
    tx: &Transaction<'_>,
    tenant_id: &str,
    collection: &str,
    id: &str,
) -> Result<i64, Error> {
    let max: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(aggregate_version), 0) FROM audit_events
             WHERE tenant_id = ?1 AND aggregate_type = ?2 AND aggregate_id = ?3",
            params![tenant_id, collection, id],
            |row| row.get(0),
        )
        .map_err(map_sqlite_error)?;
    Ok(max + 1)
}

fn insert_audit_and_outbox(
    tx: &Transaction<'_>,
    meta: &MutationMetadata,
    before_json: Option<&str>,
    after_json: Option<&str>,
    envelope: &EventEnvelope,
) -> Result<(), Error> {
    let changed = before_json.unwrap_or_default() != after_json.unwrap_or_default();
    let changed_json = json!({ "changed": changed }).to_string();
    let occurred_at = encode_ts(envelope.occurred_at)?;

    tx.execute(
        "INSERT INTO audit_events (event_id, schema_version, tenant_id, aggregate_type,
            aggregate_id, aggregate_version, action, actor, source, request_id,
            correlation_id, causation_id, idempotency_key, before_json, after_json,
            changed_fields_json, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            envelope.event_id,
            envelope.schema_version,
            envelope.tenant_id,
            envelope.aggregate_type,
            envelope.aggregate_id,
            envelope.aggregate_version,
            envelope.event_type,
            meta.actor,
            meta.source,
            meta.request_id,
            meta.correlation_id,
            meta.causation_id,
            meta.idempotency_key,
            before_json,
            after_json,
            changed_json,
            occurred_at,
        ],
    )
    .map_err(map_sqlite_error)?;

    let payload = serde_json::to_string(envelope)
        .map_err(|err| Error::FatalStore(format!("marshal outbox payload: {err}")))?;

    tx.execute(
        "INSERT INTO outbox_events (event_id, tenant_id, topic, payload_json, status,
            attempts, next_attempt_at, last_error, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, '', ?5)",
        params![
            envelope.event_id,
            envelope.tenant_id,
            outbox_topic(&envelope.tenant_id, &envelope.event_type),
            payload,
            occurred_at,
        ],
    )
    .map_err(map_sqlite_error)?;

    Ok(())
}

/// Convert a validated dot path into a SQLite JSON path with every segment
/// quoted, e.g. `customer.first-name` → `$."customer"."first-name"`.
fn sqlite_json_path(path: &str) -> Option<String> {
    let segments = split_json_path(path)?;
    let mut out = String::from("$");
    for segment in segments {
        out.push_str(&format!(".\"{segment}\""));
    }
    Some(out)
}
