//! Persistence for per-collection JSON Schema documents.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use time::OffsetDateTime;

use docledger_core::domain::CollectionSchema;
use docledger_core::ports::CollectionSchemaRepository;
use docledger_core::Error;

use crate::db::{encode_json, encode_ts, map_sqlite_error, parse_json, parse_ts, Db};

pub struct SqliteCollectionSchemaRepository {
    db: Arc<Db>,
}

impl SqliteCollectionSchemaRepository {
    #[must_use]
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

impl CollectionSchemaRepository for SqliteCollectionSchemaRepository {
    fn upsert(&self, schema: CollectionSchema) -> Result<CollectionSchema, Error> {
        let schema_json = encode_json(&schema.schema)?;
        let now = encode_ts(OffsetDateTime::now_utc())?;

        self.db.with_write(|tx| {
            tx.execute(
                "INSERT INTO collection_schemas (tenant_id, collection, schema_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(tenant_id, collection) DO UPDATE SET
                   schema_json = excluded.schema_json,
                   updated_at = excluded.updated_at",
                params![schema.tenant_id, schema.collection, schema_json, now],
            )
            .map_err(map_sqlite_error)?;

            load_schema(tx, &schema.tenant_id, &schema.collection)?
                .ok_or_else(|| Error::FatalStore("schema missing after upsert".into()))
        })
    }

    fn get(&self, tenant_id: &str, collection: &str) -> Result<CollectionSchema, Error> {
        self.db
            .with_read(|conn| load_schema(conn, tenant_id, collection))?
            .ok_or(Error::NotFound)
    }

    fn delete(&self, tenant_id: &str, collection: &str) -> Result<bool, Error> {
        self.db.with_write(|tx| {
            let affected = tx
                .execute(
                    "DELETE FROM collection_schemas WHERE tenant_id = ?1 AND collection = ?2",
                    params![tenant_id, collection],
                )
                .map_err(map_sqlite_error)?;
            Ok(affected > 0)
        })
    }
}

fn load_schema(
    conn: &rusqlite::Connection,
    tenant_id: &str,
    collection: &str,
) -> Result<Option<CollectionSchema>, Error> {
    conn.query_row(
        "SELECT tenant_id, collection, schema_json, created_at, updated_at
         FROM collection_schemas WHERE tenant_id = ?1 AND collection = ?2",
        params![tenant_id, collection],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        },
    )
    .optional()
    .map_err(map_sqlite_error)?
    .map(|(tenant_id, collection, schema_json, created_at, updated_at)| {
        Ok(CollectionSchema {
            tenant_id,
            collection,
            schema: parse_json(&schema_json)?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    })
    .transpose()
}
