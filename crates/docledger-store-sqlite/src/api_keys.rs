//! API key persistence. Only token hashes ever touch this table.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};

use docledger_core::domain::ApiKey;
use docledger_core::ports::ApiKeyRepository;
use docledger_core::Error;

use crate::db::{encode_ts, map_sqlite_error, parse_ts, Db};

pub struct SqliteApiKeyRepository {
    db: Arc<Db>,
}

impl SqliteApiKeyRepository {
    #[must_use]
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

impl ApiKeyRepository for SqliteApiKeyRepository {
    fn find_by_token_hash(&self, token_hash: &str) -> Result<ApiKey, Error> {
        self.db
            .with_read(|conn| {
                conn.query_row(
                    "SELECT token_hash, tenant_id, name, active, created_at
                     FROM api_keys WHERE token_hash = ?1",
                    [token_hash],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, bool>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(map_sqlite_error)
            })?
            .map(|(token_hash, tenant_id, name, active, created_at)| {
                Ok(ApiKey {
                    token_hash,
                    tenant_id,
                    name,
                    active,
                    created_at: parse_ts(&created_at)?,
                })
            })
            .transpose()?
            .ok_or(Error::NotFound)
    }

    fn upsert(&self, key: ApiKey) -> Result<(), Error> {
        let created_at = encode_ts(key.created_at)?;
        self.db.with_write(|tx| {
            tx.execute(
                "INSERT INTO api_keys (token_hash, tenant_id, name, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(token_hash) DO UPDATE SET
                   tenant_id = excluded.tenant_id,
                   name = excluded.name,
                   active = excluded.active",
                params![key.token_hash, key.tenant_id, key.name, key.active, created_at],
            )
            .map_err(map_sqlite_error)?;
            Ok(())
        })
    }
}
