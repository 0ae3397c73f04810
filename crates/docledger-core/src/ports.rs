//! Repository and publisher contracts implemented by the storage and
//! delivery adapters.

use time::OffsetDateTime;

use crate::domain::{ApiKey, CollectionSchema, Item, Record, RecordListFilter, ScanFilter};
use crate::error::Error;
use crate::event::{AuditFilter, AuditTrailEvent, EventEnvelope, MutationMetadata, OutboxEvent};

pub trait KvRepository: Send + Sync {
    fn upsert(&self, item: Item) -> Result<Item, Error>;
    fn get(&self, key: &str) -> Result<Item, Error>;
    fn delete(&self, key: &str) -> Result<bool, Error>;
    fn scan(&self, filter: &ScanFilter) -> Result<Vec<Item>, Error>;
}

/// Event-atomic record mutations: state change, audit append, and outbox
/// enqueue commit together or not at all.
pub trait RecordMutationStore: Send + Sync {
    fn upsert_with_events(&self, record: Record, meta: MutationMetadata) -> Result<Record, Error>;

    /// Returns `false` without writing any event rows when there is nothing
    /// to delete.
    fn delete_with_events(
        &self,
        tenant_id: &str,
        collection: &str,
        id: &str,
        meta: MutationMetadata,
    ) -> Result<bool, Error>;

    fn get(&self, tenant_id: &str, collection: &str, id: &str) -> Result<Record, Error>;

    fn list(
        &self,
        tenant_id: &str,
        collection: &str,
        filter: &RecordListFilter,
    ) -> Result<Vec<Record>, Error>;
}

pub trait AuditTrailRepository: Send + Sync {
    /// API-facing listing: descending by `id`, `after_id` as a strict upper
    /// bound on returned ids.
    fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditTrailEvent>, Error>;

    /// Replay paging: ascending by `id`, rows with `id > since_id` only.
    fn list_since(
        &self,
        tenant_id: &str,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<AuditTrailEvent>, Error>;
}

pub trait OutboxRepository: Send + Sync {
    /// Pending rows due now (`next_attempt_at <= now`), ascending by `id`.
    fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>, Error>;

    fn mark_dispatched(&self, id: i64) -> Result<(), Error>;

    fn mark_failed(
        &self,
        id: i64,
        attempts: u32,
        next_attempt_at: OffsetDateTime,
        error: &str,
    ) -> Result<(), Error>;

    fn mark_dead(&self, id: i64, attempts: u32, error: &str) -> Result<(), Error>;
}

pub trait CollectionSchemaRepository: Send + Sync {
    fn upsert(&self, schema: CollectionSchema) -> Result<CollectionSchema, Error>;
    fn get(&self, tenant_id: &str, collection: &str) -> Result<CollectionSchema, Error>;
    fn delete(&self, tenant_id: &str, collection: &str) -> Result<bool, Error>;
}

pub trait ApiKeyRepository: Send + Sync {
    fn find_by_token_hash(&self, token_hash: &str) -> Result<ApiKey, Error>;
    fn upsert(&self, key: ApiKey) -> Result<(), Error>;
}

/// Delivery sink for outbox events. Implementations: the signed webhook
/// publisher and the log publisher fallback.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<(), Error>;
}
