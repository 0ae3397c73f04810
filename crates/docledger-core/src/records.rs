//! Record service: validation, optional schema enforcement, and delegation
//! to the event-atomic mutation store.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{
    clamp_page_limit, validate_category, validate_key, Record, RecordListFilter,
};
use crate::error::Error;
use crate::event::MutationMetadata;
use crate::ports::RecordMutationStore;
use crate::schemas::SchemaService;

#[derive(Debug, Clone, Deserialize)]
pub struct BulkUpsertItem {
    pub id: String,
    pub data: Value,
}

pub struct RecordService {
    store: Arc<dyn RecordMutationStore>,
    schemas: Option<Arc<SchemaService>>,
}

impl RecordService {
    #[must_use]
    pub fn new(store: Arc<dyn RecordMutationStore>) -> Self {
        Self { store, schemas: None }
    }

    /// Enable per-collection schema enforcement on every upsert.
    #[must_use]
    pub fn with_schema_service(mut self, schemas: Arc<SchemaService>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn upsert(&self, record: Record, meta: MutationMetadata) -> Result<Record, Error> {
        record.validate()?;
        if let Some(schemas) = &self.schemas {
            schemas.validate(&record.tenant_id, &record.collection, &record.data)?;
        }
        self.store.upsert_with_events(record, meta)
    }

    pub fn get(&self, tenant_id: &str, collection: &str, id: &str) -> Result<Record, Error> {
        validate_key(tenant_id)?;
        validate_category(collection)?;
        validate_key(id)?;
        self.store.get(tenant_id, collection, id)
    }

    pub fn delete(
        &self,
        tenant_id: &str,
        collection: &str,
        id: &str,
        meta: MutationMetadata,
    ) -> Result<bool, Error> {
        validate_key(tenant_id)?;
        validate_category(collection)?;
        validate_key(id)?;
        self.store.delete_with_events(tenant_id, collection, id, meta)
    }

    pub fn list(
        &self,
        tenant_id: &str,
        collection: &str,
        filter: RecordListFilter,
    ) -> Result<Vec<Record>, Error> {
        validate_key(tenant_id)?;
        validate_category(collection)?;
        if !filter.prefix.is_empty() {
            validate_key(&filter.prefix)?;
        }
        if !filter.after.is_empty() {
            validate_key(&filter.after)?;
        }

        let RecordListFilter { prefix, after, limit, json } = filter;
        let filter = RecordListFilter {
            prefix,
            after,
            limit: clamp_page_limit(limit),
            json: json.normalized(),
        };
        filter.json.validate()?;

        self.store.list(tenant_id, collection, &filter)
    }

    pub fn bulk_upsert(
        &self,
        tenant_id: &str,
        collection: &str,
        items: Vec<BulkUpsertItem>,
        meta: MutationMetadata,
    ) -> Result<Vec<Record>, Error> {
        let mut result = Vec::with_capacity(items.len());
        for item in items {
            let record = Record::new(tenant_id, collection, item.id, item.data);
            result.push(self.upsert(record, meta.clone())?);
        }
        Ok(result)
    }

    pub fn bulk_delete(
        &self,
        tenant_id: &str,
        collection: &str,
        ids: &[String],
        meta: MutationMetadata,
    ) -> Result<usize, Error> {
        let mut deleted = 0;
        for id in ids {
            if self.delete(tenant_id, collection, id, meta.clone())? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
