//! Per-collection JSON Schema management and record validation.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use parking_lot::RwLock;
use serde_json::Value;

use crate::domain::{validate_category, validate_key, CollectionSchema};
use crate::error::Error;
use crate::ports::CollectionSchemaRepository;

/// Manages per-collection Draft-7 schemas and validates record data against
/// them. Compiled validators are cached per `tenant/collection` and the
/// entry is invalidated on every schema upsert or delete.
pub struct SchemaService {
    repo: Arc<dyn CollectionSchemaRepository>,
    cache: RwLock<HashMap<String, Arc<JSONSchema>>>,
}

impl SchemaService {
    #[must_use]
    pub fn new(repo: Arc<dyn CollectionSchemaRepository>) -> Self {
        Self {
            repo,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn upsert(
        &self,
        tenant_id: &str,
        collection: &str,
        schema: Value,
    ) -> Result<CollectionSchema, Error> {
        validate_key(tenant_id)?;
        validate_category(collection)?;
        compile_schema(&schema)?;

        self.cache.write().remove(&cache_key(tenant_id, collection));
        self.repo
            .upsert(CollectionSchema::new(tenant_id, collection, schema))
    }

    pub fn get(&self, tenant_id: &str, collection: &str) -> Result<CollectionSchema, Error> {
        validate_key(tenant_id)?;
        validate_category(collection)?;
        self.repo.get(tenant_id, collection)
    }

    pub fn delete(&self, tenant_id: &str, collection: &str) -> Result<bool, Error> {
        validate_key(tenant_id)?;
        validate_category(collection)?;
        self.cache.write().remove(&cache_key(tenant_id, collection));
        self.repo.delete(tenant_id, collection)
    }

    /// Validate data against the collection's schema. A collection without a
    /// configured schema accepts everything.
    pub fn validate(&self, tenant_id: &str, collection: &str, data: &Value) -> Result<(), Error> {
        let key = cache_key(tenant_id, collection);

        if let Some(compiled) = self.cache.read().get(&key).cloned() {
            return run_validation(&compiled, data);
        }

        let stored = match self.repo.get(tenant_id, collection) {
            Ok(stored) => stored,
            Err(Error::NotFound) => return Ok(()),
            Err(err) => return Err(err),
        };

        let compiled = Arc::new(compile_schema(&stored.schema)?);
        self.cache.write().insert(key, Arc::clone(&compiled));
        run_validation(&compiled, data)
    }
}

fn cache_key(tenant_id: &str, collection: &str) -> String {
    format!("{tenant_id}/{collection}")
}

fn compile_schema(schema: &Value) -> Result<JSONSchema, Error> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|err| Error::InvalidSchema(err.to_string()))
}

fn run_validation(schema: &JSONSchema, data: &Value) -> Result<(), Error> {
    if let Err(errors) = schema.validate(data) {
        let messages: Vec<String> = errors.map(|err| err.to_string()).collect();
        return Err(Error::SchemaViolation(messages));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct StubSchemaRepo {
        schemas: Mutex<HashMap<String, CollectionSchema>>,
        gets: Mutex<usize>,
    }

    impl CollectionSchemaRepository for StubSchemaRepo {
        fn upsert(&self, schema: CollectionSchema) -> Result<CollectionSchema, Error> {
            let key = format!("{}/{}", schema.tenant_id, schema.collection);
            self.schemas.lock().insert(key, schema.clone());
            Ok(schema)
        }

        fn get(&self, tenant_id: &str, collection: &str) -> Result<CollectionSchema, Error> {
            *self.gets.lock() += 1;
            self.schemas
                .lock()
                .get(&format!("{tenant_id}/{collection}"))
                .cloned()
                .ok_or(Error::NotFound)
        }

        fn delete(&self, tenant_id: &str, collection: &str) -> Result<bool, Error> {
            Ok(self
                .schemas
                .lock()
                .remove(&format!("{tenant_id}/{collection}"))
                .is_some())
        }
    }

    fn contact_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        })
    }

    #[test]
    fn upsert_and_get() {
        let svc = SchemaService::new(Arc::new(StubSchemaRepo::default()));
        let stored = svc.upsert("tenant-a", "contacts", contact_schema()).unwrap();
        assert_eq!(stored.collection, "contacts");

        let fetched = svc.get("tenant-a", "contacts").unwrap();
        assert_eq!(fetched.schema, contact_schema());
    }

    #[test]
    fn upsert_rejects_invalid_schema_document() {
        let svc = SchemaService::new(Arc::new(StubSchemaRepo::default()));
        // Valid JSON but not a valid schema: "type" must be a string or array.
        let err = svc.upsert("tenant-a", "contacts", json!({"type": 123})).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)));
    }

    #[test]
    fn get_missing_returns_not_found() {
        let svc = SchemaService::new(Arc::new(StubSchemaRepo::default()));
        assert!(matches!(svc.get("tenant-a", "contacts"), Err(Error::NotFound)));
    }

    #[test]
    fn delete_removes_schema() {
        let svc = SchemaService::new(Arc::new(StubSchemaRepo::default()));
        svc.upsert("tenant-a", "orders", json!({"type": "object"})).unwrap();

        assert!(svc.delete("tenant-a", "orders").unwrap());
        assert!(matches!(svc.get("tenant-a", "orders"), Err(Error::NotFound)));
    }

    #[test]
    fn validate_passes_without_schema() {
        let svc = SchemaService::new(Arc::new(StubSchemaRepo::default()));
        svc.validate("tenant-a", "things", &json!({"x": 1})).unwrap();
    }

    #[test]
    fn validate_accepts_conforming_data() {
        let svc = SchemaService::new(Arc::new(StubSchemaRepo::default()));
        svc.upsert("tenant-a", "contacts", contact_schema()).unwrap();
        svc.validate("tenant-a", "contacts", &json!({"name": "Alice"})).unwrap();
    }

    #[test]
    fn validate_reports_violations_with_messages() {
        let svc = SchemaService::new(Arc::new(StubSchemaRepo::default()));
        svc.upsert("tenant-a", "contacts", contact_schema()).unwrap();

        let err = svc.validate("tenant-a", "contacts", &json!({"age": 30})).unwrap_err();
        match err {
            Error::SchemaViolation(messages) => assert!(!messages.is_empty()),
            other => panic!("expected schema violation, got {other:?}"),
        }
    }

    #[test]
    fn validate_uses_compiled_cache_after_first_hit() {
        let repo = Arc::new(StubSchemaRepo::default());
        let svc = SchemaService::new(repo.clone());
        svc.upsert("tenant-a", "contacts", contact_schema()).unwrap();

        svc.validate("tenant-a", "contacts", &json!({"name": "A"})).unwrap();
        svc.validate("tenant-a", "contacts", &json!({"name": "B"})).unwrap();

        assert_eq!(*repo.gets.lock(), 1);
    }

    #[test]
    fn upsert_invalidates_cached_validator() {
        let svc = SchemaService::new(Arc::new(StubSchemaRepo::default()));
        svc.upsert("tenant-a", "contacts", contact_schema()).unwrap();
        svc.validate("tenant-a", "contacts", &json!({"name": "A"})).unwrap();

        // Loosen the schema; previously-invalid data must now pass.
        svc.upsert("tenant-a", "contacts", json!({"type": "object"})).unwrap();
        svc.validate("tenant-a", "contacts", &json!({"age": 1})).unwrap();
    }
}
