//! Idempotent response cache over the KV store.
//!
//! Cached responses live at `idempotency/<tenant>/<collection>/<op>/<token>`,
//! so two different tenants or endpoints can never collide on the same
//! token.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::Item;
use crate::kv::KvService;

pub struct IdempotentResponseCache {
    kv: Arc<KvService>,
}

impl IdempotentResponseCache {
    #[must_use]
    pub fn new(kv: Arc<KvService>) -> Self {
        Self { kv }
    }

    /// Look up a previously cached response. Any miss or storage failure is
    /// treated as "not cached".
    #[must_use]
    pub fn read(&self, tenant_id: &str, collection: &str, op: &str, token: &str) -> Option<Value> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        let item = self.kv.get(&cache_key(tenant_id, collection, op, token)).ok()?;
        Some(item.value)
    }

    /// Cache a response payload. Best-effort: a failed write only disables
    /// replay for this token, it never fails the request.
    pub fn write(&self, tenant_id: &str, collection: &str, op: &str, token: &str, payload: &Value) {
        let token = token.trim();
        if token.is_empty() {
            return;
        }

        let item = Item::new(
            cache_key(tenant_id, collection, op, token),
            format!("idempotency/{tenant_id}"),
            payload.clone(),
        );
        if let Err(err) = self.kv.upsert(item) {
            tracing::debug!(error = %err, "idempotent response cache write skipped");
        }
    }
}

fn cache_key(tenant_id: &str, collection: &str, op: &str, token: &str) -> String {
    format!("idempotency/{tenant_id}/{collection}/{op}/{token}")
}
