//! Audit trail queries.

use std::sync::Arc;

use crate::domain::{clamp_page_limit, validate_category, validate_key};
use crate::error::Error;
use crate::event::{AuditFilter, AuditTrailEvent};
use crate::ports::AuditTrailRepository;

pub struct AuditService {
    repo: Arc<dyn AuditTrailRepository>,
}

impl AuditService {
    #[must_use]
    pub fn new(repo: Arc<dyn AuditTrailRepository>) -> Self {
        Self { repo }
    }

    /// List audit events, newest first. The tenant is mandatory; all other
    /// filter dimensions are optional.
    pub fn list(&self, mut filter: AuditFilter) -> Result<Vec<AuditTrailEvent>, Error> {
        validate_key(&filter.tenant_id)?;
        if !filter.aggregate_type.is_empty() {
            validate_category(&filter.aggregate_type)?;
        }
        if !filter.aggregate_id.is_empty() {
            validate_key(&filter.aggregate_id)?;
        }
        filter.limit = clamp_page_limit(filter.limit);
        self.repo.list(&filter)
    }

    /// One ascending replay page: tenant events with `id > since_id`, oldest
    /// first.
    pub fn replay_page(
        &self,
        tenant_id: &str,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<AuditTrailEvent>, Error> {
        validate_key(tenant_id)?;
        self.repo.list_since(tenant_id, since_id, clamp_page_limit(limit))
    }
}
