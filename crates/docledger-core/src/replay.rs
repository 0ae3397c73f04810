//! Tenant-scoped replay of the audit stream.
//!
//! Events are fed to the applier oldest-first (ascending audit `id`), which
//! is the order a projection must consume them in. The outbox gives no
//! cross-aggregate ordering; the audit stream replayed here is the source of
//! truth.

use serde_json::{Map, Value};

use crate::audit::AuditService;
use crate::codec::EventCodec;
use crate::error::Error;
use crate::event::{AuditTrailEvent, EventEnvelope};

/// One replayed event plus the audit row id it came from, usable as a
/// restart cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEvent {
    pub envelope: EventEnvelope,
    pub audit_id: i64,
}

/// Stream one tenant's audit events through the codec into `apply`, oldest
/// first. Stops on the first empty page; any applier or codec error aborts
/// the replay and is returned.
pub fn replay_tenant_events<F>(
    audit: &AuditService,
    codec: &EventCodec,
    tenant_id: &str,
    batch_size: usize,
    mut apply: F,
) -> Result<(), Error>
where
    F: FnMut(ReplayEvent) -> Result<(), Error>,
{
    let mut since_id = 0_i64;
    loop {
        let events = audit.replay_page(tenant_id, since_id, batch_size)?;
        if events.is_empty() {
            return Ok(());
        }

        for event in events {
            let audit_id = event.id;
            let envelope = codec.normalize(envelope_from_audit(event))?;
            apply(ReplayEvent { envelope, audit_id })?;
            since_id = audit_id;
        }
    }
}

fn envelope_from_audit(event: AuditTrailEvent) -> EventEnvelope {
    EventEnvelope {
        event_id: event.event_id,
        event_type: event.action,
        schema_version: event.schema_version,
        tenant_id: event.tenant_id,
        aggregate_type: event.aggregate_type,
        aggregate_id: event.aggregate_id,
        aggregate_version: event.aggregate_version,
        occurred_at: event.occurred_at,
        correlation_id: event.correlation_id,
        causation_id: event.causation_id,
        actor: event.actor,
        source: event.source,
        payload: event.after.unwrap_or_else(|| Value::Object(Map::new())),
    }
}
