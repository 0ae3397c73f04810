//! Event envelope, audit trail, and outbox row types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Schema version stamped on newly produced envelopes.
pub const CURRENT_EVENT_SCHEMA_VERSION: u32 = 1;

pub const EVENT_RECORD_CREATED: &str = "record.created";
pub const EVENT_RECORD_UPDATED: &str = "record.updated";
pub const EVENT_RECORD_DELETED: &str = "record.deleted";

/// Outbox topic for one tenant event: `events.<tenant>.<event_type>`.
#[must_use]
pub fn outbox_topic(tenant_id: &str, event_type: &str) -> String {
    format!("events.{tenant_id}.{event_type}")
}

/// Side-channel metadata attached to each mutation by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationMetadata {
    pub actor: String,
    pub source: String,
    pub request_id: String,
    pub correlation_id: String,
    pub causation_id: String,
    pub idempotency_key: String,
    pub occurred_at: Option<OffsetDateTime>,
}

impl MutationMetadata {
    /// Fill defaults: blank actor/source become `"api"`, a missing timestamp
    /// becomes the current UTC instant.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.actor.is_empty() {
            self.actor = "api".to_string();
        }
        if self.source.is_empty() {
            self.source = "api".to_string();
        }
        if self.occurred_at.is_none() {
            self.occurred_at = Some(OffsetDateTime::now_utc());
        }
        self
    }
}

/// The serialized event shape handed to publishers and stored as the outbox
/// payload. Consumers dedupe on `event_id`; `schema_version` drives the
/// upcaster chain in [`crate::codec::EventCodec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub schema_version: u32,
    pub tenant_id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub aggregate_version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    pub correlation_id: String,
    pub causation_id: String,
    pub actor: String,
    pub source: String,
    pub payload: Value,
}

impl Default for EventEnvelope {
    fn default() -> Self {
        Self {
            event_id: String::new(),
            event_type: String::new(),
            schema_version: CURRENT_EVENT_SCHEMA_VERSION,
            tenant_id: String::new(),
            aggregate_type: String::new(),
            aggregate_id: String::new(),
            aggregate_version: 0,
            occurred_at: OffsetDateTime::UNIX_EPOCH,
            correlation_id: String::new(),
            causation_id: String::new(),
            actor: String::new(),
            source: String::new(),
            payload: Value::Null,
        }
    }
}

/// Persisted form of an envelope. Append-only: the store aborts any UPDATE
/// or DELETE against these rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrailEvent {
    pub id: i64,
    pub event_id: String,
    pub schema_version: u32,
    pub tenant_id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub aggregate_version: i64,
    pub action: String,
    pub actor: String,
    pub source: String,
    pub request_id: String,
    pub correlation_id: String,
    pub causation_id: String,
    pub idempotency_key: String,
    #[serde(rename = "before_json", skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(rename = "after_json", skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    #[serde(rename = "changed_fields_json", skip_serializing_if = "Option::is_none")]
    pub changed_fields: Option<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl Default for AuditTrailEvent {
    fn default() -> Self {
        Self {
            id: 0,
            event_id: String::new(),
            schema_version: CURRENT_EVENT_SCHEMA_VERSION,
            tenant_id: String::new(),
            aggregate_type: String::new(),
            aggregate_id: String::new(),
            aggregate_version: 0,
            action: String::new(),
            actor: String::new(),
            source: String::new(),
            request_id: String::new(),
            correlation_id: String::new(),
            causation_id: String::new(),
            idempotency_key: String::new(),
            before: None,
            after: None,
            changed_fields: None,
            occurred_at: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Dispatched,
    Dead,
}

impl OutboxStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Dead => "dead",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "dispatched" => Some(Self::Dispatched),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// Durable queue row written in the same transaction as its audit event.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_id: String,
    pub tenant_id: String,
    pub topic: String,
    /// The marshalled [`EventEnvelope`], kept opaque until dispatch.
    pub payload_json: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: OffsetDateTime,
    pub last_error: String,
    pub created_at: OffsetDateTime,
    pub dispatched_at: Option<OffsetDateTime>,
}

/// Audit listing filter. `tenant_id` is mandatory; empty strings leave the
/// other dimensions unconstrained. `after_id` is a descending cursor: rows
/// with `id < after_id` are returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub tenant_id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub action: String,
    pub after_id: i64,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn metadata_normalize_fills_defaults() {
        let meta = MutationMetadata::default().normalize();
        assert_eq!(meta.actor, "api");
        assert_eq!(meta.source, "api");
        assert!(meta.occurred_at.is_some());
    }

    #[test]
    fn metadata_normalize_keeps_explicit_values() {
        let at = datetime!(2024-05-01 12:00:00 UTC);
        let meta = MutationMetadata {
            actor: "svc".into(),
            source: "import".into(),
            occurred_at: Some(at),
            ..MutationMetadata::default()
        }
        .normalize();
        assert_eq!(meta.actor, "svc");
        assert_eq!(meta.source, "import");
        assert_eq!(meta.occurred_at, Some(at));
    }

    #[test]
    fn topic_composition() {
        assert_eq!(outbox_topic("t1", EVENT_RECORD_CREATED), "events.t1.record.created");
    }

    #[test]
    fn envelope_round_trips_with_nanosecond_timestamps() {
        let envelope = EventEnvelope {
            event_id: "4f5c8f1e-0000-4000-8000-000000000001".into(),
            event_type: EVENT_RECORD_UPDATED.into(),
            schema_version: 1,
            tenant_id: "t1".into(),
            aggregate_type: "users".into(),
            aggregate_id: "u1".into(),
            aggregate_version: 3,
            occurred_at: datetime!(2024-05-01 12:00:00.123456789 UTC),
            correlation_id: "corr-1".into(),
            causation_id: "cause-1".into(),
            actor: "tester".into(),
            source: "api".into(),
            payload: json!({"record_id": "u1", "collection": "users", "data": {"n": "B"}}),
        };

        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: EventEnvelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn envelope_json_field_names() {
        let encoded = serde_json::to_value(EventEnvelope::default()).unwrap();
        let obj = encoded.as_object().unwrap();
        for field in [
            "event_id",
            "event_type",
            "schema_version",
            "tenant_id",
            "aggregate_type",
            "aggregate_id",
            "aggregate_version",
            "occurred_at",
            "correlation_id",
            "causation_id",
            "actor",
            "source",
            "payload",
        ] {
            assert!(obj.contains_key(field), "missing field {field}");
        }
    }

    #[test]
    fn outbox_status_string_round_trip() {
        for status in [OutboxStatus::Pending, OutboxStatus::Dispatched, OutboxStatus::Dead] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("unknown"), None);
    }

    #[test]
    fn audit_event_omits_absent_json_blobs() {
        let encoded = serde_json::to_value(AuditTrailEvent::default()).unwrap();
        let obj = encoded.as_object().unwrap();
        assert!(!obj.contains_key("before_json"));
        assert!(!obj.contains_key("after_json"));
        assert!(!obj.contains_key("changed_fields_json"));
    }
}
