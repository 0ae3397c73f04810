//! # docledger-core
//!
//! Core of a multi-tenant JSON document service with an event-atomic write
//! path: every record mutation commits its state change, an immutable audit
//! event, and an outbox row in one storage transaction. A background
//! dispatcher later delivers outbox events at-least-once to a publisher.
//!
//! ## Modules
//!
//! - [`domain`]: entities, identifiers, and validation rules
//! - [`event`]: event envelope, audit trail, and outbox types
//! - [`codec`]: schema-versioned envelope normalization (upcaster chain)
//! - [`ports`]: repository and publisher contracts for adapters
//! - [`dispatcher`]: the background outbox delivery loop
//! - [`replay`]: tenant-scoped, oldest-first audit stream replay

pub mod audit;
pub mod auth;
pub mod codec;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod event;
pub mod idempotency;
pub mod kv;
pub mod ports;
pub mod publish;
pub mod records;
pub mod replay;
pub mod schemas;

pub use audit::AuditService;
pub use auth::{hash_token, AuthService};
pub use codec::{EventCodec, Upcaster};
pub use dispatcher::{DispatcherMetrics, OutboxDispatcher};
pub use domain::{
    ApiKey, CollectionSchema, Item, JsonPathFilter, Record, RecordListFilter, ScanFilter,
};
pub use error::Error;
pub use event::{
    AuditFilter, AuditTrailEvent, EventEnvelope, MutationMetadata, OutboxEvent, OutboxStatus,
    CURRENT_EVENT_SCHEMA_VERSION,
};
pub use idempotency::IdempotentResponseCache;
pub use kv::KvService;
pub use publish::LogPublisher;
pub use records::{BulkUpsertItem, RecordService};
pub use replay::{replay_tenant_events, ReplayEvent};
pub use schemas::SchemaService;
