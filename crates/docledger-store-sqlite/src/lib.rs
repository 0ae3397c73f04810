//! # docledger-store-sqlite
//!
//! SQLite adapters for the docledger repository contracts: a single-writer /
//! multi-reader connection split, forward-only migrations (including the
//! audit immutability triggers), and the event-atomic record store that
//! commits state, audit, and outbox rows in one transaction.

pub mod api_keys;
pub mod audit;
pub mod db;
pub mod kv;
pub mod migrations;
pub mod outbox;
pub mod record_events;
pub mod schemas;

pub use api_keys::SqliteApiKeyRepository;
pub use audit::SqliteAuditTrailRepository;
pub use db::Db;
pub use kv::SqliteKvRepository;
pub use outbox::SqliteOutboxRepository;
pub use record_events::SqliteRecordEventStore;
pub use schemas::SqliteCollectionSchemaRepository;
