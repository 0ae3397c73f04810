//! Built-in log publisher, the fallback delivery sink when no webhook is
//! configured.

use crate::error::Error;
use crate::event::EventEnvelope;
use crate::ports::EventPublisher;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

impl LogPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventPublisher for LogPublisher {
    fn publish(&self, topic: &str, event: &EventEnvelope) -> Result<(), Error> {
        tracing::info!(
            topic,
            event_id = %event.event_id,
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            aggregate_type = %event.aggregate_type,
            aggregate_id = %event.aggregate_id,
            aggregate_version = event.aggregate_version,
            "outbox publish"
        );
        Ok(())
    }
}
