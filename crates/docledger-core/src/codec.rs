//! Schema-versioned event normalization.
//!
//! Persisted events carry the schema version they were written with. The
//! codec walks an ordered chain of upcasters until the envelope reaches
//! [`CURRENT_EVENT_SCHEMA_VERSION`], so replay and consumers only ever see
//! the current shape.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::Error;
use crate::event::{EventEnvelope, CURRENT_EVENT_SCHEMA_VERSION};

/// One version-increment step. `to_version` must be `from_version + 1` and
/// `upcast` must be a pure payload transformation.
pub trait Upcaster: Send + Sync {
    fn from_version(&self) -> u32;
    fn to_version(&self) -> u32;
    fn upcast(&self, payload: Value) -> Result<Value, Error>;
}

#[derive(Default)]
pub struct EventCodec {
    upcasters: HashMap<u32, Box<dyn Upcaster>>,
}

impl EventCodec {
    #[must_use]
    pub fn new(upcasters: Vec<Box<dyn Upcaster>>) -> Self {
        let mut map = HashMap::with_capacity(upcasters.len());
        for upcaster in upcasters {
            map.insert(upcaster.from_version(), upcaster);
        }
        Self { upcasters: map }
    }

    /// Upgrade an envelope to the current schema version, applying one
    /// upcaster per missing version. A gap in the chain is an error; replay
    /// must surface it rather than skip the event.
    pub fn normalize(&self, mut envelope: EventEnvelope) -> Result<EventEnvelope, Error> {
        let mut version = envelope.schema_version;
        let mut payload = envelope.payload;

        while version < CURRENT_EVENT_SCHEMA_VERSION {
            let upcaster = self
                .upcasters
                .get(&version)
                .ok_or(Error::MissingUpcaster(version))?;
            payload = upcaster.upcast(payload)?;
            version = upcaster.to_version();
        }

        envelope.schema_version = version;
        envelope.payload = payload;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct AddMarkerUpcaster;

    impl Upcaster for AddMarkerUpcaster {
        fn from_version(&self) -> u32 {
            0
        }

        fn to_version(&self) -> u32 {
            1
        }

        fn upcast(&self, payload: Value) -> Result<Value, Error> {
            let mut object = payload.as_object().cloned().unwrap_or_default();
            object.insert("upcasted".to_string(), Value::Bool(true));
            Ok(Value::Object(object))
        }
    }

    #[test]
    fn normalize_applies_registered_upcaster() {
        let codec = EventCodec::new(vec![Box::new(AddMarkerUpcaster)]);
        let envelope = EventEnvelope {
            schema_version: 0,
            payload: json!({"a": 1}),
            ..EventEnvelope::default()
        };

        let normalized = codec.normalize(envelope).unwrap();
        assert_eq!(normalized.schema_version, CURRENT_EVENT_SCHEMA_VERSION);
        assert_eq!(normalized.payload, json!({"a": 1, "upcasted": true}));
    }

    #[test]
    fn normalize_is_a_no_op_at_current_version() {
        let codec = EventCodec::default();
        let envelope = EventEnvelope {
            schema_version: CURRENT_EVENT_SCHEMA_VERSION,
            payload: json!({"a": 1}),
            ..EventEnvelope::default()
        };

        let normalized = codec.normalize(envelope.clone()).unwrap();
        assert_eq!(normalized, envelope);
    }

    #[test]
    fn normalize_is_idempotent() {
        let codec = EventCodec::new(vec![Box::new(AddMarkerUpcaster)]);
        let envelope = EventEnvelope {
            schema_version: 0,
            payload: json!({"a": 1}),
            ..EventEnvelope::default()
        };

        let once = codec.normalize(envelope).unwrap();
        let twice = codec.normalize(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_fails_on_missing_upcaster() {
        let codec = EventCodec::default();
        let envelope = EventEnvelope {
            schema_version: 0,
            payload: json!({}),
            ..EventEnvelope::default()
        };

        match codec.normalize(envelope) {
            Err(Error::MissingUpcaster(version)) => assert_eq!(version, 0),
            other => panic!("expected missing upcaster error, got {other:?}"),
        }
    }
}
