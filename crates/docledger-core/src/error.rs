/// Error kinds surfaced by the core services and repository contracts.
///
/// Validation failures map to bad requests at the API edge, `NotFound` to
/// 404, `Unauthorized` to 401. The two storage variants let callers decide
/// whether a retry is worthwhile; the write-transaction contract guarantees
/// no partial commit either way.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid key")]
    InvalidKey,

    #[error("invalid category")]
    InvalidCategory,

    #[error("invalid filter")]
    InvalidFilter,

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("schema validation failed: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("invalid json schema: {0}")]
    InvalidSchema(String),

    #[error("missing upcaster from version {0}")]
    MissingUpcaster(u32),

    /// Publisher failure. Handled by the dispatcher's retry/dead-letter
    /// policy, never surfaced to API callers.
    #[error("{0}")]
    Publish(String),

    #[error("transient storage error: {0}")]
    TransientStore(String),

    #[error("storage error: {0}")]
    FatalStore(String),
}

impl Error {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_violation_joins_messages() {
        let err = Error::SchemaViolation(vec!["a is required".into(), "b must be a string".into()]);
        assert_eq!(
            err.to_string(),
            "schema validation failed: a is required; b must be a string"
        );
    }

    #[test]
    fn only_transient_store_is_retryable() {
        assert!(Error::TransientStore("busy".into()).is_retryable());
        assert!(!Error::FatalStore("corrupt".into()).is_retryable());
        assert!(!Error::NotFound.is_retryable());
    }
}
