//! API-key authentication. Tenant scoping for every request is derived from
//! the looked-up key, never from anything the client claims.

use std::fmt::Write as _;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::domain::ApiKey;
use crate::error::Error;
use crate::ports::ApiKeyRepository;

/// Lowercase hex SHA-256 of a raw bearer token. Only this digest is ever
/// persisted or compared; the raw token must not be stored or logged.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

pub struct AuthService {
    repo: Arc<dyn ApiKeyRepository>,
}

impl AuthService {
    #[must_use]
    pub fn new(repo: Arc<dyn ApiKeyRepository>) -> Self {
        Self { repo }
    }

    /// Resolve a presented token to its API key. Empty, unknown, and
    /// inactive tokens are all rejected as [`Error::Unauthorized`].
    pub fn authenticate(&self, token: &str) -> Result<ApiKey, Error> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Unauthorized);
        }

        let key = match self.repo.find_by_token_hash(&hash_token(token)) {
            Ok(key) => key,
            Err(Error::NotFound) => return Err(Error::Unauthorized),
            Err(err) => return Err(err),
        };
        if !key.active {
            return Err(Error::Unauthorized);
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use time::OffsetDateTime;

    #[derive(Default)]
    struct StubApiKeyRepo {
        keys: Mutex<HashMap<String, ApiKey>>,
    }

    impl ApiKeyRepository for StubApiKeyRepo {
        fn find_by_token_hash(&self, token_hash: &str) -> Result<ApiKey, Error> {
            self.keys.lock().get(token_hash).cloned().ok_or(Error::NotFound)
        }

        fn upsert(&self, key: ApiKey) -> Result<(), Error> {
            self.keys.lock().insert(key.token_hash.clone(), key);
            Ok(())
        }
    }

    fn seeded_service(token: &str, active: bool) -> AuthService {
        let repo = StubApiKeyRepo::default();
        repo.upsert(ApiKey {
            token_hash: hash_token(token),
            tenant_id: "tenant-a".into(),
            name: "ci".into(),
            active,
            created_at: OffsetDateTime::now_utc(),
        })
        .unwrap();
        AuthService::new(Arc::new(repo))
    }

    #[test]
    fn hash_token_is_lowercase_hex_sha256() {
        // SHA-256("secret")
        assert_eq!(
            hash_token("secret"),
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }

    #[test]
    fn authenticate_resolves_active_key() {
        let svc = seeded_service("token-1", true);
        let key = svc.authenticate("token-1").unwrap();
        assert_eq!(key.tenant_id, "tenant-a");
        assert_eq!(key.name, "ci");
    }

    #[test]
    fn authenticate_trims_whitespace() {
        let svc = seeded_service("token-1", true);
        assert!(svc.authenticate("  token-1  ").is_ok());
    }

    #[test]
    fn authenticate_rejects_empty_token() {
        let svc = seeded_service("token-1", true);
        assert!(matches!(svc.authenticate("   "), Err(Error::Unauthorized)));
    }

    #[test]
    fn authenticate_rejects_unknown_token() {
        let svc = seeded_service("token-1", true);
        assert!(matches!(svc.authenticate("other"), Err(Error::Unauthorized)));
    }

    #[test]
    fn authenticate_rejects_inactive_key() {
        let svc = seeded_service("token-1", false);
        assert!(matches!(svc.authenticate("token-1"), Err(Error::Unauthorized)));
    }
}
