//! Upstream Credentials
//!
//! The account login, the investor identity it resolves to, and the bearer
//! token presented to the broker. Only the token changes after startup, and
//! only when a refreshed token resolves to the same investor.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

// =============================================================================
// Credential
// =============================================================================

/// Snapshot of the upstream credential.
///
/// The broker login is `investor_id` as username and `token` as password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Account username used against the auth service.
    pub username: String,
    /// Account password used against the auth service.
    pub password: String,
    /// Investor identifier resolved from the first token.
    pub investor_id: String,
    /// Current bearer token.
    pub token: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("investor_id", &self.investor_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Credential Store
// =============================================================================

/// Shared holder of the process credential.
///
/// Many readers, one writer at a time. Each accepted token rotation bumps a
/// generation counter so connection owners can tell their login is stale.
pub struct CredentialStore {
    inner: RwLock<Credential>,
    generation: AtomicU64,
}

impl CredentialStore {
    /// Create a store from the credential established at startup.
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self {
            inner: RwLock::new(credential),
            generation: AtomicU64::new(0),
        }
    }

    /// Copy of the current credential.
    #[must_use]
    pub fn snapshot(&self) -> Credential {
        self.inner.read().clone()
    }

    /// Account login used to request a fresh token.
    #[must_use]
    pub fn login(&self) -> (String, String) {
        let guard = self.inner.read();
        (guard.username.clone(), guard.password.clone())
    }

    /// Investor identifier fixed at startup.
    #[must_use]
    pub fn investor_id(&self) -> String {
        self.inner.read().investor_id.clone()
    }

    /// Current bearer token.
    #[must_use]
    pub fn token(&self) -> String {
        self.inner.read().token.clone()
    }

    /// Number of accepted token rotations.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the token if `investor_id` matches the stored identity.
    ///
    /// Returns the new generation.
    ///
    /// # Errors
    ///
    /// Returns `IdentityMismatch` and leaves the token untouched when the
    /// fresh token belongs to a different investor.
    pub fn rotate(&self, investor_id: &str, token: String) -> Result<u64, IdentityMismatch> {
        let mut guard = self.inner.write();
        if guard.investor_id != investor_id {
            return Err(IdentityMismatch {
                expected: guard.investor_id.clone(),
                actual: investor_id.to_string(),
            });
        }
        guard.token = token;
        Ok(self.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("credential", &*self.inner.read())
            .field("generation", &self.generation())
            .finish()
    }
}

/// A refreshed token resolved to a different investor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("investor id mismatch: expected {expected}, got {actual}")]
pub struct IdentityMismatch {
    /// Identity established at startup.
    pub expected: String,
    /// Identity the refreshed token resolved to.
    pub actual: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CredentialStore {
        CredentialStore::new(Credential {
            username: "user".to_string(),
            password: "secret-pass".to_string(),
            investor_id: "0001".to_string(),
            token: "token-a".to_string(),
        })
    }

    #[test]
    fn rotate_same_identity_swaps_token() {
        let store = store();
        assert_eq!(store.rotate("0001", "token-b".to_string()), Ok(1));
        assert_eq!(store.token(), "token-b");
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn rotate_mismatch_keeps_token() {
        let store = store();
        let err = store.rotate("0002", "token-b".to_string()).unwrap_err();
        assert_eq!(err.expected, "0001");
        assert_eq!(err.actual, "0002");
        assert_eq!(store.token(), "token-a");
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn debug_is_redacted() {
        let store = store();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret-pass"));
        assert!(!debug.contains("token-a"));
        assert!(debug.contains("[REDACTED]"));
    }
}
