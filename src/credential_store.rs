//! Credential store contract and its implementations.
//!
//! The dispatcher only reads the two tokens and replaces them after a
//! renewal; login and logout are the only other writers.

use crate::models::{Session, User};
use crate::token_storage::TokenStorage;
use chrono::Utc;
use secrecy::SecretString;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub trait CredentialStore: Send + Sync {
    fn access_token(&self) -> Option<SecretString>;

    fn refresh_token(&self) -> Option<SecretString>;

    /// Replaces both tokens; `None` clears the corresponding one.
    fn set_tokens(&self, access: Option<SecretString>, refresh: Option<SecretString>);

    fn user(&self) -> Option<User>;

    fn set_user(&self, user: Option<User>);

    /// Wipes the whole session (logout).
    fn clear(&self);

    /// Like [`set_tokens`](Self::set_tokens), but only the in-memory state
    /// changes until [`persist`](Self::persist) is called.
    fn stage_tokens(&self, access: Option<SecretString>, refresh: Option<SecretString>) {
        self.set_tokens(access, refresh);
    }

    /// Like [`clear`](Self::clear), deferring storage to [`persist`](Self::persist).
    fn stage_clear(&self) {
        self.clear();
    }

    /// Writes the current session to durable storage, if any.
    fn persist(&self) {}

    fn is_authenticated(&self) -> bool {
        self.access_token().is_some() && self.user().is_some()
    }

    fn has_role(&self, role: &str) -> bool {
        self.user().is_some_and(|user| user.has_role(role))
    }
}

/// Session held in memory only.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    session: Mutex<Session>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Option<SecretString> {
        self.lock().access_token.clone()
    }

    fn refresh_token(&self) -> Option<SecretString> {
        self.lock().refresh_token.clone()
    }

    fn set_tokens(&self, access: Option<SecretString>, refresh: Option<SecretString>) {
        let mut session = self.lock();
        session.access_token = access;
        session.refresh_token = refresh;
        session.updated_at = Some(Utc::now());
    }

    fn user(&self) -> Option<User> {
        self.lock().user.clone()
    }

    fn set_user(&self, user: Option<User>) {
        let mut session = self.lock();
        session.user = user;
        session.updated_at = Some(Utc::now());
    }

    fn clear(&self) {
        *self.lock() = Session::default();
    }
}

/// Session cached in memory and written through to [`TokenStorage`].
///
/// Persistence failures never fail the caller: the in-memory session is
/// always updated and the failure is logged.
#[derive(Debug)]
pub struct PersistentCredentialStore {
    memory: MemoryCredentialStore,
    storage: TokenStorage,
}

impl PersistentCredentialStore {
    /// Opens the store, restoring a previously saved session if one exists.
    pub fn open(storage: TokenStorage) -> Self {
        let session = match storage.load_session() {
            Ok(Some(session)) => {
                tracing::info!("Restored saved session");
                session
            }
            Ok(None) => {
                tracing::debug!("No saved session found");
                Session::default()
            }
            Err(e) => {
                tracing::warn!("Failed to load saved session: {}. Starting logged out.", e);
                Session::default()
            }
        };

        Self {
            memory: MemoryCredentialStore::with_session(session),
            storage,
        }
    }

    pub fn session(&self) -> Session {
        self.memory.session()
    }

    fn save(&self) {
        let session = self.memory.session();
        let result = if session.is_empty() {
            self.storage.delete_session()
        } else {
            self.storage.save_session(&session)
        };

        if let Err(e) = result {
            tracing::warn!(
                "Failed to persist session: {}. The session will not survive a restart.",
                e
            );
        }
    }
}

impl CredentialStore for PersistentCredentialStore {
    fn access_token(&self) -> Option<SecretString> {
        self.memory.access_token()
    }

    fn refresh_token(&self) -> Option<SecretString> {
        self.memory.refresh_token()
    }

    fn set_tokens(&self, access: Option<SecretString>, refresh: Option<SecretString>) {
        self.memory.set_tokens(access, refresh);
        self.save();
    }

    fn user(&self) -> Option<User> {
        self.memory.user()
    }

    fn set_user(&self, user: Option<User>) {
        self.memory.set_user(user);
        self.save();
    }

    fn clear(&self) {
        self.memory.clear();
        self.save();
    }

    fn stage_tokens(&self, access: Option<SecretString>, refresh: Option<SecretString>) {
        self.memory.set_tokens(access, refresh);
    }

    fn stage_clear(&self) {
        self.memory.clear();
    }

    fn persist(&self) {
        self.save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn secret(value: &str) -> Option<SecretString> {
        Some(SecretString::new(value.to_string()))
    }

    fn admin() -> User {
        serde_json::from_str(r#"{"id": 1, "username": "admin", "roles": ["admin"]}"#).unwrap()
    }

    #[test]
    fn test_authenticated_requires_token_and_user() {
        let store = MemoryCredentialStore::new();
        assert!(!store.is_authenticated());

        store.set_tokens(secret("T1"), secret("R1"));
        assert!(!store.is_authenticated());

        store.set_user(Some(admin()));
        assert!(store.is_authenticated());
        assert!(store.has_role("admin"));
        assert!(!store.has_role("editor"));

        store.set_tokens(None, secret("R1"));
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_clear_wipes_everything() {
        let store = MemoryCredentialStore::new();
        store.set_tokens(secret("T1"), secret("R1"));
        store.set_user(Some(admin()));

        store.clear();
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(store.user().is_none());
        assert!(store.session().is_empty());
    }

    #[test]
    fn test_persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = PersistentCredentialStore::open(TokenStorage::file_only(path.clone()).unwrap());
        store.set_tokens(secret("T1"), secret("R1"));
        store.set_user(Some(admin()));

        let reopened =
            PersistentCredentialStore::open(TokenStorage::file_only(path.clone()).unwrap());
        assert!(reopened.is_authenticated());
        assert_eq!(reopened.access_token().unwrap().expose_secret(), "T1");
        assert_eq!(reopened.refresh_token().unwrap().expose_secret(), "R1");
    }

    #[test]
    fn test_persistent_store_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = PersistentCredentialStore::open(TokenStorage::file_only(path.clone()).unwrap());
        store.set_tokens(secret("T1"), secret("R1"));
        assert!(path.exists());

        store.clear();
        assert!(!path.exists());

        let reopened = PersistentCredentialStore::open(TokenStorage::file_only(path).unwrap());
        assert!(reopened.session().is_empty());
    }

    #[test]
    fn test_staged_tokens_reach_disk_on_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = PersistentCredentialStore::open(TokenStorage::file_only(path.clone()).unwrap());
        store.stage_tokens(secret("T1"), secret("R1"));
        assert_eq!(store.access_token().unwrap().expose_secret(), "T1");
        assert!(!path.exists());

        store.persist();
        assert!(path.exists());

        store.stage_clear();
        assert!(store.access_token().is_none());
        assert!(path.exists());

        store.persist();
        assert!(!path.exists());
    }

    #[test]
    fn test_persistent_store_starts_empty_on_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "garbage").unwrap();

        let store = PersistentCredentialStore::open(TokenStorage::file_only(path).unwrap());
        assert!(store.access_token().is_none());
    }
}
