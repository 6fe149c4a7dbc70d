use crate::errors::StorageError;
use crate::models::Session;
use keyring::Entry;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const KEYRING_SERVICE: &str = "backoffice-client";
const KEYRING_USER: &str = "session";

/// Persists the session as JSON in the OS keyring, falling back to a file.
#[derive(Debug)]
pub struct TokenStorage {
    keyring_entry: Option<Arc<Entry>>,
    session_file_path: PathBuf,
}

impl TokenStorage {
    /// Keyring first, file as fallback.
    pub fn new(session_file_path: PathBuf) -> Result<Self, StorageError> {
        let keyring_entry = match Entry::new(KEYRING_SERVICE, KEYRING_USER) {
            Ok(entry) => Some(Arc::new(entry)),
            Err(e) => {
                tracing::warn!(
                    "Keyring is not available on this system ({}), will use file-based storage.",
                    e
                );
                None
            }
        };

        Self::with_entry(keyring_entry, session_file_path)
    }

    /// File storage only, the keyring is never touched.
    pub fn file_only(session_file_path: PathBuf) -> Result<Self, StorageError> {
        Self::with_entry(None, session_file_path)
    }

    fn with_entry(
        keyring_entry: Option<Arc<Entry>>,
        session_file_path: PathBuf,
    ) -> Result<Self, StorageError> {
        if let Some(parent) = session_file_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        Ok(TokenStorage {
            keyring_entry,
            session_file_path,
        })
    }

    pub fn session_file_path(&self) -> &Path {
        &self.session_file_path
    }

    pub fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        if let Some(ref entry) = self.keyring_entry {
            match self.save_to_keyring(entry, session) {
                Ok(()) => {
                    tracing::debug!("Session saved to keyring");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to save session to keyring: {}. Trying fallback storage.",
                        e
                    );
                }
            }
        }

        self.save_to_file(session)
    }

    fn save_to_keyring(&self, entry: &Entry, session: &Session) -> Result<(), StorageError> {
        let session_json = serde_json::to_string(session)?;
        entry.set_password(&session_json)?;
        Ok(())
    }

    fn save_to_file(&self, session: &Session) -> Result<(), StorageError> {
        let session_json = serde_json::to_string_pretty(session)?;
        fs::write(&self.session_file_path, session_json)
            .map_err(|e| io_error(&self.session_file_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.session_file_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| io_error(&self.session_file_path, e))?;
        }

        tracing::debug!("Session saved to file: {:?}", self.session_file_path);
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<Session>, StorageError> {
        if let Some(ref entry) = self.keyring_entry {
            match self.load_from_keyring(entry) {
                Ok(Some(session)) => {
                    tracing::debug!("Session loaded from keyring");
                    return Ok(Some(session));
                }
                Ok(None) => {
                    tracing::debug!("No session found in keyring, checking file storage");
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load session from keyring: {}. Checking file storage.",
                        e
                    );
                }
            }
        }

        let session = self.load_from_file()?;
        if let (Some(session), Some(entry)) = (&session, &self.keyring_entry) {
            // migrate a file session into the keyring
            match self.save_to_keyring(entry, session) {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(&self.session_file_path) {
                        tracing::warn!("Failed to remove migrated session file: {}", e);
                    }
                }
                Err(e) => tracing::debug!("Failed to migrate session to keyring: {}", e),
            }
        }
        Ok(session)
    }

    fn load_from_keyring(&self, entry: &Entry) -> Result<Option<Session>, StorageError> {
        match entry.get_password() {
            Ok(session_json) if session_json.trim().is_empty() => Ok(None),
            Ok(session_json) => Ok(Some(serde_json::from_str(&session_json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn load_from_file(&self) -> Result<Option<Session>, StorageError> {
        if !self.session_file_path.exists() {
            return Ok(None);
        }

        let session_json = fs::read_to_string(&self.session_file_path)
            .map_err(|e| io_error(&self.session_file_path, e))?;

        if session_json.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&session_json)?))
    }

    pub fn delete_session(&self) -> Result<(), StorageError> {
        if let Some(ref entry) = self.keyring_entry {
            match entry.delete_password() {
                Ok(()) => tracing::debug!("Session deleted from keyring"),
                Err(keyring::Error::NoEntry) => {
                    tracing::debug!("No session entry found in keyring to delete")
                }
                Err(e) => tracing::warn!("Failed to delete session from keyring: {}", e),
            }
        }

        if self.session_file_path.exists() {
            fs::remove_file(&self.session_file_path)
                .map_err(|e| io_error(&self.session_file_path, e))?;
            tracing::debug!("Session file deleted: {:?}", self.session_file_path);
        }

        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::IoError {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::{ExposeSecret, SecretString};

    fn sample_session() -> Session {
        Session {
            access_token: Some(SecretString::new("access_token".to_string())),
            refresh_token: Some(SecretString::new("refresh_token".to_string())),
            user: None,
            updated_at: Some(chrono::Utc::now()),
        }
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TokenStorage::file_only(dir.path().join("session.json")).unwrap();

        assert!(storage.load_session().unwrap().is_none());

        storage.save_session(&sample_session()).unwrap();
        let loaded = storage.load_session().unwrap().unwrap();
        assert_eq!(loaded.access_token.unwrap().expose_secret(), "access_token");
        assert_eq!(loaded.refresh_token.unwrap().expose_secret(), "refresh_token");

        storage.delete_session().unwrap();
        assert!(storage.load_session().unwrap().is_none());
        assert!(!storage.session_file_path().exists());
    }

    #[test]
    fn test_file_storage_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("session.json");
        let storage = TokenStorage::file_only(path.clone()).unwrap();
        storage.save_session(&sample_session()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_empty_file_means_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "  \n").unwrap();
        let storage = TokenStorage::file_only(path).unwrap();
        assert!(storage.load_session().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        let storage = TokenStorage::file_only(path).unwrap();
        assert!(matches!(
            storage.load_session(),
            Err(StorageError::JsonError { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_session_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = TokenStorage::file_only(dir.path().join("session.json")).unwrap();
        storage.save_session(&sample_session()).unwrap();
        let mode = std::fs::metadata(storage.session_file_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
