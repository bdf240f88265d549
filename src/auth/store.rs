//! Durable slot for the current session.
//!
//! The slot holds two logical keys, `token` and `user`. They are written as a
//! single document through a temp file and an atomic rename, so a crash can
//! leave the old session or the new one but never half of either. A document
//! carrying only one key is reported as [`StoreError::Partial`].

use crate::auth::{
    error::StoreError,
    types::{Identity, Session},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

/// Persistence for the session owned by the controller. Only the controller
/// writes; `load` runs once at startup.
pub trait SessionStore: Send + Sync {
    /// # Errors
    /// Returns an error if the slot cannot be read or is corrupt.
    fn load(&self) -> Result<Option<Session>, StoreError>;

    /// # Errors
    /// Returns an error if the session could not be durably written.
    fn save(&self, session: &Session) -> Result<(), StoreError>;

    /// # Errors
    /// Returns an error if an existing session could not be removed.
    fn clear(&self) -> Result<(), StoreError>;
}

impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    fn load(&self) -> Result<Option<Session>, StoreError> {
        (**self).load()
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        (**self).save(session)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<Identity>,
    #[serde(default)]
    issued_at_ms: u64,
}

impl StoredSession {
    fn from_session(session: &Session) -> Self {
        Self {
            token: Some(session.token().expose_secret().to_string()),
            user: Some(session.identity().clone()),
            issued_at_ms: session.issued_at_ms(),
        }
    }

    fn into_session(self) -> Result<Option<Session>, StoreError> {
        match (self.token, self.user) {
            (Some(token), Some(user)) => Ok(Some(Session::new(
                user,
                SecretString::from(token),
                self.issued_at_ms,
            ))),
            (None, None) => Ok(None),
            _ => Err(StoreError::Partial),
        }
    }
}

/// Session slot backed by a JSON file, readable only by the owner on unix.
#[derive(Clone, Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn create_private(path: &Path) -> std::io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options.open(path)
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if contents.trim().is_empty() {
            return Ok(None);
        }

        let stored: StoredSession = serde_json::from_str(&contents)?;
        stored.into_session()
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let payload = serde_json::to_vec(&StoredSession::from_session(session))?;
        let temp = self.temp_path();

        let mut file = create_private(&temp)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &self.path)?;

        debug!(path = %self.path.display(), "session saved");

        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "session cleared");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Session slot kept in memory, for tests and embedders without a disk.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Session>, StoreError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
