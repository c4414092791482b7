//! Session persistence
//!
//! The persisted session is what lets a later process pick up where an
//! earlier one left off. The PKCE verifier lives next to it so an OAuth flow
//! can start in one process and finish in another.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::SessionError;
use crate::domain::Session;

/// Where sessions are kept between runs
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<Session>, SessionError>;

    fn save(&self, session: &Session) -> Result<(), SessionError>;

    fn clear(&self) -> Result<(), SessionError>;

    fn save_verifier(&self, verifier: &str) -> Result<(), SessionError>;

    /// Return and forget the pending PKCE verifier
    fn take_verifier(&self) -> Result<Option<String>, SessionError>;
}

fn storage_err(e: impl std::fmt::Display) -> SessionError {
    SessionError::Storage(e.to_string())
}

/// JSON file storage
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(path = %path.display(), "FileSessionStorage::new: called");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn verifier_path(&self) -> PathBuf {
        self.path.with_extension("pkce")
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), SessionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(storage_err)?;
        }
        // write-then-rename so a crash never leaves half a file
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents).map_err(storage_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600)).map_err(storage_err)?;
        }
        fs::rename(&tmp, path).map_err(storage_err)
    }

    fn remove(path: &Path) -> Result<(), SessionError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(e)),
        }
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<Session>, SessionError> {
        debug!(path = %self.path.display(), "load: called");
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };
        serde_json::from_str(&content).map(Some).map_err(storage_err)
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        debug!(user_id = %session.user_id, "save: called");
        let content = serde_json::to_string_pretty(session).map_err(storage_err)?;
        self.write(&self.path, &content)
    }

    fn clear(&self) -> Result<(), SessionError> {
        debug!("clear: called");
        Self::remove(&self.path)
    }

    fn save_verifier(&self, verifier: &str) -> Result<(), SessionError> {
        debug!("save_verifier: called");
        self.write(&self.verifier_path(), verifier)
    }

    fn take_verifier(&self) -> Result<Option<String>, SessionError> {
        debug!("take_verifier: called");
        let path = self.verifier_path();
        let verifier = match fs::read_to_string(&path) {
            Ok(v) => v.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };
        Self::remove(&path)?;
        Ok(Some(verifier).filter(|v| !v.is_empty()))
    }
}

/// Process-local storage, for tests and throwaway sessions
#[derive(Default)]
pub struct MemorySessionStorage {
    session: Mutex<Option<Session>>,
    verifier: Mutex<Option<String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<Session>, SessionError> {
        Ok(self.session.lock().map_err(storage_err)?.clone())
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        *self.session.lock().map_err(storage_err)? = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        *self.session.lock().map_err(storage_err)? = None;
        Ok(())
    }

    fn save_verifier(&self, verifier: &str) -> Result<(), SessionError> {
        *self.verifier.lock().map_err(storage_err)? = Some(verifier.to_string());
        Ok(())
    }

    fn take_verifier(&self) -> Result<Option<String>, SessionError> {
        Ok(self.verifier.lock().map_err(storage_err)?.take())
    }
}
