//! Authenticated session state and token persistence.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

use kii_types::EntityId;

use crate::error::KiiResult;

/// The signed-in user and their token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub user_id: EntityId,
    pub access_token: String,
    /// User attributes as last returned by the server.
    pub user: Value,
}

/// Persists the access token between process runs.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> KiiResult<Option<String>>;
    fn save(&self, token: &str) -> KiiResult<()>;
    fn clear(&self) -> KiiResult<()>;
}

/// Keeps the token in memory only.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> KiiResult<Option<String>> {
        Ok(self.token.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, token: &str) -> KiiResult<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> KiiResult<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
}

/// Keeps the token in a JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> KiiResult<Option<String>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredToken = serde_json::from_slice(&raw)?;
        Ok(Some(stored.access_token))
    }

    fn save(&self, token: &str) -> KiiResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let stored = StoredToken {
            access_token: token.to_string(),
        };
        std::fs::write(&self.path, serde_json::to_vec_pretty(&stored)?)?;
        debug!(path = %self.path.display(), "access token persisted");
        Ok(())
    }

    fn clear(&self) -> KiiResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-wide authentication state of a client.
///
/// At most one user is signed in at a time. Cloned clients share the session.
#[derive(Default)]
pub struct Session {
    state: RwLock<Option<AuthState>>,
    store: Option<Arc<dyn TokenStore>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session that mirrors its token into `store`.
    pub fn with_store(store: Arc<dyn TokenStore>) -> Self {
        Self {
            state: RwLock::new(None),
            store: Some(store),
        }
    }

    pub fn current(&self) -> Option<AuthState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub fn user_id(&self) -> Option<EntityId> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.user_id.clone())
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Token left behind by an earlier run, if a store is attached.
    pub fn stored_token(&self) -> KiiResult<Option<String>> {
        match &self.store {
            Some(store) => store.load(),
            None => Ok(None),
        }
    }

    /// Replaces the signed-in user.
    pub(crate) fn begin(&self, state: AuthState) -> KiiResult<()> {
        if let Some(store) = &self.store {
            store.save(&state.access_token)?;
        }
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(state);
        Ok(())
    }

    /// Updates the cached user attributes of the signed-in user, if it is `user_id`.
    pub(crate) fn update_user(&self, user_id: &EntityId, user: Value) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = state.as_mut().filter(|s| &s.user_id == user_id) {
            state.user = user;
        }
    }

    /// Signs out and forgets the persisted token.
    pub fn end(&self) -> KiiResult<()> {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = None;
        if let Some(store) = &self.store {
            store.clear()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}
