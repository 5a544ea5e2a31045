use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use anyhow::{Context, Result};
use tracing::warn;

/// Storage key for the short-lived bearer credential
pub const ACCESS_TOKEN_KEY: &str = "access-token";

/// Storage key for the long-lived renewal credential
pub const REFRESH_TOKEN_KEY: &str = "refresh-token";

/// Token file name in the cache directory
const TOKEN_FILE: &str = "tokens.json";

/// Durable key-value boundary the credential store persists through.
///
/// Writes must be visible to the next `get` in the same process.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Token pair as persisted. Either half may be missing.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StoredTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl StoredTokens {
    /// Both halves present
    pub fn is_complete(&self) -> bool {
        self.access.is_some() && self.refresh.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

impl std::fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTokens")
            .field("access", &self.access.as_ref().map(|_| "<set>"))
            .field("refresh", &self.refresh.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// The current access/refresh pair, mirrored in memory and written through
/// to a durable `TokenStore`.
///
/// The in-memory copy starts empty; `load` pulls whatever the backend holds.
pub struct CredentialStore {
    backend: Box<dyn TokenStore>,
    current: RwLock<StoredTokens>,
}

impl CredentialStore {
    pub fn new(backend: impl TokenStore + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn TokenStore>) -> Self {
        Self {
            backend,
            current: RwLock::new(StoredTokens::default()),
        }
    }

    /// Store backed by process memory only
    pub fn in_memory() -> Self {
        Self::new(MemoryTokenStore::default())
    }

    /// Read the persisted pair from the backend and make it current
    pub fn load(&self) -> Result<StoredTokens> {
        let tokens = StoredTokens {
            access: self.backend.get(ACCESS_TOKEN_KEY)?,
            refresh: self.backend.get(REFRESH_TOKEN_KEY)?,
        };
        *self.write() = tokens.clone();
        Ok(tokens)
    }

    /// Replace both tokens (login, register)
    pub fn save(&self, access: &str, refresh: &str) -> Result<()> {
        self.backend.set(ACCESS_TOKEN_KEY, access)?;
        self.backend.set(REFRESH_TOKEN_KEY, refresh)?;
        *self.write() = StoredTokens {
            access: Some(access.to_string()),
            refresh: Some(refresh.to_string()),
        };
        Ok(())
    }

    /// Replace the access token only (successful refresh).
    /// The in-memory copy is updated even when persisting fails.
    pub fn save_access(&self, access: &str) -> Result<()> {
        self.write().access = Some(access.to_string());
        self.backend.set(ACCESS_TOKEN_KEY, access)
    }

    /// Drop both tokens. In-memory state is cleared before the backend is
    /// touched so a storage failure can't leave the process authenticated.
    pub fn clear(&self) -> Result<()> {
        *self.write() = StoredTokens::default();
        let access = self.backend.remove(ACCESS_TOKEN_KEY);
        let refresh = self.backend.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh.clone()
    }

    pub fn current(&self) -> StoredTokens {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoredTokens> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoredTokens> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Backend that forgets everything when the process exits
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryTokenStore {
    /// Pre-populated store, handy for restoring a known pair
    pub fn with_tokens(access: Option<&str>, refresh: Option<&str>) -> Self {
        let mut entries = BTreeMap::new();
        if let Some(access) = access {
            entries.insert(ACCESS_TOKEN_KEY.to_string(), access.to_string());
        }
        if let Some(refresh) = refresh {
            entries.insert(REFRESH_TOKEN_KEY.to_string(), refresh.to_string());
        }
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Backend keeping tokens in a JSON file, readable only by the owner on Unix.
pub struct FileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write of the file within this process
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(TOKEN_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read token file")?;
        match serde_json::from_str(&contents) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // A corrupt file is treated as signed out rather than a hard failure
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable token file");
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove token file")?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create token directory")?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents).context("Failed to write token file")?;
        restrict_permissions(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("Failed to restrict token file permissions")
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_entries()?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries)?;
        }
        Ok(())
    }
}
