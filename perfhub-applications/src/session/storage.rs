//! Session Storage - Persistence layer for the client credential
//!
//! The credential and the profile cached at login are session-scoped data;
//! `clear` removes both.

use perfhub_core::{storage_error, Credential, CredentialStore, PerfhubResult, UserProfile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

/// Serializable session data for persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default)]
    credential: Option<Credential>,
    #[serde(default)]
    profile: Option<UserProfile>,
}

/// In-memory credential store, used by tests and short-lived processes
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<StoredSession>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a credential
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            inner: RwLock::new(StoredSession {
                credential: Some(credential),
                profile: None,
            }),
        }
    }

    fn read(&self) -> PerfhubResult<std::sync::RwLockReadGuard<'_, StoredSession>> {
        self.inner
            .read()
            .map_err(|_| storage_error!("credential store lock poisoned", "memory_store"))
    }

    fn write(&self) -> PerfhubResult<std::sync::RwLockWriteGuard<'_, StoredSession>> {
        self.inner
            .write()
            .map_err(|_| storage_error!("credential store lock poisoned", "memory_store"))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn credential(&self) -> PerfhubResult<Option<Credential>> {
        Ok(self.read()?.credential.clone())
    }

    fn store_credential(&self, credential: &Credential) -> PerfhubResult<()> {
        self.write()?.credential = Some(credential.clone());
        Ok(())
    }

    fn cached_profile(&self) -> PerfhubResult<Option<UserProfile>> {
        Ok(self.read()?.profile.clone())
    }

    fn cache_profile(&self, profile: &UserProfile) -> PerfhubResult<()> {
        self.write()?.profile = Some(profile.clone());
        Ok(())
    }

    fn clear(&self) -> PerfhubResult<()> {
        *self.write()? = StoredSession::default();
        Ok(())
    }
}

/// Credential store backed by a JSON file
pub struct FileCredentialStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    lock: RwLock<()>,
}

impl FileCredentialStore {
    pub const FILE_NAME: &'static str = "session.json";

    /// Create a store that keeps its data in `storage_dir/session.json`
    pub fn new<P: AsRef<Path>>(storage_dir: P) -> PerfhubResult<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();

        std::fs::create_dir_all(&storage_dir).map_err(|e| {
            storage_error!(
                format!("Failed to create {}", storage_dir.display()),
                "file_store",
                e
            )
        })?;

        info!("Credential storage initialized at: {}", storage_dir.display());

        Ok(Self {
            path: storage_dir.join(Self::FILE_NAME),
            lock: RwLock::new(()),
        })
    }

    /// Platform data directory, e.g. `~/.local/share/perfhub`
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("perfhub")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> PerfhubResult<StoredSession> {
        if !self.path.exists() {
            return Ok(StoredSession::default());
        }

        let json_data = std::fs::read_to_string(&self.path).map_err(|e| {
            storage_error!(
                format!("Failed to read {}", self.path.display()),
                "file_store",
                e
            )
        })?;

        Ok(serde_json::from_str(&json_data)?)
    }

    fn save(&self, session: &StoredSession) -> PerfhubResult<()> {
        let json_data = serde_json::to_string_pretty(session)?;

        std::fs::write(&self.path, json_data).map_err(|e| {
            storage_error!(
                format!("Failed to write {}", self.path.display()),
                "file_store",
                e
            )
        })?;

        debug!("Saved session data to {}", self.path.display());
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut StoredSession)) -> PerfhubResult<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| storage_error!("credential store lock poisoned", "file_store"))?;
        let mut session = self.load()?;
        apply(&mut session);
        self.save(&session)
    }

    fn snapshot(&self) -> PerfhubResult<StoredSession> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| storage_error!("credential store lock poisoned", "file_store"))?;
        self.load()
    }
}

impl CredentialStore for FileCredentialStore {
    fn credential(&self) -> PerfhubResult<Option<Credential>> {
        Ok(self.snapshot()?.credential)
    }

    fn store_credential(&self, credential: &Credential) -> PerfhubResult<()> {
        self.update(|session| session.credential = Some(credential.clone()))
    }

    fn cached_profile(&self) -> PerfhubResult<Option<UserProfile>> {
        Ok(self.snapshot()?.profile)
    }

    fn cache_profile(&self, profile: &UserProfile) -> PerfhubResult<()> {
        self.update(|session| session.profile = Some(profile.clone()))
    }

    fn clear(&self) -> PerfhubResult<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| storage_error!("credential store lock poisoned", "file_store"))?;

        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                storage_error!(
                    format!("Failed to remove {}", self.path.display()),
                    "file_store",
                    e
                )
            })?;
            debug!("Deleted session file: {}", self.path.display());
        }

        Ok(())
    }
}
