use std::path::{Path, PathBuf};

use crate::credential::Credential;
use crate::error::ConnectorError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("persist error: {0}")]
    Persist(String),
}

impl From<StoreError> for ConnectorError {
    fn from(e: StoreError) -> Self {
        ConnectorError::Store(e.to_string())
    }
}

/// Durable home of the single [`Credential`] record.
pub trait CredentialStore: Send + Sync {
    /// Returns an empty credential when nothing has been stored yet.
    fn load(&self) -> Result<Credential, StoreError>;
    fn save(&self, credential: &Credential) -> Result<(), StoreError>;
}

/// A simple in-memory store, mainly for testing.
pub struct MemoryCredentialStore {
    slot: std::sync::Mutex<Option<Credential>>,
    saves: std::sync::atomic::AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            slot: std::sync::Mutex::new(None),
            saves: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn with_credential(credential: Credential) -> Self {
        let store = Self::new();
        if let Ok(mut slot) = store.slot.lock() {
            *slot = Some(credential);
        }
        store
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Credential, StoreError> {
        let slot = self
            .slot
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))?;
        Ok(slot.clone().unwrap_or_default())
    }

    fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        *self
            .slot
            .lock()
            .map_err(|e| StoreError::Persist(format!("lock poisoned: {}", e)))? =
            Some(credential.clone());
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

/// A JSON file store, by default at `~/.dropbox-mcp/config.json`.
///
/// The directory is created owner-only and every save replaces the file
/// through a sibling temp file, so readers never observe a partial record.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join(".dropbox-mcp").join("config.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        let Some(dir) = self.path.parent() else {
            return Ok(());
        };
        if dir.as_os_str().is_empty() {
            return Ok(());
        }
        // Only directories created here get the owner-only mode.
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder
            .create(dir)
            .map_err(|e| StoreError::Persist(format!("failed to create config directory: {}", e)))
    }

    fn write_restricted(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        use std::io::Write;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(contents)?;
        file.sync_all()?;

        // Mode on open only applies to newly created files.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Credential, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => serde_json::from_str(&s)
                .map_err(|e| StoreError::Unavailable(format!("failed to parse config file: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Credential::default()),
            Err(e) => Err(StoreError::Unavailable(format!(
                "failed to read config file: {}",
                e
            ))),
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let s = serde_json::to_string_pretty(credential)
            .map_err(|e| StoreError::Persist(format!("serde: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        Self::write_restricted(&tmp, s.as_bytes())
            .map_err(|e| StoreError::Persist(format!("failed to write config file: {}", e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::Persist(format!("failed to replace config file: {}", e)))?;
        Ok(())
    }
}
