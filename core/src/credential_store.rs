/// Credential storage: the access/refresh pair shared by every API call
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;
use tracing::warn;

const CREDENTIAL_KEY: &[u8] = b"credential";

/// Access/refresh credential pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

impl Credential {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self {
            access: access.into(),
            refresh,
        }
    }
}

/// Plain storage; no network or retry logic lives behind this trait.
pub trait CredentialStore: Send + Sync {
    /// Current credential, or `None` when logged out
    fn get(&self) -> Option<Credential>;
    fn set(&self, credential: &Credential) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Process-local store, lost on restart
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            inner: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

/// Credential pair persisted in sled so it survives restarts
pub struct SledCredentialStore {
    db: sled::Db,
}

impl SledCredentialStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let db = sled::open(data_dir.join("credentials.db"))
            .map_err(|e| ClientError::Storage(format!("Failed to open credentials DB: {}", e)))?;
        Ok(Self { db })
    }
}

impl CredentialStore for SledCredentialStore {
    fn get(&self) -> Option<Credential> {
        let raw = match self.db.get(CREDENTIAL_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read stored credential: {}", e);
                return None;
            }
        };
        match serde_json::from_slice::<Credential>(&raw) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("Ignoring unreadable stored credential: {}", e);
                None
            }
        }
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        let value = serde_json::to_vec(credential).map_err(ClientError::Serialization)?;
        self.db
            .insert(CREDENTIAL_KEY, value)
            .map_err(|e| ClientError::Storage(format!("Failed to save credential: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| ClientError::Storage(format!("Failed to flush credential: {}", e)))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.db
            .remove(CREDENTIAL_KEY)
            .map_err(|e| ClientError::Storage(format!("Failed to clear credential: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| ClientError::Storage(format!("Failed to flush credential: {}", e)))?;
        Ok(())
    }
}

impl Clone for SledCredentialStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}
