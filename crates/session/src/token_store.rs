//! Scoped, expiring slot holding the session credential.
//!
//! Stores behave like a cookie: a value past its expiry reads as absent.
//! They never validate the token; revocation is the remote authority's call
//! and surfaces through the verification failure path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use scholaris_auth::SessionToken;

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("token store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("token store contents are malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The TTL pushes the expiry past the representable date range.
    #[error("token lifetime of {0} days is out of range")]
    TtlOutOfRange(u32),

    /// Internal lock poisoning.
    #[error("token store lock poisoned")]
    Poisoned,
}

/// Storage contract for the session credential.
pub trait TokenStore: Send + Sync {
    /// Store `token`, replacing any previous value, valid for `ttl_days`.
    fn set(&self, token: &SessionToken, ttl_days: u32) -> Result<(), TokenStoreError>;

    /// Current token, or `None` when absent or expired.
    fn get(&self) -> Result<Option<SessionToken>, TokenStoreError>;

    /// Remove the token. Removing an empty slot is not an error.
    fn remove(&self) -> Result<(), TokenStoreError>;
}

impl<T> TokenStore for Arc<T>
where
    T: TokenStore + ?Sized,
{
    fn set(&self, token: &SessionToken, ttl_days: u32) -> Result<(), TokenStoreError> {
        (**self).set(token, ttl_days)
    }

    fn get(&self) -> Result<Option<SessionToken>, TokenStoreError> {
        (**self).get()
    }

    fn remove(&self) -> Result<(), TokenStoreError> {
        (**self).remove()
    }
}

/// A token with its client-visible expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: SessionToken,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn new(
        token: SessionToken,
        ttl_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, TokenStoreError> {
        let expires_at = now
            .checked_add_signed(Duration::days(i64::from(ttl_days)))
            .ok_or(TokenStoreError::TtlOutOfRange(ttl_days))?;
        Ok(Self { token, expires_at })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<StoredToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `token` (default seven-day expiry).
    pub fn with_token(token: SessionToken) -> Self {
        Self {
            slot: Mutex::new(Some(StoredToken {
                token,
                expires_at: Utc::now() + Duration::days(7),
            })),
        }
    }

    /// Put an exact record in the slot, bypassing TTL computation.
    pub fn put(&self, stored: StoredToken) -> Result<(), TokenStoreError> {
        let mut slot = self.slot.lock().map_err(|_| TokenStoreError::Poisoned)?;
        *slot = Some(stored);
        Ok(())
    }
}

impl TokenStore for MemoryTokenStore {
    fn set(&self, token: &SessionToken, ttl_days: u32) -> Result<(), TokenStoreError> {
        self.put(StoredToken::new(token.clone(), ttl_days, Utc::now())?)
    }

    fn get(&self) -> Result<Option<SessionToken>, TokenStoreError> {
        let mut slot = self.slot.lock().map_err(|_| TokenStoreError::Poisoned)?;

        if slot.as_ref().is_some_and(|s| s.is_expired(Utc::now())) {
            *slot = None;
        }

        Ok(slot.as_ref().map(|s| s.token.clone()))
    }

    fn remove(&self) -> Result<(), TokenStoreError> {
        let mut slot = self.slot.lock().map_err(|_| TokenStoreError::Poisoned)?;
        *slot = None;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File-backed store
// ─────────────────────────────────────────────────────────────────────────────

/// JSON file holding one [`StoredToken`]; survives process restarts.
///
/// Writes go to a sibling temp file that is renamed into place, so a reader
/// sees either the old or the new token.
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

    /// Write an exact record, bypassing TTL computation.
    pub fn put(&self, stored: &StoredToken) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(stored)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn set(&self, token: &SessionToken, ttl_days: u32) -> Result<(), TokenStoreError> {
        self.put(&StoredToken::new(token.clone(), ttl_days, Utc::now())?)
    }

    fn get(&self) -> Result<Option<SessionToken>, TokenStoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let stored: StoredToken = serde_json::from_slice(&bytes)?;
        if stored.is_expired(Utc::now()) {
            tracing::debug!(path = %self.path.display(), "stored token expired; clearing slot");
            self.remove()?;
            return Ok(None);
        }

        Ok(Some(stored.token))
    }

    fn remove(&self) -> Result<(), TokenStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
