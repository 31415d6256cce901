// src/storage.rs
//! On-device persistence of the session identity.
//!
//! One JSON file holds the token and user profile so a restart can restore
//! the login. A corrupt file or an expired token reads as "no session".

use crate::models::{SessionIdentity, TokenClaims};
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Option<SessionIdentity> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read session file {}: {}", self.path.display(), e);
                return None;
            }
        };

        let identity: SessionIdentity = match serde_json::from_slice(&bytes) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!("Ignoring malformed session file {}: {}", self.path.display(), e);
                return None;
            }
        };

        if token_expired(&identity.token) {
            tracing::info!("⏰ Stored session for user {} has expired", identity.user_id());
            return None;
        }

        tracing::info!("🔑 Restored session for user {}", identity.user_id());
        Some(identity)
    }

    /// Write through a temp file so a crash never leaves a half-written file
    pub async fn save(&self, identity: &SessionIdentity) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(identity)?;
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &self.path).await?;
        tracing::debug!("Saved session to {}", self.path.display());
        Ok(())
    }

    /// Logout
    pub async fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Only JWTs carry an expiry; opaque tokens are never considered expired.
fn token_expired(token: &str) -> bool {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.required_spec_claims.clear();
    validation.validate_exp = true;

    match decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(_) => false,
        Err(e) => matches!(e.kind(), ErrorKind::ExpiredSignature),
    }
}
