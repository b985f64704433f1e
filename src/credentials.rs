use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub salt_hex: String,
    pub sha256_hex: String,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to stat credential file {path}: {source}")]
    Stat {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to read credential file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

struct Cache {
    records: HashMap<String, UserRecord>,
    source_mtime: SystemTime,
}

/// Users file cached by modification time. The whole map is rebuilt
/// whenever the file's mtime changes; content edits that keep the mtime are
/// not noticed.
pub struct CredentialStore {
    path: PathBuf,
    cache: Mutex<Option<Cache>>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Result<HashMap<String, UserRecord>, CredentialError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        let mtime = fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .map_err(|source| CredentialError::Stat {
                path: self.path.display().to_string(),
                source,
            })?;

        match cache.as_ref() {
            Some(cached) if cached.source_mtime == mtime => Ok(cached.records.clone()),
            _ => {
                let records = load(&self.path)?;
                info!(
                    path = %self.path.display(),
                    users = records.len(),
                    "credential file loaded"
                );
                *cache = Some(Cache {
                    records: records.clone(),
                    source_mtime: mtime,
                });
                Ok(records)
            }
        }
    }

    /// `Ok(false)` for unknown users and for records that cannot be checked
    /// (bad salt hex). Only trouble with the file itself is an error.
    pub fn verify(&self, username: &str, password: &str) -> Result<bool, CredentialError> {
        let users = self.get()?;
        let Some(record) = users.get(username) else {
            return Ok(false);
        };

        let salt = match hex::decode(&record.salt_hex) {
            Ok(salt) => salt,
            Err(err) => {
                debug!(user = %username, error = %err, "stored salt is not valid hex");
                return Ok(false);
            }
        };

        let candidate = hash_password(&salt, password);
        let stored = record.sha256_hex.to_ascii_lowercase();
        Ok(candidate.as_bytes().ct_eq(stored.as_bytes()).into())
    }
}

pub fn load(path: &Path) -> Result<HashMap<String, UserRecord>, CredentialError> {
    let text = fs::read_to_string(path).map_err(|source| CredentialError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_users(&text))
}

/// `username:salt_hex:sha256_hex` per line. Comments, blank lines and lines
/// that do not have exactly three non-empty fields are dropped.
pub fn parse_users(text: &str) -> HashMap<String, UserRecord> {
    let mut users = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split(':').map(str::trim).collect();
        let [username, salt_hex, sha256_hex] = parts.as_slice() else {
            continue;
        };
        if username.is_empty() || salt_hex.is_empty() || sha256_hex.is_empty() {
            continue;
        }

        users.insert(
            username.to_string(),
            UserRecord {
                salt_hex: salt_hex.to_string(),
                sha256_hex: sha256_hex.to_string(),
            },
        );
    }
    users
}

/// Lowercase hex of `sha256(salt || password)`.
pub fn hash_password(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn credential_line(username: &str, salt: &[u8], password: &str) -> String {
    format!(
        "{username}:{}:{}",
        hex::encode(salt),
        hash_password(salt, password)
    )
}

pub fn random_salt() -> [u8; 16] {
    rand::random()
}
