//! Token records and the stores that persist them.
//!
//! A store only ever sees digests. The plaintext secret leaves the process
//! once, in the create response, and is never written anywhere.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Capability class carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Held by Compute nodes (register/unregister with the Manager)
    Compute,
    /// Held by the Manager (drives Compute nodes)
    Manager,
    /// Held by operators (configure/simulate, token administration)
    User,
}

impl TokenType {
    /// Every token type, for "any valid token" checks.
    pub const ALL: [TokenType; 3] = [TokenType::Compute, TokenType::Manager, TokenType::User];

    /// Returns the wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Compute => "compute",
            TokenType::Manager => "manager",
            TokenType::User => "user",
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compute" => Ok(TokenType::Compute),
            "manager" => Ok(TokenType::Manager),
            "user" => Ok(TokenType::User),
            _ => Err(format!("unknown token type: {}", s)),
        }
    }
}

/// SHA-256 digest of a token secret; the storage and lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenDigest([u8; 32]);

impl TokenDigest {
    /// Digests a presented secret.
    pub fn of(secret: &str) -> Self {
        Self(Sha256::digest(secret.as_bytes()).into())
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the digest as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex digest.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl Serialize for TokenDigest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TokenDigest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TokenDigest::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 64 hex chars"))
    }
}

/// A persisted token. Records are never deleted; revocation is a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub digest: TokenDigest,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub revoked: bool,
}

impl TokenRecord {
    /// True while the token is neither revoked nor past its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires
    }
}

/// Token store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Digest already present")]
    Duplicate,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Trait for token record storage.
///
/// Implementations must be thread-safe. There is deliberately no delete.
pub trait TokenStore: Send + Sync {
    /// Insert a new record; fails with `Duplicate` if the digest exists.
    fn insert(&self, record: TokenRecord) -> Result<(), StoreError>;

    /// Look up a record by digest.
    fn get(&self, digest: &TokenDigest) -> Result<Option<TokenRecord>, StoreError>;

    /// Set the revoked flag. Returns false if the digest is unknown.
    fn mark_revoked(&self, digest: &TokenDigest) -> Result<bool, StoreError>;

    /// Number of records ever stored.
    fn len(&self) -> usize;

    /// Returns true if the store holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    records: RwLock<HashMap<TokenDigest, TokenRecord>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn insert(&self, record: TokenRecord) -> Result<(), StoreError> {
        let mut records = self.records.write();
        if records.contains_key(&record.digest) {
            return Err(StoreError::Duplicate);
        }
        records.insert(record.digest, record);
        Ok(())
    }

    fn get(&self, digest: &TokenDigest) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.records.read().get(digest).cloned())
    }

    fn mark_revoked(&self, digest: &TokenDigest) -> Result<bool, StoreError> {
        match self.records.write().get_mut(digest) {
            Some(record) => {
                record.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}

/// Sled-based persistent token store
///
/// Uses an embedded key-value database for durability. Keys are the raw
/// digest bytes, values the JSON-encoded record.
pub struct SledTokenStore {
    db: sled::Db,
}

impl SledTokenStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Backend(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary store that is removed on drop
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Backend(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }

    fn encode(record: &TokenRecord) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(record).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<TokenRecord, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(format!("Flush failed: {}", e)))?;
        Ok(())
    }
}

impl TokenStore for SledTokenStore {
    fn insert(&self, record: TokenRecord) -> Result<(), StoreError> {
        let value = Self::encode(&record)?;
        let swapped = self
            .db
            .compare_and_swap(record.digest.as_bytes(), None as Option<&[u8]>, Some(value))
            .map_err(|e| StoreError::Backend(format!("Insert failed: {}", e)))?;
        if swapped.is_err() {
            return Err(StoreError::Duplicate);
        }
        self.flush()
    }

    fn get(&self, digest: &TokenDigest) -> Result<Option<TokenRecord>, StoreError> {
        let value = self
            .db
            .get(digest.as_bytes())
            .map_err(|e| StoreError::Backend(format!("Get failed: {}", e)))?;
        value.map(|bytes| Self::decode(&bytes)).transpose()
    }

    fn mark_revoked(&self, digest: &TokenDigest) -> Result<bool, StoreError> {
        let Some(mut record) = self.get(digest)? else {
            return Ok(false);
        };
        if !record.revoked {
            record.revoked = true;
            self.db
                .insert(digest.as_bytes(), Self::encode(&record)?)
                .map_err(|e| StoreError::Backend(format!("Insert failed: {}", e)))?;
            self.flush()?;
        }
        Ok(true)
    }

    fn len(&self) -> usize {
        self.db.len()
    }
}
