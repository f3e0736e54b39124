//! Token repository
//!
//! Two layers:
//! - `TokenRepository`: the storage backend, implemented outside this crate
//!   for real databases (PostgreSQL lives in `relogin-api`)
//! - `TokenStore`: the typed adapter the protocol talks to; it decodes
//!   composites, hashes secrets before they reach storage, and fails closed
//!
//! `MemoryTokenRepository` is a complete backend for tests and single-process
//! deployments.

use crate::codec::{self, CodecError, CompositeToken, TokenCodec};
use crate::models::{DeviceInfo, PrincipalId, TokenRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Repository errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Token record already exists for sequence {sequence}")]
    DuplicateSequence { sequence: String },

    #[error("Storage operation timed out")]
    Timeout,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Durable storage of token records keyed by `(principal_id, sequence)`
///
/// Implementations must reject a second live record with the same key
/// (`StorageError::DuplicateSequence`) and must report through `delete`
/// whether a row was actually removed; rotation relies on both.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Find a live record
    async fn find(
        &self,
        principal_id: &PrincipalId,
        sequence: &str,
    ) -> Result<Option<TokenRecord>, StorageError>;

    /// Persist a new record
    async fn insert(&self, record: TokenRecord) -> Result<TokenRecord, StorageError>;

    /// Delete one record. Returns `false` when nothing matched.
    async fn delete(&self, principal_id: &PrincipalId, sequence: &str)
        -> Result<bool, StorageError>;

    /// Delete every record of a principal. Returns the number removed.
    async fn delete_all(&self, principal_id: &PrincipalId) -> Result<u64, StorageError>;

    /// All live records of a principal, most recently used first
    async fn list(&self, principal_id: &PrincipalId) -> Result<Vec<TokenRecord>, StorageError>;
}

/// Typed operations over a `TokenRepository`
#[derive(Clone)]
pub struct TokenStore {
    repository: Arc<dyn TokenRepository>,
    codec: TokenCodec,
}

impl TokenStore {
    pub fn new(repository: Arc<dyn TokenRepository>, codec: TokenCodec) -> Self {
        Self { repository, codec }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn find(
        &self,
        principal_id: &PrincipalId,
        sequence: &str,
    ) -> Result<Option<TokenRecord>, StorageError> {
        self.repository.find(principal_id, sequence).await
    }

    /// Decode a composite and look up its record
    ///
    /// Fails closed: a malformed composite or a storage error yields `None`.
    pub async fn find_by_composite(
        &self,
        principal_id: &PrincipalId,
        composite: Option<&str>,
    ) -> Option<TokenRecord> {
        let (Some(sequence), _) = codec::decode(composite) else {
            debug!(principal_id = %principal_id, "Composite token has no sequence");
            return None;
        };

        match self.repository.find(principal_id, &sequence).await {
            Ok(record) => record,
            Err(e) => {
                warn!(principal_id = %principal_id, error = %e, "Token lookup failed");
                None
            }
        }
    }

    /// Hash the secret half and persist a new record
    pub async fn insert(
        &self,
        principal_id: &PrincipalId,
        token: &CompositeToken,
        device: DeviceInfo,
    ) -> Result<TokenRecord, StorageError> {
        let secret_hash = self.codec.hash(&token.secret)?;
        let record = TokenRecord::new(
            principal_id.clone(),
            token.sequence.clone(),
            secret_hash,
            device,
        );
        self.repository.insert(record).await
    }

    /// Delete a record; deleting an absent record is not an error
    pub async fn delete(&self, record: &TokenRecord) -> Result<bool, StorageError> {
        self.delete_sequence(&record.principal_id, &record.sequence)
            .await
    }

    pub async fn delete_sequence(
        &self,
        principal_id: &PrincipalId,
        sequence: &str,
    ) -> Result<bool, StorageError> {
        self.repository.delete(principal_id, sequence).await
    }

    pub async fn delete_all(&self, principal_id: &PrincipalId) -> Result<u64, StorageError> {
        self.repository.delete_all(principal_id).await
    }

    pub async fn list(&self, principal_id: &PrincipalId) -> Result<Vec<TokenRecord>, StorageError> {
        self.repository.list(principal_id).await
    }
}

/// In-memory token repository
#[derive(Debug, Default)]
pub struct MemoryTokenRepository {
    records: RwLock<BTreeMap<(PrincipalId, String), TokenRecord>>,
}

impl MemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records across all principals
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Overwrite a record in place, bypassing the uniqueness check
    pub async fn put(&self, record: TokenRecord) {
        let key = (record.principal_id.clone(), record.sequence.clone());
        self.records.write().await.insert(key, record);
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn find(
        &self,
        principal_id: &PrincipalId,
        sequence: &str,
    ) -> Result<Option<TokenRecord>, StorageError> {
        let key = (principal_id.clone(), sequence.to_string());
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn insert(&self, record: TokenRecord) -> Result<TokenRecord, StorageError> {
        let key = (record.principal_id.clone(), record.sequence.clone());
        let mut records = self.records.write().await;

        if records.contains_key(&key) {
            return Err(StorageError::DuplicateSequence {
                sequence: record.sequence,
            });
        }

        records.insert(key, record.clone());
        Ok(record)
    }

    async fn delete(
        &self,
        principal_id: &PrincipalId,
        sequence: &str,
    ) -> Result<bool, StorageError> {
        let key = (principal_id.clone(), sequence.to_string());
        Ok(self.records.write().await.remove(&key).is_some())
    }

    async fn delete_all(&self, principal_id: &PrincipalId) -> Result<u64, StorageError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(owner, _), _| owner != principal_id);
        Ok((before - records.len()) as u64)
    }

    async fn list(&self, principal_id: &PrincipalId) -> Result<Vec<TokenRecord>, StorageError> {
        let records = self.records.read().await;
        let mut owned: Vec<TokenRecord> = records
            .values()
            .filter(|record| &record.principal_id == principal_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned)
    }
}
