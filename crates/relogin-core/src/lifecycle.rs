//! Token record lifecycle: mint, validate, rotate
//!
//! Every successful use of a persistent credential deletes its record and
//! issues a new one, so a copied token stops working as soon as either party
//! uses it. A replayed token no longer finds its record and is refused.

use crate::codec::{self, CompositeToken};
use crate::models::{DeviceInfo, PrincipalId, RequestMeta, TokenRecord};
use crate::repository::{StorageError, TokenStore};
use crate::validity::{ValidityChain, ValidityCheck};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a presented credential was refused
///
/// Only logged and passed to hooks. The service reports every variant to its
/// caller as "not authenticated".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("malformed credential")]
    Malformed,

    #[error("unknown credential")]
    Unknown,

    #[error("{0} check failed")]
    CheckFailed(ValidityCheck),

    #[error("credential already consumed")]
    AlreadyConsumed,

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<StorageError> for Rejection {
    fn from(err: StorageError) -> Self {
        Rejection::Storage(err.to_string())
    }
}

/// Where a presented credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Cookie,
    Session,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Cookie => "cookie",
            CredentialSource::Session => "session",
        }
    }
}

/// A successful rotation
#[derive(Debug, Clone)]
pub struct Rotation {
    pub previous_sequence: String,
    pub token: CompositeToken,
}

/// Mints, validates and rotates token records
#[derive(Clone)]
pub struct TokenLifecycle {
    store: TokenStore,
    chain: ValidityChain,
}

impl TokenLifecycle {
    pub fn new(store: TokenStore, chain: ValidityChain) -> Self {
        Self { store, chain }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn chain(&self) -> &ValidityChain {
        &self.chain
    }

    /// Generate a fresh pair and persist its record, stamped with the
    /// caller's device metadata
    pub async fn mint(
        &self,
        principal_id: &PrincipalId,
        request: &RequestMeta,
    ) -> Result<CompositeToken, StorageError> {
        let token = codec::generate();
        let device = DeviceInfo::from_request(request);

        self.store.insert(principal_id, &token, device).await?;

        debug!(principal_id = %principal_id, sequence = %token.sequence, "Minted token record");
        Ok(token)
    }

    /// Judge a presented composite against storage
    ///
    /// A record that fails the expiration check is deleted on the spot.
    pub async fn validate(
        &self,
        principal_id: &PrincipalId,
        composite: Option<&str>,
        request: &RequestMeta,
    ) -> Result<TokenRecord, Rejection> {
        let (Some(sequence), Some(secret)) = codec::decode(composite) else {
            return Err(Rejection::Malformed);
        };

        let record = self
            .store
            .find(principal_id, &sequence)
            .await?
            .ok_or(Rejection::Unknown)?;

        let outcome = self.chain.evaluate(&record, &secret, request, Utc::now());
        match outcome.failed {
            None => Ok(record),
            Some(ValidityCheck::Expiration) => {
                if let Err(e) = self.store.delete(&record).await {
                    warn!(
                        principal_id = %principal_id,
                        sequence = %record.sequence,
                        error = %e,
                        "Failed to remove stale token record"
                    );
                }
                Err(Rejection::CheckFailed(ValidityCheck::Expiration))
            }
            Some(check) => Err(Rejection::CheckFailed(check)),
        }
    }

    /// Validate a composite, then replace its record with a new one
    ///
    /// The replacement is only minted when this call is the one that removed
    /// the old record, so concurrent presentations of the same token cannot
    /// both succeed.
    pub async fn rotate(
        &self,
        principal_id: &PrincipalId,
        composite: Option<&str>,
        request: &RequestMeta,
    ) -> Result<Rotation, Rejection> {
        let record = self.validate(principal_id, composite, request).await?;

        if !self.store.delete(&record).await? {
            return Err(Rejection::AlreadyConsumed);
        }

        let token = self.mint(principal_id, request).await?;

        Ok(Rotation {
            previous_sequence: record.sequence,
            token,
        })
    }
}
