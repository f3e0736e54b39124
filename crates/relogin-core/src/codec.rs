//! Token generation, transport encoding and secret hashing
//!
//! A persistent login credential is a pair of independent random values:
//! - the *sequence*, a public selector used as the lookup key
//! - the *secret*, which proves possession and is only ever stored hashed
//!
//! Both travel to the client as one composite string `sequence:secret`.
//! Secrets are hashed with Argon2id:
//! - Memory: 19 MB (default)
//! - Iterations: 2
//! - Parallelism: 1 thread
//! - Salt: random, embedded in the PHC string
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Separator between the sequence and the secret in a composite token
pub const DELIMITER: char = ':';

/// Raw sequence length in bytes (multiple of 3, so base64 needs no padding)
pub const SEQUENCE_BYTES: usize = 9;

/// Raw secret length in bytes (multiple of 3, so base64 needs no padding)
pub const SECRET_BYTES: usize = 21;

/// Token hashing errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to hash token secret: {0}")]
    HashingFailed(String),

    #[error("Failed to verify token secret: {0}")]
    VerificationFailed(String),

    #[error("Invalid token hash format")]
    InvalidHashFormat,

    #[error("Invalid hashing parameters: {0}")]
    InvalidParams(String),
}

/// Argon2 cost parameters for token secrets
///
/// Applies to newly minted hashes only; verification reads the parameters
/// embedded in the stored hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Memory cost in KB (default: 19456 = 19 MB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 2)
    pub time_cost: u32,
    /// Parallelism (lanes, default: 1)
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_cost: 19456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl HashConfig {
    /// Smallest parameters Argon2 accepts. Only for tests and local tooling.
    pub fn low_cost() -> Self {
        Self {
            memory_cost: Params::MIN_M_COST,
            time_cost: Params::MIN_T_COST,
            parallelism: Params::MIN_P_COST,
        }
    }

    /// Create Argon2 parameters from this configuration
    pub fn to_params(&self) -> Result<Params, CodecError> {
        Params::new(self.memory_cost, self.time_cost, self.parallelism, None)
            .map_err(|e| CodecError::InvalidParams(e.to_string()))
    }
}

/// The `(sequence, secret)` pair as handed to the client
#[derive(Clone, PartialEq, Eq)]
pub struct CompositeToken {
    pub sequence: String,
    pub secret: String,
}

impl CompositeToken {
    pub fn new(sequence: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
            secret: secret.into(),
        }
    }

    /// Parse a transport string. Both halves must be present and non-empty.
    pub fn parse(composite: &str) -> Option<Self> {
        match decode(Some(composite)) {
            (Some(sequence), Some(secret)) => Some(Self { sequence, secret }),
            _ => None,
        }
    }

    /// Transport form, `sequence:secret`
    pub fn encode(&self) -> String {
        encode(&self.sequence, &self.secret)
    }
}

// The secret half never reaches logs.
impl fmt::Debug for CompositeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeToken")
            .field("sequence", &self.sequence)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Generate a fresh `(sequence, secret)` pair from the OS random source
pub fn generate() -> CompositeToken {
    CompositeToken {
        sequence: random_urlsafe(SEQUENCE_BYTES),
        secret: random_urlsafe(SECRET_BYTES),
    }
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// Join a sequence and a secret into the transport string
pub fn encode(sequence: &str, secret: &str) -> String {
    format!("{sequence}{DELIMITER}{secret}")
}

/// Split a transport string into its halves
///
/// Missing or empty halves come back as `None`; a secret that itself contains
/// the delimiter is rejected. `decode(None)` is `(None, None)`.
pub fn decode(composite: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(composite) = composite else {
        return (None, None);
    };

    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

    match composite.split_once(DELIMITER) {
        Some((sequence, secret)) if !secret.contains(DELIMITER) => {
            (non_empty(sequence), non_empty(secret))
        }
        Some((sequence, _)) => (non_empty(sequence), None),
        None => (non_empty(composite), None),
    }
}

/// Hashes and verifies token secrets with a fixed Argon2id configuration
#[derive(Clone)]
pub struct TokenCodec {
    argon2: Argon2<'static>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(config: &HashConfig) -> Result<Self, CodecError> {
        let params = config.to_params()?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a secret into a PHC string (algorithm, parameters, salt, hash)
    pub fn hash(&self, secret: &str) -> Result<String, CodecError> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| CodecError::HashingFailed(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify a candidate secret against a stored PHC hash
    ///
    /// * `Ok(true)` - secret matches
    /// * `Ok(false)` - secret does not match
    /// * `Err(CodecError)` - the stored hash is unreadable
    ///
    /// The parameters embedded in the hash win over this codec's own, so
    /// records hashed under an older cost setting still verify.
    pub fn verify(&self, secret_hash: &str, candidate: &str) -> Result<bool, CodecError> {
        let parsed = PasswordHash::new(secret_hash).map_err(|_| CodecError::InvalidHashFormat)?;

        match self.argon2.verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CodecError::VerificationFailed(e.to_string())),
        }
    }
}
