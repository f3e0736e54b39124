//! relogin core - rotating-token persistent login protocol
//!
//! This crate implements "remember me" logins that survive the end of a
//! session without storing anything replayable:
//! - Token codec (sequence/secret generation, transport encoding, Argon2id hashing)
//! - Token repository contract and typed adapter
//! - Validity chain (token match, IP binding, expiration)
//! - Token lifecycle (mint, validate, single-use rotation)
//! - Request-scoped resolver with login, logout and logout-all
//! - Lifecycle hooks and audit logging
//! - Configuration management
//!
//! Session storage, cookie storage, principal lookup and durable token
//! storage are supplied by the host through the traits in [`stores`] and
//! [`repository`].

pub mod audit;
pub mod codec;
pub mod config;
pub mod hooks;
pub mod lifecycle;
pub mod models;
pub mod repository;
pub mod service;
pub mod stores;
pub mod validity;

pub use audit::{audit_log, AuditEvent, AuditHook};
pub use codec::{CodecError, CompositeToken, HashConfig, TokenCodec};
pub use config::{AppConfig, ConfigError, LoginConfig, LoginPolicy};
pub use hooks::{LifecycleHook, LogoutScope};
pub use lifecycle::{CredentialSource, Rejection, Rotation, TokenLifecycle};
pub use models::{DeviceInfo, DeviceSession, PrincipalId, RequestMeta, TokenRecord};
pub use repository::{MemoryTokenRepository, StorageError, TokenRepository, TokenStore};
pub use service::{ReloginService, RequestAuth};
pub use stores::{
    BarePrincipal, CookieLifetime, CookieStore, MemoryCookies, MemorySession, Principal,
    PrincipalRepository, SessionStore, StaticPrincipals,
};
pub use validity::{ChainOutcome, ValidityChain, ValidityCheck};

use thiserror::Error;

/// Errors surfaced by login, logout and device management
///
/// Credential validation never produces one of these: a bad credential
/// resolves to "no principal".
#[derive(Error, Debug)]
pub enum ReloginError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ReloginError>;
