//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::cookies::CookieOptions;
use crate::principals::Principals;
use crate::repository::{self, PgPrincipalRepository, PgTokenRepository};
use crate::session::SessionRegistry;
use relogin_core::config::AppConfig;
use relogin_core::{
    AuditHook, LoginPolicy, MemoryTokenRepository, ReloginService, StorageError, TokenCodec,
    TokenRepository,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Persistent login service as wired by this server
pub type Service = ReloginService<Principals>;

/// Startup failures
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Config(#[from] relogin_core::ConfigError),

    #[error(transparent)]
    Codec(#[from] relogin_core::CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Persistent login service
    pub service: Service,
    /// Server-side sessions
    pub sessions: SessionRegistry,
    /// Cookie attributes derived from config
    pub cookie_options: CookieOptions,
    /// Name of the token backend, reported by the health check
    pub storage_backend: &'static str,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Build state around already constructed repositories
    ///
    /// Fails when the login policy or hashing parameters are invalid, so a
    /// misconfigured server never starts.
    pub fn new(
        config: AppConfig,
        tokens: Arc<dyn TokenRepository>,
        principals: Principals,
        storage_backend: &'static str,
    ) -> Result<Self, StateError> {
        let policy: LoginPolicy = config.validate()?;
        let codec = TokenCodec::new(&config.hashing)?;
        let idle_timeout = config.server.session_idle_timeout()?;

        let cookie_options = CookieOptions {
            secure: config.server.secure_cookies,
            max_age: policy.cookie_max_age,
        };
        let service = ReloginService::new(policy, codec, tokens, Arc::new(principals))
            .with_hook(Arc::new(AuditHook));

        Ok(Self {
            config,
            service,
            sessions: SessionRegistry::new(idle_timeout),
            cookie_options,
            storage_backend,
            start_time: Instant::now(),
        })
    }

    /// Tokens in process memory; every principal named by the upstream
    /// authenticator is accepted
    pub fn in_memory(config: AppConfig) -> Result<Self, StateError> {
        Self::new(
            config,
            Arc::new(MemoryTokenRepository::new()),
            Principals::Trusted,
            "memory",
        )
    }

    /// Tokens and principals in PostgreSQL
    pub async fn connect(config: AppConfig) -> Result<Self, StateError> {
        let Some(url) = config.database.postgres_url.clone() else {
            return Self::in_memory(config);
        };

        let pool = repository::connect(&url, &config.database).await?;
        info!("Connected to PostgreSQL");

        let tokens = PgTokenRepository::new(pool.clone(), &config.database);
        let principals = PgPrincipalRepository::new(pool, &config.database);
        Self::new(
            config,
            Arc::new(tokens),
            Principals::Postgres(principals),
            "postgres",
        )
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
