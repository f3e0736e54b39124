//! PostgreSQL token and principal storage
//!
//! Provides durable `TokenRepository` and `PrincipalRepository`
//! implementations using SQLx and PostgreSQL. Every query runs under the
//! configured timeout; a query that exceeds it fails with
//! `StorageError::Timeout`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relogin_core::config::DatabaseConfig;
use relogin_core::{
    BarePrincipal, DeviceInfo, PrincipalId, PrincipalRepository, StorageError, TokenRecord,
    TokenRepository,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::future::Future;
use std::time::Duration;

/// DDL applied by [`connect`]
pub const SCHEMA: &str = include_str!("../migrations/20240101000000_login_tokens.sql");

/// Connect to PostgreSQL and apply pending migrations
pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres_pool_size)
        .acquire_timeout(Duration::from_secs(config.query_timeout_secs))
        .connect(url)
        .await
        .map_err(|e| StorageError::DatabaseError(format!("PostgreSQL connection failed: {e}")))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::DatabaseError(format!("Migration failed: {e}")))?;

    Ok(pool)
}

async fn bounded<T, F>(timeout: Duration, query: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, query).await {
        Ok(result) => result.map_err(|e| StorageError::DatabaseError(e.to_string())),
        Err(_) => Err(StorageError::Timeout),
    }
}

/// Token row from database
#[derive(Debug, FromRow)]
struct TokenRow {
    principal_id: String,
    sequence: String,
    secret_hash: String,
    issued_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    ip_address: Option<String>,
    os: Option<String>,
    browser: Option<String>,
}

impl From<TokenRow> for TokenRecord {
    fn from(row: TokenRow) -> Self {
        TokenRecord {
            principal_id: PrincipalId::new(row.principal_id),
            sequence: row.sequence,
            secret_hash: row.secret_hash,
            issued_at: row.issued_at,
            updated_at: row.updated_at,
            device: DeviceInfo {
                // Rows written by hand may hold anything; an unparsable
                // address simply never matches.
                ip_address: row.ip_address.and_then(|ip| ip.parse().ok()),
                os: row.os,
                browser: row.browser,
            },
        }
    }
}

/// PostgreSQL token repository
pub struct PgTokenRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn find(
        &self,
        principal_id: &PrincipalId,
        sequence: &str,
    ) -> Result<Option<TokenRecord>, StorageError> {
        let row = bounded(
            self.timeout,
            sqlx::query_as::<_, TokenRow>(
                r#"
                SELECT principal_id, sequence, secret_hash, issued_at, updated_at,
                       ip_address, os, browser
                FROM login_tokens
                WHERE principal_id = $1 AND sequence = $2
                "#,
            )
            .bind(principal_id.as_str())
            .bind(sequence)
            .fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert(&self, record: TokenRecord) -> Result<TokenRecord, StorageError> {
        let result = bounded(
            self.timeout,
            sqlx::query(
                r#"
                INSERT INTO login_tokens (
                    principal_id, sequence, secret_hash, issued_at, updated_at,
                    ip_address, os, browser
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (principal_id, sequence) DO NOTHING
                "#,
            )
            .bind(record.principal_id.as_str())
            .bind(&record.sequence)
            .bind(&record.secret_hash)
            .bind(record.issued_at)
            .bind(record.updated_at)
            .bind(record.device.ip_address.map(|ip| ip.to_string()))
            .bind(&record.device.os)
            .bind(&record.device.browser)
            .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::DuplicateSequence {
                sequence: record.sequence,
            });
        }
        Ok(record)
    }

    async fn delete(&self, principal_id: &PrincipalId, sequence: &str) -> Result<bool, StorageError> {
        let result = bounded(
            self.timeout,
            sqlx::query("DELETE FROM login_tokens WHERE principal_id = $1 AND sequence = $2")
                .bind(principal_id.as_str())
                .bind(sequence)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, principal_id: &PrincipalId) -> Result<u64, StorageError> {
        let result = bounded(
            self.timeout,
            sqlx::query("DELETE FROM login_tokens WHERE principal_id = $1")
                .bind(principal_id.as_str())
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    async fn list(&self, principal_id: &PrincipalId) -> Result<Vec<TokenRecord>, StorageError> {
        let rows = bounded(
            self.timeout,
            sqlx::query_as::<_, TokenRow>(
                r#"
                SELECT principal_id, sequence, secret_hash, issued_at, updated_at,
                       ip_address, os, browser
                FROM login_tokens
                WHERE principal_id = $1
                ORDER BY updated_at DESC
                "#,
            )
            .bind(principal_id.as_str())
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Principal lookup against the `principals` table
pub struct PgPrincipalRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgPrincipalRepository {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }
}

#[async_trait]
impl PrincipalRepository for PgPrincipalRepository {
    type Principal = BarePrincipal;

    async fn find(&self, id: &PrincipalId) -> Result<Option<BarePrincipal>, StorageError> {
        let row = bounded(
            self.timeout,
            sqlx::query_as::<_, (String,)>("SELECT id FROM principals WHERE id = $1 AND is_active")
                .bind(id.as_str())
                .fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.map(|(id,)| BarePrincipal(PrincipalId::new(id))))
    }
}
