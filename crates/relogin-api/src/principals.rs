//! Principal lookup backends selectable at startup

use crate::repository::PgPrincipalRepository;
use async_trait::async_trait;
use relogin_core::{BarePrincipal, PrincipalId, PrincipalRepository, StaticPrincipals, StorageError};

/// Where principals are looked up
pub enum Principals {
    /// `principals` table in PostgreSQL
    Postgres(PgPrincipalRepository),
    /// Fixed set, used by tests and demos
    Static(StaticPrincipals),
    /// Every identifier the upstream authenticator vouches for exists
    Trusted,
}

#[async_trait]
impl PrincipalRepository for Principals {
    type Principal = BarePrincipal;

    async fn find(&self, id: &PrincipalId) -> Result<Option<BarePrincipal>, StorageError> {
        match self {
            Principals::Postgres(repository) => repository.find(id).await,
            Principals::Static(principals) => principals.find(id).await,
            Principals::Trusted => Ok(Some(BarePrincipal(id.clone()))),
        }
    }
}
