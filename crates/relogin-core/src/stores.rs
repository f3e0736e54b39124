//! Collaborator contracts owned by the host application
//!
//! The session store and cookie store are request-scoped key/value views;
//! the principal repository resolves an id into the host's user object.

use crate::models::PrincipalId;
use crate::repository::StorageError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Slot holding the principal id, in both the session and the cookie store
pub const PRINCIPAL_KEY: &str = "uid";

/// Slot holding the composite token, in both the session and the cookie store
pub const TOKEN_KEY: &str = "ulogin";

/// Server-side or signed-cookie storage scoped to one connection
pub trait SessionStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn delete(&mut self, key: &str);
}

/// How long a cookie outlives the current browser session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieLifetime {
    /// Dropped when the browser closes
    Session,
    /// Kept for the configured remember period
    Permanent,
}

/// Client-persisted storage
pub trait CookieStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String, lifetime: CookieLifetime);
    fn delete(&mut self, key: &str);
}

/// Minimal view of the host's user object
pub trait Principal: Clone + Send + Sync {
    fn principal_id(&self) -> PrincipalId;
}

/// Looks up principals by id
#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    type Principal: Principal;

    async fn find(&self, id: &PrincipalId) -> Result<Option<Self::Principal>, StorageError>;
}

/// In-memory session store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySession {
    values: HashMap<String, String>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> HashMap<String, String> {
        self.values
    }
}

impl From<HashMap<String, String>> for MemorySession {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// In-memory cookie jar that remembers each cookie's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryCookies {
    values: HashMap<String, (String, CookieLifetime)>,
}

impl MemoryCookies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lifetime(&self, key: &str) -> Option<CookieLifetime> {
        self.values.get(key).map(|(_, lifetime)| *lifetime)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl CookieStore for MemoryCookies {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|(value, _)| value.clone())
    }

    fn set(&mut self, key: &str, value: String, lifetime: CookieLifetime) {
        self.values.insert(key.to_string(), (value, lifetime));
    }

    fn delete(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// Principal that is nothing but its id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BarePrincipal(pub PrincipalId);

impl Principal for BarePrincipal {
    fn principal_id(&self) -> PrincipalId {
        self.0.clone()
    }
}

/// Principal repository backed by a fixed set of known ids
#[derive(Debug, Clone, Default)]
pub struct StaticPrincipals {
    known: std::collections::HashSet<PrincipalId>,
}

impl StaticPrincipals {
    pub fn new<I, P>(ids: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PrincipalId>,
    {
        Self {
            known: ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PrincipalRepository for StaticPrincipals {
    type Principal = BarePrincipal;

    async fn find(&self, id: &PrincipalId) -> Result<Option<BarePrincipal>, StorageError> {
        Ok(self.known.contains(id).then(|| BarePrincipal(id.clone())))
    }
}
