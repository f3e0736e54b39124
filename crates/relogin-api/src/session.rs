//! Server-side session registry
//!
//! Sessions live in process memory, keyed by an opaque id carried in the
//! `relogin_sid` browser-session cookie. A session that ends up empty is
//! dropped together with its cookie, and one left unused longer than the
//! idle timeout is dropped the next time the registry is touched.

use chrono::{DateTime, Duration, Utc};
use relogin_core::MemorySession;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "relogin_sid";

/// What the response must do with the session cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Cookie already points at the stored session
    Unchanged,
    /// Send this new id
    Issued(String),
    /// Remove the cookie
    Ended,
}

#[derive(Debug)]
struct StoredSession {
    values: HashMap<String, String>,
    last_seen: DateTime<Utc>,
}

impl StoredSession {
    fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        now - self.last_seen > idle_timeout
    }
}

/// In-memory session storage shared by all requests
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, StoredSession>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Session values for an id, empty when the id is unknown or idle
    pub async fn load(&self, sid: &str) -> MemorySession {
        self.load_at(sid, Utc::now()).await
    }

    async fn load_at(&self, sid: &str, now: DateTime<Utc>) -> MemorySession {
        let mut sessions = self.sessions.write().await;

        match sessions.get(sid) {
            Some(stored) if stored.is_idle(now, self.idle_timeout) => {
                sessions.remove(sid);
                MemorySession::new()
            }
            Some(stored) => MemorySession::from(stored.values.clone()),
            None => MemorySession::new(),
        }
    }

    /// Store a request's session under its id
    ///
    /// With `renew`, the session moves to a fresh id and the old one is
    /// forgotten. Unknown or idle ids are never reused.
    pub async fn save(&self, sid: Option<&str>, session: MemorySession, renew: bool) -> SessionUpdate {
        self.save_at(sid, session, renew, Utc::now()).await
    }

    async fn save_at(
        &self,
        sid: Option<&str>,
        session: MemorySession,
        renew: bool,
        now: DateTime<Utc>,
    ) -> SessionUpdate {
        let mut sessions = self.sessions.write().await;

        if session.is_empty() {
            return match sid {
                Some(sid) => {
                    sessions.remove(sid);
                    SessionUpdate::Ended
                }
                None => SessionUpdate::Unchanged,
            };
        }

        let stored = StoredSession {
            values: session.into_values(),
            last_seen: now,
        };
        let reusable = !renew
            && sid.is_some_and(|sid| {
                sessions
                    .get(sid)
                    .is_some_and(|existing| !existing.is_idle(now, self.idle_timeout))
            });

        match sid {
            Some(sid) if reusable => {
                sessions.insert(sid.to_string(), stored);
                SessionUpdate::Unchanged
            }
            previous => {
                if let Some(previous) = previous {
                    sessions.remove(previous);
                }
                // New ids are the only way the map grows, so sweep here.
                let idle_timeout = self.idle_timeout;
                sessions.retain(|_, existing| !existing.is_idle(now, idle_timeout));

                let sid = Uuid::new_v4().simple().to_string();
                sessions.insert(sid.clone(), stored);
                SessionUpdate::Issued(sid)
            }
        }
    }

    /// Number of stored sessions, idle ones included until swept
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
