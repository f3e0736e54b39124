//! Data model for persistent logins
//!
//! - PrincipalId: opaque identifier of the authenticated party
//! - TokenRecord: the only durable entity, one per remembered device
//! - DeviceInfo: advisory metadata stamped on a record
//! - RequestMeta: what the transport layer knows about the caller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Opaque principal identifier
///
/// Never generated here; it always comes from the host application. Integer
/// ids are carried in their decimal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PrincipalId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for PrincipalId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for PrincipalId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Caller metadata supplied by the transport layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub remote_ip: Option<IpAddr>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    pub fn new(remote_ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self {
            remote_ip,
            user_agent,
        }
    }
}

/// Device metadata stamped on a token record
///
/// The core always offers every field; a repository may drop the ones its
/// schema has no room for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

impl DeviceInfo {
    /// Derive device metadata from the caller's address and user agent
    pub fn from_request(request: &RequestMeta) -> Self {
        let user_agent = request.user_agent.as_deref().unwrap_or_default();
        Self {
            ip_address: request.remote_ip,
            os: detect_os(user_agent).map(str::to_string),
            browser: detect_browser(user_agent).map(str::to_string),
        }
    }
}

// Order matters: iOS and Android agents also mention "Mac OS X" / "Linux".
fn detect_os(user_agent: &str) -> Option<&'static str> {
    const OS_MARKERS: &[(&str, &str)] = &[
        ("iPhone", "iOS"),
        ("iPad", "iOS"),
        ("Android", "Android"),
        ("Windows", "Windows"),
        ("Mac OS X", "macOS"),
        ("CrOS", "ChromeOS"),
        ("Linux", "Linux"),
    ];

    OS_MARKERS
        .iter()
        .find(|(marker, _)| user_agent.contains(marker))
        .map(|(_, name)| *name)
}

// Chromium forks advertise "Chrome" and "Safari" too, so they come first.
fn detect_browser(user_agent: &str) -> Option<&'static str> {
    const BROWSER_MARKERS: &[(&str, &str)] = &[
        ("Edg/", "Edge"),
        ("OPR/", "Opera"),
        ("Firefox/", "Firefox"),
        ("Chrome/", "Chrome"),
        ("CriOS/", "Chrome"),
        ("Safari/", "Safari"),
    ];

    BROWSER_MARKERS
        .iter()
        .find(|(marker, _)| user_agent.contains(marker))
        .map(|(_, name)| *name)
}

/// Persistent login token record
///
/// `(principal_id, sequence)` is unique among live records. `secret_hash` is a
/// PHC string; the plaintext secret is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub principal_id: PrincipalId,

    /// Public selector, also the second half of the lookup key
    pub sequence: String,

    /// Argon2id hash of the secret half
    #[serde(skip_serializing)]
    pub secret_hash: String,

    pub issued_at: DateTime<Utc>,

    /// Drives the expiration check
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub device: DeviceInfo,
}

impl TokenRecord {
    pub fn new(
        principal_id: PrincipalId,
        sequence: String,
        secret_hash: String,
        device: DeviceInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            principal_id,
            sequence,
            secret_hash,
            issued_at: now,
            updated_at: now,
            device,
        }
    }

    /// Age of the record relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }
}

/// A remembered device as shown to its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSession {
    pub sequence: String,
    pub issued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub device: DeviceInfo,
    /// Whether this record backs the caller's own login
    pub current: bool,
}

impl DeviceSession {
    pub fn from_record(record: &TokenRecord, current_sequence: Option<&str>) -> Self {
        Self {
            sequence: record.sequence.clone(),
            issued_at: record.issued_at,
            updated_at: record.updated_at,
            device: record.device.clone(),
            current: current_sequence == Some(record.sequence.as_str()),
        }
    }
}
