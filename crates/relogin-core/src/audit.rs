//! Security audit logging for persistent login events
//!
//! All audit events are logged at INFO level with the "audit" target,
//! making them easy to filter and route to security monitoring systems.
//! Rejections carry their internal cause here and nowhere else; callers of
//! the service only ever see "not authenticated".
//!
//! # Example
//!
//! ```ignore
//! use relogin_core::audit::AuditHook;
//!
//! let service = ReloginService::new(policy, codec, tokens, principals)
//!     .with_hook(Arc::new(AuditHook));
//! ```

use crate::hooks::{LifecycleHook, LogoutScope};
use crate::lifecycle::{CredentialSource, Rejection};
use crate::models::{PrincipalId, RequestMeta};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Principal logged in
    Login {
        principal_id: String,
        remember: bool,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Principal logged out of one or more devices
    Logout {
        principal_id: Option<String>,
        scope: String,
        target_sequence: Option<String>,
        ip_address: Option<String>,
    },

    /// Persistent credential used and replaced
    TokenRotated {
        principal_id: String,
        old_sequence: String,
        new_sequence: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Presented credential refused
    CredentialRejected {
        principal_id: Option<String>,
        source: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },
}

/// Log a security audit event with structured fields
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    match event {
        AuditEvent::Login {
            principal_id,
            remember,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                principal_id = %principal_id,
                remember = %remember,
                ip_address = ?ip_address,
                "Login"
            );
        }
        AuditEvent::Logout {
            principal_id,
            scope,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                principal_id = ?principal_id,
                scope = %scope,
                ip_address = ?ip_address,
                "Logout"
            );
        }
        AuditEvent::TokenRotated {
            principal_id,
            new_sequence,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                principal_id = %principal_id,
                sequence = %new_sequence,
                ip_address = ?ip_address,
                "Persistent login token rotated"
            );
        }
        AuditEvent::CredentialRejected {
            principal_id,
            source,
            reason,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                principal_id = ?principal_id,
                source = %source,
                reason = %reason,
                ip_address = ?ip_address,
                "Credential rejected"
            );
        }
    }
}

fn ip_of(request: &RequestMeta) -> Option<String> {
    request.remote_ip.map(|ip| ip.to_string())
}

/// Hook that writes every lifecycle event to the audit log
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditHook;

impl LifecycleHook for AuditHook {
    fn after_login(&self, principal_id: &PrincipalId, remember: bool, request: &RequestMeta) {
        audit_log(&AuditEvent::Login {
            principal_id: principal_id.to_string(),
            remember,
            ip_address: ip_of(request),
            user_agent: request.user_agent.clone(),
        });
    }

    fn after_logout(
        &self,
        principal_id: Option<&PrincipalId>,
        scope: &LogoutScope,
        request: &RequestMeta,
    ) {
        let target_sequence = match scope {
            LogoutScope::OtherDevice { sequence } => Some(sequence.clone()),
            _ => None,
        };

        audit_log(&AuditEvent::Logout {
            principal_id: principal_id.map(ToString::to_string),
            scope: scope.as_str().to_string(),
            target_sequence,
            ip_address: ip_of(request),
        });
    }

    fn on_rotation(
        &self,
        principal_id: &PrincipalId,
        old_sequence: &str,
        new_sequence: &str,
        request: &RequestMeta,
    ) {
        audit_log(&AuditEvent::TokenRotated {
            principal_id: principal_id.to_string(),
            old_sequence: old_sequence.to_string(),
            new_sequence: new_sequence.to_string(),
            ip_address: ip_of(request),
            user_agent: request.user_agent.clone(),
        });
    }

    fn on_rejection(
        &self,
        principal_id: Option<&PrincipalId>,
        source: CredentialSource,
        reason: &Rejection,
        request: &RequestMeta,
    ) {
        audit_log(&AuditEvent::CredentialRejected {
            principal_id: principal_id.map(ToString::to_string),
            source: source.as_str().to_string(),
            reason: reason.to_string(),
            ip_address: ip_of(request),
            user_agent: request.user_agent.clone(),
        });
    }
}
