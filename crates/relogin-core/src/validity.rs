//! Validity chain for presented tokens
//!
//! Runs an ordered list of checks against a stored record and stops at the
//! first failure. `token_match` is always first; `ip_equality` and
//! `expiration` are added by the login policy.

use crate::codec::TokenCodec;
use crate::config::LoginPolicy;
use crate::models::{RequestMeta, TokenRecord};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// A single check in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityCheck {
    TokenMatch,
    IpEquality,
    Expiration,
}

impl ValidityCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidityCheck::TokenMatch => "token_match",
            ValidityCheck::IpEquality => "ip_equality",
            ValidityCheck::Expiration => "expiration",
        }
    }
}

impl fmt::Display for ValidityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome {
    /// Checks that ran, in order
    pub executed: Vec<ValidityCheck>,
    /// The check that failed, if any
    pub failed: Option<ValidityCheck>,
}

impl ChainOutcome {
    pub fn is_valid(&self) -> bool {
        self.failed.is_none()
    }
}

/// Ordered, short-circuiting set of validity checks
#[derive(Debug, Clone)]
pub struct ValidityChain {
    checks: Vec<ValidityCheck>,
    max_age: Option<Duration>,
    codec: TokenCodec,
}

impl ValidityChain {
    pub fn new(policy: &LoginPolicy, codec: TokenCodec) -> Self {
        let mut checks = vec![ValidityCheck::TokenMatch];
        if policy.tie_token_to_ip {
            checks.push(ValidityCheck::IpEquality);
        }
        if policy.token_expiration.is_some() {
            checks.push(ValidityCheck::Expiration);
        }

        Self {
            checks,
            max_age: policy.token_expiration,
            codec,
        }
    }

    pub fn checks(&self) -> &[ValidityCheck] {
        &self.checks
    }

    /// Whether `presented_secret` authenticates against `record`
    pub fn valid(&self, record: &TokenRecord, presented_secret: &str, request: &RequestMeta) -> bool {
        self.evaluate(record, presented_secret, request, Utc::now())
            .is_valid()
    }

    /// Run the chain at a given instant and report what happened
    pub fn evaluate(
        &self,
        record: &TokenRecord,
        presented_secret: &str,
        request: &RequestMeta,
        now: DateTime<Utc>,
    ) -> ChainOutcome {
        let mut executed = Vec::with_capacity(self.checks.len());

        for &check in &self.checks {
            executed.push(check);
            let passed = match check {
                ValidityCheck::TokenMatch => self.token_match(record, presented_secret),
                ValidityCheck::IpEquality => ip_equality(record, request),
                ValidityCheck::Expiration => self.expiration(record, now),
            };

            if !passed {
                debug!(
                    principal_id = %record.principal_id,
                    sequence = %record.sequence,
                    check = %check,
                    "Validity check failed"
                );
                return ChainOutcome {
                    executed,
                    failed: Some(check),
                };
            }
        }

        ChainOutcome {
            executed,
            failed: None,
        }
    }

    fn token_match(&self, record: &TokenRecord, presented_secret: &str) -> bool {
        // An unreadable stored hash counts as a mismatch.
        self.codec
            .verify(&record.secret_hash, presented_secret)
            .unwrap_or(false)
    }

    fn expiration(&self, record: &TokenRecord, now: DateTime<Utc>) -> bool {
        match self.max_age {
            Some(max_age) => record.age(now) <= max_age,
            None => true,
        }
    }
}

fn ip_equality(record: &TokenRecord, request: &RequestMeta) -> bool {
    match (record.device.ip_address, request.remote_ip) {
        (Some(stored), Some(remote)) => stored == remote,
        _ => false,
    }
}
