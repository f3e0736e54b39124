//! HTTP cookie adapter
//!
//! Reads the request's `Cookie` header once and records every write made
//! during the request, so the middleware can emit one `Set-Cookie` per
//! changed cookie on the way out.

use axum::http::{header, HeaderMap};
use chrono::Duration;
use relogin_core::{CookieLifetime, CookieStore};
use std::collections::{BTreeMap, HashMap};

/// Attributes shared by every cookie this server writes
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub secure: bool,
    /// Max-Age applied to permanent cookies
    pub max_age: Duration,
}

/// Parse every `Cookie` header into name/value pairs
///
/// Values are percent-decoded. The first occurrence of a name wins. Pairs
/// without `=`, and values that do not decode to UTF-8, are skipped.
pub fn parse_cookie_header(headers: &HeaderMap) -> HashMap<String, String> {
    let mut jar = HashMap::new();

    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((name, value)) = pair.trim().split_once('=') else {
                continue;
            };
            let Ok(value) = urlencoding::decode(value.trim()) else {
                continue;
            };
            jar.entry(name.trim().to_string())
                .or_insert_with(|| value.into_owned());
        }
    }

    jar
}

/// Render a `Set-Cookie` value
///
/// The value is percent-encoded. A `max_age` of `None` renders a
/// browser-session cookie.
pub fn set_cookie(name: &str, value: &str, max_age: Option<Duration>, options: &CookieOptions) -> String {
    let value = urlencoding::encode(value);
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax");
    if let Some(max_age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age.num_seconds()));
    }
    if options.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Render a `Set-Cookie` value that removes the cookie
pub fn clear_cookie(name: &str, options: &CookieOptions) -> String {
    set_cookie(name, "", Some(Duration::zero()), options)
}

/// Cookie store backed by the request's `Cookie` header
#[derive(Debug, Default)]
pub struct HttpCookies {
    incoming: HashMap<String, String>,
    // None marks a deletion
    pending: BTreeMap<String, Option<(String, CookieLifetime)>>,
}

impl HttpCookies {
    pub fn new(incoming: HashMap<String, String>) -> Self {
        Self {
            incoming,
            pending: BTreeMap::new(),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::new(parse_cookie_header(headers))
    }

    /// Value sent by the client, ignoring writes made during this request
    pub fn incoming(&self, name: &str) -> Option<&str> {
        self.incoming.get(name).map(String::as_str)
    }

    /// `Set-Cookie` values for every cookie changed during this request
    ///
    /// Deleting a cookie the client never sent emits nothing.
    pub fn set_cookie_headers(&self, options: &CookieOptions) -> Vec<String> {
        self.pending
            .iter()
            .filter_map(|(name, change)| match change {
                Some((value, CookieLifetime::Permanent)) => {
                    Some(set_cookie(name, value, Some(options.max_age), options))
                }
                Some((value, CookieLifetime::Session)) => Some(set_cookie(name, value, None, options)),
                None if self.incoming.contains_key(name) => Some(clear_cookie(name, options)),
                None => None,
            })
            .collect()
    }
}

impl CookieStore for HttpCookies {
    fn get(&self, key: &str) -> Option<String> {
        match self.pending.get(key) {
            Some(Some((value, _))) => Some(value.clone()),
            Some(None) => None,
            None => self.incoming.get(key).cloned(),
        }
    }

    fn set(&mut self, key: &str, value: String, lifetime: CookieLifetime) {
        self.pending.insert(key.to_string(), Some((value, lifetime)));
    }

    fn delete(&mut self, key: &str) {
        self.pending.insert(key.to_string(), None);
    }
}
