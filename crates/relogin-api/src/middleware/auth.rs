/// Persistent login middleware
///
/// For every request under `/api/v1` this middleware:
/// 1. Builds caller metadata (IP address, user agent)
/// 2. Loads the server-side session named by the session cookie
/// 3. Resolves the principal once, logging in from cookies if needed
/// 4. Hands the request context to handlers through extensions
/// 5. Persists the session and emits `Set-Cookie` headers on the way out
use crate::cookies::{clear_cookie, set_cookie, HttpCookies};
use crate::principals::Principals;
use crate::session::{SessionUpdate, SESSION_COOKIE};
use crate::state::{AppState, Service};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use relogin_core::stores::PRINCIPAL_KEY;
use relogin_core::{BarePrincipal, MemorySession, RequestAuth, RequestMeta, SessionStore};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Per-request login state
pub struct RequestContext {
    pub session: MemorySession,
    pub cookies: HttpCookies,
    pub meta: RequestMeta,
    resolved: Option<Option<BarePrincipal>>,
    initial_principal: Option<String>,
}

impl RequestContext {
    pub fn new(session: MemorySession, cookies: HttpCookies, meta: RequestMeta) -> Self {
        let initial_principal = session.get(PRINCIPAL_KEY);
        Self {
            session,
            cookies,
            meta,
            resolved: None,
            initial_principal,
        }
    }

    /// Bind the service to this request, reusing any earlier resolution
    pub fn auth<'a>(&'a mut self, service: &'a Service) -> RequestAuth<'a, Principals> {
        let resolved = self.resolved.clone();
        let auth = service.request(&mut self.session, &mut self.cookies, self.meta.clone());
        match resolved {
            Some(principal) => auth.with_resolution(principal),
            None => auth,
        }
    }

    /// Principal resolved by the middleware
    pub fn principal(&self) -> Option<&BarePrincipal> {
        self.resolved.as_ref().and_then(Option::as_ref)
    }

    /// Whether the session now belongs to someone else than at the start of
    /// the request
    fn principal_changed(&self) -> bool {
        self.session.get(PRINCIPAL_KEY) != self.initial_principal
    }
}

/// Handle to the request context, stored in request extensions
#[derive(Clone)]
pub struct AuthContext(Arc<Mutex<RequestContext>>);

impl AuthContext {
    pub fn new(context: RequestContext) -> Self {
        Self(Arc::new(Mutex::new(context)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, RequestContext> {
        self.0.lock().await
    }
}

/// Persistent login middleware
///
/// # Usage
///
/// ```ignore
/// let api = Router::new()
///     .route("/session", get(session::current))
///     .route_layer(middleware::from_fn_with_state(state.clone(), relogin_middleware));
/// ```
pub async fn relogin_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let headers = request.headers();
    let meta = RequestMeta::new(
        extract_ip_address(headers).or(peer),
        extract_user_agent(headers),
    );

    let cookies = HttpCookies::from_headers(headers);
    let sid = cookies.incoming(SESSION_COOKIE).map(str::to_string);
    let session = match &sid {
        Some(sid) => state.sessions.load(sid).await,
        None => MemorySession::new(),
    };

    let mut context = RequestContext::new(session, cookies, meta);
    let principal = context.auth(&state.service).resolve_principal().await;
    context.resolved = Some(principal);

    let handle = AuthContext::new(context);
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;

    let mut context = handle.lock().await;
    let renew = context.principal_changed();
    let session = std::mem::take(&mut context.session);
    let mut set_cookies = context.cookies.set_cookie_headers(&state.cookie_options);

    match state.sessions.save(sid.as_deref(), session, renew).await {
        SessionUpdate::Unchanged => {}
        SessionUpdate::Issued(sid) => {
            set_cookies.push(set_cookie(SESSION_COOKIE, &sid, None, &state.cookie_options))
        }
        SessionUpdate::Ended => set_cookies.push(clear_cookie(SESSION_COOKIE, &state.cookie_options)),
    }

    let headers = response.headers_mut();
    for cookie in set_cookies {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "Dropping unrepresentable Set-Cookie header"),
        }
    }

    response
}

/// Extract client IP address from request headers
///
/// Checks the X-Forwarded-For and X-Real-IP headers set by reverse
/// proxies. Values that do not parse as an address are ignored.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<IpAddr> {
    // Take the first IP in the chain (client IP)
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|xff| xff.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());

    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|ip| ip.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    })
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
