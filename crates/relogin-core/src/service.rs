//! Persistent login service
//!
//! `ReloginService` is built once at startup with the login policy and the
//! durable collaborators. For every request it hands out a `RequestAuth`
//! bound to that request's session store, cookie store and caller metadata.
//! `RequestAuth` is the public surface: `resolve_principal`, `login`,
//! `logout`, `logout_all` and `devices`.

use crate::codec::{self, CompositeToken, TokenCodec};
use crate::config::LoginPolicy;
use crate::hooks::{LifecycleHook, LogoutScope};
use crate::lifecycle::{CredentialSource, Rejection, TokenLifecycle};
use crate::models::{DeviceSession, PrincipalId, RequestMeta};
use crate::repository::{TokenRepository, TokenStore};
use crate::stores::{
    CookieLifetime, CookieStore, Principal, PrincipalRepository, SessionStore, PRINCIPAL_KEY,
    TOKEN_KEY,
};
use crate::validity::ValidityChain;
use crate::ReloginError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Long-lived persistent login service
pub struct ReloginService<P: PrincipalRepository> {
    policy: LoginPolicy,
    lifecycle: TokenLifecycle,
    principals: Arc<P>,
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl<P: PrincipalRepository> Clone for ReloginService<P> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            lifecycle: self.lifecycle.clone(),
            principals: self.principals.clone(),
            hooks: self.hooks.clone(),
        }
    }
}

impl<P: PrincipalRepository> ReloginService<P> {
    pub fn new(
        policy: LoginPolicy,
        codec: TokenCodec,
        tokens: Arc<dyn TokenRepository>,
        principals: Arc<P>,
    ) -> Self {
        let chain = ValidityChain::new(&policy, codec.clone());
        let store = TokenStore::new(tokens, codec);

        Self {
            policy,
            lifecycle: TokenLifecycle::new(store, chain),
            principals,
            hooks: Vec::new(),
        }
    }

    /// Register a lifecycle hook; hooks run in registration order
    pub fn with_hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn policy(&self) -> &LoginPolicy {
        &self.policy
    }

    pub fn lifecycle(&self) -> &TokenLifecycle {
        &self.lifecycle
    }

    /// Bind the service to one request's stores
    pub fn request<'r>(
        &'r self,
        session: &'r mut dyn SessionStore,
        cookies: &'r mut dyn CookieStore,
        request: RequestMeta,
    ) -> RequestAuth<'r, P> {
        RequestAuth {
            service: self,
            session,
            cookies,
            request,
            resolved: None,
        }
    }
}

/// Request-scoped view of the service
///
/// The resolved principal is memoized for the lifetime of this value and
/// reset by `login`, `logout` and `logout_all`.
pub struct RequestAuth<'r, P: PrincipalRepository> {
    service: &'r ReloginService<P>,
    session: &'r mut dyn SessionStore,
    cookies: &'r mut dyn CookieStore,
    request: RequestMeta,
    resolved: Option<Option<P::Principal>>,
}

impl<'r, P: PrincipalRepository> RequestAuth<'r, P> {
    /// Seed the memo with a principal already resolved earlier in the same
    /// request
    pub fn with_resolution(mut self, principal: Option<P::Principal>) -> Self {
        self.resolved = Some(principal);
        self
    }

    pub fn request_meta(&self) -> &RequestMeta {
        &self.request
    }

    /// The principal behind this request, if any
    ///
    /// Computed at most once; later calls return the memoized answer.
    pub async fn resolve_principal(&mut self) -> Option<P::Principal> {
        if let Some(resolved) = &self.resolved {
            return resolved.clone();
        }

        let principal = self.resolve_uncached().await;
        self.resolved = Some(principal.clone());
        principal
    }

    pub async fn principal_id(&mut self) -> Option<PrincipalId> {
        self.resolve_principal()
            .await
            .map(|principal| principal.principal_id())
    }

    async fn resolve_uncached(&mut self) -> Option<P::Principal> {
        let principal_id = match self.session.get(PRINCIPAL_KEY) {
            Some(uid) => {
                let principal_id = PrincipalId::new(uid);
                if self.service.policy.strong_sessions
                    && !self.strong_session_valid(&principal_id).await
                {
                    self.forced_logout(&principal_id).await;
                    return None;
                }
                principal_id
            }
            None => self.login_from_cookies().await?,
        };

        match self.service.principals.find(&principal_id).await {
            Ok(Some(principal)) => Some(principal),
            Ok(None) => {
                debug!(principal_id = %principal_id, "Principal no longer exists");
                None
            }
            Err(e) => {
                warn!(principal_id = %principal_id, error = %e, "Principal lookup failed");
                None
            }
        }
    }

    /// Strong sessions revalidate the session composite on every request,
    /// through the same chain as cookies, without rotating it
    async fn strong_session_valid(&mut self, principal_id: &PrincipalId) -> bool {
        let composite = self.session.get(TOKEN_KEY);
        match self
            .service
            .lifecycle
            .validate(principal_id, composite.as_deref(), &self.request)
            .await
        {
            Ok(_) => true,
            Err(rejection) => {
                self.rejected(Some(principal_id), CredentialSource::Session, &rejection);
                false
            }
        }
    }

    async fn forced_logout(&mut self, principal_id: &PrincipalId) {
        let scope = LogoutScope::CurrentDevice;
        self.run_before_logout(Some(principal_id), &scope);

        let sequence = self.current_sequence();
        self.clear_local();
        if let Some(sequence) = sequence {
            if let Err(e) = self
                .service
                .lifecycle
                .store()
                .delete_sequence(principal_id, &sequence)
                .await
            {
                warn!(principal_id = %principal_id, error = %e, "Failed to delete token on forced logout");
            }
        }

        self.run_after_logout(Some(principal_id), &scope);
    }

    async fn login_from_cookies(&mut self) -> Option<PrincipalId> {
        let uid = self.cookies.get(PRINCIPAL_KEY);
        let composite = self.cookies.get(TOKEN_KEY);

        let uid = match (uid, &composite) {
            (Some(uid), _) => uid,
            (None, None) => return None,
            (None, Some(_)) => {
                self.rejected(None, CredentialSource::Cookie, &Rejection::Malformed);
                self.clear_credentials();
                return None;
            }
        };
        let principal_id = PrincipalId::new(uid);

        match self
            .service
            .lifecycle
            .rotate(&principal_id, composite.as_deref(), &self.request)
            .await
        {
            Ok(rotation) => {
                self.session
                    .set(PRINCIPAL_KEY, principal_id.to_string());
                if self.service.policy.strong_sessions {
                    self.session.set(TOKEN_KEY, rotation.token.encode());
                }
                self.set_persistent_cookies(&principal_id, &rotation.token);

                for hook in &self.service.hooks {
                    hook.on_rotation(
                        &principal_id,
                        &rotation.previous_sequence,
                        &rotation.token.sequence,
                        &self.request,
                    );
                }
                Some(principal_id)
            }
            Err(rejection) => {
                self.rejected(Some(&principal_id), CredentialSource::Cookie, &rejection);
                self.clear_credentials();
                None
            }
        }
    }

    /// Establish a login for a principal the host has already authenticated
    ///
    /// With `remember`, the minted composite is also written to permanent
    /// cookies. Under a single-login policy every other record of the
    /// principal is evicted first.
    pub async fn login(
        &mut self,
        principal_id: &PrincipalId,
        remember: bool,
    ) -> Result<(), ReloginError> {
        for hook in &self.service.hooks {
            hook.before_login(principal_id, remember, &self.request);
        }

        let store = self.service.lifecycle.store();
        if !self.service.policy.allow_multiple_login {
            let evicted = store.delete_all(principal_id).await?;
            debug!(principal_id = %principal_id, evicted, "Evicted existing token records");
        } else if let Some(sequence) = self.current_sequence_of(principal_id) {
            // This device is logging in again; its old record would be orphaned.
            store.delete_sequence(principal_id, &sequence).await?;
        }

        self.session.set(PRINCIPAL_KEY, principal_id.to_string());
        self.session.delete(TOKEN_KEY);
        if !remember {
            self.clear_cookies();
        }

        if remember || self.service.policy.strong_sessions {
            let token = self
                .service
                .lifecycle
                .mint(principal_id, &self.request)
                .await?;

            if self.service.policy.strong_sessions {
                self.session.set(TOKEN_KEY, token.encode());
            }
            if remember {
                self.set_persistent_cookies(principal_id, &token);
            }
        }

        self.resolved = None;

        for hook in &self.service.hooks {
            hook.after_login(principal_id, remember, &self.request);
        }
        Ok(())
    }

    /// Log out a device
    ///
    /// Without a target, or with the sequence of this device, the local
    /// session and cookies are cleared and this device's record deleted.
    /// With another sequence only that record of the resolved principal is
    /// deleted and the local session stays intact.
    pub async fn logout(&mut self, target_sequence: Option<&str>) -> Result<(), ReloginError> {
        let current = self.current_sequence();

        match target_sequence {
            Some(target) if current.as_deref() != Some(target) => {
                self.logout_other_device(target).await
            }
            _ => self.logout_current_device().await,
        }
    }

    async fn logout_current_device(&mut self) -> Result<(), ReloginError> {
        let owned = self.owned_credential().await;
        let principal_id = owned.as_ref().map(|(principal_id, _)| principal_id.clone());
        let scope = LogoutScope::CurrentDevice;
        self.run_before_logout(principal_id.as_ref(), &scope);

        self.clear_local();
        self.resolved = Some(None);

        if let Some((principal_id, Some(sequence))) = &owned {
            self.service
                .lifecycle
                .store()
                .delete_sequence(principal_id, sequence)
                .await?;
        }

        self.run_after_logout(principal_id.as_ref(), &scope);
        Ok(())
    }

    /// Principal and token sequence this device has proven it holds
    ///
    /// A session principal is trusted as is. Cookies alone only count when
    /// their composite passes the validity chain; an unproven cookie yields
    /// `None`, so its record is left alone.
    async fn owned_credential(&mut self) -> Option<(PrincipalId, Option<String>)> {
        if let Some(uid) = self.session.get(PRINCIPAL_KEY) {
            return Some((PrincipalId::new(uid), self.current_sequence()));
        }

        let principal_id = PrincipalId::new(self.cookies.get(PRINCIPAL_KEY)?);
        let composite = self.cookies.get(TOKEN_KEY);
        match self
            .service
            .lifecycle
            .validate(&principal_id, composite.as_deref(), &self.request)
            .await
        {
            Ok(record) => Some((principal_id, Some(record.sequence))),
            Err(rejection) => {
                self.rejected(Some(&principal_id), CredentialSource::Cookie, &rejection);
                None
            }
        }
    }

    async fn logout_other_device(&mut self, sequence: &str) -> Result<(), ReloginError> {
        let principal_id = self
            .principal_id()
            .await
            .ok_or(ReloginError::NotAuthenticated)?;
        let scope = LogoutScope::OtherDevice {
            sequence: sequence.to_string(),
        };
        self.run_before_logout(Some(&principal_id), &scope);

        let removed = self
            .service
            .lifecycle
            .store()
            .delete_sequence(&principal_id, sequence)
            .await?;
        debug!(principal_id = %principal_id, sequence, removed, "Logged out other device");

        self.run_after_logout(Some(&principal_id), &scope);
        Ok(())
    }

    /// Delete every record of the principal and clear local state
    pub async fn logout_all(&mut self, principal_id: &PrincipalId) -> Result<u64, ReloginError> {
        let scope = LogoutScope::AllDevices;
        self.run_before_logout(Some(principal_id), &scope);

        self.clear_local();
        self.resolved = Some(None);
        let removed = self
            .service
            .lifecycle
            .store()
            .delete_all(principal_id)
            .await?;

        self.run_after_logout(Some(principal_id), &scope);
        Ok(removed)
    }

    /// Remembered devices of the resolved principal
    pub async fn devices(&mut self) -> Result<Vec<DeviceSession>, ReloginError> {
        let principal_id = self
            .principal_id()
            .await
            .ok_or(ReloginError::NotAuthenticated)?;
        let current = self.current_sequence();

        let records = self
            .service
            .lifecycle
            .store()
            .list(&principal_id)
            .await?;

        Ok(records
            .iter()
            .map(|record| DeviceSession::from_record(record, current.as_deref()))
            .collect())
    }

    /// Sequence of the credential this device holds: the session composite
    /// first, then the cookie composite
    pub fn current_sequence(&self) -> Option<String> {
        let (from_session, _) = codec::decode(self.session.get(TOKEN_KEY).as_deref());
        from_session.or_else(|| codec::decode(self.cookies.get(TOKEN_KEY).as_deref()).0)
    }

    fn current_sequence_of(&self, principal_id: &PrincipalId) -> Option<String> {
        (self.current_principal_id().as_ref() == Some(principal_id))
            .then(|| self.current_sequence())
            .flatten()
    }

    fn current_principal_id(&self) -> Option<PrincipalId> {
        self.session
            .get(PRINCIPAL_KEY)
            .or_else(|| self.cookies.get(PRINCIPAL_KEY))
            .map(PrincipalId::new)
    }

    fn set_persistent_cookies(&mut self, principal_id: &PrincipalId, token: &CompositeToken) {
        self.cookies.set(
            PRINCIPAL_KEY,
            principal_id.to_string(),
            CookieLifetime::Permanent,
        );
        self.cookies
            .set(TOKEN_KEY, token.encode(), CookieLifetime::Permanent);
    }

    fn clear_cookies(&mut self) {
        self.cookies.delete(PRINCIPAL_KEY);
        self.cookies.delete(TOKEN_KEY);
    }

    /// Drop the persistent credential after a failed presentation
    fn clear_credentials(&mut self) {
        self.clear_cookies();
        self.session.delete(TOKEN_KEY);
    }

    fn clear_local(&mut self) {
        self.session.delete(PRINCIPAL_KEY);
        self.session.delete(TOKEN_KEY);
        self.clear_cookies();
    }

    fn rejected(
        &self,
        principal_id: Option<&PrincipalId>,
        source: CredentialSource,
        rejection: &Rejection,
    ) {
        warn!(
            principal_id = ?principal_id.map(PrincipalId::as_str),
            source = source.as_str(),
            reason = %rejection,
            "Persistent credential rejected"
        );
        for hook in &self.service.hooks {
            hook.on_rejection(principal_id, source, rejection, &self.request);
        }
    }

    fn run_before_logout(&self, principal_id: Option<&PrincipalId>, scope: &LogoutScope) {
        for hook in &self.service.hooks {
            hook.before_logout(principal_id, scope, &self.request);
        }
    }

    fn run_after_logout(&self, principal_id: Option<&PrincipalId>, scope: &LogoutScope) {
        for hook in &self.service.hooks {
            hook.after_logout(principal_id, scope, &self.request);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HashConfig;
    use crate::repository::MemoryTokenRepository;
    use crate::stores::{MemoryCookies, MemorySession, StaticPrincipals};

    fn service(policy: LoginPolicy) -> ReloginService<StaticPrincipals> {
        ReloginService::new(
            policy,
            TokenCodec::new(&HashConfig::low_cost()).unwrap(),
            Arc::new(MemoryTokenRepository::new()),
            Arc::new(StaticPrincipals::new([100i64])),
        )
    }

    #[tokio::test]
    async fn test_anonymous_without_credentials() {
        let service = service(LoginPolicy::default());
        let mut session = MemorySession::new();
        let mut cookies = MemoryCookies::new();

        let mut auth = service.request(&mut session, &mut cookies, RequestMeta::default());
        assert!(auth.resolve_principal().await.is_none());
    }

    #[tokio::test]
    async fn test_login_without_remember_sets_session_only() {
        let policy = LoginPolicy {
            strong_sessions: false,
            ..Default::default()
        };
        let service = service(policy);
        let mut session = MemorySession::new();
        let mut cookies = MemoryCookies::new();
        let principal = PrincipalId::from(100i64);

        let mut auth = service.request(&mut session, &mut cookies, RequestMeta::default());
        auth.login(&principal, false).await.unwrap();
        assert_eq!(auth.principal_id().await, Some(principal));

        assert_eq!(session.get(PRINCIPAL_KEY).as_deref(), Some("100"));
        assert!(session.get(TOKEN_KEY).is_none());
        assert!(cookies.is_empty());
    }

    #[tokio::test]
    async fn test_resolution_is_memoized() {
        let service = service(LoginPolicy::default());
        let mut session = MemorySession::new();
        let mut cookies = MemoryCookies::new();
        session.set(PRINCIPAL_KEY, "100".to_string());

        // Seeded memo wins over the (invalid) strong session.
        let mut auth = service
            .request(&mut session, &mut cookies, RequestMeta::default())
            .with_resolution(None);
        assert!(auth.resolve_principal().await.is_none());
        assert!(auth.resolve_principal().await.is_none());
        drop(auth);

        assert_eq!(session.get(PRINCIPAL_KEY).as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn test_uid_cookie_without_token_is_cleared() {
        let service = service(LoginPolicy::default());
        let mut session = MemorySession::new();
        let mut cookies = MemoryCookies::new();
        cookies.set(PRINCIPAL_KEY, "100".to_string(), CookieLifetime::Permanent);

        let mut auth = service.request(&mut session, &mut cookies, RequestMeta::default());
        assert!(auth.resolve_principal().await.is_none());
        drop(auth);

        assert!(cookies.is_empty());
    }

    #[tokio::test]
    async fn test_logout_other_device_requires_principal() {
        let service = service(LoginPolicy::default());
        let mut session = MemorySession::new();
        let mut cookies = MemoryCookies::new();

        let mut auth = service.request(&mut session, &mut cookies, RequestMeta::default());
        let result = auth.logout(Some("someone-elses-sequence")).await;
        assert!(matches!(result, Err(ReloginError::NotAuthenticated)));
    }
}
