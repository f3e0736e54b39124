//! End-to-end protocol tests
//!
//! Each test plays one or more browser visits against a shared in-memory
//! token repository. A "visit" is a fresh `RequestAuth` over the browser's
//! session and cookie stores.

use chrono::{Duration, Utc};
use relogin_core::stores::{PRINCIPAL_KEY, TOKEN_KEY};
use relogin_core::{
    CompositeToken, CookieLifetime, CookieStore, CredentialSource, HashConfig, LifecycleHook,
    LoginPolicy, LogoutScope, MemoryCookies, MemorySession, MemoryTokenRepository, PrincipalId,
    Rejection, ReloginService, RequestMeta, SessionStore, StaticPrincipals, TokenCodec,
    TokenRepository, ValidityCheck,
};
use std::sync::{Arc, Mutex};

struct Harness {
    repository: Arc<MemoryTokenRepository>,
    service: ReloginService<StaticPrincipals>,
}

impl Harness {
    fn new(policy: LoginPolicy) -> Self {
        Self::with_hooks(policy, Vec::new())
    }

    fn with_hooks(policy: LoginPolicy, hooks: Vec<Arc<dyn LifecycleHook>>) -> Self {
        let repository = Arc::new(MemoryTokenRepository::new());
        let mut service = ReloginService::new(
            policy,
            TokenCodec::new(&HashConfig::low_cost()).unwrap(),
            repository.clone(),
            Arc::new(StaticPrincipals::new([100i64, 200])),
        );
        for hook in hooks {
            service = service.with_hook(hook);
        }
        Self {
            repository,
            service,
        }
    }

    async fn records_of(&self, principal: &PrincipalId) -> Vec<String> {
        self.repository
            .list(principal)
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.sequence)
            .collect()
    }
}

/// One browser: a session store that lives as long as the browser session
/// and a cookie jar that survives restarts
#[derive(Default, Clone)]
struct Browser {
    session: MemorySession,
    cookies: MemoryCookies,
    meta: RequestMeta,
}

impl Browser {
    fn at(ip: &str) -> Self {
        Self {
            meta: RequestMeta::new(Some(ip.parse().unwrap()), None),
            ..Default::default()
        }
    }

    /// Browser restart: session cookies and server session are gone
    fn restart(&mut self) {
        self.session = MemorySession::new();
    }

    fn cookie_composite(&self) -> Option<CompositeToken> {
        self.cookies
            .get(TOKEN_KEY)
            .and_then(|c| CompositeToken::parse(&c))
    }

    async fn login(&mut self, harness: &Harness, principal: &PrincipalId, remember: bool) {
        let mut auth = harness
            .service
            .request(&mut self.session, &mut self.cookies, self.meta.clone());
        auth.login(principal, remember).await.unwrap();
    }

    async fn visit(&mut self, harness: &Harness) -> Option<PrincipalId> {
        let mut auth = harness
            .service
            .request(&mut self.session, &mut self.cookies, self.meta.clone());
        auth.principal_id().await
    }

    async fn logout(&mut self, harness: &Harness, target: Option<&str>) {
        let mut auth = harness
            .service
            .request(&mut self.session, &mut self.cookies, self.meta.clone());
        auth.logout(target).await.unwrap();
    }
}

fn cookie_policy() -> LoginPolicy {
    LoginPolicy {
        strong_sessions: false,
        ..Default::default()
    }
}

fn p100() -> PrincipalId {
    PrincipalId::from(100i64)
}

#[tokio::test]
async fn test_remembered_login_rotates_on_use() {
    let harness = Harness::new(cookie_policy());
    let mut browser = Browser::default();

    browser.login(&harness, &p100(), true).await;
    let first = browser.cookie_composite().unwrap();
    assert_eq!(harness.records_of(&p100()).await, vec![first.sequence.clone()]);
    assert_eq!(browser.cookies.get(PRINCIPAL_KEY).as_deref(), Some("100"));
    assert_eq!(
        browser.cookies.lifetime(TOKEN_KEY),
        Some(CookieLifetime::Permanent)
    );

    browser.restart();
    assert_eq!(browser.visit(&harness).await, Some(p100()));

    let second = browser.cookie_composite().unwrap();
    assert_ne!(second.sequence, first.sequence);
    assert_ne!(second.secret, first.secret);
    assert_eq!(harness.records_of(&p100()).await, vec![second.sequence.clone()]);
    assert_eq!(browser.session.get(PRINCIPAL_KEY).as_deref(), Some("100"));
}

#[tokio::test]
async fn test_replayed_token_resolves_anonymous_and_clears_cookies() {
    let harness = Harness::new(cookie_policy());
    let mut browser = Browser::default();
    browser.login(&harness, &p100(), true).await;

    // The attacker copies the jar before the legitimate user comes back.
    let mut thief = browser.clone();
    thief.restart();

    browser.restart();
    assert_eq!(browser.visit(&harness).await, Some(p100()));

    assert_eq!(thief.visit(&harness).await, None);
    assert!(thief.cookies.is_empty());

    // The legitimate rotated credential is unaffected.
    browser.restart();
    assert_eq!(browser.visit(&harness).await, Some(p100()));
}

#[tokio::test]
async fn test_forged_secret_is_rejected() {
    let harness = Harness::new(cookie_policy());
    let mut browser = Browser::default();
    browser.login(&harness, &p100(), true).await;
    let token = browser.cookie_composite().unwrap();

    let mut forger = Browser::default();
    forger
        .cookies
        .set(PRINCIPAL_KEY, "100".to_string(), CookieLifetime::Permanent);
    forger.cookies.set(
        TOKEN_KEY,
        CompositeToken::new(token.sequence.clone(), "guess").encode(),
        CookieLifetime::Permanent,
    );

    assert_eq!(forger.visit(&harness).await, None);
    assert!(forger.cookies.is_empty());
    assert_eq!(harness.records_of(&p100()).await, vec![token.sequence]);
}

#[tokio::test]
async fn test_malformed_cookie_fails_closed() {
    let harness = Harness::new(cookie_policy());

    for garbage in ["", "no-delimiter", ":", "a:b:c", "seq:"] {
        let mut browser = Browser::default();
        browser
            .cookies
            .set(PRINCIPAL_KEY, "100".to_string(), CookieLifetime::Permanent);
        browser
            .cookies
            .set(TOKEN_KEY, garbage.to_string(), CookieLifetime::Permanent);

        assert_eq!(browser.visit(&harness).await, None, "{garbage:?}");
        assert!(browser.cookies.is_empty());
    }
}

#[tokio::test]
async fn test_token_for_other_principal_is_rejected() {
    let harness = Harness::new(cookie_policy());
    let mut browser = Browser::default();
    browser.login(&harness, &p100(), true).await;

    browser.restart();
    browser
        .cookies
        .set(PRINCIPAL_KEY, "200".to_string(), CookieLifetime::Permanent);

    assert_eq!(browser.visit(&harness).await, None);
}

#[tokio::test]
async fn test_deleted_principal_resolves_to_none() {
    let harness = Harness::new(cookie_policy());
    let mut browser = Browser::default();
    let ghost = PrincipalId::from(999i64);

    browser.login(&harness, &ghost, true).await;
    assert_eq!(browser.visit(&harness).await, None);
}

#[tokio::test]
async fn test_expired_token_is_rejected_and_removed() {
    let harness = Harness::new(LoginPolicy {
        strong_sessions: false,
        token_expiration: Some(Duration::hours(1)),
        ..Default::default()
    });
    let mut browser = Browser::default();
    browser.login(&harness, &p100(), true).await;
    let token = browser.cookie_composite().unwrap();

    let mut record = harness
        .repository
        .find(&p100(), &token.sequence)
        .await
        .unwrap()
        .unwrap();
    record.updated_at = Utc::now() - Duration::hours(2);
    harness.repository.put(record).await;

    browser.restart();
    assert_eq!(browser.visit(&harness).await, None);
    assert!(browser.cookies.is_empty());
    assert!(harness.repository.is_empty().await);
}

#[tokio::test]
async fn test_ip_bound_token_rejected_from_other_address() {
    let harness = Harness::new(LoginPolicy {
        strong_sessions: false,
        tie_token_to_ip: true,
        ..Default::default()
    });
    let mut home = Browser::at("10.0.0.5");
    home.login(&harness, &p100(), true).await;

    let mut elsewhere = home.clone();
    elsewhere.restart();
    elsewhere.meta = RequestMeta::new(Some("192.168.1.1".parse().unwrap()), None);
    assert_eq!(elsewhere.visit(&harness).await, None);

    // The record is kept; only the presenting client loses its cookies.
    home.restart();
    assert_eq!(home.visit(&harness).await, Some(p100()));
}

#[tokio::test]
async fn test_strong_session_revalidates_every_request() {
    let harness = Harness::new(LoginPolicy::default());
    let mut browser = Browser::default();

    browser.login(&harness, &p100(), false).await;
    assert!(browser.session.get(TOKEN_KEY).is_some());
    assert!(browser.cookies.is_empty());
    assert_eq!(harness.records_of(&p100()).await.len(), 1);

    assert_eq!(browser.visit(&harness).await, Some(p100()));
    // Strong sessions are checked, not rotated.
    assert_eq!(harness.records_of(&p100()).await.len(), 1);

    // Revoking the record server-side ends the session on the next request.
    harness.repository.delete_all(&p100()).await.unwrap();
    assert_eq!(browser.visit(&harness).await, None);
    assert!(browser.session.get(PRINCIPAL_KEY).is_none());
    assert!(browser.session.get(TOKEN_KEY).is_none());
}

#[tokio::test]
async fn test_strong_session_obeys_expiration() {
    let harness = Harness::new(LoginPolicy {
        token_expiration: Some(Duration::hours(1)),
        ..Default::default()
    });
    let mut browser = Browser::default();
    browser.login(&harness, &p100(), true).await;

    let sequence = browser.cookie_composite().unwrap().sequence;
    let mut record = harness
        .repository
        .find(&p100(), &sequence)
        .await
        .unwrap()
        .unwrap();
    record.updated_at = Utc::now() - Duration::hours(2);
    harness.repository.put(record).await;

    assert_eq!(browser.visit(&harness).await, None);
    assert!(browser.session.is_empty());
    assert!(browser.cookies.is_empty());
}

#[tokio::test]
async fn test_strong_session_stores_rotated_composite() {
    let harness = Harness::new(LoginPolicy::default());
    let mut browser = Browser::default();
    browser.login(&harness, &p100(), true).await;

    browser.restart();
    assert_eq!(browser.visit(&harness).await, Some(p100()));

    let in_session = browser.session.get(TOKEN_KEY).unwrap();
    assert_eq!(Some(in_session), browser.cookies.get(TOKEN_KEY));
    assert_eq!(browser.visit(&harness).await, Some(p100()));
}

#[tokio::test]
async fn test_single_login_policy_evicts_other_devices() {
    let harness = Harness::new(LoginPolicy {
        allow_multiple_login: false,
        strong_sessions: false,
        ..Default::default()
    });
    let mut laptop = Browser::default();
    let mut phone = Browser::default();

    laptop.login(&harness, &p100(), true).await;
    phone.login(&harness, &p100(), true).await;

    let phone_sequence = phone.cookie_composite().unwrap().sequence;
    assert_eq!(harness.records_of(&p100()).await, vec![phone_sequence]);

    laptop.restart();
    assert_eq!(laptop.visit(&harness).await, None);
}

#[tokio::test]
async fn test_multiple_login_keeps_other_devices() {
    let harness = Harness::new(cookie_policy());
    let mut laptop = Browser::default();
    let mut phone = Browser::default();

    laptop.login(&harness, &p100(), true).await;
    phone.login(&harness, &p100(), true).await;
    assert_eq!(harness.records_of(&p100()).await.len(), 2);

    laptop.restart();
    phone.restart();
    assert_eq!(laptop.visit(&harness).await, Some(p100()));
    assert_eq!(phone.visit(&harness).await, Some(p100()));
}

#[tokio::test]
async fn test_relogin_on_same_device_replaces_its_record() {
    let harness = Harness::new(cookie_policy());
    let mut browser = Browser::default();

    browser.login(&harness, &p100(), true).await;
    browser.login(&harness, &p100(), true).await;

    let current = browser.cookie_composite().unwrap().sequence;
    assert_eq!(harness.records_of(&p100()).await, vec![current]);
}

#[tokio::test]
async fn test_logout_current_device_clears_everything() {
    let harness = Harness::new(LoginPolicy::default());
    let mut browser = Browser::default();
    let mut phone = Browser::default();
    browser.login(&harness, &p100(), true).await;
    phone.login(&harness, &p100(), true).await;

    browser.logout(&harness, None).await;

    assert!(browser.session.is_empty());
    assert!(browser.cookies.is_empty());
    let phone_sequence = phone.cookie_composite().unwrap().sequence;
    assert_eq!(harness.records_of(&p100()).await, vec![phone_sequence]);
}

#[tokio::test]
async fn test_logout_with_own_sequence_is_current_device() {
    let harness = Harness::new(LoginPolicy::default());
    let mut browser = Browser::default();
    browser.login(&harness, &p100(), true).await;
    let own = browser.cookie_composite().unwrap().sequence;

    browser.logout(&harness, Some(&own)).await;

    assert!(browser.session.is_empty());
    assert!(browser.cookies.is_empty());
    assert!(harness.repository.is_empty().await);
}

#[tokio::test]
async fn test_logout_other_device_keeps_current_session() {
    let harness = Harness::new(LoginPolicy::default());
    let mut laptop = Browser::default();
    let mut phone = Browser::default();
    laptop.login(&harness, &p100(), true).await;
    phone.login(&harness, &p100(), true).await;
    let phone_sequence = phone.cookie_composite().unwrap().sequence;
    let laptop_sequence = laptop.cookie_composite().unwrap().sequence;

    laptop.logout(&harness, Some(&phone_sequence)).await;

    assert_eq!(laptop.session.get(PRINCIPAL_KEY).as_deref(), Some("100"));
    assert!(laptop.cookie_composite().is_some());
    assert_eq!(harness.records_of(&p100()).await, vec![laptop_sequence]);

    // The phone's strong session dies on its next request.
    assert_eq!(phone.visit(&harness).await, None);
    assert_eq!(laptop.visit(&harness).await, Some(p100()));
}

#[tokio::test]
async fn test_logout_of_already_removed_record_is_noop() {
    let harness = Harness::new(LoginPolicy::default());
    let mut browser = Browser::default();
    browser.login(&harness, &p100(), true).await;

    browser.logout(&harness, Some("already-gone")).await;
    assert_eq!(harness.records_of(&p100()).await.len(), 1);

    harness.repository.delete_all(&p100()).await.unwrap();
    browser.logout(&harness, None).await;
    assert!(browser.session.is_empty());
}

#[tokio::test]
async fn test_logout_with_forged_cookies_keeps_victim_record() {
    let harness = Harness::new(cookie_policy());
    let mut victim = Browser::default();
    victim.login(&harness, &p100(), true).await;
    let victim_sequence = victim.cookie_composite().unwrap().sequence;

    let mut attacker = Browser::default();
    attacker
        .cookies
        .set(PRINCIPAL_KEY, "100".to_string(), CookieLifetime::Permanent);
    attacker.cookies.set(
        TOKEN_KEY,
        format!("{victim_sequence}:not-the-secret"),
        CookieLifetime::Permanent,
    );

    attacker.logout(&harness, None).await;

    assert!(attacker.cookies.is_empty());
    assert_eq!(harness.records_of(&p100()).await, vec![victim_sequence]);
    victim.restart();
    assert_eq!(victim.visit(&harness).await, Some(p100()));
}

#[tokio::test]
async fn test_logout_from_cookies_alone_removes_record() {
    let harness = Harness::new(cookie_policy());
    let mut browser = Browser::default();
    browser.login(&harness, &p100(), true).await;

    browser.restart();
    browser.logout(&harness, None).await;

    assert!(browser.cookies.is_empty());
    assert!(harness.repository.is_empty().await);
}

#[tokio::test]
async fn test_logout_all_removes_every_device() {
    let harness = Harness::new(LoginPolicy::default());
    let mut laptop = Browser::default();
    let mut phone = Browser::default();
    let mut other_user = Browser::default();
    laptop.login(&harness, &p100(), true).await;
    phone.login(&harness, &p100(), true).await;
    other_user
        .login(&harness, &PrincipalId::from(200i64), true)
        .await;

    let mut auth = harness.service.request(
        &mut laptop.session,
        &mut laptop.cookies,
        RequestMeta::default(),
    );
    assert_eq!(auth.logout_all(&p100()).await.unwrap(), 2);
    drop(auth);

    assert!(laptop.session.is_empty());
    assert!(laptop.cookies.is_empty());
    assert!(harness.records_of(&p100()).await.is_empty());
    assert_eq!(phone.visit(&harness).await, None);
    assert_eq!(
        other_user.visit(&harness).await,
        Some(PrincipalId::from(200i64))
    );
}

#[tokio::test]
async fn test_devices_lists_current_marker() {
    let harness = Harness::new(LoginPolicy::default());
    let mut laptop = Browser::at("10.0.0.1");
    let mut phone = Browser::at("10.0.0.2");
    laptop.login(&harness, &p100(), true).await;
    phone.login(&harness, &p100(), true).await;

    let mut auth = harness.service.request(
        &mut laptop.session,
        &mut laptop.cookies,
        laptop.meta.clone(),
    );
    let devices = auth.devices().await.unwrap();
    drop(auth);

    assert_eq!(devices.len(), 2);
    let current: Vec<_> = devices.iter().filter(|d| d.current).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].device.ip_address, laptop.meta.remote_ip);
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl LifecycleHook for Recorder {
    fn before_login(&self, principal_id: &PrincipalId, _: bool, _: &RequestMeta) {
        self.push(format!("before_login:{principal_id}"));
    }

    fn after_login(&self, principal_id: &PrincipalId, _: bool, _: &RequestMeta) {
        self.push(format!("after_login:{principal_id}"));
    }

    fn before_logout(&self, _: Option<&PrincipalId>, scope: &LogoutScope, _: &RequestMeta) {
        self.push(format!("before_logout:{}", scope.as_str()));
    }

    fn after_logout(&self, _: Option<&PrincipalId>, scope: &LogoutScope, _: &RequestMeta) {
        self.push(format!("after_logout:{}", scope.as_str()));
    }

    fn on_rotation(&self, principal_id: &PrincipalId, _: &str, _: &str, _: &RequestMeta) {
        self.push(format!("rotation:{principal_id}"));
    }

    fn on_rejection(
        &self,
        _: Option<&PrincipalId>,
        source: CredentialSource,
        reason: &Rejection,
        _: &RequestMeta,
    ) {
        self.push(format!("rejected:{}:{reason}", source.as_str()));
    }
}

#[tokio::test]
async fn test_hooks_fire_in_order() {
    let recorder = Arc::new(Recorder::default());
    let harness = Harness::with_hooks(cookie_policy(), vec![recorder.clone()]);
    let mut browser = Browser::default();

    browser.login(&harness, &p100(), true).await;
    let mut thief = browser.clone();
    thief.restart();
    browser.restart();
    browser.visit(&harness).await;
    thief.visit(&harness).await;
    browser.logout(&harness, None).await;

    assert_eq!(
        recorder.events(),
        vec![
            "before_login:100".to_string(),
            "after_login:100".to_string(),
            "rotation:100".to_string(),
            "rejected:cookie:unknown credential".to_string(),
            "before_logout:current_device".to_string(),
            "after_logout:current_device".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_rejection_reason_names_failed_check() {
    let recorder = Arc::new(Recorder::default());
    let harness = Harness::with_hooks(
        LoginPolicy {
            strong_sessions: false,
            tie_token_to_ip: true,
            ..Default::default()
        },
        vec![recorder.clone()],
    );
    let mut browser = Browser::at("10.0.0.1");
    browser.login(&harness, &p100(), true).await;

    browser.restart();
    browser.meta = RequestMeta::new(Some("10.0.0.2".parse().unwrap()), None);
    browser.visit(&harness).await;

    let expected = format!(
        "rejected:cookie:{}",
        Rejection::CheckFailed(ValidityCheck::IpEquality)
    );
    assert!(recorder.events().contains(&expected));
}
