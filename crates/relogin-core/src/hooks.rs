//! Extension points around login, logout and rotation
//!
//! Hooks run synchronously in registration order. Every method has a no-op
//! default, so a hook only implements what it cares about.

use crate::lifecycle::{CredentialSource, Rejection};
use crate::models::{PrincipalId, RequestMeta};

/// What a logout call targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutScope {
    /// The caller's own device; local session and cookies are cleared
    CurrentDevice,
    /// Another device of the same principal; local state is untouched
    OtherDevice { sequence: String },
    /// Every device of the principal
    AllDevices,
}

impl LogoutScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutScope::CurrentDevice => "current_device",
            LogoutScope::OtherDevice { .. } => "other_device",
            LogoutScope::AllDevices => "all_devices",
        }
    }
}

/// Lifecycle callbacks
pub trait LifecycleHook: Send + Sync {
    fn before_login(&self, _principal_id: &PrincipalId, _remember: bool, _request: &RequestMeta) {}

    fn after_login(&self, _principal_id: &PrincipalId, _remember: bool, _request: &RequestMeta) {}

    fn before_logout(
        &self,
        _principal_id: Option<&PrincipalId>,
        _scope: &LogoutScope,
        _request: &RequestMeta,
    ) {
    }

    fn after_logout(
        &self,
        _principal_id: Option<&PrincipalId>,
        _scope: &LogoutScope,
        _request: &RequestMeta,
    ) {
    }

    /// A persistent credential was used and replaced
    fn on_rotation(
        &self,
        _principal_id: &PrincipalId,
        _old_sequence: &str,
        _new_sequence: &str,
        _request: &RequestMeta,
    ) {
    }

    /// A presented credential did not authenticate
    fn on_rejection(
        &self,
        _principal_id: Option<&PrincipalId>,
        _source: CredentialSource,
        _reason: &Rejection,
        _request: &RequestMeta,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl LifecycleHook for Recorder {
        fn after_login(&self, principal_id: &PrincipalId, remember: bool, _: &RequestMeta) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("login:{principal_id}:{remember}"));
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let hook = Recorder::default();
        let request = RequestMeta::default();
        let principal = PrincipalId::from(1i64);

        hook.before_login(&principal, true, &request);
        hook.before_logout(Some(&principal), &LogoutScope::AllDevices, &request);
        hook.after_login(&principal, true, &request);

        assert_eq!(*hook.calls.lock().unwrap(), vec!["login:1:true".to_string()]);
    }

    #[test]
    fn test_scope_names() {
        assert_eq!(LogoutScope::CurrentDevice.as_str(), "current_device");
        assert_eq!(
            LogoutScope::OtherDevice {
                sequence: "s".into()
            }
            .as_str(),
            "other_device"
        );
        assert_eq!(LogoutScope::AllDevices.as_str(), "all_devices");
    }
}
