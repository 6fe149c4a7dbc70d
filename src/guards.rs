//! Access checks run before a protected view or command.

use crate::credential_store::CredentialStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Not logged in; `redirect` is where to go after a successful login.
    RedirectToLogin { redirect: String },
    /// Logged in but not allowed here.
    RedirectToDashboard,
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

pub fn require_auth(store: &dyn CredentialStore, target: &str) -> GuardDecision {
    if store.is_authenticated() {
        GuardDecision::Allow
    } else {
        GuardDecision::RedirectToLogin {
            redirect: target.to_string(),
        }
    }
}

/// Allows users holding at least one of `roles`.
pub fn require_role<S: AsRef<str>>(
    store: &dyn CredentialStore,
    target: &str,
    roles: &[S],
) -> GuardDecision {
    match require_auth(store, target) {
        GuardDecision::Allow => {}
        decision => return decision,
    }
    if store.user().is_some_and(|user| user.has_any_role(roles)) {
        GuardDecision::Allow
    } else {
        GuardDecision::RedirectToDashboard
    }
}

pub fn require_permission(
    store: &dyn CredentialStore,
    target: &str,
    permission: &str,
) -> GuardDecision {
    match require_auth(store, target) {
        GuardDecision::Allow => {}
        decision => return decision,
    }
    if store
        .user()
        .is_some_and(|user| user.has_permission(permission))
    {
        GuardDecision::Allow
    } else {
        GuardDecision::RedirectToDashboard
    }
}

/// Only for anonymous users (login page).
pub fn require_guest(store: &dyn CredentialStore) -> GuardDecision {
    if store.is_authenticated() {
        GuardDecision::RedirectToDashboard
    } else {
        GuardDecision::Allow
    }
}
