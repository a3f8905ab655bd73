//! Authenticated principals and their per-repository write decisions.
//!
//! Each [`Identity`] carries a small state machine per repository key:
//!
//! ```text
//!            authorize_for_repo            expiry
//!  Unknown ───────────────────▶ Authorized ───────▶ Unknown
//!     │      deauthorize_for_repo          expiry
//!     └─────────────────────────▶ Denied ─────────▶ Unknown
//! ```
//!
//! There is no direct `Authorized ↔ Denied` edge: a changed upstream
//! permission is only observed after the cached decision falls back to
//! `Unknown` and the authority is asked again.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::credential::Credential;

/// Default lifetime of a cached write decision.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(15 * 60);

/// A single write decision.  Replaced wholesale, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoAccess {
    can_write: bool,
    checked_at: Instant,
}

impl RepoAccess {
    pub fn can_write(&self) -> bool {
        self.can_write
    }

    pub fn checked_at(&self) -> Instant {
        self.checked_at
    }
}

/// Result of looking up a cached decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Authorized,
    Denied,
    /// No decision, or the decision expired.  Never an implicit grant or denial.
    Unknown,
}

/// Kind of access a request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Read,
    ReadMeta,
    Write,
}

impl Action {
    pub fn is_write(self) -> bool {
        matches!(self, Action::Write)
    }
}

/// The principal behind one credential.
#[derive(Debug)]
pub struct Identity {
    name: String,
    credential: Option<Credential>,
    expiration: Duration,
    access: Mutex<HashMap<String, RepoAccess>>,
}

impl Identity {
    pub fn new(name: impl Into<String>, credential: Option<Credential>) -> Self {
        Self::with_expiration(name, credential, DEFAULT_EXPIRATION)
    }

    pub fn with_expiration(
        name: impl Into<String>,
        credential: Option<Credential>,
        expiration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            credential,
            expiration,
            access: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The credential that last proved this principal, if any.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Look up the cached decision for `resource`.
    ///
    /// Expiry is destructive: a stale entry is removed before `Unknown` is
    /// returned, so the next caller has to go back to the authority.
    pub fn check_repo(&self, resource: &str) -> AccessState {
        let mut access = self.access.lock();
        let Some(entry) = access.get(resource).copied() else {
            return AccessState::Unknown;
        };
        if Instant::now().saturating_duration_since(entry.checked_at) > self.expiration {
            access.remove(resource);
            return AccessState::Unknown;
        }
        if entry.can_write {
            AccessState::Authorized
        } else {
            AccessState::Denied
        }
    }

    pub fn authorize_for_repo(&self, resource: &str) {
        self.record(resource, true);
    }

    pub fn deauthorize_for_repo(&self, resource: &str) {
        self.record(resource, false);
    }

    fn record(&self, resource: &str, can_write: bool) {
        let mut access = self.access.lock();
        let now = Instant::now();
        let checked_at = match access.get(resource) {
            Some(prev) if prev.checked_at > now => prev.checked_at,
            _ => now,
        };
        access.insert(
            resource.to_string(),
            RepoAccess {
                can_write,
                checked_at,
            },
        );
    }

    /// Policy entry point.
    ///
    /// Everything served here is publicly readable, so read actions are
    /// always granted.  Writes require a live `Authorized` decision; `Unknown`
    /// fails closed.
    pub fn is_authorized(&self, org: &str, repo: &str, action: Action) -> bool {
        if !action.is_write() {
            return true;
        }
        self.check_repo(&format!("{org}/{repo}")) == AccessState::Authorized
    }

    /// Drop the decision for `resource`, returning it to `Unknown`.
    pub fn forget_repo(&self, resource: &str) -> bool {
        self.access.lock().remove(resource).is_some()
    }

    /// Drop every decision under `org`.  Returns how many were removed.
    pub fn forget_org(&self, org: &str) -> usize {
        let prefix = format!("{org}/");
        let mut access = self.access.lock();
        let before = access.len();
        access.retain(|key, _| !key.starts_with(&prefix));
        before - access.len()
    }

    /// Raw entry without expiry evaluation.
    pub fn access_entry(&self, resource: &str) -> Option<RepoAccess> {
        self.access.lock().get(resource).copied()
    }

    /// Number of stored decisions, stale ones included.
    pub fn tracked_repos(&self) -> usize {
        self.access.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice(expiration: Duration) -> Identity {
        Identity::with_expiration("alice", Some(Credential::new("ghp_abc")), expiration)
    }

    #[test]
    fn unknown_resource_fails_closed() {
        let id = Identity::new("alice", None);
        assert_eq!(id.check_repo("org/repo"), AccessState::Unknown);
        assert!(!id.is_authorized("org", "repo", Action::Write));
        assert_eq!(id.expiration(), DEFAULT_EXPIRATION);
    }

    #[test]
    fn reads_are_always_granted() {
        let id = Identity::new("alice", None);
        assert!(id.is_authorized("org", "repo", Action::Read));
        assert!(id.is_authorized("org", "repo", Action::ReadMeta));
        id.deauthorize_for_repo("org/repo");
        assert!(id.is_authorized("org", "repo", Action::Read));
    }

    #[test]
    fn authorize_and_deauthorize() {
        let id = Identity::new("alice", None);
        id.authorize_for_repo("org/repo");
        assert_eq!(id.check_repo("org/repo"), AccessState::Authorized);
        assert!(id.is_authorized("org", "repo", Action::Write));

        id.deauthorize_for_repo("org/other");
        assert_eq!(id.check_repo("org/other"), AccessState::Denied);
        assert!(!id.is_authorized("org", "other", Action::Write));
    }

    #[test]
    fn resource_keys_are_case_sensitive() {
        let id = Identity::new("alice", None);
        id.authorize_for_repo("Org/Repo");
        assert_eq!(id.check_repo("org/repo"), AccessState::Unknown);
        assert_eq!(id.check_repo("Org/Repo"), AccessState::Authorized);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_authorize_keeps_single_newer_entry() {
        let id = alice(Duration::from_secs(60));
        id.authorize_for_repo("org/repo");
        let first = id.access_entry("org/repo").unwrap().checked_at();

        tokio::time::advance(Duration::from_secs(5)).await;
        id.authorize_for_repo("org/repo");

        let entry = id.access_entry("org/repo").unwrap();
        assert_eq!(id.tracked_repos(), 1);
        assert!(entry.can_write());
        assert_eq!(entry.checked_at(), first + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn decision_expires_and_is_removed() {
        let id = alice(Duration::from_secs(60));
        id.authorize_for_repo("org/repo");

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(id.check_repo("org/repo"), AccessState::Authorized);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(id.check_repo("org/repo"), AccessState::Unknown);
        assert!(id.access_entry("org/repo").is_none());
        assert_eq!(id.tracked_repos(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn denial_expires_back_to_unknown() {
        let id = alice(Duration::from_secs(10));
        id.deauthorize_for_repo("org/repo");
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(id.check_repo("org/repo"), AccessState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn authorized_scenario_goes_stale() {
        let id = alice(Duration::from_secs(900));
        assert_eq!(id.name(), "alice");
        assert_eq!(id.credential().unwrap().expose_secret(), "ghp_abc");

        id.authorize_for_repo("org/repo");
        assert!(id.is_authorized("org", "repo", Action::Write));

        tokio::time::advance(Duration::from_secs(901)).await;
        assert_eq!(id.check_repo("org/repo"), AccessState::Unknown);
        assert!(!id.is_authorized("org", "repo", Action::Write));
    }

    #[test]
    fn forget_repo_and_org() {
        let id = Identity::new("alice", None);
        id.authorize_for_repo("acme/a");
        id.deauthorize_for_repo("acme/b");
        id.authorize_for_repo("acmecorp/c");

        assert!(id.forget_repo("acme/a"));
        assert!(!id.forget_repo("acme/a"));
        assert_eq!(id.check_repo("acme/a"), AccessState::Unknown);

        assert_eq!(id.forget_org("acme"), 1);
        assert_eq!(id.check_repo("acme/b"), AccessState::Unknown);
        assert_eq!(id.check_repo("acmecorp/c"), AccessState::Authorized);
    }

    #[test]
    fn action_serde() {
        assert_eq!(serde_json::to_string(&Action::ReadMeta).unwrap(), "\"read-meta\"");
        let a: Action = serde_json::from_str("\"write\"").unwrap();
        assert!(a.is_write());
    }
}
