//! In-memory credential → identity cache.
//!
//! A passive store: lookups never evaluate expiry (that lives on
//! [`Identity`]) and writes are unconditional upserts.  Backed by a sharded
//! [`DashMap`] so concurrent request handlers only contend per shard.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use super::credential::Credential;
use super::identity::Identity;

#[derive(Debug, Default)]
pub struct TokenCache {
    identities: DashMap<Credential, Arc<Identity>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the identity for `credential`.
    pub fn add(&self, credential: Credential, identity: Arc<Identity>) {
        trace!(credential = %credential, principal = identity.name(), "token cache add");
        self.identities.insert(credential, identity);
    }

    /// Remove `credential`.  Returns whether an entry was present.
    pub fn remove(&self, credential: &Credential) -> bool {
        let removed = self.identities.remove(credential).is_some();
        if removed {
            trace!(credential = %credential, "token cache remove");
        }
        removed
    }

    pub fn check(&self, credential: &Credential) -> Option<Arc<Identity>> {
        self.identities
            .get(credential)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Return every cached decision for `resource` to `Unknown`.
    pub fn invalidate_repo(&self, resource: &str) -> usize {
        self.identities
            .iter()
            .filter(|entry| entry.value().forget_repo(resource))
            .count()
    }

    /// Return every cached decision under `org` to `Unknown`.
    pub fn invalidate_org(&self, org: &str) -> usize {
        self.identities
            .iter()
            .map(|entry| entry.value().forget_org(org))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::AccessState;

    fn identity(name: &str) -> Arc<Identity> {
        Arc::new(Identity::new(name, None))
    }

    #[test]
    fn unseen_credential_is_absent() {
        let cache = TokenCache::new();
        assert!(cache.check(&Credential::new("ghp_never")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn add_then_check() {
        let cache = TokenCache::new();
        let cred = Credential::new("ghp_abc");
        cache.add(cred.clone(), identity("alice"));
        assert_eq!(cache.check(&cred).unwrap().name(), "alice");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn add_overwrites() {
        let cache = TokenCache::new();
        let cred = Credential::new("ghp_abc");
        cache.add(cred.clone(), identity("alice"));
        cache.add(cred.clone(), identity("bob"));
        assert_eq!(cache.check(&cred).unwrap().name(), "bob");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_is_idempotent_and_evicts() {
        let cache = TokenCache::new();
        let cred = Credential::new("ghp_abc");
        let id = identity("alice");
        id.authorize_for_repo("org/repo");
        cache.add(cred.clone(), Arc::clone(&id));

        assert!(cache.remove(&cred));
        assert!(!cache.remove(&cred));
        assert!(cache.check(&cred).is_none());
    }

    #[test]
    fn credentials_of_same_principal_are_independent() {
        let cache = TokenCache::new();
        let a = Credential::new("ghp_one");
        let b = Credential::new("ghp_two");
        cache.add(a.clone(), identity("alice"));
        cache.add(b.clone(), identity("alice"));

        cache.check(&a).unwrap().authorize_for_repo("org/repo");
        assert_eq!(cache.check(&b).unwrap().check_repo("org/repo"), AccessState::Unknown);
    }

    #[test]
    fn invalidation_by_repo_and_org() {
        let cache = TokenCache::new();
        let a = Credential::new("ghp_one");
        let b = Credential::new("ghp_two");
        cache.add(a.clone(), identity("alice"));
        cache.add(b.clone(), identity("bob"));
        cache.check(&a).unwrap().authorize_for_repo("acme/widgets");
        cache.check(&b).unwrap().deauthorize_for_repo("acme/widgets");
        cache.check(&b).unwrap().authorize_for_repo("acme/gadgets");

        assert_eq!(cache.invalidate_repo("acme/widgets"), 2);
        assert_eq!(cache.check(&a).unwrap().check_repo("acme/widgets"), AccessState::Unknown);
        assert_eq!(cache.invalidate_org("acme"), 1);
        assert_eq!(cache.check(&b).unwrap().check_repo("acme/gadgets"), AccessState::Unknown);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_access_is_safe() {
        let cache = Arc::new(TokenCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let cred = Credential::new(format!("ghp_{i}_{j}"));
                        cache.add(cred.clone(), Arc::new(Identity::new("u", None)));
                        assert!(cache.check(&cred).is_some());
                        if j % 2 == 0 {
                            cache.remove(&cred);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 8 * 50);
    }
}
