//! Write-access decision orchestration.
//!
//! The [`Authorizer`] answers "may this credential write to `org/repo`?" from
//! the [`TokenCache`] when it can, and falls back to the [`Authority`] when
//! the cached decision is missing or stale.  At most one authority round-trip
//! per (credential, repository) happens per expiration window.
//!
//! Authority failures never poison the cache: a denial is only recorded when
//! the authority positively answered with a non-writing permission level.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::forge::{Authority, AuthorityError, RepoRef};
use crate::metrics::{Endpoint, Metrics, Outcome};

use super::cache::TokenCache;
use super::credential::Credential;
use super::identity::{AccessState, Action, Identity, DEFAULT_EXPIRATION};

// ---------------------------------------------------------------------------
// Errors and decisions
// ---------------------------------------------------------------------------

/// Why a request could not be authorized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no credential supplied")]
    MissingCredential,
    #[error("credential rejected by authority")]
    InvalidCredential,
    #[error("authority unavailable: {0}")]
    AuthorityUnavailable(String),
    #[error("permission on {0} could not be resolved")]
    ResourceUnresolvable(String),
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    /// Read access; granted by policy without consulting anything.
    Policy,
    /// A live cached decision.
    Cache,
    /// A fresh authority round-trip.
    Authority,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthDecision {
    pub allowed: bool,
    pub username: Option<String>,
    pub source: DecisionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    pub identity: Option<Arc<Identity>>,
}

impl AuthDecision {
    fn allowed(identity: Option<Arc<Identity>>, source: DecisionSource) -> Self {
        Self {
            allowed: true,
            username: identity.as_ref().map(|id| id.name().to_string()),
            source,
            reason: None,
            identity,
        }
    }

    fn denied(
        identity: Option<Arc<Identity>>,
        source: DecisionSource,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            allowed: false,
            username: identity.as_ref().map(|id| id.name().to_string()),
            source,
            reason: Some(reason.into()),
            identity,
        }
    }
}

// ---------------------------------------------------------------------------
// Authorizer
// ---------------------------------------------------------------------------

pub struct Authorizer {
    cache: Arc<TokenCache>,
    authority: Arc<dyn Authority>,
    metrics: Arc<Metrics>,
    expiration: Duration,
    propagate_invalid_credential: bool,
}

impl Authorizer {
    pub fn new(
        cache: Arc<TokenCache>,
        authority: Arc<dyn Authority>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            authority,
            metrics,
            expiration: DEFAULT_EXPIRATION,
            propagate_invalid_credential: true,
        }
    }

    /// Lifetime given to identities created by this authorizer.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// When set, a never-seen credential that the authority rejects surfaces
    /// as [`AuthError::InvalidCredential`] instead of a plain denial.
    pub fn with_propagate_invalid_credential(mut self, propagate: bool) -> Self {
        self.propagate_invalid_credential = propagate;
        self
    }

    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    pub fn rate_limit_remaining(&self) -> Option<u64> {
        self.authority.rate_limit_remaining()
    }

    /// Decide whether `credential` may perform `action` on `repo`.
    ///
    /// Read actions are granted to any presented credential without touching
    /// the authority.  Write actions go through [`Authorizer::check_write`].
    pub async fn authorize(
        &self,
        credential: Option<&Credential>,
        repo: &RepoRef,
        action: Action,
    ) -> Result<AuthDecision, AuthError> {
        let Some(credential) = credential else {
            self.metrics.record_decision(Outcome::Rejected);
            return Err(AuthError::MissingCredential);
        };
        if !action.is_write() {
            self.metrics.record_decision(Outcome::Allowed);
            return Ok(AuthDecision::allowed(
                self.cache.check(credential),
                DecisionSource::Policy,
            ));
        }
        let result = self.check_write(credential, repo).await;
        self.metrics.record_decision(match &result {
            Ok(decision) if decision.allowed => Outcome::Allowed,
            Ok(_) => Outcome::Denied,
            Err(_) => Outcome::Rejected,
        });
        result
    }

    /// Resolve the write decision for `credential` on `repo`.
    ///
    /// Only one error escapes: [`AuthError::InvalidCredential`] for a
    /// credential that was never cached, and only when propagation is enabled.
    /// Every other authority failure becomes a denial.
    #[instrument(skip(self, credential), fields(credential = %credential, %repo))]
    pub async fn check_write(
        &self,
        credential: &Credential,
        repo: &RepoRef,
    ) -> Result<AuthDecision, AuthError> {
        let key = repo.key();

        // 1. Cached decision.
        let cached = self.cache.check(credential);
        if let Some(identity) = &cached {
            match identity.check_repo(&key) {
                AccessState::Authorized => {
                    self.metrics.cache_hits.inc();
                    debug!(principal = identity.name(), "write decision cache hit (allowed)");
                    return Ok(AuthDecision::allowed(
                        Some(Arc::clone(identity)),
                        DecisionSource::Cache,
                    ));
                }
                AccessState::Denied => {
                    self.metrics.cache_hits.inc();
                    debug!(principal = identity.name(), "write decision cache hit (denied)");
                    return Ok(AuthDecision::denied(
                        Some(Arc::clone(identity)),
                        DecisionSource::Cache,
                        "no write permission (cached)",
                    ));
                }
                AccessState::Unknown => {}
            }
        }
        self.metrics.cache_misses.inc();

        // 2. Validate the credential.
        self.metrics.record_authority_call(Endpoint::ValidateCredential);
        let principal = match self.authority.validate_credential(credential).await {
            Ok(principal) => principal,
            Err(err) => {
                self.evict(credential);
                let error = match err {
                    AuthorityError::Unavailable(msg) => AuthError::AuthorityUnavailable(msg),
                    AuthorityError::Invalid | AuthorityError::NotFound => {
                        AuthError::InvalidCredential
                    }
                };
                warn!(error = %error, "credential validation failed");
                if cached.is_none()
                    && self.propagate_invalid_credential
                    && error == AuthError::InvalidCredential
                {
                    return Err(error);
                }
                return Ok(AuthDecision::denied(
                    None,
                    DecisionSource::Authority,
                    error.to_string(),
                ));
            }
        };

        let identity = match cached {
            Some(identity) => identity,
            None => {
                let identity = Arc::new(Identity::with_expiration(
                    principal.clone(),
                    Some(credential.clone()),
                    self.expiration,
                ));
                self.cache.add(credential.clone(), Arc::clone(&identity));
                self.metrics.cached_credentials.set(self.cache.len() as i64);
                debug!(%principal, "cached new identity");
                identity
            }
        };

        // 3. Resolve the repository permission.
        self.metrics.record_authority_call(Endpoint::GetPermission);
        let lookup = self.authority.get_permission(credential, &principal, repo).await;
        if let Some(remaining) = self.authority.rate_limit_remaining() {
            self.metrics
                .authority_rate_limit_remaining
                .set(i64::try_from(remaining).unwrap_or(i64::MAX));
        }
        match lookup {
            Ok(permission) if permission.grants_write() => {
                identity.authorize_for_repo(&key);
                debug!(%principal, permission = permission.as_str(), "write access granted");
                Ok(AuthDecision::allowed(Some(identity), DecisionSource::Authority))
            }
            Ok(permission) => {
                identity.deauthorize_for_repo(&key);
                debug!(%principal, permission = permission.as_str(), "write access denied");
                Ok(AuthDecision::denied(
                    Some(identity),
                    DecisionSource::Authority,
                    format!("permission '{}' does not allow writes", permission.as_str()),
                ))
            }
            Err(err) => {
                let error = match err {
                    AuthorityError::Unavailable(msg) => AuthError::AuthorityUnavailable(msg),
                    AuthorityError::Invalid => AuthError::InvalidCredential,
                    AuthorityError::NotFound => AuthError::ResourceUnresolvable(key),
                };
                warn!(%principal, error = %error, "permission lookup failed");
                Ok(AuthDecision::denied(
                    Some(identity),
                    DecisionSource::Authority,
                    error.to_string(),
                ))
            }
        }
    }

    fn evict(&self, credential: &Credential) {
        if self.cache.remove(credential) {
            self.metrics.evictions.inc();
            self.metrics.cached_credentials.set(self.cache.len() as i64);
            info!(credential = %credential, "evicted credential rejected by authority");
        }
    }
}
