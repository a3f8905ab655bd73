//! GitHub / GitHub Enterprise authority.
//!
//! Credentials are validated with `GET /user`; repository permissions come
//! from the `permissions` object of `GET /repos/{owner}/{repo}` fetched with
//! the principal's own credential, which reflects exactly what that principal
//! may do on the repository.

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::auth::credential::Credential;
use crate::config::AuthorityConfig;

use super::rate_limit::RateLimitState;
use super::{Authority, AuthorityError, Permission, RepoRef};

const ACCEPT: &str = "application/vnd.github+json";

// ---------------------------------------------------------------------------
// Authority struct
// ---------------------------------------------------------------------------

pub struct GitHubAuthority {
    api_url: String,
    http_client: reqwest::Client,
    /// Keyed by credential; GitHub meters each token separately.
    rate_limits: DashMap<Credential, RateLimitState>,
    rate_limit_buffer: u32,
}

impl GitHubAuthority {
    pub fn new(config: &AuthorityConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            http_client,
            rate_limits: DashMap::new(),
            rate_limit_buffer: config.rate_limit_buffer,
        })
    }

    /// Rate-limit state for `credential`, created on first use.
    fn rate_limit_for(&self, credential: &Credential) -> RateLimitState {
        if let Some(state) = self.rate_limits.get(credential) {
            return state.value().clone();
        }
        // Windows that have already reset carry no information.
        self.rate_limits.retain(|_, state| state.retry_after_secs() > 0);
        self.rate_limits
            .entry(credential.clone())
            .or_default()
            .value()
            .clone()
    }

    async fn get(
        &self,
        path: &str,
        credential: &Credential,
    ) -> Result<(reqwest::Response, RateLimitState), AuthorityError> {
        let rate_limit = self.rate_limit_for(credential);
        if rate_limit.is_exhausted(self.rate_limit_buffer) {
            return Err(AuthorityError::Unavailable(format!(
                "rate limit exhausted, resets in {}s",
                rate_limit.retry_after_secs()
            )));
        }

        let resp = self
            .http_client
            .get(format!("{}{path}", self.api_url))
            .bearer_auth(credential.expose_secret())
            .header("Accept", ACCEPT)
            .send()
            .await
            .map_err(|e| {
                AuthorityError::Unavailable(format!("upstream API request failed: {e}"))
            })?;

        rate_limit.update_from_headers(resp.headers());
        Ok((resp, rate_limit))
    }
}

fn rate_limited(status: StatusCode, rate_limit: &RateLimitState) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && rate_limit.remaining() == 0)
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Authority for GitHubAuthority {
    async fn validate_credential(
        &self,
        credential: &Credential,
    ) -> Result<String, AuthorityError> {
        let (resp, rate_limit) = self.get("/user", credential).await?;
        let status = resp.status();

        if rate_limited(status, &rate_limit) {
            warn!(%status, "upstream API rate limited during credential validation");
            return Err(AuthorityError::Unavailable(format!("rate limited ({status})")));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(%status, credential = %credential, "credential rejected upstream");
            return Err(AuthorityError::Invalid);
        }
        if !status.is_success() {
            warn!(%status, "upstream API returned non-success for /user");
            return Err(AuthorityError::Unavailable(format!("unexpected status {status}")));
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            AuthorityError::Unavailable(format!("failed to parse /user response: {e}"))
        })?;

        body.get("login")
            .and_then(|l| l.as_str())
            .map(str::to_string)
            .ok_or_else(|| AuthorityError::Unavailable("/user response has no login".to_string()))
    }

    async fn get_permission(
        &self,
        credential: &Credential,
        principal: &str,
        repo: &RepoRef,
    ) -> Result<Permission, AuthorityError> {
        let (resp, rate_limit) = self
            .get(&format!("/repos/{}/{}", repo.org, repo.repo), credential)
            .await?;
        let status = resp.status();

        if rate_limited(status, &rate_limit) {
            warn!(%status, %repo, "upstream API rate limited during permission lookup");
            return Err(AuthorityError::Unavailable(format!("rate limited ({status})")));
        }
        match status {
            StatusCode::UNAUTHORIZED => return Err(AuthorityError::Invalid),
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                debug!(principal, %repo, %status, "repository not visible to principal");
                return Err(AuthorityError::NotFound);
            }
            s if !s.is_success() => {
                warn!(
                    principal,
                    %repo,
                    status = %s,
                    "upstream API returned non-success for repo check"
                );
                return Err(AuthorityError::Unavailable(format!("unexpected status {s}")));
            }
            _ => {}
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            AuthorityError::Unavailable(format!("failed to parse repo response: {e}"))
        })?;

        let permission = extract_permission(&body);
        debug!(principal, %repo, permission = permission.as_str(), "resolved repo permission");
        Ok(permission)
    }

    /// Lowest remaining budget among the credentials seen so far.
    fn rate_limit_remaining(&self) -> Option<u64> {
        self.rate_limits
            .iter()
            .map(|entry| entry.value().remaining())
            .filter(|r| *r != u64::MAX)
            .min()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map the `permissions` object of a repository response to a [`Permission`].
fn extract_permission(body: &serde_json::Value) -> Permission {
    let Some(perms) = body.get("permissions") else {
        return Permission::None;
    };
    let flag = |name: &str| perms.get(name).and_then(|v| v.as_bool()).unwrap_or(false);
    if flag("admin") {
        Permission::Admin
    } else if flag("maintain") || flag("push") {
        Permission::Write
    } else if flag("triage") || flag("pull") {
        Permission::Read
    } else {
        Permission::None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
