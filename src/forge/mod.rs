//! Forge authority abstraction layer.
//!
//! Provides the [`Authority`] trait that encapsulates every call to the
//! system of record for credential validity and repository permissions.
//! The authorizer dispatches through this trait so that no forge-specific URL
//! construction or response parsing leaks into the cache logic.

pub mod github;
pub mod rate_limit;

use std::fmt;

use async_trait::async_trait;

use crate::auth::credential::Credential;
use crate::config::Config;

// ---------------------------------------------------------------------------
// Permission level
// ---------------------------------------------------------------------------

/// Permission level a principal holds on a repository, as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    None,
    Read,
    Write,
    Admin,
}

impl Permission {
    /// `Write` and `Admin` are the only levels that allow pushing objects.
    pub fn grants_write(self) -> bool {
        matches!(self, Permission::Write | Permission::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Admin => "admin",
            Permission::Write => "write",
            Permission::Read => "read",
            Permission::None => "none",
        }
    }
}

// ---------------------------------------------------------------------------
// Repository reference
// ---------------------------------------------------------------------------

/// An `org/repo` pair.  Case is preserved; keys compare exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub org: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(org: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            repo: repo.into(),
        }
    }

    /// Parse a `"org/repo"` string.  Anything other than exactly two
    /// non-empty segments is rejected.
    pub fn parse(full_name: &str) -> Option<Self> {
        let (org, repo) = full_name.split_once('/')?;
        if org.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self::new(org, repo))
    }

    /// The cache key for this repository.
    pub fn key(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.repo)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by an [`Authority`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// The authority rejected the credential outright.
    #[error("credential rejected by authority")]
    Invalid,
    /// The principal has no resolvable relationship to the repository, or the
    /// repository does not exist.
    #[error("repository not found or not visible to principal")]
    NotFound,
    /// The authority could not be reached or answered with a server error.
    #[error("authority unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// System of record for credential validity and repository permissions.
///
/// Implementations own their own request timeouts; the authorizer only sees
/// success or failure.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Validate `credential` and return the login of the principal behind it.
    async fn validate_credential(&self, credential: &Credential) -> Result<String, AuthorityError>;

    /// Fetch `principal`'s permission on `repo`.  The credential that proved
    /// the principal is passed along to authenticate the lookup itself.
    async fn get_permission(
        &self,
        credential: &Credential,
        principal: &str,
        repo: &RepoRef,
    ) -> Result<Permission, AuthorityError>;

    /// Lowest remaining upstream API budget, if the authority tracks one.
    fn rate_limit_remaining(&self) -> Option<u64> {
        None
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the configured [`Authority`] implementation.
pub fn build_authority(config: &Config) -> anyhow::Result<Box<dyn Authority>> {
    Ok(Box::new(github::GitHubAuthority::new(&config.authority)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_write_and_admin_grant_write() {
        assert!(!Permission::None.grants_write());
        assert!(!Permission::Read.grants_write());
        assert!(Permission::Write.grants_write());
        assert!(Permission::Admin.grants_write());
    }

    #[test]
    fn repo_ref_parse() {
        assert_eq!(RepoRef::parse("acme/widgets"), Some(RepoRef::new("acme", "widgets")));
        assert_eq!(RepoRef::parse("acme"), None);
        assert_eq!(RepoRef::parse("/widgets"), None);
        assert_eq!(RepoRef::parse("acme/"), None);
        assert_eq!(RepoRef::parse("acme/widgets/extra"), None);
    }

    #[test]
    fn repo_ref_key_preserves_case() {
        let r = RepoRef::new("MyOrg", "MyRepo");
        assert_eq!(r.key(), "MyOrg/MyRepo");
        assert_eq!(r.to_string(), "MyOrg/MyRepo");
    }
}
