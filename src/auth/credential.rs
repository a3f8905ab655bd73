//! Bearer credentials presented by clients.
//!
//! A [`Credential`] is resolved into a [`CredentialKind`] exactly once, when it
//! is ingested, so downstream code can branch on the variant instead of
//! re-sniffing token prefixes.  The secret itself is never decoded and never
//! printed: `Debug` and `Display` only show the kind and a short SHA-256
//! fingerprint.

use std::fmt;
use std::hash::{Hash, Hasher};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Token family, derived from GitHub's documented token prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// `ghp_` classic personal access token.
    PersonalAccessToken,
    /// `github_pat_` fine-grained personal access token.
    FineGrainedToken,
    /// `gho_` OAuth app token.
    OAuthToken,
    /// `ghu_` GitHub App user-to-server token.
    UserToServerToken,
    /// `ghs_` GitHub App installation (server-to-server) token.
    InstallationToken,
    /// Anything else; passed through untouched.
    Opaque,
}

impl CredentialKind {
    fn detect(secret: &str) -> Self {
        const PREFIXES: &[(&str, CredentialKind)] = &[
            ("github_pat_", CredentialKind::FineGrainedToken),
            ("ghp_", CredentialKind::PersonalAccessToken),
            ("gho_", CredentialKind::OAuthToken),
            ("ghu_", CredentialKind::UserToServerToken),
            ("ghs_", CredentialKind::InstallationToken),
        ];
        PREFIXES
            .iter()
            .find(|(prefix, _)| secret.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .unwrap_or(CredentialKind::Opaque)
    }

    /// Visible prefix used when rendering a redacted credential.
    pub fn prefix(self) -> &'static str {
        match self {
            CredentialKind::PersonalAccessToken => "ghp_",
            CredentialKind::FineGrainedToken => "github_pat_",
            CredentialKind::OAuthToken => "gho_",
            CredentialKind::UserToServerToken => "ghu_",
            CredentialKind::InstallationToken => "ghs_",
            CredentialKind::Opaque => "",
        }
    }
}

/// An opaque secret that proves a principal's identity to the authority.
#[derive(Clone)]
pub struct Credential {
    kind: CredentialKind,
    secret: String,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        Self {
            kind: CredentialKind::detect(&secret),
            secret,
        }
    }

    /// Extract a credential from an HTTP `Authorization` header value.
    ///
    /// Accepts `Basic` (the password half carries the token, the username is
    /// ignored), `Bearer` and `token` schemes.  Returns `None` when no usable
    /// secret is present.
    pub fn from_authorization_header(value: &str) -> Option<Self> {
        let (scheme, rest) = value.trim().split_once(' ')?;
        let rest = rest.trim();
        let secret = match scheme.to_ascii_lowercase().as_str() {
            "basic" => {
                let decoded = STANDARD.decode(rest).ok()?;
                let decoded = String::from_utf8(decoded).ok()?;
                let (_user, password) = decoded.split_once(':')?;
                password.to_string()
            }
            "bearer" | "token" => rest.to_string(),
            _ => return None,
        };
        if secret.is_empty() {
            return None;
        }
        Some(Self::new(secret))
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    /// Raw secret, for forwarding to the authority.  Never log this.
    pub fn expose_secret(&self) -> &str {
        &self.secret
    }

    /// Short stable fingerprint safe to put in logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.secret.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.secret == other.secret
    }
}

impl Eq for Credential {}

impl Hash for Credential {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.secret.hash(state);
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}…{}", self.kind.prefix(), self.fingerprint())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_resolved_from_prefix() {
        assert_eq!(Credential::new("ghp_abc").kind(), CredentialKind::PersonalAccessToken);
        assert_eq!(Credential::new("github_pat_11AB").kind(), CredentialKind::FineGrainedToken);
        assert_eq!(Credential::new("gho_x").kind(), CredentialKind::OAuthToken);
        assert_eq!(Credential::new("ghu_x").kind(), CredentialKind::UserToServerToken);
        assert_eq!(Credential::new("ghs_x").kind(), CredentialKind::InstallationToken);
        assert_eq!(Credential::new("0123abcd").kind(), CredentialKind::Opaque);
    }

    #[test]
    fn display_and_debug_never_contain_secret() {
        let cred = Credential::new("ghp_supersecretvalue");
        let shown = cred.to_string();
        let debugged = format!("{cred:?}");
        assert!(shown.starts_with("ghp_…"));
        assert!(!shown.contains("supersecretvalue"));
        assert!(!debugged.contains("supersecretvalue"));
    }

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let a = Credential::new("ghp_a");
        assert_eq!(a.fingerprint(), Credential::new("ghp_a").fingerprint());
        assert_ne!(a.fingerprint(), Credential::new("ghp_b").fingerprint());
        assert_eq!(a.fingerprint().len(), 12);
    }

    #[test]
    fn equality_is_by_secret() {
        assert_eq!(Credential::new("ghp_a"), Credential::new("ghp_a"));
        assert_ne!(Credential::new("ghp_a"), Credential::new("ghp_A"));
    }

    #[test]
    fn header_bearer_and_token() {
        let c = Credential::from_authorization_header("Bearer ghp_abc").unwrap();
        assert_eq!(c.expose_secret(), "ghp_abc");
        let c = Credential::from_authorization_header("token gho_xyz").unwrap();
        assert_eq!(c.kind(), CredentialKind::OAuthToken);
    }

    #[test]
    fn header_basic_uses_password() {
        let encoded = STANDARD.encode("alice:ghp_abc");
        let c = Credential::from_authorization_header(&format!("Basic {encoded}")).unwrap();
        assert_eq!(c.expose_secret(), "ghp_abc");
    }

    #[test]
    fn header_rejects_unusable_values() {
        assert!(Credential::from_authorization_header("").is_none());
        assert!(Credential::from_authorization_header("Bearer").is_none());
        assert!(Credential::from_authorization_header("Bearer   ").is_none());
        assert!(Credential::from_authorization_header("Digest abc").is_none());
        assert!(Credential::from_authorization_header("Basic !!notbase64").is_none());
        let no_password = STANDARD.encode("alice:");
        assert!(Credential::from_authorization_header(&format!("Basic {no_password}")).is_none());
    }
}
