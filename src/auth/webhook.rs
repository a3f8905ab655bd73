//! GitHub webhook receiver for cache invalidation.
//!
//! Validates the HMAC-SHA256 signature, parses the event type, and drops the
//! affected cached decisions back to `Unknown` so permission changes take
//! effect without waiting for expiry.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::cache::TokenCache;
use crate::forge::RepoRef;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Describes the cache-invalidation effect of a webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Invalidate all decisions for an org.
    OrgChange { org: String },
    /// Invalidate decisions for a specific repo.
    RepoChange { repo: RepoRef },
    /// No cache invalidation needed.
    NoAction,
}

/// Process an incoming webhook payload.
///
/// 1. Verify the HMAC-SHA256 signature.
/// 2. Parse the event type from `X-GitHub-Event`.
/// 3. Invalidate the affected decisions.
pub fn handle_webhook_payload(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Response {
    let Some(secret) = state.webhook_secret.as_deref() else {
        warn!("webhook received but no webhook secret is configured");
        return (StatusCode::SERVICE_UNAVAILABLE, "webhooks not configured").into_response();
    };

    if let Err(e) = verify_signature(headers, body, secret) {
        warn!(error = %e, "webhook signature verification failed");
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let event_type = webhook_event_type(headers).unwrap_or_else(|| "unknown".to_string());
    info!(event = %event_type, "processing webhook event");

    let payload: serde_json::Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "failed to parse webhook JSON");
            return (StatusCode::BAD_REQUEST, "invalid JSON payload").into_response();
        }
    };

    let event = parse_webhook_payload(&event_type, &payload);
    apply_event(state.authorizer.cache(), &event);
    StatusCode::OK.into_response()
}

/// Verify the HMAC-SHA256 signature from the webhook signature header.
///
/// Checks the normalized `X-Webhook-Signature` header first, then falls back
/// to `X-Hub-Signature-256`.
pub fn verify_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> anyhow::Result<()> {
    let sig_header = headers
        .get("X-Webhook-Signature")
        .or_else(|| headers.get("X-Hub-Signature-256"))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| anyhow::anyhow!("missing webhook signature header"))?;

    let sig_hex = sig_header
        .strip_prefix("sha256=")
        .ok_or_else(|| anyhow::anyhow!("signature does not start with sha256="))?;

    let sig_bytes =
        hex::decode(sig_hex).map_err(|e| anyhow::anyhow!("invalid hex in signature: {e}"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("HMAC key error: {e}"))?;
    mac.update(body);

    mac.verify_slice(&sig_bytes)
        .map_err(|_| anyhow::anyhow!("HMAC signature mismatch"))?;

    Ok(())
}

pub fn webhook_event_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Webhook-Event")
        .or_else(|| headers.get("X-GitHub-Event"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Map a webhook event to its invalidation effect.
pub fn parse_webhook_payload(event_type: &str, payload: &serde_json::Value) -> WebhookEvent {
    let org = || {
        payload
            .get("organization")
            .and_then(|o| o.get("login"))
            .and_then(|l| l.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| WebhookEvent::OrgChange { org: s.to_string() })
    };
    let repo = || {
        payload
            .get("repository")
            .and_then(|r| r.get("full_name"))
            .and_then(|n| n.as_str())
            .and_then(RepoRef::parse)
            .map(|repo| WebhookEvent::RepoChange { repo })
    };

    // `member` is a collaborator change on a single repository.
    let event = match event_type {
        "membership" | "team" | "organization" => org(),
        "member" | "repository" => repo(),
        _ => None,
    };
    event.unwrap_or(WebhookEvent::NoAction)
}

/// Apply an invalidation to the cache.  Returns how many decisions were dropped.
pub fn apply_event(cache: &TokenCache, event: &WebhookEvent) -> usize {
    match event {
        WebhookEvent::OrgChange { org } => {
            let count = cache.invalidate_org(org);
            info!(%org, invalidated = count, "invalidated decisions for org event");
            count
        }
        WebhookEvent::RepoChange { repo } => {
            let count = cache.invalidate_repo(&repo.key());
            info!(%repo, invalidated = count, "invalidated decisions for repository event");
            count
        }
        WebhookEvent::NoAction => {
            debug!("ignoring webhook event with no cache effect");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::auth::credential::Credential;
    use crate::auth::identity::{AccessState, Identity};

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_accepted() {
        let body = b"hello world";
        let mut headers = HeaderMap::new();
        headers.insert("X-Hub-Signature-256", sign("s3cret", body).parse().unwrap());
        assert!(verify_signature(&headers, body, "s3cret").is_ok());
    }

    #[test]
    fn wrong_signature_rejected() {
        let body = b"hello world";
        let mut headers = HeaderMap::new();
        headers.insert("X-Hub-Signature-256", sign("other", body).parse().unwrap());
        assert!(verify_signature(&headers, body, "s3cret").is_err());
    }

    #[test]
    fn missing_or_malformed_signature_rejected() {
        let headers = HeaderMap::new();
        assert!(verify_signature(&headers, b"x", "s").is_err());

        let mut headers = HeaderMap::new();
        headers.insert("X-Hub-Signature-256", "md5=abcd".parse().unwrap());
        assert!(verify_signature(&headers, b"x", "s").is_err());
    }

    #[test]
    fn event_type_prefers_normalized_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Webhook-Event", "team".parse().unwrap());
        headers.insert("X-GitHub-Event", "ignored".parse().unwrap());
        assert_eq!(webhook_event_type(&headers).as_deref(), Some("team"));
    }

    #[test]
    fn payload_mapping() {
        let org = json!({"organization": {"login": "acme"}});
        let repo = json!({"repository": {"full_name": "acme/widgets"}});
        assert_eq!(
            parse_webhook_payload("membership", &org),
            WebhookEvent::OrgChange { org: "acme".into() }
        );
        assert_eq!(
            parse_webhook_payload("member", &repo),
            WebhookEvent::RepoChange {
                repo: RepoRef::new("acme", "widgets")
            }
        );
        assert_eq!(parse_webhook_payload("team", &json!({})), WebhookEvent::NoAction);
        assert_eq!(parse_webhook_payload("ping", &org), WebhookEvent::NoAction);
    }

    #[test]
    fn malformed_repository_name_is_ignored() {
        for name in ["acme", "acme/", "/widgets", "acme/widgets/extra", ""] {
            let payload = json!({"repository": {"full_name": name}});
            assert_eq!(
                parse_webhook_payload("repository", &payload),
                WebhookEvent::NoAction,
                "{name:?}"
            );
        }
    }

    #[test]
    fn apply_returns_decisions_to_unknown() {
        let cache = TokenCache::new();
        let cred = Credential::new("ghp_abc");
        let identity = Arc::new(Identity::new("alice", None));
        identity.authorize_for_repo("acme/widgets");
        identity.deauthorize_for_repo("acme/gadgets");
        cache.add(cred.clone(), Arc::clone(&identity));

        let repo_event = WebhookEvent::RepoChange {
            repo: RepoRef::new("acme", "widgets"),
        };
        assert_eq!(apply_event(&cache, &repo_event), 1);
        assert_eq!(identity.check_repo("acme/widgets"), AccessState::Unknown);
        assert_eq!(identity.check_repo("acme/gadgets"), AccessState::Denied);

        let org_event = WebhookEvent::OrgChange { org: "acme".into() };
        assert_eq!(apply_event(&cache, &org_event), 1);
        assert_eq!(identity.check_repo("acme/gadgets"), AccessState::Unknown);
        assert!(cache.check(&cred).is_some());
    }
}
