//! Pre-authorized headers for follow-up storage operations.
//!
//! After a request has been authorized, the storage layer may need to hand the
//! client a header it can replay against a later step (an object upload, say)
//! without going through the authority again.  The header is a projection of
//! the credential already held by the [`Identity`].

use std::collections::BTreeMap;

use axum::http::header::AUTHORIZATION;

use crate::forge::RepoRef;

use super::identity::{Action, Identity};

/// Headers to attach to a pre-authorized follow-up request.
pub type PreauthorizedHeaders = BTreeMap<String, String>;

/// Build the `Authorization` header proving `identity` for `actions` on `repo`.
///
/// Returns `None` when the identity holds no credential, or when any
/// requested action is not currently authorized according to the cached
/// decisions.  Never calls the authority.
pub fn authz_header(
    identity: &Identity,
    repo: &RepoRef,
    actions: &[Action],
) -> Option<PreauthorizedHeaders> {
    let credential = identity.credential()?;
    if !actions
        .iter()
        .all(|action| identity.is_authorized(&repo.org, &repo.repo, *action))
    {
        return None;
    }
    let mut headers = PreauthorizedHeaders::new();
    headers.insert(
        AUTHORIZATION.as_str().to_string(),
        format!("Bearer {}", credential.expose_secret()),
    );
    Some(headers)
}
