//! Authentication and authorisation subsystem.
//!
//! Resolves bearer credentials to identities, caches per-repository write
//! decisions with lazy expiry, and consults the upstream forge only when a
//! decision is missing or stale.

pub mod authorizer;
pub mod cache;
pub mod credential;
pub mod identity;
pub mod preauth;
pub mod webhook;

pub use authorizer::{AuthDecision, AuthError, Authorizer, DecisionSource};
pub use cache::TokenCache;
pub use credential::{Credential, CredentialKind};
pub use identity::{AccessState, Action, Identity, RepoAccess};
