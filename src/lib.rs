//! Write-access authorization for a forge-backed storage service.
//!
//! The core lives in [`auth`]: a [`TokenCache`](auth::TokenCache) of
//! credential → [`Identity`](auth::Identity), per-repository decisions that go
//! stale after a fixed window, and an [`Authorizer`](auth::Authorizer) that
//! only calls the [`Authority`](forge::Authority) when the cache cannot answer.

pub mod auth;
pub mod config;
pub mod forge;
pub mod http;
pub mod metrics;

use std::sync::Arc;

use crate::auth::Authorizer;
use crate::config::Config;
use crate::metrics::MetricsRegistry;

/// Global state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub authorizer: Arc<Authorizer>,
    pub metrics: MetricsRegistry,
    /// HMAC secret for webhook signatures; webhooks are refused when unset.
    pub webhook_secret: Option<String>,
}

impl AppState {
    /// Wire an [`Authorizer`] over `authority` according to `config`.
    pub fn new(
        config: Arc<Config>,
        authority: Arc<dyn forge::Authority>,
        webhook_secret: Option<String>,
    ) -> Self {
        let metrics = MetricsRegistry::new();
        let authorizer = Authorizer::new(
            Arc::new(auth::TokenCache::new()),
            authority,
            Arc::clone(&metrics.metrics),
        )
        .with_expiration(config.auth.expiration())
        .with_propagate_invalid_credential(config.auth.propagate_invalid_credential);
        Self {
            config,
            authorizer: Arc::new(authorizer),
            metrics,
            webhook_secret,
        }
    }
}
