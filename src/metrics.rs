use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Allowed,
    Denied,
    Rejected,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    pub endpoint: Endpoint,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Endpoint {
    ValidateCredential,
    GetPermission,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the service.
pub struct Metrics {
    // -- cache --
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub evictions: Counter,
    pub cached_credentials: Gauge,

    // -- decisions --
    pub decisions: Family<DecisionLabels, Counter>,

    // -- authority --
    pub authority_calls: Family<EndpointLabels, Counter>,
    pub authority_rate_limit_remaining: Gauge,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let cache_hits = Counter::default();
        registry.register(
            "forgeauth_cache_hits",
            "Write decisions answered from the token cache",
            cache_hits.clone(),
        );

        let cache_misses = Counter::default();
        registry.register(
            "forgeauth_cache_misses",
            "Write decisions that required the authority",
            cache_misses.clone(),
        );

        let evictions = Counter::default();
        registry.register(
            "forgeauth_evictions",
            "Credentials evicted after the authority rejected them",
            evictions.clone(),
        );

        let cached_credentials: Gauge = Gauge::default();
        registry.register(
            "forgeauth_cached_credentials",
            "Credentials currently held in the token cache",
            cached_credentials.clone(),
        );

        let decisions = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "forgeauth_decisions",
            "Authorization decisions by outcome",
            decisions.clone(),
        );

        let authority_calls = Family::<EndpointLabels, Counter>::default();
        registry.register(
            "forgeauth_authority_calls",
            "Authority API calls by endpoint",
            authority_calls.clone(),
        );

        let authority_rate_limit_remaining: Gauge = Gauge::default();
        registry.register(
            "forgeauth_authority_rate_limit_remaining",
            "Remaining authority API calls before rate limit",
            authority_rate_limit_remaining.clone(),
        );

        Self {
            cache_hits,
            cache_misses,
            evictions,
            cached_credentials,
            decisions,
            authority_calls,
            authority_rate_limit_remaining,
        }
    }

    pub fn record_decision(&self, outcome: Outcome) {
        self.decisions.get_or_create(&DecisionLabels { outcome }).inc();
    }

    pub fn record_authority_call(&self, endpoint: Endpoint) {
        self.authority_calls
            .get_or_create(&EndpointLabels { endpoint })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`AppState`].
///
/// [`AppState`]: crate::AppState
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
