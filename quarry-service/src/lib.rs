//! QUARRY Service - Consumer-Facing Operations
//!
//! [`QueryService`] is what agents and callers talk to: list queries, show a
//! spec, run a query with optional whitelisted overrides, invalidate a
//! query's cached result and read cache statistics.

pub mod telemetry;

use std::sync::Arc;

use quarry_connectors::ConnectorRegistry;
use quarry_core::{
    OverrideParams, ParamMap, QuarryConfig, QuarryResult, QueryResult, QuerySpec,
};
use quarry_registry::QueryRegistry;
use quarry_storage::{open_store, AccessSettings, CacheCounters, QueryAccess};
use serde::{Deserialize, Serialize};

pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};

/// Outcome of an invalidation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateOutcome {
    pub invalidated: bool,
}

/// Cache and registry statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub hit_rate: f64,
    /// Entries currently held by the store.
    pub entries: u64,
    /// Registered queries.
    pub queries: usize,
}

/// Consumer-facing facade over the access layer.
#[derive(Debug)]
pub struct QueryService {
    access: QueryAccess,
}

impl QueryService {
    /// Wire the registry, the file connectors and the configured store.
    pub fn from_config(config: &QuarryConfig) -> QuarryResult<Self> {
        Self::with_connectors(config, ConnectorRegistry::with_file_connectors(&config.data_dir))
    }

    /// Like [`QueryService::from_config`] with caller-supplied connectors.
    pub fn with_connectors(
        config: &QuarryConfig,
        connectors: ConnectorRegistry,
    ) -> QuarryResult<Self> {
        config.validate()?;
        let registry = QueryRegistry::load_all(&config.spec_dir)?;
        let store = open_store(&config.cache_backend)?;
        tracing::info!(
            queries = registry.len(),
            sources = ?connectors.sources(),
            backend = ?config.cache_backend,
            "query service ready"
        );
        Ok(Self::new(QueryAccess::new(
            Arc::new(registry),
            Arc::new(connectors),
            store,
            AccessSettings::from(config),
        )))
    }

    pub fn new(access: QueryAccess) -> Self {
        Self { access }
    }

    /// Report to `counters` instead of the process-wide instance.
    pub fn with_counters(mut self, counters: Arc<CacheCounters>) -> Self {
        self.access = self.access.with_counters(counters);
        self
    }

    pub fn access(&self) -> &QueryAccess {
        &self.access
    }

    /// Sorted ids of every registered query.
    pub fn list_query_ids(&self) -> Vec<String> {
        self.access.registry().all_ids()
    }

    /// Independent copy of a registered spec.
    pub fn get_query_spec(&self, id: &str) -> QuarryResult<QuerySpec> {
        Ok(self.access.registry().get(id)?)
    }

    /// Run a query through the cache.
    ///
    /// Override keys outside the whitelist are dropped; a whitelisted key with
    /// a malformed value fails the call. TTLs are clamped, never rejected.
    pub async fn run_query(
        &self,
        id: &str,
        ttl_seconds: Option<i64>,
        override_params: Option<&ParamMap>,
    ) -> QuarryResult<QueryResult> {
        let spec_override = match override_params {
            Some(raw) => {
                let parsed = OverrideParams::from_map(raw)?;
                (!parsed.is_empty()).then(|| parsed.into_spec_override())
            }
            None => None,
        };
        self.access
            .execute_cached(id, ttl_seconds, spec_override.as_ref())
            .await
    }

    /// Drop the cached result of a query's default spec. Idempotent.
    pub async fn invalidate_query(&self, id: &str) -> QuarryResult<InvalidateOutcome> {
        self.access.invalidate_query(id).await?;
        Ok(InvalidateOutcome { invalidated: true })
    }

    pub async fn stats(&self) -> QuarryResult<ServiceStats> {
        let counters = self.access.counters();
        Ok(ServiceStats {
            hits: counters.hits,
            misses: counters.misses,
            invalidations: counters.invalidations,
            hit_rate: counters.hit_rate(),
            entries: self.access.entry_count().await?,
            queries: self.access.registry().len(),
        })
    }
}
