//! Cache / access layer.
//!
//! [`QueryAccess`] is the only component with side effects. Given a query
//! id and an optional override it resolves the effective spec, serves a
//! cached result when one is live, and otherwise runs the connector, the
//! transform pipeline and the freshness verifier before storing the result
//! under its content-derived key.
//!
//! # Failure policy
//!
//! - Unknown ids, connector failures, pipeline failures and invalid SLAs
//!   abort the request before any cache write.
//! - Anything that goes wrong while *reading* the cache (backend error,
//!   timeout, corrupt payload) is a miss, never an error.
//! - A failed cache *write* is logged; the fresh result is still returned.
//!
//! There is no lock around identical concurrent misses. Both execute and
//! both write the same key; the last complete write wins.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use quarry_connectors::ConnectorRegistry;
use quarry_core::{
    verify_freshness, ConnectorError, QuarryConfig, QuarryResult, QueryResult, QuerySpec,
    SpecOverride, StoreError,
};
use quarry_registry::QueryRegistry;
use quarry_transform::run_pipeline;
use tracing::{debug, info_span, warn, Instrument};

use crate::cache::{
    CacheCounters, CacheEntry, CacheKey, CacheStore, ClampedTtl, CounterSnapshot, TtlPolicy,
};

/// Knobs the access layer runs with.
#[derive(Debug, Clone)]
pub struct AccessSettings {
    pub ttl_policy: TtlPolicy,
    /// Serialized payloads strictly larger than this are compressed.
    pub compression_threshold: usize,
    /// Append `transform:<step>` entries to result warnings.
    pub trace_transforms: bool,
    /// Default bound on a connector call.
    pub connector_timeout: Duration,
    /// Bound on each cache store operation.
    pub store_timeout: Duration,
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self::from(&QuarryConfig::default())
    }
}

impl From<&QuarryConfig> for AccessSettings {
    fn from(config: &QuarryConfig) -> Self {
        Self {
            ttl_policy: TtlPolicy::with_default(config.default_ttl_secs),
            compression_threshold: config.compression_threshold_bytes,
            trace_transforms: config.trace_transforms,
            connector_timeout: config.connector_timeout,
            store_timeout: config.store_timeout,
        }
    }
}

/// Resolves queries against the registry, connectors and cache store.
pub struct QueryAccess {
    registry: Arc<QueryRegistry>,
    connectors: Arc<ConnectorRegistry>,
    store: Arc<dyn CacheStore>,
    counters: Arc<CacheCounters>,
    settings: AccessSettings,
}

impl std::fmt::Debug for QueryAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryAccess")
            .field("queries", &self.registry.len())
            .field("connectors", &self.connectors)
            .field("counters", &self.counters.snapshot())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl QueryAccess {
    /// Create an access layer reporting to the process-wide counters.
    pub fn new(
        registry: Arc<QueryRegistry>,
        connectors: Arc<ConnectorRegistry>,
        store: Arc<dyn CacheStore>,
        settings: AccessSettings,
    ) -> Self {
        Self {
            registry,
            connectors,
            store,
            counters: CacheCounters::global(),
            settings,
        }
    }

    /// Report to `counters` instead of the process-wide instance.
    pub fn with_counters(mut self, counters: Arc<CacheCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &AccessSettings {
        &self.settings
    }

    /// Current counter values.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Number of entries in the backing store.
    pub async fn entry_count(&self) -> QuarryResult<u64> {
        Ok(self
            .with_store_timeout("entry_count", self.store.entry_count())
            .await?)
    }

    /// Run a query without touching the cache.
    pub async fn execute_uncached(
        &self,
        id: &str,
        spec_override: Option<&SpecOverride>,
    ) -> QuarryResult<QueryResult> {
        let span = info_span!("query", query_id = id, cache_key = tracing::field::Empty);
        async {
            let spec = self.effective_spec(id, spec_override)?;
            self.execute_fresh(&spec, self.connector_timeout(spec_override))
                .await
        }
        .instrument(span)
        .await
    }

    /// Run a query through the cache.
    ///
    /// `ttl_secs` of `None` uses the default TTL. A TTL `<= 0` bypasses the
    /// cache entirely: no read, no write, no counter change.
    pub async fn execute_cached(
        &self,
        id: &str,
        ttl_secs: Option<i64>,
        spec_override: Option<&SpecOverride>,
    ) -> QuarryResult<QueryResult> {
        let span = info_span!("query", query_id = id, cache_key = tracing::field::Empty);
        async {
            let spec = self.effective_spec(id, spec_override)?;
            let connector_timeout = self.connector_timeout(spec_override);

            let Some(ttl) = self.settings.ttl_policy.resolve(ttl_secs) else {
                debug!(ttl_secs = ?ttl_secs, "caching disabled for this call");
                return self.execute_fresh(&spec, connector_timeout).await;
            };

            let key = CacheKey::for_spec(&spec);
            tracing::Span::current().record("cache_key", key.as_str());

            if let Some(result) = self.read_cached(&key, &spec.id).await {
                self.counters.record_hit();
                debug!("cache hit");
                return Ok(result);
            }
            self.counters.record_miss();
            debug!("cache miss");

            let result = self.execute_fresh(&spec, connector_timeout).await?;
            self.write_cached(key, &result, ttl).await;
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Drop the cached entry for the query's default spec.
    ///
    /// Idempotent. Returns whether an entry was actually removed; the
    /// invalidation counter moves by one on every call for a known id.
    pub async fn invalidate_query(&self, id: &str) -> QuarryResult<bool> {
        let spec = self.registry.get(id)?;
        let key = CacheKey::for_spec(&spec);
        self.counters.record_invalidation();

        let removed = self
            .with_store_timeout("delete", self.store.delete(&key))
            .await?;
        debug!(query_id = id, cache_key = %key, removed, "invalidated query");
        Ok(removed)
    }

    fn effective_spec(
        &self,
        id: &str,
        spec_override: Option<&SpecOverride>,
    ) -> QuarryResult<QuerySpec> {
        let spec = self.registry.get(id)?;
        Ok(match spec_override {
            Some(spec_override) => spec.with_override(spec_override),
            None => spec,
        })
    }

    fn connector_timeout(&self, spec_override: Option<&SpecOverride>) -> Duration {
        spec_override
            .and_then(|o| o.connector_timeout)
            .unwrap_or(self.settings.connector_timeout)
    }

    /// Connector, pipeline, row cap, freshness. Nothing here writes.
    async fn execute_fresh(
        &self,
        spec: &QuerySpec,
        connector_timeout: Duration,
    ) -> QuarryResult<QueryResult> {
        let connector = self.connectors.get(&spec.source)?;
        let output = tokio::time::timeout(connector_timeout, connector.fetch(spec))
            .await
            .map_err(|_| ConnectorError::Timeout {
                source_name: spec.source.clone(),
                timeout: connector_timeout,
            })??;

        let pipeline = run_pipeline(
            &output.rows,
            &spec.pipeline_steps(),
            self.settings.trace_transforms,
        )?;

        let mut result = QueryResult::new(spec.id.clone(), output.provenance);
        result.unit = output.unit;
        result.freshness.declared_as_of = output.as_of;
        result.warnings.extend(pipeline.trace_warnings());
        result.rows = pipeline.rows;
        if let Some(limit) = spec.row_limit() {
            result.rows.truncate(limit);
        }

        verify_freshness(&mut result, &spec.constraints, Utc::now())?;
        debug!(rows = result.row_count(), warnings = result.warnings.len(), "executed query");
        Ok(result)
    }

    /// Every failure on the read path is reported as a miss.
    async fn read_cached(&self, key: &CacheKey, id: &str) -> Option<QueryResult> {
        let entry = match self
            .with_store_timeout("get", self.store.get(key, Utc::now()))
            .await
        {
            Ok(entry) => entry?,
            Err(StoreError::Corrupt { reason }) => {
                warn!(cache.corrupt = true, reason = %reason, "unreadable cache entry");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "cache read failed");
                return None;
            }
        };

        match entry.decode() {
            Ok(result) if result.query_id == id => Some(result),
            Ok(result) => {
                warn!(
                    cache.corrupt = true,
                    stored_query_id = %result.query_id,
                    "cached payload belongs to another query"
                );
                None
            }
            Err(e) => {
                warn!(cache.corrupt = true, error = %e, "failed to decode cache entry");
                None
            }
        }
    }

    async fn write_cached(&self, key: CacheKey, result: &QueryResult, ttl: ClampedTtl) {
        let entry = match CacheEntry::encode(
            key,
            result,
            ttl,
            Utc::now(),
            self.settings.compression_threshold,
        ) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "failed to encode result for cache");
                return;
            }
        };
        let metadata = entry.metadata;

        match self.with_store_timeout("put", self.store.put(entry)).await {
            Ok(()) => debug!(
                ttl_secs = ttl.as_secs(),
                encoding = ?metadata.encoding,
                raw_len = metadata.raw_len,
                stored_len = metadata.stored_len,
                "stored result"
            ),
            Err(e) => warn!(error = %e, "cache write failed"),
        }
    }

    async fn with_store_timeout<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let timeout = self.settings.store_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout {
                operation: operation.to_string(),
                timeout,
            })?
    }
}

// ============================================================================
// TESTS
// ============================================================================
