//! Integration tests for the cache / access layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::{
    ConnectorError, ErrorKind, OverrideParams, ParamMap, QuarryConfig, QueryResult, QuerySpec,
    SpecOverride, StoreError, TransformStep, FRESHNESS_PARSE_ERROR, FRESHNESS_SLA_VIOLATION,
};
use quarry_registry::QueryRegistry;
use quarry_storage::{
    AccessSettings, CacheCounters, CacheEntry, CacheKey, CacheStore, CounterSnapshot,
    MemoryCacheStore, PayloadEncoding, QueryAccess,
};
use quarry_test_utils::assertions::{assert_kind, assert_not_found, assert_timeout, assert_validation};
use quarry_test_utils::fixtures::{
    bulky_rows, counting_demo_registry, demo_connector, demo_spec, DEMO_QUERY_ID,
};
use quarry_test_utils::{
    row, ConnectorRegistry, CountingConnector, FailingConnector, Scalar, StaticConnector,
    StaticDataset,
};
use serde_json::json;

// ============================================================================
// HARNESS
// ============================================================================

struct Harness {
    access: QueryAccess,
    connector: Arc<CountingConnector>,
    store: Arc<MemoryCacheStore>,
    counters: Arc<CacheCounters>,
}

fn harness_with(specs: Vec<QuerySpec>, connector: StaticConnector, settings: AccessSettings) -> Harness {
    let connector = Arc::new(CountingConnector::new(connector));
    let store = Arc::new(MemoryCacheStore::new());
    let counters = Arc::new(CacheCounters::new());
    let access = QueryAccess::new(
        Arc::new(QueryRegistry::from_specs(specs).expect("unique ids")),
        Arc::new(ConnectorRegistry::new().with_connector(connector.clone())),
        store.clone(),
        settings,
    )
    .with_counters(counters.clone());
    Harness {
        access,
        connector,
        store,
        counters,
    }
}

fn demo_harness() -> Harness {
    harness_with(vec![demo_spec()], demo_connector(), AccessSettings::default())
}

fn overrides(raw: serde_json::Value) -> SpecOverride {
    let map: ParamMap = serde_json::from_value(raw).expect("override map");
    OverrideParams::from_map(&map)
        .expect("valid overrides")
        .into_spec_override()
}

// ============================================================================
// END-TO-END
// ============================================================================

#[tokio::test]
async fn test_demo_query_returns_top_two() {
    let h = demo_harness();
    let result = h
        .access
        .execute_cached(DEMO_QUERY_ID, None, None)
        .await
        .expect("demo query should run");

    assert_eq!(
        result.rows,
        vec![
            row([("sector", Scalar::from("B")), ("value", Scalar::Int(30))]),
            row([("sector", Scalar::from("C")), ("value", Scalar::Int(20))]),
        ]
    );
    assert_eq!(result.query_id, DEMO_QUERY_ID);
    assert_eq!(result.provenance.source_kind, "csv");
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn test_hit_skips_connector_and_matches_fresh_result() {
    let h = demo_harness();
    let fresh = h.access.execute_cached(DEMO_QUERY_ID, Some(600), None).await.expect("miss");
    let cached = h.access.execute_cached(DEMO_QUERY_ID, Some(600), None).await.expect("hit");

    assert_eq!(fresh, cached);
    assert_eq!(h.connector.calls(), 1);
    assert_eq!(
        h.counters.snapshot(),
        CounterSnapshot {
            hits: 1,
            misses: 1,
            invalidations: 0
        }
    );
}

// ============================================================================
// TTL
// ============================================================================

#[tokio::test]
async fn test_non_positive_ttl_bypasses_cache() {
    let h = demo_harness();
    for ttl in [0, -1, -86_400, i64::MIN] {
        h.access
            .execute_cached(DEMO_QUERY_ID, Some(ttl), None)
            .await
            .expect("bypass still executes");
    }

    assert_eq!(h.connector.calls(), 4);
    assert_eq!(h.counters.snapshot(), CounterSnapshot::default());
    assert_eq!(h.store.entry_count().await.expect("count"), 0);
}

async fn stored_ttl_secs(h: &Harness, spec: &QuerySpec, before: DateTime<Utc>) -> i64 {
    let entry = h
        .store
        .get(&CacheKey::for_spec(spec), before)
        .await
        .expect("store read")
        .expect("entry written");
    (entry.expires_at - before).num_seconds()
}

#[tokio::test]
async fn test_out_of_range_ttl_is_clamped() {
    for (requested, expected) in [(1, 60), (59, 60), (100_000, 86_400), (i64::MAX, 86_400)] {
        let h = demo_harness();
        let before = Utc::now();
        h.access
            .execute_cached(DEMO_QUERY_ID, Some(requested), None)
            .await
            .expect("query runs");

        let stored = stored_ttl_secs(&h, &demo_spec(), before).await;
        // Allow for the time the call itself took.
        assert!(
            (expected..=expected + 2).contains(&stored),
            "ttl {requested} stored as {stored}s, expected ~{expected}s"
        );
    }
}

#[tokio::test]
async fn test_unspecified_ttl_uses_default() {
    let h = demo_harness();
    let before = Utc::now();
    h.access.execute_cached(DEMO_QUERY_ID, None, None).await.expect("query runs");

    let stored = stored_ttl_secs(&h, &demo_spec(), before).await;
    assert!((300..=302).contains(&stored), "stored {stored}s");
}

// ============================================================================
// OVERRIDES
// ============================================================================

#[tokio::test]
async fn test_override_changes_key_and_leaves_registry_untouched() {
    let h = demo_harness();
    let limited = overrides(json!({"limit": 1}));

    let result = h
        .access
        .execute_cached(DEMO_QUERY_ID, None, Some(&limited))
        .await
        .expect("override run");
    assert_eq!(result.rows.len(), 1);

    let default = h.access.execute_cached(DEMO_QUERY_ID, None, None).await.expect("default run");
    assert_eq!(default.rows.len(), 2);
    assert_eq!(h.connector.calls(), 2);
    assert_eq!(h.access.registry().get(DEMO_QUERY_ID).expect("registered"), demo_spec());
}

#[tokio::test]
async fn test_timeout_override_does_not_split_the_cache() {
    let h = demo_harness();
    h.access.execute_cached(DEMO_QUERY_ID, None, None).await.expect("miss");
    h.access
        .execute_cached(DEMO_QUERY_ID, None, Some(&overrides(json!({"timeout_s": 5}))))
        .await
        .expect("hit");

    assert_eq!(h.connector.calls(), 1);
    assert_eq!(h.counters.snapshot().hits, 1);
}

#[tokio::test]
async fn test_percent_columns_override() {
    let h = demo_harness();
    let result = h
        .access
        .execute_cached(
            DEMO_QUERY_ID,
            None,
            Some(&overrides(json!({"percent_columns": ["value"], "ignored": true}))),
        )
        .await
        .expect("override run");

    assert_eq!(result.rows[0]["value"], Scalar::Float(3000.0));
    assert_eq!(result.rows[1]["value"], Scalar::Float(2000.0));
}

#[tokio::test]
async fn test_overflowing_transform_output_is_stable_across_hits() {
    let spec = QuerySpec::new("q_huge", "csv")
        .with_step(TransformStep::new("to_percent").with_param("columns", json!(["v"])));
    let connector = StaticConnector::new("csv").with_rows(
        "q_huge",
        vec![row([("v", Scalar::Float(1e307)), ("w", Scalar::Float(2.5))])],
    );
    let h = harness_with(vec![spec], connector, AccessSettings::default());

    let fresh = h.access.execute_cached("q_huge", None, None).await.expect("miss");
    let cached = h.access.execute_cached("q_huge", None, None).await.expect("hit");

    assert_eq!(fresh.rows[0]["v"], Scalar::Null);
    assert_eq!(fresh, cached);
    assert_eq!(h.counters.snapshot().hits, 1);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let h = demo_harness();
    let result = h.access.execute_cached("q_missing", None, None).await;
    assert_not_found(&result);
    let err = result.expect_err("unknown id");
    assert_eq!(err.public_message(), "query not found: q_missing");
    assert_eq!(h.store.entry_count().await.expect("count"), 0);
}

#[tokio::test]
async fn test_unknown_step_is_validation_error_listing_catalog() {
    let spec = demo_spec().with_step(TransformStep::new("explode"));
    let h = harness_with(vec![spec], demo_connector(), AccessSettings::default());

    let result = h.access.execute_cached(DEMO_QUERY_ID, None, None).await;
    assert_validation(&result);
    let message = result.expect_err("unknown step").public_message();
    for name in quarry_transform::TransformKind::catalog_names() {
        assert!(message.contains(&name), "{message} should list {name}");
    }
    assert!(message.contains("position 2"));
    assert_eq!(h.store.entry_count().await.expect("count"), 0);
}

#[tokio::test]
async fn test_connector_failures_keep_their_kind_and_are_not_cached() {
    let cases = [
        (
            ConnectorError::DatasetNotFound {
                query_id: DEMO_QUERY_ID.into(),
            },
            ErrorKind::NotFound,
        ),
        (
            ConnectorError::MalformedData {
                query_id: DEMO_QUERY_ID.into(),
                reason: "row 3 is not an object".into(),
            },
            ErrorKind::Validation,
        ),
        (
            ConnectorError::Timeout {
                source_name: "csv".into(),
                timeout: Duration::from_secs(1),
            },
            ErrorKind::Timeout,
        ),
    ];

    for (error, kind) in cases {
        let store = Arc::new(MemoryCacheStore::new());
        let access = QueryAccess::new(
            Arc::new(QueryRegistry::from_specs([demo_spec()]).expect("registry")),
            Arc::new(ConnectorRegistry::new().with_connector(Arc::new(FailingConnector::new("csv", error)))),
            store.clone(),
            AccessSettings::default(),
        )
        .with_counters(Arc::new(CacheCounters::new()));

        let result = access.execute_cached(DEMO_QUERY_ID, None, None).await;
        assert_kind(&result, kind);
        assert_eq!(store.entry_count().await.expect("count"), 0);
    }
}

#[tokio::test]
async fn test_unregistered_source_is_not_found() {
    let spec = QuerySpec::new("q_orphan", "warehouse");
    let h = harness_with(vec![spec], demo_connector(), AccessSettings::default());
    assert_not_found(&h.access.execute_uncached("q_orphan", None).await);
}

#[tokio::test]
async fn test_slow_connector_times_out() {
    let settings = AccessSettings {
        connector_timeout: Duration::from_millis(20),
        ..AccessSettings::default()
    };
    let connector = Arc::new(CountingConnector::new(demo_connector()).with_delay(Duration::from_millis(500)));
    let store = Arc::new(MemoryCacheStore::new());
    let access = QueryAccess::new(
        Arc::new(QueryRegistry::from_specs([demo_spec()]).expect("registry")),
        Arc::new(ConnectorRegistry::new().with_connector(connector)),
        store.clone(),
        settings,
    )
    .with_counters(Arc::new(CacheCounters::new()));

    assert_timeout(&access.execute_cached(DEMO_QUERY_ID, None, None).await);
    assert_eq!(store.entry_count().await.expect("count"), 0);
}

// ============================================================================
// FRESHNESS
// ============================================================================

#[tokio::test]
async fn test_unparsable_as_of_yields_single_parse_warning() {
    let spec = QuerySpec::new("q_stale", "csv").with_sla_days(json!(30));
    let connector = StaticConnector::new("csv").with_dataset(
        "q_stale",
        StaticDataset::new(vec![row([("value", Scalar::Int(1))])]).with_as_of("sometime last spring"),
    );
    let h = harness_with(vec![spec], connector, AccessSettings::default());

    let result = h.access.execute_cached("q_stale", None, None).await.expect("query runs");
    let parse_warnings = result
        .warnings
        .iter()
        .filter(|w| w.starts_with(FRESHNESS_PARSE_ERROR))
        .count();
    assert_eq!(parse_warnings, 1);
    assert!(!result.warnings.iter().any(|w| w.starts_with(FRESHNESS_SLA_VIOLATION)));
}

#[tokio::test]
async fn test_sla_violation_is_a_warning() {
    let spec = QuerySpec::new("q_old", "csv").with_sla_days(json!(30));
    let connector = StaticConnector::new("csv").with_rows(
        "q_old",
        vec![row([("year", Scalar::Int(2001)), ("value", Scalar::Int(5))])],
    );
    let h = harness_with(vec![spec], connector, AccessSettings::default());

    let result = h.access.execute_cached("q_old", None, None).await.expect("query runs");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].starts_with(FRESHNESS_SLA_VIOLATION));
    assert_eq!(
        result.freshness.as_of,
        chrono::NaiveDate::from_ymd_opt(2001, 12, 31)
    );
}

#[tokio::test]
async fn test_invalid_sla_aborts_before_cache_write() {
    let spec = demo_spec().with_sla_days(json!("whenever"));
    let h = harness_with(vec![spec], demo_connector(), AccessSettings::default());

    let result = h.access.execute_cached(DEMO_QUERY_ID, None, None).await;
    assert_validation(&result);
    assert!(result
        .expect_err("invalid sla")
        .to_string()
        .contains("freshness_invalid_sla"));
    assert_eq!(h.store.entry_count().await.expect("count"), 0);
}

// ============================================================================
// TRACE
// ============================================================================

#[tokio::test]
async fn test_trace_only_adds_warnings() {
    let traced = harness_with(
        vec![demo_spec()],
        demo_connector(),
        AccessSettings::from(&QuarryConfig::default().with_trace_transforms(true)),
    );
    let plain = demo_harness();

    let with_trace = traced.access.execute_uncached(DEMO_QUERY_ID, None).await.expect("traced");
    let without = plain.access.execute_uncached(DEMO_QUERY_ID, None).await.expect("plain");

    assert_eq!(with_trace.rows, without.rows);
    assert_eq!(with_trace.warnings, vec!["transform:top_n".to_string()]);
    assert!(without.warnings.is_empty());
}

// ============================================================================
// INVALIDATION
// ============================================================================

#[tokio::test]
async fn test_invalidate_is_idempotent_and_counted() {
    let h = demo_harness();
    h.access.execute_cached(DEMO_QUERY_ID, None, None).await.expect("populate");
    assert_eq!(h.store.entry_count().await.expect("count"), 1);

    assert!(h.access.invalidate_query(DEMO_QUERY_ID).await.expect("first"));
    assert_eq!(h.counters.snapshot().invalidations, 1);
    assert!(!h.access.invalidate_query(DEMO_QUERY_ID).await.expect("second"));
    assert_eq!(h.counters.snapshot().invalidations, 2);

    assert_eq!(h.store.entry_count().await.expect("count"), 0);
    h.access.execute_cached(DEMO_QUERY_ID, None, None).await.expect("repopulate");
    assert_eq!(h.connector.calls(), 2);
}

#[tokio::test]
async fn test_invalidate_unknown_id() {
    let h = demo_harness();
    assert_not_found(&h.access.invalidate_query("q_missing").await);
    assert_eq!(h.counters.snapshot().invalidations, 0);
}

// ============================================================================
// STORE MISBEHAVIOR
// ============================================================================

/// Store whose behavior is scripted per operation.
#[derive(Default)]
struct ScriptedStore {
    inner: MemoryCacheStore,
    read_delay: Option<Duration>,
    delete_delay: Option<Duration>,
    fail_writes: bool,
    garble_reads: bool,
    foreign_reads: bool,
}

#[async_trait]
impl CacheStore for ScriptedStore {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheEntry>, StoreError> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.garble_reads {
            let mut entry = CacheEntry::encode(
                key.clone(),
                &QueryResult::new(DEMO_QUERY_ID, Default::default()),
                quarry_storage::TtlPolicy::default().resolve(None).expect("enabled"),
                now,
                8192,
            )
            .expect("encode");
            entry.metadata.encoding = PayloadEncoding::Gzip;
            entry.payload = b"definitely not gzip".to_vec();
            return Ok(Some(entry));
        }
        if self.foreign_reads {
            let entry = CacheEntry::encode(
                key.clone(),
                &QueryResult::new("q_someone_else", Default::default()),
                quarry_storage::TtlPolicy::default().resolve(None).expect("enabled"),
                now,
                8192,
            )
            .expect("encode");
            return Ok(Some(entry));
        }
        self.inner.get(key, now).await
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Backend {
                reason: "disk full".into(),
            });
        }
        self.inner.put(entry).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        if let Some(delay) = self.delete_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.delete(key).await
    }

    async fn entry_count(&self) -> Result<u64, StoreError> {
        self.inner.entry_count().await
    }
}

fn scripted_access(store: ScriptedStore) -> (QueryAccess, Arc<CountingConnector>, Arc<CacheCounters>) {
    let (connectors, counting) = counting_demo_registry();
    let counters = Arc::new(CacheCounters::new());
    let settings = AccessSettings {
        store_timeout: Duration::from_millis(20),
        ..AccessSettings::default()
    };
    let access = QueryAccess::new(
        Arc::new(QueryRegistry::from_specs([demo_spec()]).expect("registry")),
        Arc::new(connectors),
        Arc::new(store),
        settings,
    )
    .with_counters(counters.clone());
    (access, counting, counters)
}

#[tokio::test]
async fn test_corrupt_payload_is_a_miss() {
    let (access, counting, counters) = scripted_access(ScriptedStore {
        garble_reads: true,
        ..ScriptedStore::default()
    });

    let result = access.execute_cached(DEMO_QUERY_ID, None, None).await.expect("falls through");
    assert_eq!(result.rows.len(), 2);
    assert_eq!(counting.calls(), 1);
    assert_eq!((counters.snapshot().hits, counters.snapshot().misses), (0, 1));
}

#[tokio::test]
async fn test_payload_for_another_query_is_a_miss() {
    let (access, counting, counters) = scripted_access(ScriptedStore {
        foreign_reads: true,
        ..ScriptedStore::default()
    });

    let result = access.execute_cached(DEMO_QUERY_ID, None, None).await.expect("falls through");
    assert_eq!(result.query_id, DEMO_QUERY_ID);
    assert_eq!(counting.calls(), 1);
    assert_eq!(counters.snapshot().misses, 1);
}

#[tokio::test]
async fn test_read_timeout_is_a_miss() {
    let (access, counting, counters) = scripted_access(ScriptedStore {
        read_delay: Some(Duration::from_millis(500)),
        ..ScriptedStore::default()
    });

    access.execute_cached(DEMO_QUERY_ID, None, None).await.expect("falls through");
    assert_eq!(counting.calls(), 1);
    assert_eq!(counters.snapshot().misses, 1);
}

#[tokio::test]
async fn test_write_failure_still_returns_result() {
    let (access, counting, _) = scripted_access(ScriptedStore {
        fail_writes: true,
        ..ScriptedStore::default()
    });

    let first = access.execute_cached(DEMO_QUERY_ID, None, None).await.expect("first");
    let second = access.execute_cached(DEMO_QUERY_ID, None, None).await.expect("second");
    assert_eq!(first.rows, second.rows);
    assert_eq!(counting.calls(), 2);
}

#[tokio::test]
async fn test_delete_timeout_surfaces() {
    let (access, _, _) = scripted_access(ScriptedStore {
        delete_delay: Some(Duration::from_millis(500)),
        ..ScriptedStore::default()
    });

    let result = access.invalidate_query(DEMO_QUERY_ID).await;
    assert_timeout(&result);
}

// ============================================================================
// COMPRESSION AND CONCURRENCY
// ============================================================================

#[tokio::test]
async fn test_large_results_are_stored_compressed_and_served_intact() {
    let spec = QuerySpec::new("q_bulk", "csv");
    let connector = StaticConnector::new("csv").with_rows("q_bulk", bulky_rows(64 * 1024));
    let h = harness_with(vec![spec.clone()], connector, AccessSettings::default());

    let fresh = h.access.execute_cached("q_bulk", None, None).await.expect("miss");
    let entry = h
        .store
        .get(&CacheKey::for_spec(&spec), Utc::now())
        .await
        .expect("read")
        .expect("stored");
    assert_eq!(entry.metadata.encoding, PayloadEncoding::Gzip);

    let cached = h.access.execute_cached("q_bulk", None, None).await.expect("hit");
    assert_eq!(fresh, cached);
    assert_eq!(h.counters.snapshot().hits, 1);
}

#[tokio::test]
async fn test_concurrent_misses_converge_on_one_entry() {
    let h = demo_harness();
    let (a, b) = tokio::join!(
        h.access.execute_cached(DEMO_QUERY_ID, None, None),
        h.access.execute_cached(DEMO_QUERY_ID, None, None),
    );

    assert_eq!(a.expect("first"), b.expect("second"));
    assert_eq!(h.store.entry_count().await.expect("count"), 1);
    let snapshot = h.counters.snapshot();
    assert_eq!(snapshot.hits + snapshot.misses, 2);
}
