//! Unit tests for metrics.rs module

use std::time::Duration;
use chatlog_rust::metrics::MetricsCollector;

#[test]
fn test_metrics_collector_default_names() {
    let collector = MetricsCollector::default();
    assert_eq!(collector.shards_opened_total, "chatlog_shards_opened_total");
    assert_eq!(collector.shard_open_failures_total, "chatlog_shard_open_failures_total");
    assert_eq!(collector.shards_invalidated_total, "chatlog_shards_invalidated_total");
    assert_eq!(collector.open_shards, "chatlog_open_shards");
    assert_eq!(collector.messages_decoded_total, "chatlog_messages_decoded_total");
    assert_eq!(collector.decode_fallbacks_total, "chatlog_decode_fallbacks_total");
    assert_eq!(collector.queries_total, "chatlog_queries_total");
    assert_eq!(collector.errors_total, "chatlog_errors_total");
}

#[test]
fn test_metric_names_are_prefixed() {
    let collector = MetricsCollector::default();
    for name in [
        collector.shards_opened_total,
        collector.open_shards,
        collector.query_duration,
        collector.query_rows_scanned,
    ] {
        assert!(name.starts_with("chatlog_"), "unprefixed metric: {}", name);
    }
}

#[test]
fn test_metrics_initialization_once() {
    assert!(MetricsCollector::init().is_ok());
    // The global recorder can only be installed once per process
    assert!(MetricsCollector::init().is_err());
}

#[test]
fn test_record_cache_events() {
    let collector = MetricsCollector::default();
    collector.record_shard_open("message", true);
    collector.record_shard_open("message", false);
    collector.record_invalidation();
    collector.update_open_shards(3);
    collector.update_open_shards(0);
}

#[test]
fn test_record_decode_events() {
    let collector = MetricsCollector::default();
    collector.record_decoded("windows_v3", 10);
    collector.record_decoded("v4", 0);
    collector.record_decode_fallback("zstd");
}

#[test]
fn test_record_queries() {
    let collector = MetricsCollector::default();
    collector.record_query("messages", Duration::from_millis(12), 400, true);
    collector.record_query("media", Duration::from_millis(1), 0, false);
    collector.record_error("shard_query", "message");
}
