use anyhow::Result;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric names recorded by the storage layer
pub struct MetricsCollector {
    // Connection cache metrics
    pub shards_opened_total: &'static str,
    pub shard_open_failures_total: &'static str,
    pub shards_invalidated_total: &'static str,
    pub open_shards: &'static str,

    // Decoding metrics
    pub messages_decoded_total: &'static str,
    pub decode_fallbacks_total: &'static str,

    // Query metrics
    pub queries_total: &'static str,
    pub query_duration: &'static str,
    pub query_rows_scanned: &'static str,

    // Error metrics
    pub errors_total: &'static str,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            shards_opened_total: "chatlog_shards_opened_total",
            shard_open_failures_total: "chatlog_shard_open_failures_total",
            shards_invalidated_total: "chatlog_shards_invalidated_total",
            open_shards: "chatlog_open_shards",

            messages_decoded_total: "chatlog_messages_decoded_total",
            decode_fallbacks_total: "chatlog_decode_fallbacks_total",

            queries_total: "chatlog_queries_total",
            query_duration: "chatlog_query_duration_seconds",
            query_rows_scanned: "chatlog_query_rows_scanned",

            errors_total: "chatlog_errors_total",
        }
    }
}

impl MetricsCollector {
    /// Initialize metrics collection
    pub fn init() -> Result<()> {
        metrics::set_global_recorder(metrics::NoopRecorder)
            .map_err(|e| anyhow::anyhow!("Failed to initialize metrics recorder: {}", e))?;

        Ok(())
    }

    /// Record a shard open attempt
    pub fn record_shard_open(&self, group: &str, success: bool) {
        if success {
            counter!(self.shards_opened_total, "group" => group.to_string()).increment(1);
        } else {
            counter!(self.shard_open_failures_total, "group" => group.to_string()).increment(1);
            self.record_error("shard_open", group);
        }
    }

    /// Record a cache invalidation
    pub fn record_invalidation(&self) {
        counter!(self.shards_invalidated_total).increment(1);
    }

    /// Update the number of cached shard handles
    pub fn update_open_shards(&self, count: usize) {
        gauge!(self.open_shards).set(count as f64);
    }

    /// Record decoded messages for a variant
    pub fn record_decoded(&self, variant: &str, count: usize) {
        counter!(self.messages_decoded_total, "variant" => variant.to_string()).increment(count as u64);
    }

    /// Record a decode that degraded instead of failing
    pub fn record_decode_fallback(&self, stage: &'static str) {
        counter!(self.decode_fallbacks_total, "stage" => stage).increment(1);
    }

    /// Record an orchestrated query
    pub fn record_query(&self, entity: &'static str, duration: Duration, rows_scanned: usize, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!(self.queries_total, "entity" => entity, "status" => status).increment(1);
        histogram!(self.query_duration, "entity" => entity).record(duration.as_secs_f64());
        histogram!(self.query_rows_scanned, "entity" => entity).record(rows_scanned as f64);
        if !success {
            self.record_error("query", entity);
        }
    }

    /// Record error metrics
    pub fn record_error(&self, error_type: &str, operation: &str) {
        counter!(
            self.errors_total,
            "type" => error_type.to_string(),
            "operation" => operation.to_string()
        )
        .increment(1);
    }
}
