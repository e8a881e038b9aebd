//! # Orchestration Metrics
//!
//! Prometheus instruments for the orchestration core, owned by an injected
//! [`OrchestrationMetrics`] object rather than process globals: components
//! receive an `Arc` at construction, and a scrape endpoint renders the text
//! exposition via [`OrchestrationMetrics::render`].

use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

/// All counters, gauges, and histograms exported by the core.
#[derive(Debug)]
pub struct OrchestrationMetrics {
    registry: Registry,

    /// Tasks accepted onto a stream, labeled by type and lane
    pub tasks_enqueued_total: CounterVec,
    /// Tasks acknowledged after successful processing, by type and lane
    pub tasks_completed_total: CounterVec,
    /// Tasks moved to the dead-letter stream, by type
    pub tasks_dead_lettered_total: CounterVec,
    /// Acknowledgements that exhausted retries without verifying
    pub ack_failures_total: Counter,
    /// Consumers found holding pending work with no live heartbeat
    pub dead_workers_detected_total: Counter,
    /// Pending entries reclaimed and redelivered by orphan recovery
    pub tasks_reassigned_total: Counter,

    /// Unacknowledged entries per consumer group, by type and lane
    pub consumer_group_lag: GaugeVec,
    /// Entries retained per stream, by type and lane
    pub queue_depth: GaugeVec,
    /// Live workers per pool
    pub worker_up: GaugeVec,

    /// End-to-end task latency from enqueue to acknowledgement
    pub task_latency_seconds: HistogramVec,
}

impl OrchestrationMetrics {
    /// Create all instruments and register them on a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tasks_enqueued_total = CounterVec::new(
            Opts::new("tasks_enqueued_total", "Tasks accepted onto a stream"),
            &["type", "lane"],
        )?;
        let tasks_completed_total = CounterVec::new(
            Opts::new(
                "tasks_completed_total",
                "Tasks acknowledged after successful processing",
            ),
            &["type", "lane"],
        )?;
        let tasks_dead_lettered_total = CounterVec::new(
            Opts::new(
                "tasks_dead_lettered_total",
                "Tasks moved to the dead-letter stream",
            ),
            &["type"],
        )?;
        let ack_failures_total = Counter::new(
            "ack_failures_total",
            "Acknowledgements that exhausted retries without verifying",
        )?;
        let dead_workers_detected_total = Counter::new(
            "dead_workers_detected_total",
            "Consumers found holding pending work with no live heartbeat",
        )?;
        let tasks_reassigned_total = Counter::new(
            "tasks_reassigned_total",
            "Pending entries reclaimed and redelivered by orphan recovery",
        )?;

        let consumer_group_lag = GaugeVec::new(
            Opts::new(
                "consumer_group_lag",
                "Unacknowledged entries per consumer group",
            ),
            &["type", "lane"],
        )?;
        let queue_depth = GaugeVec::new(
            Opts::new("queue_depth", "Entries retained per stream"),
            &["type", "lane"],
        )?;
        let worker_up = GaugeVec::new(
            Opts::new("worker_up", "Live workers per pool"),
            &["pool"],
        )?;

        let task_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "task_latency_seconds",
                "End-to-end task latency from enqueue to acknowledgement",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0]),
            &["type", "lane"],
        )?;

        registry.register(Box::new(tasks_enqueued_total.clone()))?;
        registry.register(Box::new(tasks_completed_total.clone()))?;
        registry.register(Box::new(tasks_dead_lettered_total.clone()))?;
        registry.register(Box::new(ack_failures_total.clone()))?;
        registry.register(Box::new(dead_workers_detected_total.clone()))?;
        registry.register(Box::new(tasks_reassigned_total.clone()))?;
        registry.register(Box::new(consumer_group_lag.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(worker_up.clone()))?;
        registry.register(Box::new(task_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            tasks_enqueued_total,
            tasks_completed_total,
            tasks_dead_lettered_total,
            ack_failures_total,
            dead_workers_detected_total,
            tasks_reassigned_total,
            consumer_group_lag,
            queue_depth,
            worker_up,
            task_latency_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format for a
    /// pull-based scrape endpoint.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {e}\n");
        }

        String::from_utf8(buffer).unwrap_or_else(|e| format!("# Error converting metrics: {e}\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruments_register_and_render() {
        let metrics = OrchestrationMetrics::new().expect("metrics init");

        metrics
            .tasks_enqueued_total
            .with_label_values(&["reasoning", "express"])
            .inc();
        metrics.tasks_reassigned_total.inc_by(3.0);
        metrics
            .task_latency_seconds
            .with_label_values(&["reasoning", "express"])
            .observe(0.42);

        let rendered = metrics.render();
        assert!(rendered.contains("tasks_enqueued_total"));
        assert!(rendered.contains("tasks_reassigned_total 3"));
        assert!(rendered.contains("task_latency_seconds"));
    }

    #[test]
    fn test_registries_are_independent() {
        // Two instances must not collide: no global registry involved
        let a = OrchestrationMetrics::new().expect("first registry");
        let b = OrchestrationMetrics::new().expect("second registry");

        a.tasks_reassigned_total.inc();
        assert!(b.render().contains("tasks_reassigned_total 0"));
    }
}
