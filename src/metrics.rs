//! Metrics collection using Prometheus
//!
//! A slim collector for the hub's observable surface: connection, queue and
//! room gauges plus frame and match counters, exposed at `/metrics`.

use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Main metrics collector for the session hub
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,

    /// Currently open WebSocket connections
    pub connections: IntGauge,
    /// Users currently waiting in the matchmaking queue
    pub queue_depth: IntGauge,
    /// Open spectate rooms
    pub active_rooms: IntGauge,

    /// Inbound frames, labeled by request type
    pub frames_total: IntCounterVec,
    /// Frames that failed to parse and were dropped
    pub malformed_frames_total: IntCounter,
    /// Matches created by the pairing loop
    pub matches_created_total: IntCounter,
    /// Matches resolved, labeled by resolution category
    pub matches_resolved_total: IntCounterVec,
    /// Error replies sent, labeled by kind tag
    pub error_replies_total: IntCounterVec,
}

impl MetricsCollector {
    /// Create a collector with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let connections = IntGauge::with_opts(Opts::new(
            "hub_connections",
            "Currently open WebSocket connections",
        ))?;
        let queue_depth = IntGauge::with_opts(Opts::new(
            "hub_queue_depth",
            "Users currently waiting in the matchmaking queue",
        ))?;
        let active_rooms = IntGauge::with_opts(Opts::new(
            "hub_active_spectate_rooms",
            "Open spectate rooms",
        ))?;
        let frames_total = IntCounterVec::new(
            Opts::new("hub_frames_total", "Inbound frames by request type"),
            &["type"],
        )?;
        let malformed_frames_total = IntCounter::with_opts(Opts::new(
            "hub_malformed_frames_total",
            "Inbound frames dropped as malformed",
        ))?;
        let matches_created_total = IntCounter::with_opts(Opts::new(
            "hub_matches_created_total",
            "Matches created by the pairing loop",
        ))?;
        let matches_resolved_total = IntCounterVec::new(
            Opts::new(
                "hub_matches_resolved_total",
                "Matches resolved by category",
            ),
            &["category"],
        )?;
        let error_replies_total = IntCounterVec::new(
            Opts::new("hub_error_replies_total", "Error replies sent by kind"),
            &["kind"],
        )?;

        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(active_rooms.clone()))?;
        registry.register(Box::new(frames_total.clone()))?;
        registry.register(Box::new(malformed_frames_total.clone()))?;
        registry.register(Box::new(matches_created_total.clone()))?;
        registry.register(Box::new(matches_resolved_total.clone()))?;
        registry.register(Box::new(error_replies_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connections,
            queue_depth,
            active_rooms,
            frames_total,
            malformed_frames_total,
            matches_created_total,
            matches_resolved_total,
            error_replies_total,
        })
    }

    /// The registry backing `/metrics`.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        // Registration on a fresh registry only fails on duplicate names.
        Self::new().unwrap_or_else(|e| panic!("failed to build metrics collector: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_registers_hub_metrics() {
        let collector = MetricsCollector::new().unwrap();

        collector.connections.set(3);
        collector.frames_total.with_label_values(&["login"]).inc();
        collector
            .matches_resolved_total
            .with_label_values(&["consistent"])
            .inc();

        let families = collector.registry().gather();
        let names: Vec<String> = families.iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.iter().any(|n| n == "hub_connections"));
        assert!(names.iter().any(|n| n == "hub_frames_total"));
        assert!(names.iter().any(|n| n == "hub_matches_resolved_total"));
    }
}
