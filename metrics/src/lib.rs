pub mod server;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    peers: IntGauge,
    // Sync
    has_sync_peer: IntGauge,
    sync_peer_changes: IntCounterVec,
    sync_stalls: IntCounter,
    orphans_total: IntGauge,
    long_sync_mode: IntGauge,
    sync_messages: IntCounterVec,
    fetch_failures: IntCounterVec,
    orphan_parent_requests: IntCounter,
    // Relay and filters
    inventory_relayed: IntCounterVec,
    protocol_violations: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let peers = IntGauge::with_opts(Opts::new(
            "network_peers_connected",
            "Number of connected peers",
        ))?;
        registry.register(Box::new(peers.clone()))?;

        // Sync
        let has_sync_peer = IntGauge::with_opts(Opts::new(
            "dag_sync_has_sync_peer",
            "Whether a sync peer is currently selected",
        ))?;
        registry.register(Box::new(has_sync_peer.clone()))?;

        let sync_peer_changes = IntCounterVec::new(
            Opts::new("dag_sync_peer_changes_total", "Total number of sync peer changes"),
            &["reason"],
        )?;
        registry.register(Box::new(sync_peer_changes.clone()))?;

        let sync_stalls = IntCounter::with_opts(Opts::new(
            "dag_sync_stalls_total",
            "Total number of stalled sync peers replaced",
        ))?;
        registry.register(Box::new(sync_stalls.clone()))?;

        let orphans_total = IntGauge::with_opts(Opts::new(
            "dag_sync_orphans_total",
            "Number of orphan blocks seen at the last fetch decision",
        ))?;
        registry.register(Box::new(orphans_total.clone()))?;

        let long_sync_mode = IntGauge::with_opts(Opts::new(
            "dag_sync_long_sync_mode",
            "Whether the node is far behind its sync target",
        ))?;
        registry.register(Box::new(long_sync_mode.clone()))?;

        let sync_messages = IntCounterVec::new(
            Opts::new("dag_sync_messages_total", "Total number of dispatched sync messages"),
            &["kind"],
        )?;
        registry.register(Box::new(sync_messages.clone()))?;

        let fetch_failures = IntCounterVec::new(
            Opts::new("dag_sync_fetch_failures_total", "Total number of failed peer requests"),
            &["kind"],
        )?;
        registry.register(Box::new(fetch_failures.clone()))?;

        let orphan_parent_requests = IntCounter::with_opts(Opts::new(
            "dag_sync_orphan_parent_requests_total",
            "Total number of get-blocks requests for orphan parents",
        ))?;
        registry.register(Box::new(orphan_parent_requests.clone()))?;

        // Relay and filters
        let inventory_relayed = IntCounterVec::new(
            Opts::new("dag_inventory_relayed_total", "Total number of inventory vectors relayed"),
            &["type"],
        )?;
        registry.register(Box::new(inventory_relayed.clone()))?;

        let protocol_violations = IntCounterVec::new(
            Opts::new(
                "dag_peer_protocol_violations_total",
                "Total number of peers disconnected for protocol violations",
            ),
            &["command"],
        )?;
        registry.register(Box::new(protocol_violations.clone()))?;

        Ok(Self {
            registry,
            peers,
            has_sync_peer,
            sync_peer_changes,
            sync_stalls,
            orphans_total,
            long_sync_mode,
            sync_messages,
            fetch_failures,
            orphan_parent_requests,
            inventory_relayed,
            protocol_violations,
        })
    }

    pub fn gather(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::<u8>::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn set_peers(&self, v: i64) {
        self.peers.set(v);
    }

    // Sync
    pub fn set_has_sync_peer(&self, present: bool) {
        self.has_sync_peer.set(i64::from(present));
    }

    pub fn inc_sync_peer_changes(&self, reason: &str) {
        self.sync_peer_changes.with_label_values(&[reason]).inc();
    }

    pub fn set_orphans_total(&self, v: i64) {
        self.orphans_total.set(v);
    }

    pub fn inc_sync_stalls(&self) {
        self.sync_stalls.inc();
    }

    pub fn set_long_sync_mode(&self, enabled: bool) {
        self.long_sync_mode.set(i64::from(enabled));
    }

    pub fn inc_sync_messages(&self, kind: &str) {
        self.sync_messages.with_label_values(&[kind]).inc();
    }

    pub fn inc_fetch_failures(&self, kind: &str) {
        self.fetch_failures.with_label_values(&[kind]).inc();
    }

    pub fn inc_orphan_parent_requests(&self) {
        self.orphan_parent_requests.inc();
    }

    // Relay and filters
    pub fn inc_inventory_relayed(&self, inv_type: &str, count: u64) {
        self.inventory_relayed.with_label_values(&[inv_type]).inc_by(count);
    }

    pub fn inc_protocol_violations(&self, command: &str) {
        self.protocol_violations.with_label_values(&[command]).inc();
    }
}

pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_sync_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_sync_messages("connected");
        metrics.inc_fetch_failures("get_blocks");
        metrics.set_long_sync_mode(true);

        let text = metrics.gather().unwrap();
        assert!(text.contains("dag_sync_messages_total{kind=\"connected\"} 1"));
        assert!(text.contains("dag_sync_fetch_failures_total{kind=\"get_blocks\"} 1"));
        assert!(text.contains("dag_sync_long_sync_mode 1"));
    }
}
