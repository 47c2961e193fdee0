use std::net::SocketAddr;

use crate::engine::MutationKind;

// ── Mutations ───────────────────────────────────────────────────

/// Counter: mutations finished. Labels: kind, outcome.
pub const MUTATIONS_TOTAL: &str = "rota_mutations_total";

/// Counter: optimistic changes discarded after a failed write. Labels: kind.
pub const ROLLBACKS_TOTAL: &str = "rota_rollbacks_total";

/// Counter: override prompts answered. Labels: answer.
pub const CONFIRMATIONS_TOTAL: &str = "rota_confirmations_total";

/// Histogram: remote write latency in seconds. Labels: kind.
pub const REMOTE_WRITE_DURATION_SECONDS: &str = "rota_remote_write_duration_seconds";

// ── Reconciliation ──────────────────────────────────────────────

/// Counter: window fetch + rebuild sweeps. Labels: status.
pub const RECONCILE_TOTAL: &str = "rota_reconcile_total";

/// Histogram: fetch + rebuild duration in seconds.
pub const RECONCILE_DURATION_SECONDS: &str = "rota_reconcile_duration_seconds";

/// Gauge: optimistic overlays currently awaiting a remote result.
pub const OVERLAYS_PENDING: &str = "rota_overlays_pending";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a mutation kind to a short label for metrics.
pub fn kind_label(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::Create => "create",
        MutationKind::Update => "update",
        MutationKind::Move => "move",
        MutationKind::Delete => "delete",
    }
}
