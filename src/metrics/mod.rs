//! Observability surfaces carried despite the Non-goals excluding the
//! metrics HTTP endpoint itself (§6, §2.5): the core still owns the data
//! an external poller would read.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::store::ServerService;

/// Atomic gauges refreshed on a periodic interval, the same idiom the
/// teacher uses for its matchmaking tick loop.
#[derive(Debug, Default)]
pub struct Metrics {
    queue_depth: AtomicI64,
    active_players_count: AtomicI64,
    packets_processed: AtomicU64,
    packets_dropped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn set_active_players(&self, count: i64) {
        self.active_players_count.store(count, Ordering::Relaxed);
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn active_players(&self) -> i64 {
        self.active_players_count.load(Ordering::Relaxed)
    }

    pub fn record_packet_processed(&self) {
        self.packets_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_processed(&self) -> u64 {
        self.packets_processed.load(Ordering::Relaxed)
    }

    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Reports storage- and queue-reachability (§2.5). An external process is
/// expected to poll this through whatever surface it chooses; this daemon
/// never binds one itself.
pub struct HealthProbe<S> {
    store: Arc<S>,
    metrics: Arc<Metrics>,
    queue_depth_warn_threshold: i64,
}

impl<S: ServerService + 'static> HealthProbe<S> {
    pub fn new(store: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            metrics,
            queue_depth_warn_threshold: 10_000,
        }
    }

    pub async fn check(&self, probe_server_id: i64) -> Health {
        match self.store.get_server(probe_server_id).await {
            Ok(_) => {
                if self.metrics.queue_depth() > self.queue_depth_warn_threshold {
                    Health::Degraded
                } else {
                    Health::Healthy
                }
            }
            Err(e) => {
                warn!(error = %e, "health probe: storage unreachable");
                Health::Unhealthy
            }
        }
    }

    /// 15-second refresh loop (§2.5), matching the teacher's
    /// `MatchmakingService::run` interval-tick idiom.
    pub async fn run(self: Arc<Self>, probe_server_id: i64) {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            let health = self.check(probe_server_id).await;
            debug!(?health, uptime_secs = crate::util::time::uptime_secs(), "health probe tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_round_trip() {
        let metrics = Metrics::new();
        metrics.set_queue_depth(42);
        metrics.set_active_players(7);
        assert_eq!(metrics.queue_depth(), 42);
        assert_eq!(metrics.active_players(), 7);
    }

    #[test]
    fn packet_counters_increment() {
        let metrics = Metrics::new();
        metrics.record_packet_processed();
        metrics.record_packet_processed();
        metrics.record_packet_dropped();
        assert_eq!(metrics.packets_processed(), 2);
        assert_eq!(metrics.packets_dropped(), 1);
    }
}
