//! Per-server worker shards (§5 "Per-server ordering"): one task per
//! `serverId`, each draining its own `mpsc` queue, so every pipeline stage
//! for a given server sees packets in arrival order while different servers
//! proceed fully in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::net::listener::IngressPacket;
use crate::store::Storage;

use super::ProcessingEngine;

const WORKER_QUEUE_DEPTH: usize = 1024;

struct WorkerHandle {
    tx: mpsc::Sender<IngressPacket>,
    join: JoinHandle<()>,
}

/// Routes ingress packets to a per-server worker task, spawning one lazily
/// on first sight of a `serverId`.
pub struct ServerWorkerRegistry<S> {
    engine: Arc<ProcessingEngine<S>>,
    workers: DashMap<i64, WorkerHandle>,
}

impl<S: Storage + Send + Sync + 'static> ServerWorkerRegistry<S> {
    pub fn new(engine: Arc<ProcessingEngine<S>>) -> Self {
        Self {
            engine,
            workers: DashMap::new(),
        }
    }

    /// Current queue depth summed across every live shard, for the
    /// Server-Stats/metrics `queue_depth` gauge (§6 Observability).
    pub fn total_queue_depth(&self) -> i64 {
        self.workers
            .iter()
            .map(|w| (WORKER_QUEUE_DEPTH - w.tx.capacity()) as i64)
            .sum()
    }

    /// Enqueues a packet onto its server's shard, spawning the shard if this
    /// is the first packet seen for that `serverId`.
    pub async fn route(&self, packet: IngressPacket) {
        let server_id = packet.server_id;

        // Clone the sender out and drop the map guard before awaiting, so a
        // send that suspends never holds the shard's DashMap slot locked.
        let existing = self.workers.get(&server_id).map(|h| h.tx.clone());

        let tx = match existing {
            Some(tx) => tx,
            None => self.spawn_shard(server_id),
        };

        if tx.send(packet).await.is_err() {
            warn!(server_id, "dropping packet: worker shard already closed");
        }
    }

    fn spawn_shard(&self, server_id: i64) -> mpsc::Sender<IngressPacket> {
        let (tx, mut rx) = mpsc::channel::<IngressPacket>(WORKER_QUEUE_DEPTH);
        let engine = Arc::clone(&self.engine);

        let join = tokio::spawn(async move {
            info!(server_id, "worker shard started");
            while let Some(packet) = rx.recv().await {
                engine.process_line(packet.server_id, &packet.game, &packet.line).await;
            }
            info!(server_id, "worker shard drained and exiting");
        });

        self.workers.insert(server_id, WorkerHandle { tx: tx.clone(), join });
        tx
    }

    /// Closes every shard's queue and awaits drain, bounded by `deadline`
    /// (§5 "Shutdown is bounded"). Shards still running past the deadline
    /// are abandoned and logged, not forcibly killed.
    pub async fn shutdown(&self, deadline: std::time::Duration) {
        let server_ids: Vec<i64> = self.workers.iter().map(|e| *e.key()).collect();
        let handles: Vec<(i64, JoinHandle<()>)> = server_ids
            .into_iter()
            .filter_map(|server_id| self.workers.remove(&server_id))
            .map(|(server_id, handle)| {
                // Dropping `tx` closes the shard's channel; its `recv()` loop
                // then ends and the task exits once it has drained any
                // already-queued packets.
                drop(handle.tx);
                (server_id, handle.join)
            })
            .collect();

        let drain = async {
            for (server_id, handle) in handles {
                if let Err(e) = handle.await {
                    warn!(server_id, error = %e, "worker shard panicked during shutdown");
                }
            }
        };

        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!("shutdown deadline exceeded, abandoning remaining worker shards");
        }
    }
}
