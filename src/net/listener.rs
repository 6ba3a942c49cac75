//! UDP Listener (§4.1): bind, receive, rate-limit, normalize, hand off.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::normalizer::normalize;
use super::rate_limit::SourceRateLimiter;
use super::registry::ServerRegistry;
use crate::store::Storage;

// `run` is generic over the concrete store type `S` rather than taking
// `Arc<dyn Storage>`: `ServerRegistry::resolve` wants a `&dyn ServerService`,
// and narrowing a `dyn Storage` trait object to that requires trait-object
// upcasting (stable only from Rust 1.86). Being generic over `S` lets the
// compiler derive `&dyn ServerService` from `&S` with an ordinary, always
// -available unsized coercion instead.

/// A normalized line handed off to the per-server worker lane, along with
/// the source that sent it and the server it resolved to.
#[derive(Debug, Clone)]
pub struct IngressPacket {
    pub server_id: i64,
    pub game: String,
    pub source: SocketAddr,
    pub line: String,
}

pub struct UdpListener {
    socket: Arc<UdpSocket>,
    rate_limiter: SourceRateLimiter,
    registry: Arc<ServerRegistry>,
    max_packet_size: usize,
    skip_auth: bool,
}

impl UdpListener {
    pub async fn bind(
        bind_addr: IpAddr,
        port: u16,
        rate_limit_per_minute: u32,
        rate_limit_burst: u32,
        skip_auth: bool,
        max_packet_size: usize,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(bind_addr, port)).await?;
        Ok(Self {
            socket: Arc::new(socket),
            rate_limiter: SourceRateLimiter::new(rate_limit_per_minute, rate_limit_burst),
            registry: Arc::new(ServerRegistry::new(skip_auth)),
            max_packet_size,
            skip_auth,
        })
    }

    /// Spawns the periodic rate-limiter eviction sweep (§3 "sources unseen
    /// for one hour are evicted").
    pub fn spawn_rate_limiter_sweep(&self) -> tokio::task::JoinHandle<()> {
        let limiter = self.rate_limiter.clone_handle();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                limiter.sweep();
            }
        })
    }

    /// Runs the receive loop until `shutdown` resolves, forwarding admitted,
    /// resolved, normalized packets onto `out`.
    pub async fn run<S: Storage + Send + Sync + 'static>(
        &self,
        store: Arc<S>,
        out: mpsc::Sender<IngressPacket>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut buf = vec![0u8; self.max_packet_size + 1];
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("udp listener stopping");
                        return;
                    }
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, source) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "udp recv error");
                            continue;
                        }
                    };

                    if len > self.max_packet_size {
                        warn!(source = %source, len, "datagram exceeds max size, dropping");
                        continue;
                    }

                    if !self.rate_limiter.check(source) {
                        debug!(source = %source, "rate limit exceeded, dropping packet");
                        continue;
                    }

                    let text = match std::str::from_utf8(&buf[..len]) {
                        Ok(s) => s.to_string(),
                        Err(_) => String::from_utf8_lossy(&buf[..len]).into_owned(),
                    };

                    let Some(line) = normalize(&text) else {
                        continue;
                    };

                    let resolved = match self.registry.resolve(store.as_ref(), &source.ip().to_string(), source.port()).await {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(source = %source, error = %e, "server resolution failed");
                            continue;
                        }
                    };

                    if resolved.first_sight && !self.skip_auth {
                        // This packet only authenticated the source (§4.3); it is
                        // not forwarded to the parser. In dev mode the first
                        // packet is processed normally.
                        continue;
                    }

                    let packet = IngressPacket {
                        server_id: resolved.server_id,
                        game: resolved.game,
                        source,
                        line,
                    };

                    if out.send(packet).await.is_err() {
                        warn!("ingress channel closed, stopping listener");
                        return;
                    }
                }
            }
        }
    }
}
