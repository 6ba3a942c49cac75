//! Server Registry (§4.3): `(ip, port) -> (serverId, game)`, with dev-mode
//! auto-registration and a process-lifetime in-memory cache.

use dashmap::DashMap;
use tracing::{info, warn};

use crate::store::{NewServer, ServerService, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedServer {
    pub server_id: i64,
}

#[derive(Debug, Clone)]
pub struct ResolvedServerInfo {
    pub server_id: i64,
    pub game: String,
    /// `true` iff this call is the first successful resolution of this
    /// `(address, port)` in the process lifetime (§4.3 "first-packet
    /// semantics"). In prod mode the caller must not forward this packet to
    /// the parser; in dev mode the first packet is processed normally.
    pub first_sight: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown server, packet dropped")]
    UnknownServer,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        RegistryError::Storage(e.to_string())
    }
}

/// Caches `(address, port) -> (serverId, game)` for the process lifetime and
/// implements dev-mode ("skipAuth") first-sight registration.
pub struct ServerRegistry {
    cache: DashMap<(String, u16), ResolvedServerInfo>,
    skip_auth: bool,
}

impl ServerRegistry {
    pub fn new(skip_auth: bool) -> Self {
        Self {
            cache: DashMap::new(),
            skip_auth,
        }
    }

    /// Resolve `(address, port)` to a `(serverId, game)` pair, consulting the
    /// in-memory cache first. In dev mode, registers a new server on a miss;
    /// in prod mode, a miss drops the packet.
    pub async fn resolve(
        &self,
        store: &dyn ServerService,
        address: &str,
        port: u16,
    ) -> Result<ResolvedServerInfo, RegistryError> {
        let key = (address.to_string(), port);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(ResolvedServerInfo {
                first_sight: false,
                ..cached.clone()
            });
        }

        if let Some(row) = store.find_server_by_address(address, port).await? {
            let info = ResolvedServerInfo {
                server_id: row.server_id,
                game: row.game,
                first_sight: true,
            };
            self.cache.insert(key, info.clone());
            return Ok(info);
        }

        if !self.skip_auth {
            warn!(address, port, "unknown server, dropping packet");
            return Err(RegistryError::UnknownServer);
        }

        match store
            .create_server(NewServer {
                address: address.to_string(),
                port,
                name: format!("{}:{}", address, port),
                game: "cstrike".to_string(),
            })
            .await
        {
            Ok(row) => {
                info!(server_id = row.server_id, address, port, "auto-registered server (dev mode)");
                let info = ResolvedServerInfo {
                    server_id: row.server_id,
                    game: row.game,
                    first_sight: true,
                };
                self.cache.insert(key, info.clone());
                Ok(info)
            }
            Err(StoreError::Conflict(_)) => {
                // Concurrent first-sight registration from another worker; re-read.
                let row = store
                    .find_server_by_address(address, port)
                    .await?
                    .ok_or(RegistryError::UnknownServer)?;
                let info = ResolvedServerInfo {
                    server_id: row.server_id,
                    game: row.game,
                    first_sight: true,
                };
                self.cache.insert(key, info.clone());
                Ok(info)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn dev_mode_auto_registers_on_first_sight() {
        let store = MemoryStore::new();
        let registry = ServerRegistry::new(true);

        let resolved = registry.resolve(&store, "10.0.0.1", 27015).await.unwrap();
        assert_eq!(resolved.game, "cstrike");
        assert!(resolved.first_sight);

        // second resolve hits the cache, not storage, and returns the same id
        let resolved_again = registry.resolve(&store, "10.0.0.1", 27015).await.unwrap();
        assert_eq!(resolved.server_id, resolved_again.server_id);
        assert!(!resolved_again.first_sight);
    }

    #[tokio::test]
    async fn prod_mode_drops_unknown_server() {
        let store = MemoryStore::new();
        let registry = ServerRegistry::new(false);

        let result = registry.resolve(&store, "10.0.0.1", 27015).await;
        assert_eq!(result.unwrap_err(), RegistryError::UnknownServer);
    }
}
