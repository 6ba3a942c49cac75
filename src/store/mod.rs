//! Downstream storage contract (§6) and the capability interfaces §9's design
//! notes ask for: one small trait per storage slice, so handlers depend only
//! on the slice they actually touch.

pub mod memory;
pub mod models;
pub mod rest;

use async_trait::async_trait;

pub use models::*;

/// Errors surfaced by any storage backend. A `TransientStorage` variant (§7)
/// is the only one the pipeline is expected to recover from by simply
/// failing the current packet's handler chain and logging.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage request failed: {0}")]
    Transient(String),

    #[error("unique constraint violated on {0}")]
    Conflict(&'static str),

    #[error("row not found after recovery re-read")]
    MissingAfterRecovery,
}

#[async_trait]
pub trait ServerService: Send + Sync {
    async fn find_server_by_address(
        &self,
        address: &str,
        port: u16,
    ) -> Result<Option<ServerRow>, StoreError>;

    async fn create_server(&self, new: NewServer) -> Result<ServerRow, StoreError>;

    async fn update_server(&self, server_id: i64, delta: ServerDelta) -> Result<(), StoreError>;

    async fn get_server(&self, server_id: i64) -> Result<Option<ServerRow>, StoreError>;
}

#[async_trait]
pub trait PlayerService: Send + Sync {
    async fn find_player_unique_id(
        &self,
        unique_id: &str,
        game: &str,
    ) -> Result<Option<PlayerUniqueIdRow>, StoreError>;

    async fn create_player_with_unique_id(
        &self,
        new: NewPlayer,
    ) -> Result<PlayerRow, StoreError>;

    async fn find_player(&self, player_id: i64) -> Result<Option<PlayerRow>, StoreError>;

    async fn update_player(&self, player_id: i64, delta: PlayerDelta) -> Result<(), StoreError>;

    /// Count of frags where this player was the killer (used by the confidence model, §4.9.3)
    async fn count_frags_as_killer(&self, player_id: i64) -> Result<i64, StoreError>;

    /// Players with an `entry` event in the last `window_secs` seconds on `server_id`
    /// (round participants, §4.9.2)
    async fn recent_entrants(
        &self,
        server_id: i64,
        window_secs: i64,
    ) -> Result<Vec<i64>, StoreError>;

    async fn write_player_history(&self, row: PlayerHistoryRow) -> Result<(), StoreError>;

    async fn top_players(&self, game: &str, limit: usize) -> Result<Vec<PlayerRow>, StoreError>;
}

#[async_trait]
pub trait EventService: Send + Sync {
    async fn create_event(&self, table: EventTable, row: EventRow) -> Result<(), StoreError>;
}

#[async_trait]
pub trait WeaponService: Send + Sync {
    async fn upsert_weapon_kill(
        &self,
        game: &str,
        code: &str,
        headshot: bool,
    ) -> Result<WeaponRow, StoreError>;

    async fn weapon_modifier(&self, game: &str, code: &str) -> Result<f64, StoreError>;

    async fn create_frag(&self, row: FragRow) -> Result<(), StoreError>;

    async fn top_weapons(&self, game: &str, limit: usize) -> Result<Vec<WeaponRow>, StoreError>;

    async fn player_weapon_stats(
        &self,
        player_id: i64,
    ) -> Result<Vec<PlayerWeaponStat>, StoreError>;
}

#[async_trait]
pub trait ActionService: Send + Sync {
    /// Upsert the action catalog entry and increment its `count` by one
    async fn record_action(&self, lookup: ActionLookup) -> Result<ActionRow, StoreError>;

    async fn upsert_map_count(
        &self,
        game: &str,
        map: &str,
        kills: i64,
        headshots: i64,
    ) -> Result<(), StoreError>;
}

/// Full storage surface, composed from the slices above. A `Storage`
/// implementation is handed to the processing engine at construction time
/// (§9 "Global logger/config become construction-time dependencies").
pub trait Storage:
    ServerService + PlayerService + EventService + WeaponService + ActionService
{
}

impl<T> Storage for T where
    T: ServerService + PlayerService + EventService + WeaponService + ActionService
{
}
