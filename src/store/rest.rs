//! REST-backed storage client.
//!
//! Generalizes the teacher crate's Supabase REST client: any PostgREST-
//! compatible backend satisfies the §6 storage contract this way — the
//! database engine itself is out of scope, only this client is ours to own.
//! Increment-semantics updates (§6 "delta | assignment") are expressed as
//! RPC calls, since a bare `PATCH` over REST cannot atomically increment a
//! counter without a read-modify-write race.

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::models::*;
use super::{ActionService, EventService, PlayerService, ServerService, StoreError, WeaponService};
use crate::util::time::unix_secs;

/// Thin REST client over a PostgREST-compatible endpoint
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn rpc_url(&self, fn_name: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, fn_name)
    }

    async fn get<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>, StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        Self::check_status(&response)?;
        response
            .json()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))
    }

    async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Option<T>, StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            return Ok(None);
        }
        Self::check_status(&response)?;
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| StoreError::Transient(e.to_string()))
    }

    async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        data: &T,
    ) -> Result<R, StoreError> {
        let response = self
            .client
            .post(self.rest_url(table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(StoreError::Conflict(""));
        }
        Self::check_status(&response)?;
        let mut rows: Vec<R> = response
            .json()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;
        rows.pop().ok_or(StoreError::MissingAfterRecovery)
    }

    async fn upsert<T: Serialize>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.rest_url(table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .header("On-Conflict", on_conflict)
            .json(data)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        Self::check_status(&response)?;
        Ok(())
    }

    async fn call_rpc(&self, fn_name: &str, args: Value) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.rpc_url(fn_name))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&args)
            .send()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        Self::check_status(&response)?;
        Ok(())
    }

    fn check_status(response: &reqwest::Response) -> Result<(), StoreError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(StoreError::Transient(format!(
                "backend returned status {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl ServerService for RestStore {
    async fn find_server_by_address(
        &self,
        address: &str,
        port: u16,
    ) -> Result<Option<ServerRow>, StoreError> {
        let query = format!("address=eq.{}&port=eq.{}", address, port);
        self.get_one("servers", &query).await
    }

    async fn create_server(&self, new: NewServer) -> Result<ServerRow, StoreError> {
        self.insert("servers", &new).await
    }

    async fn update_server(&self, server_id: i64, delta: ServerDelta) -> Result<(), StoreError> {
        self.call_rpc("apply_server_delta", json!({ "p_server_id": server_id, "p_delta": delta }))
            .await
    }

    async fn get_server(&self, server_id: i64) -> Result<Option<ServerRow>, StoreError> {
        let query = format!("server_id=eq.{}", server_id);
        self.get_one("servers", &query).await
    }
}

#[async_trait]
impl PlayerService for RestStore {
    async fn find_player_unique_id(
        &self,
        unique_id: &str,
        game: &str,
    ) -> Result<Option<PlayerUniqueIdRow>, StoreError> {
        let query = format!("unique_id=eq.{}&game=eq.{}", unique_id, game);
        self.get_one("player_unique_ids", &query).await
    }

    async fn create_player_with_unique_id(&self, new: NewPlayer) -> Result<PlayerRow, StoreError> {
        // The RPC atomically inserts the player row and its unique-id mapping
        // (a plain two-table POST would race under concurrent first-sight
        // connects for the same uniqueId). Re-read by player_id afterward
        // since PostgREST RPC calls aren't guaranteed to echo the row shape
        // this client expects.
        self.call_rpc(
            "create_player_with_unique_id",
            json!({ "p_game": new.game, "p_unique_id": new.unique_id, "p_name": new.name }),
        )
        .await?;
        let mapping = self
            .find_player_unique_id(&new.unique_id, &new.game)
            .await?
            .ok_or(StoreError::MissingAfterRecovery)?;
        self.find_player(mapping.player_id)
            .await?
            .ok_or(StoreError::MissingAfterRecovery)
    }

    async fn find_player(&self, player_id: i64) -> Result<Option<PlayerRow>, StoreError> {
        let query = format!("player_id=eq.{}", player_id);
        self.get_one("players", &query).await
    }

    async fn update_player(&self, player_id: i64, delta: PlayerDelta) -> Result<(), StoreError> {
        self.call_rpc(
            "apply_player_delta",
            json!({ "p_player_id": player_id, "p_delta": delta_to_json(&delta) }),
        )
        .await
    }

    async fn count_frags_as_killer(&self, player_id: i64) -> Result<i64, StoreError> {
        #[derive(serde::Deserialize)]
        struct Count {
            count: i64,
        }
        let query = format!("killer_id=eq.{}&select=count", player_id);
        let rows: Vec<Count> = self.get("frags", &query).await?;
        Ok(rows.first().map(|c| c.count).unwrap_or(0))
    }

    async fn recent_entrants(&self, server_id: i64, window_secs: i64) -> Result<Vec<i64>, StoreError> {
        #[derive(serde::Deserialize)]
        struct Entry {
            player_id: i64,
        }
        let since = unix_secs() - window_secs;
        let query = format!(
            "server_id=eq.{}&event_time=gte.{}&select=player_id",
            server_id, since
        );
        let rows: Vec<Entry> = self.get("entries", &query).await?;
        Ok(rows.into_iter().map(|e| e.player_id).collect())
    }

    async fn write_player_history(&self, row: PlayerHistoryRow) -> Result<(), StoreError> {
        self.insert::<_, Value>("player_history", &row).await.map(|_| ())
    }

    async fn top_players(&self, game: &str, limit: usize) -> Result<Vec<PlayerRow>, StoreError> {
        let query = format!("game=eq.{}&order=skill.desc&limit={}", game, limit);
        self.get("players", &query).await
    }
}

#[async_trait]
impl EventService for RestStore {
    async fn create_event(&self, table: EventTable, row: EventRow) -> Result<(), StoreError> {
        let table_name = event_table_name(table);
        debug!(table = table_name, server_id = row.server_id, "persisting event");
        self.insert::<_, Value>(table_name, &row).await.map(|_| ())
    }
}

#[async_trait]
impl WeaponService for RestStore {
    async fn upsert_weapon_kill(&self, game: &str, code: &str, headshot: bool) -> Result<WeaponRow, StoreError> {
        self.call_rpc(
            "upsert_weapon_kill",
            json!({ "p_game": game, "p_code": code, "p_headshot": headshot }),
        )
        .await?;
        let query = format!("game=eq.{}&code=eq.{}", game, code);
        self.get_one("weapons", &query)
            .await?
            .ok_or(StoreError::MissingAfterRecovery)
    }

    async fn weapon_modifier(&self, game: &str, code: &str) -> Result<f64, StoreError> {
        let query = format!("game=eq.{}&code=eq.{}", game, code);
        let row: Option<WeaponRow> = self.get_one("weapons", &query).await?;
        Ok(row.map(|w| w.modifier).unwrap_or_else(|| {
            warn!(game, code, "no weapon catalog entry, defaulting modifier to 1.0");
            1.0
        }))
    }

    async fn create_frag(&self, row: FragRow) -> Result<(), StoreError> {
        self.insert::<_, Value>("frags", &row).await.map(|_| ())
    }

    async fn top_weapons(&self, game: &str, limit: usize) -> Result<Vec<WeaponRow>, StoreError> {
        let query = format!("game=eq.{}&order=kills.desc&limit={}", game, limit);
        self.get("weapons", &query).await
    }

    async fn player_weapon_stats(&self, player_id: i64) -> Result<Vec<PlayerWeaponStat>, StoreError> {
        let query = format!(
            "killer_id=eq.{}&select=weapon,headshot&group_by=weapon",
            player_id
        );
        let frags: Vec<FragRow> = self.get("frags", &query).await?;
        let mut grouped: std::collections::HashMap<String, (i64, i64)> = std::collections::HashMap::new();
        for frag in frags {
            let entry = grouped.entry(frag.weapon).or_insert((0, 0));
            entry.0 += 1;
            if frag.headshot {
                entry.1 += 1;
            }
        }
        Ok(grouped
            .into_iter()
            .map(|(weapon, (kills, headshots))| PlayerWeaponStat {
                player_id,
                weapon,
                kills,
                headshots,
            })
            .collect())
    }
}

#[async_trait]
impl ActionService for RestStore {
    async fn record_action(&self, lookup: ActionLookup) -> Result<ActionRow, StoreError> {
        self.call_rpc(
            "record_action",
            json!({
                "p_game": lookup.game,
                "p_code": lookup.code,
                "p_team": lookup.team,
                "p_kind": action_kind_name(lookup.kind),
                "p_reward_player": lookup.reward_player,
                "p_reward_team": lookup.reward_team,
                "p_description": lookup.description,
            }),
        )
        .await?;
        let mut query = format!("game=eq.{}&code=eq.{}", lookup.game, lookup.code);
        if let Some(team) = &lookup.team {
            query.push_str(&format!("&team=eq.{}", team));
        }
        self.get_one("actions", &query)
            .await?
            .ok_or(StoreError::MissingAfterRecovery)
    }

    async fn upsert_map_count(&self, game: &str, map: &str, kills: i64, headshots: i64) -> Result<(), StoreError> {
        self.call_rpc(
            "increment_map_count",
            json!({ "p_game": game, "p_map": map, "p_kills": kills, "p_headshots": headshots }),
        )
        .await
    }
}

fn event_table_name(table: EventTable) -> &'static str {
    match table {
        EventTable::Connect => "events_connect",
        EventTable::Disconnect => "events_disconnect",
        EventTable::Entry => "entries",
        EventTable::ChangeTeam => "events_change_team",
        EventTable::ChangeRole => "events_change_role",
        EventTable::ChangeName => "events_change_name",
        EventTable::Frag => "events_frag",
        EventTable::Suicide => "events_suicide",
        EventTable::Teamkill => "events_teamkill",
        EventTable::Chat => "events_chat",
        EventTable::PlayerAction => "events_player_action",
        EventTable::PlayerPlayerAction => "events_player_player_action",
        EventTable::TeamAction => "events_team_action",
        EventTable::WorldAction => "events_world_action",
    }
}

fn action_kind_name(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Player => "player",
        ActionKind::PlayerPlayer => "player_player",
        ActionKind::Team => "team",
        ActionKind::World => "world",
    }
}

fn delta_to_json(delta: &PlayerDelta) -> Value {
    json!({
        "kills": delta.kills,
        "deaths": delta.deaths,
        "suicides": delta.suicides,
        "teamkills": delta.teamkills,
        "headshots": delta.headshots,
        "shots": delta.shots,
        "hits": delta.hits,
        "kill_streak_set": delta.kill_streak_set,
        "kill_streak_inc": delta.kill_streak_inc,
        "death_streak_set": delta.death_streak_set,
        "death_streak_inc": delta.death_streak_inc,
        "skill_set": delta.skill_set,
        "last_name_set": delta.last_name_set,
        "last_event_set": delta.last_event_set,
        "last_skill_change_set": delta.last_skill_change_set,
        "connection_time_reset": delta.connection_time_reset,
    })
}

impl Serialize for ServerDelta {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        json!({
            "kills": self.kills,
            "rounds": self.rounds,
            "suicides": self.suicides,
            "headshots": self.headshots,
            "bombs_planted": self.bombs_planted,
            "bombs_defused": self.bombs_defused,
            "ct_wins": self.ct_wins,
            "ts_wins": self.ts_wins,
            "ct_shots": self.ct_shots,
            "ct_hits": self.ct_hits,
            "ts_shots": self.ts_shots,
            "ts_hits": self.ts_hits,
            "map_kills": self.map_kills,
            "map_rounds": self.map_rounds,
            "map_suicides": self.map_suicides,
            "map_headshots": self.map_headshots,
            "map_bombs_planted": self.map_bombs_planted,
            "map_bombs_defused": self.map_bombs_defused,
            "map_ct_wins": self.map_ct_wins,
            "map_ts_wins": self.map_ts_wins,
            "map_ct_shots": self.map_ct_shots,
            "map_ct_hits": self.map_ct_hits,
            "map_ts_shots": self.map_ts_shots,
            "map_ts_hits": self.map_ts_hits,
            "players_inc": self.players_inc,
            "act_players_delta": self.act_players_delta,
            "map_change": self.map_change.as_ref().map(|m| json!({
                "new_map": m.new_map,
                "map_started": m.map_started,
            })),
        })
        .serialize(serializer)
    }
}
