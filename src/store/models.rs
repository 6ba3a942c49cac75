//! Row types for the storage contract (§3 Data model, §6 Downstream storage contract)
//!
//! These mirror the entities `spec.md` defines. They carry `Serialize`/
//! `Deserialize` because the REST-backed store (`store::rest`) round-trips
//! them through JSON; the in-memory store (`store::memory`) uses the same
//! types directly.

use serde::{Deserialize, Serialize};

/// A registered game server (§3 Server)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerRow {
    pub server_id: i64,
    pub address: String,
    pub port: u16,
    pub game: String,
    pub name: String,

    pub kills: i64,
    pub rounds: i64,
    pub suicides: i64,
    pub headshots: i64,
    pub bombs_planted: i64,
    pub bombs_defused: i64,
    pub ct_wins: i64,
    pub ts_wins: i64,
    pub ct_shots: i64,
    pub ct_hits: i64,
    pub ts_shots: i64,
    pub ts_hits: i64,

    pub map_kills: i64,
    pub map_rounds: i64,
    pub map_suicides: i64,
    pub map_headshots: i64,
    pub map_bombs_planted: i64,
    pub map_bombs_defused: i64,
    pub map_ct_wins: i64,
    pub map_ts_wins: i64,
    pub map_ct_shots: i64,
    pub map_ct_hits: i64,
    pub map_ts_shots: i64,
    pub map_ts_hits: i64,

    pub act_map: String,
    pub act_players: i32,
    pub max_players: i32,
    pub map_started: i64,
    pub map_changes: i64,
}

impl ServerRow {
    /// A freshly-registered server with every counter at zero
    pub fn new(server_id: i64, address: String, port: u16, game: String, name: String) -> Self {
        Self {
            server_id,
            address,
            port,
            game,
            name,
            kills: 0,
            rounds: 0,
            suicides: 0,
            headshots: 0,
            bombs_planted: 0,
            bombs_defused: 0,
            ct_wins: 0,
            ts_wins: 0,
            ct_shots: 0,
            ct_hits: 0,
            ts_shots: 0,
            ts_hits: 0,
            map_kills: 0,
            map_rounds: 0,
            map_suicides: 0,
            map_headshots: 0,
            map_bombs_planted: 0,
            map_bombs_defused: 0,
            map_ct_wins: 0,
            map_ts_wins: 0,
            map_ct_shots: 0,
            map_ct_hits: 0,
            map_ts_shots: 0,
            map_ts_hits: 0,
            act_map: String::new(),
            act_players: 0,
            max_players: 0,
            map_started: 0,
            map_changes: 0,
        }
    }
}

/// Fields needed to register a new server
#[derive(Debug, Clone, Serialize)]
pub struct NewServer {
    pub address: String,
    pub port: u16,
    pub name: String,
    pub game: String,
}

/// An update applied to a `ServerRow`: `Inc` adds to a counter, `Set` assigns a value.
/// Mirrors §6 "delta | assignment" update semantics.
#[derive(Debug, Clone, Default)]
pub struct ServerDelta {
    pub kills: i64,
    pub rounds: i64,
    pub suicides: i64,
    pub headshots: i64,
    pub bombs_planted: i64,
    pub bombs_defused: i64,
    pub ct_wins: i64,
    pub ts_wins: i64,
    pub ct_shots: i64,
    pub ct_hits: i64,
    pub ts_shots: i64,
    pub ts_hits: i64,

    pub map_kills: i64,
    pub map_rounds: i64,
    pub map_suicides: i64,
    pub map_headshots: i64,
    pub map_bombs_planted: i64,
    pub map_bombs_defused: i64,
    pub map_ct_wins: i64,
    pub map_ts_wins: i64,
    pub map_ct_shots: i64,
    pub map_ct_hits: i64,
    pub map_ts_shots: i64,
    pub map_ts_hits: i64,

    pub players_inc: i64,
    pub act_players_delta: i32,

    /// `Some` assigns `act_map`, resets all `map_*` counters and bumps `map_changes`
    pub map_change: Option<MapChangeAssignment>,
}

#[derive(Debug, Clone)]
pub struct MapChangeAssignment {
    pub new_map: String,
    pub map_started: i64,
}

/// A player (§3 Player)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerRow {
    pub player_id: i64,
    pub game: String,
    pub last_name: String,
    pub skill: i32,
    pub kills: i64,
    pub deaths: i64,
    pub suicides: i64,
    pub teamkills: i64,
    pub headshots: i64,
    pub shots: i64,
    pub hits: i64,
    pub kill_streak: i32,
    pub death_streak: i32,
    pub connection_time: i64,
    pub hideranking: bool,
    pub last_event: i64,
    pub last_skill_change: i64,
}

pub const DEFAULT_SKILL: i32 = 1000;
pub const MIN_SKILL: i32 = 100;
pub const MAX_SKILL: i32 = 3000;

impl PlayerRow {
    pub fn new(player_id: i64, game: String, last_name: String, now: i64) -> Self {
        Self {
            player_id,
            game,
            last_name,
            skill: DEFAULT_SKILL,
            kills: 0,
            deaths: 0,
            suicides: 0,
            teamkills: 0,
            headshots: 0,
            shots: 0,
            hits: 0,
            kill_streak: 0,
            death_streak: 0,
            connection_time: 0,
            hideranking: false,
            last_event: now,
            last_skill_change: now,
        }
    }

    /// Clamp a candidate skill value into `[MIN_SKILL, MAX_SKILL]` (§3 invariant)
    pub fn clamp_skill(value: i32) -> i32 {
        value.clamp(MIN_SKILL, MAX_SKILL)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPlayer {
    pub game: String,
    pub unique_id: String,
    pub name: String,
}

/// Incremental update applied to a `PlayerRow`
#[derive(Debug, Clone, Default)]
pub struct PlayerDelta {
    pub kills: i64,
    pub deaths: i64,
    pub suicides: i64,
    pub teamkills: i64,
    pub headshots: i64,
    pub shots: i64,
    pub hits: i64,
    pub kill_streak_set: Option<i32>,
    pub kill_streak_inc: i32,
    pub death_streak_set: Option<i32>,
    pub death_streak_inc: i32,
    pub skill_set: Option<i32>,
    pub last_name_set: Option<String>,
    pub last_event_set: Option<i64>,
    pub last_skill_change_set: Option<i64>,
    pub connection_time_reset: bool,
}

/// `(uniqueId, game) -> playerId` mapping (§3 PlayerUniqueId)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerUniqueIdRow {
    pub unique_id: String,
    pub game: String,
    pub player_id: i64,
}

/// Per-round, per-player finalized snapshot written at map change (§4.10)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerHistoryRow {
    pub player_id: i64,
    pub server_id: i64,
    pub map: String,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub headshots: i64,
    pub shots: i64,
    pub hits: i64,
    pub suicides: i64,
    pub teamkills: i64,
    pub objective_score: i64,
    pub clutch_wins: i64,
    pub is_mvp: bool,
    pub event_time: i64,
}

/// Per-game weapon catalog row (§3 Weapon)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeaponRow {
    pub game: String,
    pub code: String,
    pub name: String,
    pub modifier: f64,
    pub kills: i64,
    pub headshots: i64,
}

impl WeaponRow {
    pub fn new_default(game: String, code: String) -> Self {
        Self {
            name: code.clone(),
            game,
            code,
            modifier: 1.0,
            kills: 0,
            headshots: 0,
        }
    }
}

/// A frag row written by the Weapon Handler (§4.8)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragRow {
    pub event_time: i64,
    pub server_id: i64,
    pub map: String,
    pub killer_id: i64,
    pub victim_id: i64,
    pub weapon: String,
    pub headshot: bool,
    pub killer_team: Option<String>,
    pub victim_team: Option<String>,
    pub killer_pos: Option<(f64, f64, f64)>,
    pub victim_pos: Option<(f64, f64, f64)>,
}

/// Aggregated per-player weapon usage (ancillary report, §4.8)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerWeaponStat {
    pub player_id: i64,
    pub weapon: String,
    pub kills: i64,
    pub headshots: i64,
}

/// A per-game action catalog entry (§3 Action)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRow {
    pub game: String,
    pub code: String,
    pub team: Option<String>,
    pub for_player_action: bool,
    pub for_player_player_action: bool,
    pub for_team_action: bool,
    pub for_world_action: bool,
    pub reward_player: i32,
    pub reward_team: i32,
    pub description: String,
    pub count: i64,
}

/// Key used to look up/insert into the Action catalog
#[derive(Debug, Clone)]
pub struct ActionLookup {
    pub game: String,
    pub code: String,
    pub team: Option<String>,
    pub kind: ActionKind,
    pub reward_player: i32,
    pub reward_team: i32,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Player,
    PlayerPlayer,
    Team,
    World,
}

/// Aggregate kill/headshot counter for `(game, map)`, upserted at map finalization (§4.10)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapCountRow {
    pub game: String,
    pub map: String,
    pub kills: i64,
    pub headshots: i64,
}

/// A generic event row. Not every field is populated for every event kind —
/// the persister (§4.6) fills in only what that kind's table needs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventRow {
    pub event_time: i64,
    pub server_id: i64,
    pub map: String,
    pub player_id: Option<i64>,
    pub victim_id: Option<i64>,
    pub team: Option<String>,
    pub role: Option<String>,
    pub old_name: Option<String>,
    pub new_name: Option<String>,
    pub address: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub dead: Option<bool>,
    pub weapon: Option<String>,
    pub headshot: Option<bool>,
    pub killer_team: Option<String>,
    pub victim_team: Option<String>,
    pub pos: Option<(f64, f64, f64)>,
    pub victim_pos: Option<(f64, f64, f64)>,
    pub code: Option<String>,
    pub bonus: Option<i32>,
}

/// Which append-only table an `EventRow` belongs in (§4.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTable {
    Connect,
    Disconnect,
    Entry,
    ChangeTeam,
    ChangeRole,
    ChangeName,
    Frag,
    Suicide,
    Teamkill,
    Chat,
    PlayerAction,
    PlayerPlayerAction,
    TeamAction,
    WorldAction,
}
