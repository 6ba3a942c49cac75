//! The typed event taxonomy events flow through the pipeline as (§9 "dynamic
//! event union"). Each variant carries its own payload; `meta`/`dual_meta`
//! feed identity resolution before a handler ever sees a `playerId`.

/// A 3D position as reported on the wire, before any unit conversion.
pub type Pos = (f64, f64, f64);

/// Identity of a single player as it appears in a log line, pre-resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerMeta {
    pub steam_id: String,
    pub name: String,
    pub team: String,
}

/// Killer + victim pair, used by kill/teamkill/player-player-action events.
#[derive(Debug, Clone, PartialEq)]
pub struct DualPlayerMeta {
    pub killer: PlayerMeta,
    pub victim: PlayerMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PlayerConnect {
        meta: PlayerMeta,
        address: String,
    },
    PlayerEntry {
        meta: PlayerMeta,
    },
    PlayerDisconnect {
        meta: PlayerMeta,
        reason: Option<String>,
    },
    PlayerChangeTeam {
        meta: PlayerMeta,
        team: String,
    },
    PlayerChangeRole {
        meta: PlayerMeta,
        role: String,
    },
    PlayerChangeName {
        meta: PlayerMeta,
        new_name: String,
    },
    PlayerKill {
        meta: DualPlayerMeta,
        weapon: String,
        headshot: bool,
        killer_pos: Option<Pos>,
        victim_pos: Option<Pos>,
    },
    PlayerTeamkill {
        meta: DualPlayerMeta,
        weapon: String,
        headshot: bool,
        killer_pos: Option<Pos>,
        victim_pos: Option<Pos>,
    },
    PlayerSuicide {
        meta: PlayerMeta,
        weapon: String,
    },
    Chat {
        meta: PlayerMeta,
        message: String,
        dead: bool,
    },
    ActionPlayer {
        meta: PlayerMeta,
        code: String,
        pos: Option<Pos>,
    },
    ActionPlayerPlayer {
        meta: DualPlayerMeta,
        code: String,
    },
    ActionTeam {
        team: String,
        code: String,
    },
    ActionWorld {
        code: String,
    },
    RoundStart,
    RoundEnd {
        duration: Option<i64>,
        winning_team: Option<String>,
    },
    TeamWin {
        team: String,
    },
    MapChange {
        previous_map: Option<String>,
        new_map: String,
    },
}

impl Event {
    /// The discriminant name, used for logging and for the server-stats
    /// handler's generic "consumes all event kinds" dispatch.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::PlayerConnect { .. } => "PLAYER_CONNECT",
            Event::PlayerEntry { .. } => "PLAYER_ENTRY",
            Event::PlayerDisconnect { .. } => "PLAYER_DISCONNECT",
            Event::PlayerChangeTeam { .. } => "PLAYER_CHANGE_TEAM",
            Event::PlayerChangeRole { .. } => "PLAYER_CHANGE_ROLE",
            Event::PlayerChangeName { .. } => "PLAYER_CHANGE_NAME",
            Event::PlayerKill { .. } => "PLAYER_KILL",
            Event::PlayerTeamkill { .. } => "PLAYER_TEAMKILL",
            Event::PlayerSuicide { .. } => "PLAYER_SUICIDE",
            Event::Chat { .. } => "CHAT",
            Event::ActionPlayer { .. } => "ACTION_PLAYER",
            Event::ActionPlayerPlayer { .. } => "ACTION_PLAYER_PLAYER",
            Event::ActionTeam { .. } => "ACTION_TEAM",
            Event::ActionWorld { .. } => "ACTION_WORLD",
            Event::RoundStart => "ROUND_START",
            Event::RoundEnd { .. } => "ROUND_END",
            Event::TeamWin { .. } => "TEAM_WIN",
            Event::MapChange { .. } => "MAP_CHANGE",
        }
    }
}
