//! Match Handler (§4.10): per-server round/match state machine, round-MVP,
//! map finalization, and objective scoring. Also persists the four
//! `ACTION_*` event kinds (§4.6 forwards them here).
//!
//! Takes its storage dependencies as three separate capability references
//! (§9 design note) rather than one `Storage` trait object, so no trait
//! object ever needs upcasting to a narrower one.

use dashmap::DashMap;
use tracing::warn;

use super::ranking;
use super::{is_team_win_code, HandlerError};
use crate::identity::ResolvedIds;
use crate::parse::Event;
use crate::store::{ActionKind, ActionLookup, ActionService, EventRow, EventService, EventTable, PlayerHistoryRow, PlayerService};
use crate::util::time::unix_secs;

#[derive(Debug, Clone, Default)]
pub struct PlayerRoundStats {
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub objective_score: i64,
    pub clutch_wins: i64,
    pub headshots: i64,
    pub shots: i64,
    pub hits: i64,
    pub suicides: i64,
    pub teamkills: i64,
    insertion_order: u64,
}

impl PlayerRoundStats {
    /// Round MVP composite score (§4.10, GLOSSARY).
    fn mvp_score(&self) -> i64 {
        2 * self.kills - self.deaths + self.assists + 3 * self.objective_score + 5 * self.clutch_wins
    }
}

struct MatchState {
    start_time: i64,
    duration: i64,
    total_rounds: i64,
    team_scores: std::collections::HashMap<String, i64>,
    player_stats: Vec<(i64, PlayerRoundStats)>,
    next_insertion_order: u64,
}

impl MatchState {
    fn fresh(now: i64) -> Self {
        Self {
            start_time: now,
            duration: 0,
            total_rounds: 0,
            team_scores: std::collections::HashMap::new(),
            player_stats: Vec::new(),
            next_insertion_order: 0,
        }
    }

    fn entry(&mut self, player_id: i64) -> &mut PlayerRoundStats {
        if let Some(pos) = self.player_stats.iter().position(|(id, _)| *id == player_id) {
            return &mut self.player_stats[pos].1;
        }
        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        let mut stats = PlayerRoundStats::default();
        stats.insertion_order = order;
        self.player_stats.push((player_id, stats));
        &mut self.player_stats.last_mut().unwrap().1
    }

    /// MVP: highest composite score, ties broken by first-seen order (§8).
    fn mvp(&self) -> Option<i64> {
        self.player_stats
            .iter()
            .max_by(|(_, a), (_, b)| {
                a.mvp_score()
                    .cmp(&b.mvp_score())
                    .then(b.insertion_order.cmp(&a.insertion_order))
            })
            .map(|(id, _)| *id)
    }
}

enum ObjectiveKind {
    BombPlant,
    BombDefuse,
    BombExplode,
    HostageRescue,
    HostageTouch,
    FlagCapture,
    FlagDefend,
    FlagPickup,
    FlagDrop,
    ControlPointCapture,
    ControlPointDefend,
}

fn classify_objective(code: &str) -> Option<ObjectiveKind> {
    match code {
        "Planted_The_Bomb" => Some(ObjectiveKind::BombPlant),
        "Defused_The_Bomb" => Some(ObjectiveKind::BombDefuse),
        "Target_Bombed" => Some(ObjectiveKind::BombExplode),
        "Rescued_A_Hostage" => Some(ObjectiveKind::HostageRescue),
        "Touched_A_Hostage" => Some(ObjectiveKind::HostageTouch),
        "Captured_The_Flag" => Some(ObjectiveKind::FlagCapture),
        "Defended_The_Flag" => Some(ObjectiveKind::FlagDefend),
        "Got_The_Flag" => Some(ObjectiveKind::FlagPickup),
        "Dropped_The_Flag" => Some(ObjectiveKind::FlagDrop),
        "Captured_A_Control_Point" => Some(ObjectiveKind::ControlPointCapture),
        "Defended_A_Control_Point" => Some(ObjectiveKind::ControlPointDefend),
        _ => None,
    }
}

impl ObjectiveKind {
    /// Player points per the objective scoring table (§4.10).
    fn points(&self) -> i64 {
        match self {
            ObjectiveKind::BombPlant | ObjectiveKind::BombDefuse => 3,
            ObjectiveKind::BombExplode => 0,
            ObjectiveKind::HostageRescue => 2,
            ObjectiveKind::HostageTouch => 1,
            ObjectiveKind::FlagCapture => 5,
            ObjectiveKind::FlagDefend => 3,
            ObjectiveKind::FlagPickup => 1,
            ObjectiveKind::FlagDrop => 0,
            ObjectiveKind::ControlPointCapture => 4,
            ObjectiveKind::ControlPointDefend => 2,
        }
    }
}

pub struct MatchHandler {
    states: DashMap<i64, MatchState>,
}

impl Default for MatchHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchHandler {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn handle(
        &self,
        players: &dyn PlayerService,
        actions: &dyn ActionService,
        events: &dyn EventService,
        server_id: i64,
        game: &str,
        map: &str,
        event: &Event,
        resolved: &ResolvedIds,
    ) -> Result<(), HandlerError> {
        let now = unix_secs();

        match event {
            Event::RoundStart => {
                self.states.insert(server_id, MatchState::fresh(now));
            }

            Event::RoundEnd { duration, winning_team } => {
                let (round_duration, teamkills_by_player) = {
                    let mut state = self
                        .states
                        .entry(server_id)
                        .or_insert_with(|| {
                            warn!(server_id, "ROUND_END with no prior ROUND_START, lazily initializing");
                            MatchState::fresh(now)
                        });
                    let round_duration = duration.unwrap_or_else(|| (now - state.start_time).max(0));
                    state.total_rounds += 1;
                    state.duration += round_duration;
                    if let Some(team) = winning_team {
                        *state.team_scores.entry(team.clone()).or_insert(0) += 1;
                    }
                    let teamkills_by_player: std::collections::HashMap<i64, i64> = state
                        .player_stats
                        .iter()
                        .map(|(id, stats)| (*id, stats.teamkills))
                        .collect();
                    (round_duration, teamkills_by_player)
                };

                // §4.9.2 fires only when both `duration` and `winningTeam` are
                // present on the event itself; a bare `ROUND_END` with neither
                // only advances the round/score state tracked above. The
                // `rounds`/`mapRounds` server counters belong to the
                // Server-Stats handler (§8 invariant 5), not here.
                if duration.is_some() && winning_team.is_some() {
                    let participants = players.recent_entrants(server_id, round_duration).await?;
                    let with_teamkills: Vec<(i64, i64)> = participants
                        .into_iter()
                        .map(|id| (id, teamkills_by_player.get(&id).copied().unwrap_or(0)))
                        .collect();
                    ranking::apply_round_ratings(players, &with_teamkills, round_duration).await;
                }
            }

            Event::TeamWin { team } => {
                self.apply_team_win(server_id, team, now);
            }

            Event::MapChange { previous_map, .. } => {
                if let Some(prev_map) = previous_map {
                    self.finalize_map(players, actions, server_id, game, prev_map).await?;
                }
                self.states.remove(&server_id);
            }

            Event::PlayerKill { headshot, .. } => {
                let ResolvedIds::Dual { killer: killer_id, victim: victim_id } = *resolved else {
                    unreachable!("engine always resolves a killer/victim pair for PLAYER_KILL");
                };
                let mut state = self
                    .states
                    .entry(server_id)
                    .or_insert_with(|| MatchState::fresh(now));
                state.entry(killer_id).kills += 1;
                if *headshot {
                    state.entry(killer_id).headshots += 1;
                }
                state.entry(victim_id).deaths += 1;
            }

            Event::PlayerTeamkill { .. } => {
                let ResolvedIds::Dual { killer: killer_id, victim: victim_id } = *resolved else {
                    unreachable!("engine always resolves a killer/victim pair for PLAYER_TEAMKILL");
                };
                let mut state = self
                    .states
                    .entry(server_id)
                    .or_insert_with(|| MatchState::fresh(now));
                state.entry(killer_id).teamkills += 1;
                state.entry(victim_id).deaths += 1;
            }

            Event::PlayerSuicide { .. } => {
                let Some(player_id) = resolved.single() else {
                    unreachable!("engine always resolves a single id for PLAYER_SUICIDE");
                };
                let mut state = self
                    .states
                    .entry(server_id)
                    .or_insert_with(|| MatchState::fresh(now));
                let stats = state.entry(player_id);
                stats.suicides += 1;
                stats.deaths += 1;
            }

            Event::ActionPlayer { code, pos, .. } => {
                let Some(player_id) = resolved.single() else {
                    unreachable!("engine always resolves a single id for ACTION_PLAYER");
                };
                Self::record_action(actions, game, code, None, ActionKind::Player).await?;
                events
                    .create_event(
                        EventTable::PlayerAction,
                        EventRow {
                            event_time: now,
                            server_id,
                            map: map.to_string(),
                            player_id: Some(player_id),
                            code: Some(code.clone()),
                            pos: *pos,
                            ..Default::default()
                        },
                    )
                    .await?;

                // Bomb plant/defuse server counters belong to the
                // Server-Stats handler (§8 invariant 5); this only tracks the
                // per-player objective score that feeds round MVP/§4.10.
                if let Some(kind) = classify_objective(code) {
                    let points = kind.points();
                    if points != 0 {
                        let mut state = self
                            .states
                            .entry(server_id)
                            .or_insert_with(|| MatchState::fresh(now));
                        state.entry(player_id).objective_score += points;
                    }
                }
            }

            Event::ActionPlayerPlayer { code, .. } => {
                let ResolvedIds::Dual { killer, victim } = *resolved else {
                    unreachable!("engine always resolves a killer/victim pair for ACTION_PLAYER_PLAYER");
                };
                Self::record_action(actions, game, code, None, ActionKind::PlayerPlayer).await?;
                events
                    .create_event(
                        EventTable::PlayerPlayerAction,
                        EventRow {
                            event_time: now,
                            server_id,
                            map: map.to_string(),
                            player_id: Some(killer),
                            victim_id: Some(victim),
                            code: Some(code.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
            }

            Event::ActionTeam { team, code } => {
                Self::record_action(actions, game, code, Some(team.clone()), ActionKind::Team).await?;
                events
                    .create_event(
                        EventTable::TeamAction,
                        EventRow {
                            event_time: now,
                            server_id,
                            map: map.to_string(),
                            team: Some(team.clone()),
                            code: Some(code.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                if is_team_win_code(code) {
                    self.apply_team_win(server_id, team, now);
                }
            }

            Event::ActionWorld { code } => {
                Self::record_action(actions, game, code, None, ActionKind::World).await?;
                events
                    .create_event(
                        EventTable::WorldAction,
                        EventRow {
                            event_time: now,
                            server_id,
                            map: map.to_string(),
                            code: Some(code.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
            }

            _ => {}
        }

        Ok(())
    }

    /// Round/score bookkeeping only; the `ctWins`/`tsWins` server counters
    /// are owned by the Server-Stats handler (§8 invariant 5).
    fn apply_team_win(&self, server_id: i64, team: &str, now: i64) {
        let mut state = self
            .states
            .entry(server_id)
            .or_insert_with(|| MatchState::fresh(now));
        state.total_rounds += 1;
        *state.team_scores.entry(team.to_string()).or_insert(0) += 1;
    }

    async fn record_action(
        actions: &dyn ActionService,
        game: &str,
        code: &str,
        team: Option<String>,
        kind: ActionKind,
    ) -> Result<(), HandlerError> {
        actions
            .record_action(ActionLookup {
                game: game.to_string(),
                code: code.to_string(),
                team,
                kind,
                reward_player: 0,
                reward_team: 0,
                description: code.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Finalize the outgoing map on `MAP_CHANGE` (§4.10): player-history
    /// snapshots, map-count upsert. The `mapChanges` server counter is owned
    /// by the Server-Stats handler (§8 invariant 5).
    async fn finalize_map(
        &self,
        players: &dyn PlayerService,
        actions: &dyn ActionService,
        server_id: i64,
        game: &str,
        finished_map: &str,
    ) -> Result<(), HandlerError> {
        let Some((_, state)) = self.states.remove(&server_id) else {
            return Ok(());
        };

        let mvp = state.mvp();
        let mut map_kills = 0i64;
        let mut map_headshots = 0i64;

        for (player_id, stats) in &state.player_stats {
            map_kills += stats.kills;
            map_headshots += stats.headshots;

            players
                .write_player_history(PlayerHistoryRow {
                    player_id: *player_id,
                    server_id,
                    map: finished_map.to_string(),
                    kills: stats.kills,
                    deaths: stats.deaths,
                    assists: stats.assists,
                    headshots: stats.headshots,
                    shots: stats.shots,
                    hits: stats.hits,
                    suicides: stats.suicides,
                    teamkills: stats.teamkills,
                    objective_score: stats.objective_score,
                    clutch_wins: stats.clutch_wins,
                    is_mvp: Some(*player_id) == mvp,
                    event_time: unix_secs(),
                })
                .await?;
        }

        actions
            .upsert_map_count(game, finished_map, map_kills, map_headshots)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mvp_breaks_two_way_tie_by_first_seen_order() {
        let mut state = MatchState::fresh(0);
        state.entry(1).kills = 5; // score 10
        state.entry(2).kills = 5; // score 10, inserted later
        assert_eq!(state.mvp(), Some(1));
    }

    #[test]
    fn mvp_picks_strictly_higher_score() {
        let mut state = MatchState::fresh(0);
        state.entry(1).kills = 3;
        let s2 = state.entry(2);
        s2.kills = 10;
        s2.deaths = 1;
        assert_eq!(state.mvp(), Some(2));
    }

    #[test]
    fn team_win_code_recognizes_suffix() {
        assert!(is_team_win_code("Terrorists_Win"));
        assert!(is_team_win_code("CTs_Win"));
        assert!(!is_team_win_code("Round_Start"));
    }

    #[tokio::test]
    async fn round_end_with_duration_and_winner_applies_round_rating_to_entrants() {
        use crate::store::memory::MemoryStore;
        use crate::store::NewPlayer;

        let store = MemoryStore::new();
        let player = store
            .create_player_with_unique_id(NewPlayer {
                game: "cstrike".to_string(),
                unique_id: "76561197960530950".to_string(),
                name: "Entrant".to_string(),
            })
            .await
            .unwrap();

        store
            .create_event(
                EventTable::Entry,
                EventRow {
                    event_time: unix_secs(),
                    server_id: 1,
                    player_id: Some(player.player_id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let handler = MatchHandler::new();
        handler
            .handle(
                &store,
                &store,
                &store,
                1,
                "cstrike",
                "de_dust",
                &Event::RoundEnd {
                    duration: Some(300),
                    winning_team: Some("CT".to_string()),
                },
                &ResolvedIds::None,
            )
            .await
            .unwrap();

        // base = min(300/60, 5) = 5, no teamkills this round -> +2 -> skill 1007
        let updated = store.find_player(player.player_id).await.unwrap().unwrap();
        assert_eq!(updated.skill, 1007);
    }

    #[tokio::test]
    async fn round_end_without_duration_or_winner_skips_round_rating() {
        use crate::store::memory::MemoryStore;
        use crate::store::NewPlayer;

        let store = MemoryStore::new();
        let player = store
            .create_player_with_unique_id(NewPlayer {
                game: "cstrike".to_string(),
                unique_id: "76561197960530951".to_string(),
                name: "Entrant2".to_string(),
            })
            .await
            .unwrap();
        store
            .create_event(
                EventTable::Entry,
                EventRow {
                    event_time: unix_secs(),
                    server_id: 2,
                    player_id: Some(player.player_id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let handler = MatchHandler::new();
        handler
            .handle(
                &store,
                &store,
                &store,
                2,
                "cstrike",
                "de_dust",
                &Event::RoundEnd {
                    duration: None,
                    winning_team: None,
                },
                &ResolvedIds::None,
            )
            .await
            .unwrap();

        let unchanged = store.find_player(player.player_id).await.unwrap().unwrap();
        assert_eq!(unchanged.skill, 1000);
    }
}
