//! Server-Stats Handler (§4.11): consumes every event kind, maintains the
//! persisted `Server` row's running counters, and publishes a synthetic
//! `SERVER_STATS_UPDATE` carrying only the fields that actually changed.

use crate::parse::Event;
use crate::publish::{BroadcastPublisher, PublishedEvent, ServerStatsUpdate};
use crate::store::{MapChangeAssignment, ServerDelta, ServerService};
use crate::util::time::unix_secs;

use super::{is_team_win_code, HandlerError};

/// Per-kill shot/hit estimate by weapon class, used when no `WEAPON_FIRE`/
/// `WEAPON_HIT` stream exists (§4.11.1).
fn shots_for_weapon(weapon: &str) -> i64 {
    let w = weapon.to_ascii_lowercase();
    if w.contains("awp") || w.contains("scout") || w.contains("g3sg1") || w.contains("sg550") {
        1
    } else if w.contains("knife") || w.contains("grenade") || w.contains("he") {
        1
    } else if w.contains("deagle") || w.contains("glock") || w.contains("usp") || w.contains("p228") || w.contains("elite") || w.contains("fiveseven") {
        4
    } else if w.contains("m4a1") || w.contains("ak47") || w.contains("galil") || w.contains("famas") || w.contains("sg552") || w.contains("aug") {
        3
    } else {
        3
    }
}

pub struct ServerStatsHandler<'a> {
    publisher: &'a BroadcastPublisher,
}

impl<'a> ServerStatsHandler<'a> {
    pub fn new(publisher: &'a BroadcastPublisher) -> Self {
        Self { publisher }
    }

    pub async fn handle(&self, servers: &dyn ServerService, server_id: i64, event: &Event) -> Result<(), HandlerError> {
        let mut delta = ServerDelta::default();
        let mut fields: Vec<(&'static str, i64)> = Vec::new();

        match event {
            Event::PlayerKill { weapon, headshot, meta, .. } => {
                delta.kills = 1;
                fields.push(("kills", 1));
                if *headshot {
                    delta.headshots = 1;
                    fields.push(("headshots", 1));
                }
                let shots = shots_for_weapon(weapon);
                apply_team_shots(&mut delta, &mut fields, &meta.killer.team, shots, 1);
            }

            Event::PlayerSuicide { .. } => {
                delta.suicides = 1;
                fields.push(("suicides", 1));
            }

            Event::ActionPlayer { code, .. } => {
                if code == "Planted_The_Bomb" {
                    delta.bombs_planted = 1;
                    fields.push(("bombsPlanted", 1));
                } else if code == "Defused_The_Bomb" {
                    delta.bombs_defused = 1;
                    fields.push(("bombsDefused", 1));
                }
            }

            // CS round wins arrive as `Team "<T>" triggered "<code>_Win"`, not
            // as a literal `TEAM_WIN` line (no parser ever constructs
            // `Event::TeamWin`); §4.11 assigns `ctWins`/`tsWins` to this
            // handler, so it's the one that has to recognize the convention.
            Event::ActionTeam { team, code } if is_team_win_code(code) => match team.to_ascii_uppercase().as_str() {
                "CT" | "COUNTER-TERRORIST" => {
                    delta.ct_wins = 1;
                    delta.map_ct_wins = 1;
                    fields.push(("ctWins", 1));
                }
                "T" | "TERRORIST" => {
                    delta.ts_wins = 1;
                    delta.map_ts_wins = 1;
                    fields.push(("tsWins", 1));
                }
                _ => return Ok(()),
            },

            Event::RoundEnd { .. } => {
                delta.rounds = 1;
                delta.map_rounds = 1;
                fields.push(("rounds", 1));
            }

            Event::MapChange { new_map, .. } => {
                delta.map_change = Some(MapChangeAssignment {
                    new_map: new_map.clone(),
                    map_started: unix_secs(),
                });
                fields.push(("mapChanges", 1));
            }

            Event::PlayerConnect { .. } => {
                delta.players_inc = 1;
                delta.act_players_delta = 1;
                fields.push(("players", 1));
                fields.push(("actPlayers", 1));
            }

            Event::PlayerDisconnect { .. } => {
                delta.act_players_delta = -1;
                fields.push(("actPlayers", -1));
            }

            _ => return Ok(()),
        }

        servers.update_server(server_id, delta).await?;
        if !fields.is_empty() {
            self.publisher.publish(PublishedEvent::ServerStatsUpdate(ServerStatsUpdate { server_id, fields }));
        }
        Ok(())
    }
}

fn apply_team_shots(delta: &mut ServerDelta, fields: &mut Vec<(&'static str, i64)>, team: &str, shots: i64, hits: i64) {
    match team.to_ascii_uppercase().as_str() {
        "CT" | "COUNTER-TERRORIST" => {
            delta.ct_shots = shots;
            delta.ct_hits = hits;
            delta.map_ct_shots = shots;
            delta.map_ct_hits = hits;
            fields.push(("ctShots", shots));
            fields.push(("ctHits", hits));
        }
        "T" | "TERRORIST" => {
            delta.ts_shots = shots;
            delta.ts_hits = hits;
            delta.map_ts_shots = shots;
            delta.map_ts_hits = hits;
            fields.push(("tsShots", shots));
            fields.push(("tsHits", hits));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniper_shots_estimate_is_one() {
        assert_eq!(shots_for_weapon("awp"), 1);
        assert_eq!(shots_for_weapon("knife"), 1);
    }

    #[test]
    fn rifle_shots_estimate_is_three() {
        assert_eq!(shots_for_weapon("ak47"), 3);
        assert_eq!(shots_for_weapon("m4a1"), 3);
    }

    #[test]
    fn pistol_shots_estimate_is_four() {
        assert_eq!(shots_for_weapon("deagle"), 4);
        assert_eq!(shots_for_weapon("glock"), 4);
    }

    #[tokio::test]
    async fn action_team_win_code_bumps_the_winning_teams_counter_once() {
        use crate::store::memory::MemoryStore;
        use crate::store::NewServer;

        let store = MemoryStore::new();
        let server = store
            .create_server(NewServer {
                address: "10.0.0.3".into(),
                port: 27015,
                name: "server".into(),
                game: "cstrike".into(),
            })
            .await
            .unwrap();

        let publisher = BroadcastPublisher::new(8);
        let handler = ServerStatsHandler::new(&publisher);
        handler
            .handle(
                &store,
                server.server_id,
                &Event::ActionTeam {
                    team: "CT".to_string(),
                    code: "Terrorists_Win".to_string(),
                },
            )
            .await
            .unwrap();
        // non-win team action is a no-op for server counters.
        handler
            .handle(
                &store,
                server.server_id,
                &Event::ActionTeam {
                    team: "CT".to_string(),
                    code: "Terrorist_Spawn".to_string(),
                },
            )
            .await
            .unwrap();

        let row = store.get_server(server.server_id).await.unwrap().unwrap();
        assert_eq!(row.ct_wins, 1);
        assert_eq!(row.ts_wins, 0);
    }
}
