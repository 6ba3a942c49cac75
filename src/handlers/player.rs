//! Player Handler (§4.7): per-player stat increments and streak tracking.
//! Owns the single write path for `Player.kills`/`Player.deaths`/`Player.skill`
//! on a kill — the Weapon Handler (§4.8) writes the frag record and weapon
//! catalog only, deliberately not touching player counters, resolving the
//! double-counting risk flagged in §9.

use tracing::warn;

use super::ranking::{clamp_skill, kill_rating};
use super::HandlerError;
use crate::identity::ResolvedIds;
use crate::parse::Event;
use crate::store::{PlayerDelta, PlayerService, WeaponService};
use crate::util::time::unix_secs;

pub struct PlayerHandler<'a> {
    players: &'a dyn PlayerService,
    weapons: &'a dyn WeaponService,
}

impl<'a> PlayerHandler<'a> {
    pub fn new(players: &'a dyn PlayerService, weapons: &'a dyn WeaponService) -> Self {
        Self { players, weapons }
    }

    /// `resolved` comes from the engine's single identity-resolution stage
    /// (§2, §5) — this handler never resolves identities itself.
    pub async fn handle(&self, game: &str, event: &Event, resolved: &ResolvedIds) -> Result<(), HandlerError> {
        let now = unix_secs();

        match event {
            Event::PlayerKill { weapon, headshot, .. } => {
                let ResolvedIds::Dual { killer: killer_id, victim: victim_id } = *resolved else {
                    unreachable!("engine always resolves a killer/victim pair for PLAYER_KILL");
                };

                let killer = self
                    .players
                    .find_player(killer_id)
                    .await?
                    .ok_or(HandlerError::MissingPlayer(killer_id))?;
                let victim = self
                    .players
                    .find_player(victim_id)
                    .await?
                    .ok_or(HandlerError::MissingPlayer(victim_id))?;

                let killer_games = self.players.count_frags_as_killer(killer_id).await?;
                let victim_games = self.players.count_frags_as_killer(victim_id).await?;
                let modifier = self.weapons.weapon_modifier(game, weapon).await?;

                let (delta_killer, delta_victim) =
                    kill_rating(killer.skill, victim.skill, killer_games, victim_games, *headshot, modifier);

                // Killer update precedes victim update (fail-fast, §4.7).
                self.players
                    .update_player(
                        killer_id,
                        PlayerDelta {
                            kills: 1,
                            headshots: if *headshot { 1 } else { 0 },
                            kill_streak_inc: 1,
                            death_streak_set: Some(0),
                            skill_set: Some(clamp_skill(killer.skill + delta_killer)),
                            last_event_set: Some(now),
                            last_skill_change_set: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;

                self.players
                    .update_player(
                        victim_id,
                        PlayerDelta {
                            deaths: 1,
                            death_streak_inc: 1,
                            kill_streak_set: Some(0),
                            skill_set: Some(clamp_skill(victim.skill + delta_victim)),
                            last_event_set: Some(now),
                            last_skill_change_set: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;

                Ok(())
            }

            Event::PlayerTeamkill { .. } => {
                let ResolvedIds::Dual { killer: killer_id, victim: victim_id } = *resolved else {
                    unreachable!("engine always resolves a killer/victim pair for PLAYER_TEAMKILL");
                };

                let killer = self
                    .players
                    .find_player(killer_id)
                    .await?
                    .ok_or(HandlerError::MissingPlayer(killer_id))?;

                self.players
                    .update_player(
                        killer_id,
                        PlayerDelta {
                            teamkills: 1,
                            kill_streak_set: Some(0),
                            skill_set: Some(clamp_skill(killer.skill - 10)),
                            last_event_set: Some(now),
                            last_skill_change_set: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;

                self.players
                    .update_player(
                        victim_id,
                        PlayerDelta {
                            deaths: 1,
                            death_streak_inc: 1,
                            kill_streak_set: Some(0),
                            last_event_set: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;

                Ok(())
            }

            Event::PlayerSuicide { .. } => {
                let Some(player_id) = resolved.single() else {
                    unreachable!("engine always resolves a single id for PLAYER_SUICIDE");
                };
                let player = self
                    .players
                    .find_player(player_id)
                    .await?
                    .ok_or(HandlerError::MissingPlayer(player_id))?;

                self.players
                    .update_player(
                        player_id,
                        PlayerDelta {
                            suicides: 1,
                            deaths: 1,
                            death_streak_inc: 1,
                            kill_streak_set: Some(0),
                            skill_set: Some(clamp_skill(player.skill - 5)),
                            last_event_set: Some(now),
                            last_skill_change_set: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;

                Ok(())
            }

            Event::PlayerConnect { meta, .. } => {
                let Some(player_id) = resolved.single() else {
                    unreachable!("engine always resolves a single id for PLAYER_CONNECT");
                };
                self.players
                    .update_player(
                        player_id,
                        PlayerDelta {
                            last_event_set: Some(now),
                            last_name_set: Some(meta.name.clone()),
                            connection_time_reset: true,
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(())
            }

            Event::PlayerEntry { .. } => {
                let Some(player_id) = resolved.single() else {
                    unreachable!("engine always resolves a single id for PLAYER_ENTRY");
                };
                self.players
                    .update_player(
                        player_id,
                        PlayerDelta {
                            last_event_set: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(())
            }

            Event::PlayerDisconnect { .. } => {
                // §9 open question: a disconnect with no prior connect lookup
                // is tolerated — the engine's identity resolution swallows an
                // unresolvable disconnect into `ResolvedIds::None` rather than
                // failing the pipeline, matching the source behavior the spec
                // preserves.
                match resolved.single() {
                    Some(player_id) => {
                        self.players
                            .update_player(
                                player_id,
                                PlayerDelta {
                                    last_event_set: Some(now),
                                    ..Default::default()
                                },
                            )
                            .await?;
                    }
                    None => warn!("disconnect for unresolvable player, swallowing"),
                }
                Ok(())
            }

            Event::PlayerChangeTeam { .. } | Event::PlayerChangeRole { .. } => {
                let Some(player_id) = resolved.single() else {
                    unreachable!("engine always resolves a single id for change-team/role");
                };
                self.players
                    .update_player(
                        player_id,
                        PlayerDelta {
                            last_event_set: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(())
            }

            Event::PlayerChangeName { new_name, .. } => {
                let Some(player_id) = resolved.single() else {
                    unreachable!("engine always resolves a single id for PLAYER_CHANGE_NAME");
                };
                self.players
                    .update_player(
                        player_id,
                        PlayerDelta {
                            last_event_set: Some(now),
                            last_name_set: Some(new_name.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(())
            }

            _ => Ok(()),
        }
    }
}
