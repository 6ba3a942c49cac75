//! Identity Resolver (§4.5): SteamID canonicalization and get-or-create
//! player resolution.

use tracing::{debug, warn};

use crate::parse::tokens::{is_bot, sanitize_name};
use crate::parse::Event;
use crate::store::{NewPlayer, PlayerService, StoreError};

/// Output of resolving whichever player identities an `Event` carries, shared
/// by the engine's persist step and every handler so identity resolution
/// (§2, §5) runs exactly once per event rather than once per consumer.
#[derive(Debug, Clone, Copy)]
pub enum ResolvedIds {
    /// Events that name no player (`ROUND_*`, `TEAM_WIN`, `MAP_CHANGE`, `ACTION_TEAM`, `ACTION_WORLD`).
    None,
    /// A single-subject event (connect, entry, disconnect, change-*, suicide, chat, player-action).
    Single(i64),
    /// A killer/victim pair (kill, teamkill, player-player-action).
    Dual { killer: i64, victim: i64 },
}

impl ResolvedIds {
    pub fn single(&self) -> Option<i64> {
        match self {
            ResolvedIds::Single(id) => Some(*id),
            _ => None,
        }
    }

    pub fn killer(&self) -> Option<i64> {
        match self {
            ResolvedIds::Dual { killer, .. } => Some(*killer),
            _ => None,
        }
    }

    pub fn victim(&self) -> Option<i64> {
        match self {
            ResolvedIds::Dual { victim, .. } => Some(*victim),
            _ => None,
        }
    }
}

const STEAM64_BASE: u64 = 76561197960265728;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IdentityError {
    #[error("empty steam id")]
    Empty,

    #[error("unrecognized steam id shape: {0}")]
    UnrecognizedShape(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("player row missing after conflict recovery")]
    MissingAfterRecovery,
}

impl From<StoreError> for IdentityError {
    fn from(e: StoreError) -> Self {
        IdentityError::Storage(e.to_string())
    }
}

/// Canonicalize a raw SteamID token into the form stored in `PlayerUniqueId`
/// (§4.5). Bots canonicalize to `BOT_<sanitized-name>`; everything else
/// canonicalizes to a 17-digit Steam64 decimal string.
pub fn canonicalize(raw: &str, name: &str) -> Result<String, IdentityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::Empty);
    }

    if is_bot(trimmed) {
        return Ok(format!("BOT_{}", sanitize_name(name)));
    }

    if trimmed.len() == 17 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Ok(trimmed.to_string());
    }

    if let Some(steam2) = parse_steam2(trimmed) {
        let (y, z) = steam2;
        return Ok((STEAM64_BASE + 2 * z + y).to_string());
    }

    if let Some(account) = parse_steam3(trimmed) {
        return Ok((STEAM64_BASE + account).to_string());
    }

    Err(IdentityError::UnrecognizedShape(trimmed.to_string()))
}

/// Parse `STEAM_X:Y:Z`, returning `(Y, Z)`. `X` is accepted in `0..=5` but
/// otherwise ignored (universe byte, not part of the Steam64 formula).
fn parse_steam2(raw: &str) -> Option<(u64, u64)> {
    let rest = raw.strip_prefix("STEAM_")?;
    let mut parts = rest.split(':');
    let x: u8 = parts.next()?.parse().ok()?;
    let y: u64 = parts.next()?.parse().ok()?;
    let z: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || x > 5 || (y != 0 && y != 1) {
        return None;
    }
    Some((y, z))
}

/// Parse `[U:1:A]`, returning the account number `A`.
fn parse_steam3(raw: &str) -> Option<u64> {
    let inner = raw.strip_prefix("[U:1:")?.strip_suffix(']')?;
    inner.parse().ok()
}

/// Resolves a raw `(steamId, name, game)` triple into a durable `playerId`,
/// creating the `Player`/`PlayerUniqueId` rows on first sight.
pub struct IdentityResolver<'a> {
    store: &'a dyn PlayerService,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(store: &'a dyn PlayerService) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, steam_id: &str, name: &str, game: &str) -> Result<i64, IdentityError> {
        let canonical = canonicalize(steam_id, name)?;

        if let Some(mapping) = self.store.find_player_unique_id(&canonical, game).await? {
            return Ok(mapping.player_id);
        }

        match self
            .store
            .create_player_with_unique_id(NewPlayer {
                game: game.to_string(),
                unique_id: canonical.clone(),
                name: name.to_string(),
            })
            .await
        {
            Ok(row) => {
                debug!(player_id = row.player_id, unique_id = %canonical, "created player");
                Ok(row.player_id)
            }
            Err(StoreError::Conflict(_)) => {
                warn!(unique_id = %canonical, "identity-resolution race, re-reading");
                self.store
                    .find_player_unique_id(&canonical, game)
                    .await?
                    .map(|m| m.player_id)
                    .ok_or(IdentityError::MissingAfterRecovery)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves whichever player identity/identities `event` carries, for
    /// the engine's single identity-resolution stage (§2, §5). A
    /// `PLAYER_DISCONNECT` with no resolvable identity is tolerated (§9 open
    /// question: the source ignores a disconnect with no prior connect
    /// lookup) and collapses to `ResolvedIds::None` rather than failing the
    /// whole pipeline task; every other event kind propagates the error.
    pub async fn resolve_for_event(&self, game: &str, event: &Event) -> Result<ResolvedIds, IdentityError> {
        match event {
            Event::PlayerDisconnect { meta, .. } => match self.resolve(&meta.steam_id, &meta.name, game).await {
                Ok(id) => Ok(ResolvedIds::Single(id)),
                Err(e) => {
                    warn!(error = %e, "disconnect for unresolvable player, swallowing");
                    Ok(ResolvedIds::None)
                }
            },

            Event::PlayerConnect { meta, .. }
            | Event::PlayerEntry { meta }
            | Event::PlayerChangeTeam { meta, .. }
            | Event::PlayerChangeRole { meta, .. }
            | Event::PlayerChangeName { meta, .. }
            | Event::PlayerSuicide { meta, .. }
            | Event::Chat { meta, .. }
            | Event::ActionPlayer { meta, .. } => {
                let id = self.resolve(&meta.steam_id, &meta.name, game).await?;
                Ok(ResolvedIds::Single(id))
            }

            Event::PlayerKill { meta, .. }
            | Event::PlayerTeamkill { meta, .. }
            | Event::ActionPlayerPlayer { meta, .. } => {
                let killer = self.resolve(&meta.killer.steam_id, &meta.killer.name, game).await?;
                let victim = self.resolve(&meta.victim.steam_id, &meta.victim.name, game).await?;
                Ok(ResolvedIds::Dual { killer, victim })
            }

            Event::ActionTeam { .. }
            | Event::ActionWorld { .. }
            | Event::RoundStart
            | Event::RoundEnd { .. }
            | Event::TeamWin { .. }
            | Event::MapChange { .. } => Ok(ResolvedIds::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::event::{DualPlayerMeta, PlayerMeta};
    use crate::store::memory::MemoryStore;

    fn meta(steam_id: &str, name: &str, team: &str) -> PlayerMeta {
        PlayerMeta {
            steam_id: steam_id.to_string(),
            name: name.to_string(),
            team: team.to_string(),
        }
    }

    #[tokio::test]
    async fn resolve_for_event_resolves_both_sides_of_a_kill() {
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&store);
        let event = Event::PlayerKill {
            meta: DualPlayerMeta {
                killer: meta("STEAM_1:0:111", "Killer", "TERRORIST"),
                victim: meta("STEAM_1:0:222", "Victim", "CT"),
            },
            weapon: "ak47".to_string(),
            headshot: false,
            killer_pos: None,
            victim_pos: None,
        };

        let resolved = resolver.resolve_for_event("csgo", &event).await.unwrap();
        let (killer, victim) = (resolved.killer().unwrap(), resolved.victim().unwrap());
        assert_ne!(killer, victim);

        // Resolving the same event again must yield the same ids (idempotent, §8 invariant 6).
        let resolved2 = resolver.resolve_for_event("csgo", &event).await.unwrap();
        assert_eq!(resolved2.killer(), Some(killer));
        assert_eq!(resolved2.victim(), Some(victim));
    }

    #[tokio::test]
    async fn resolve_for_event_swallows_unresolvable_disconnect() {
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&store);
        let event = Event::PlayerDisconnect {
            meta: meta("garbage", "P", "CT"),
            reason: None,
        };

        let resolved = resolver.resolve_for_event("csgo", &event).await.unwrap();
        assert!(matches!(resolved, ResolvedIds::None));
    }

    #[tokio::test]
    async fn resolve_for_event_is_none_for_state_only_events() {
        let store = MemoryStore::new();
        let resolver = IdentityResolver::new(&store);
        assert!(matches!(
            resolver.resolve_for_event("csgo", &Event::RoundStart).await.unwrap(),
            ResolvedIds::None
        ));
    }

    #[test]
    fn canonicalizes_steam2() {
        // steam64 = base + 2*Z + Y, per the §4.5 formula
        assert_eq!(
            canonicalize("STEAM_1:0:111", "P").unwrap(),
            (STEAM64_BASE + 222).to_string()
        );
    }

    #[test]
    fn canonicalizes_steam3() {
        assert_eq!(
            canonicalize("[U:1:222]", "P").unwrap(),
            (STEAM64_BASE + 222).to_string()
        );
    }

    #[test]
    fn canonicalizes_steam64_passthrough() {
        let steam64 = "76561197960530950";
        assert_eq!(canonicalize(steam64, "P").unwrap(), steam64);
    }

    #[test]
    fn canonicalizes_bot_with_sanitized_name() {
        assert_eq!(canonicalize("BOT", "Ramirez Jr!!").unwrap(), "BOT_Ramirez_Jr");
    }

    #[test]
    fn rejects_empty_and_unrecognized() {
        assert_eq!(canonicalize("   ", "P"), Err(IdentityError::Empty));
        assert!(matches!(
            canonicalize("garbage", "P"),
            Err(IdentityError::UnrecognizedShape(_))
        ));
    }

    #[test]
    fn steam2_round_trips_through_steam64() {
        for z in [0u64, 1, 111, 999] {
            for y in [0u64, 1] {
                let raw = format!("STEAM_0:{}:{}", y, z);
                let steam64: u64 = canonicalize(&raw, "P").unwrap().parse().unwrap();
                assert_eq!(steam64, STEAM64_BASE + 2 * z + y);
            }
        }
    }
}
