//! Weapon Handler (§4.8): frag records and per-weapon aggregate counters.
//! Deliberately does not touch `Player.kills`/`Player.deaths` — see
//! `handlers::player` for why.

use super::HandlerError;
use crate::identity::ResolvedIds;
use crate::parse::Event;
use crate::store::{FragRow, WeaponService};
use crate::util::time::unix_secs;

pub struct WeaponHandler<'a> {
    weapons: &'a dyn WeaponService,
}

impl<'a> WeaponHandler<'a> {
    pub fn new(weapons: &'a dyn WeaponService) -> Self {
        Self { weapons }
    }

    /// `resolved` comes from the engine's single identity-resolution stage
    /// (§2, §5) — this handler never resolves identities itself.
    pub async fn handle(
        &self,
        game: &str,
        server_id: i64,
        map: &str,
        event: &Event,
        resolved: &ResolvedIds,
    ) -> Result<(), HandlerError> {
        let Event::PlayerKill {
            meta,
            weapon,
            headshot,
            killer_pos,
            victim_pos,
        } = event
        else {
            return Ok(());
        };

        let ResolvedIds::Dual { killer: killer_id, victim: victim_id } = *resolved else {
            unreachable!("engine always resolves a killer/victim pair for PLAYER_KILL");
        };

        // §5: frag append + weapon upsert must be atomic; the REST backend
        // expresses this as a single RPC call server-side, the in-memory
        // backend as a single lock hold — neither is visible at this layer.
        self.weapons.create_frag(FragRow {
            event_time: unix_secs(),
            server_id,
            map: map.to_string(),
            killer_id,
            victim_id,
            weapon: weapon.clone(),
            headshot: *headshot,
            killer_team: Some(meta.killer.team.clone()),
            victim_team: Some(meta.victim.team.clone()),
            killer_pos: *killer_pos,
            victim_pos: *victim_pos,
        }).await?;

        self.weapons.upsert_weapon_kill(game, weapon, *headshot).await?;

        Ok(())
    }
}
