//! The processing engine (§2, §5): parse → persist the raw event row →
//! server-stats delta/publish → kind-specific handler fan-out, for one
//! packet. Generic over a concrete store `S` rather than `Arc<dyn Storage>`
//! so each handler can be handed the narrow `&dyn ...Service` reference it
//! needs via ordinary unsized coercion — no trait-object upcasting required.

pub mod worker;

use tracing::{debug, info, warn};

use crate::handlers::match_handler::MatchHandler;
use crate::handlers::player::PlayerHandler;
use crate::handlers::server_stats::ServerStatsHandler;
use crate::handlers::weapon::WeaponHandler;
use crate::handlers::HandlerError;
use crate::identity::{IdentityResolver, ResolvedIds};
use crate::parse::tokens::is_bot;
use crate::parse::{parser_for_game, Event, ParseError};
use crate::publish::BroadcastPublisher;
use crate::store::{EventRow, EventTable, Storage};

/// Maps an `Event` to the append-only table the Event Persister writes it
/// to, and builds the corresponding row (§4.6). `None` means the event
/// drives state only and writes no row (`ROUND_*`, `TEAM_WIN`, `MAP_CHANGE`),
/// or is persisted by a downstream handler instead (the `ACTION_*` family,
/// via the Match Handler).
fn event_row(server_id: i64, map: &str, event: &Event, resolved: &ResolvedIds) -> Option<(EventTable, EventRow)> {
    let base = EventRow {
        event_time: crate::util::time::unix_secs(),
        server_id,
        map: map.to_string(),
        player_id: resolved.single().or_else(|| resolved.killer()),
        victim_id: resolved.victim(),
        ..Default::default()
    };

    match event {
        Event::PlayerConnect { meta, address } => Some((
            EventTable::Connect,
            EventRow {
                team: Some(meta.team.clone()),
                new_name: Some(meta.name.clone()),
                address: Some(address.clone()),
                ..base
            },
        )),
        Event::PlayerEntry { meta } => Some((
            EventTable::Entry,
            EventRow {
                new_name: Some(meta.name.clone()),
                ..base
            },
        )),
        Event::PlayerDisconnect { meta, reason } => Some((
            EventTable::Disconnect,
            EventRow {
                new_name: Some(meta.name.clone()),
                reason: reason.clone(),
                ..base
            },
        )),
        Event::PlayerChangeTeam { meta, team } => Some((
            EventTable::ChangeTeam,
            EventRow {
                new_name: Some(meta.name.clone()),
                team: Some(team.clone()),
                ..base
            },
        )),
        Event::PlayerChangeRole { meta, role } => Some((
            EventTable::ChangeRole,
            EventRow {
                new_name: Some(meta.name.clone()),
                role: Some(role.clone()),
                ..base
            },
        )),
        Event::PlayerChangeName { meta, new_name } => Some((
            EventTable::ChangeName,
            EventRow {
                old_name: Some(meta.name.clone()),
                new_name: Some(new_name.clone()),
                ..base
            },
        )),
        Event::PlayerKill {
            meta,
            weapon,
            headshot,
            killer_pos,
            victim_pos,
        } => Some((
            EventTable::Frag,
            EventRow {
                killer_team: Some(meta.killer.team.clone()),
                victim_team: Some(meta.victim.team.clone()),
                weapon: Some(weapon.clone()),
                headshot: Some(*headshot),
                pos: *killer_pos,
                victim_pos: *victim_pos,
                ..base
            },
        )),
        Event::PlayerTeamkill {
            meta,
            weapon,
            headshot,
            killer_pos,
            victim_pos,
        } => Some((
            EventTable::Teamkill,
            EventRow {
                killer_team: Some(meta.killer.team.clone()),
                victim_team: Some(meta.victim.team.clone()),
                weapon: Some(weapon.clone()),
                headshot: Some(*headshot),
                pos: *killer_pos,
                victim_pos: *victim_pos,
                ..base
            },
        )),
        Event::PlayerSuicide { meta, weapon } => Some((
            EventTable::Suicide,
            EventRow {
                new_name: Some(meta.name.clone()),
                weapon: Some(weapon.clone()),
                ..base
            },
        )),
        Event::Chat { meta, message, dead } => Some((
            EventTable::Chat,
            EventRow {
                new_name: Some(meta.name.clone()),
                message: Some(message.clone()),
                dead: Some(*dead),
                ..base
            },
        )),
        // ACTION_* family is persisted by the Match Handler, not here (§4.6).
        Event::ActionPlayer { .. }
        | Event::ActionPlayerPlayer { .. }
        | Event::ActionTeam { .. }
        | Event::ActionWorld { .. } => None,
        // State-only events write no row.
        Event::RoundStart | Event::RoundEnd { .. } | Event::TeamWin { .. } | Event::MapChange { .. } => None,
    }
}

/// Per-server current-map tracking for event-row `map` population and for
/// the Match Handler's `MAP_CHANGE` finalization. Owned by the engine since
/// it's needed before dispatch, not just inside one handler.
pub struct ProcessingEngine<S> {
    store: std::sync::Arc<S>,
    publisher: std::sync::Arc<BroadcastPublisher>,
    match_handler: MatchHandler,
    maps: dashmap::DashMap<i64, String>,
    log_bots: bool,
}

impl<S: Storage + Send + Sync + 'static> ProcessingEngine<S> {
    pub fn new(store: std::sync::Arc<S>, publisher: std::sync::Arc<BroadcastPublisher>) -> Self {
        Self::with_log_bots(store, publisher, false)
    }

    /// `log_bots` (§6 control surface): whether bot connect/disconnect
    /// chatter is worth an info-level log line, same as a real HLstats
    /// daemon's `log_bots` ini setting.
    pub fn with_log_bots(
        store: std::sync::Arc<S>,
        publisher: std::sync::Arc<BroadcastPublisher>,
        log_bots: bool,
    ) -> Self {
        Self {
            store,
            publisher,
            match_handler: MatchHandler::new(),
            maps: dashmap::DashMap::new(),
            log_bots,
        }
    }

    /// Parses and dispatches one normalized log line for `server_id` (§2, §5).
    /// Returns `Ok(())` even for lines that are ignored/unsupported — those
    /// are not pipeline failures, just no-ops.
    pub async fn process_line(&self, server_id: i64, game: &str, line: &str) {
        let parser = parser_for_game(game);
        let event = match parser.parse(line, server_id) {
            Ok(event) => event,
            Err(ParseError::Ignored) => return,
            Err(ParseError::Unsupported) => {
                debug!(server_id, line, "unsupported log line");
                return;
            }
        };

        if let Err(e) = self.dispatch(server_id, game, event).await {
            warn!(server_id, error = %e, "event pipeline failed, dropping packet");
        }
    }

    async fn dispatch(&self, server_id: i64, game: &str, event: Event) -> Result<(), HandlerError> {
        if let Event::MapChange { new_map, .. } = &event {
            self.maps.insert(server_id, new_map.clone());
        }
        let map = self
            .maps
            .get(&server_id)
            .map(|m| m.clone())
            .unwrap_or_default();

        // Identity resolution runs once, ahead of persist (§2, §5's fixed
        // stage order), and the resolved ids are threaded into every later
        // stage instead of each handler re-resolving the same steam id.
        let resolver = IdentityResolver::new(&*self.store);
        let resolved = resolver.resolve_for_event(game, &event).await?;

        self.log_connect_disconnect(server_id, &event);

        if let Some((table, row)) = event_row(server_id, &map, &event, &resolved) {
            self.store.create_event(table, row).await?;
        }

        let server_stats = ServerStatsHandler::new(&*self.publisher);
        server_stats.handle(&*self.store, server_id, &event).await?;

        let player_handler = PlayerHandler::new(&*self.store, &*self.store);
        player_handler.handle(game, &event, &resolved).await?;

        let weapon_handler = WeaponHandler::new(&*self.store);
        weapon_handler.handle(game, server_id, &map, &event, &resolved).await?;

        self.match_handler
            .handle(&*self.store, &*self.store, &*self.store, server_id, game, &map, &event, &resolved)
            .await?;

        Ok(())
    }

    /// `log_bots` control-surface input (§6): bot connects/disconnects are
    /// only worth an info-level line when the operator opted in, matching a
    /// real HLstats daemon's `log_bots` ini switch. Human connects/
    /// disconnects always log.
    fn log_connect_disconnect(&self, server_id: i64, event: &Event) {
        let (verb, meta) = match event {
            Event::PlayerConnect { meta, .. } => ("connected", meta),
            Event::PlayerDisconnect { meta, .. } => ("disconnected", meta),
            _ => return,
        };
        if is_bot(&meta.steam_id) && !self.log_bots {
            return;
        }
        info!(server_id, player = %meta.name, verb, "player connect/disconnect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::{NewServer, ServerService};

    async fn new_engine() -> (ProcessingEngine<MemoryStore>, i64) {
        let store = std::sync::Arc::new(MemoryStore::new());
        let server = store
            .create_server(NewServer {
                address: "10.0.0.1".into(),
                port: 27015,
                name: "test server".into(),
                game: "cstrike".into(),
            })
            .await
            .unwrap();
        let publisher = std::sync::Arc::new(BroadcastPublisher::new(8));
        let engine = ProcessingEngine::new(std::sync::Arc::clone(&store), publisher);
        (engine, server.server_id)
    }

    fn line(body: &str) -> String {
        format!("L 07/15/2024 - 22:33:10: {}", body)
    }

    #[tokio::test]
    async fn cross_team_headshot_kill_writes_one_frag_row_with_resolved_ids() {
        let (engine, server_id) = new_engine().await;
        engine
            .process_line(
                server_id,
                "cstrike",
                &line(r#""K<2><STEAM_1:0:111><TERRORIST>" killed "V<3><STEAM_1:0:222><CT>" with "ak47" (headshot)"#),
            )
            .await;

        let events = engine.store.events();
        assert_eq!(events.len(), 1);
        let (table, row) = &events[0];
        assert_eq!(*table, EventTable::Frag);
        assert!(row.player_id.is_some());
        assert!(row.victim_id.is_some());
        assert_ne!(row.player_id, row.victim_id);
        assert_eq!(row.headshot, Some(true));

        let frags = engine.store.frags();
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].weapon, "ak47");
        assert!(frags[0].headshot);

        let killer = engine.store.find_player(frags[0].killer_id).await.unwrap().unwrap();
        let victim = engine.store.find_player(frags[0].victim_id).await.unwrap().unwrap();
        assert_eq!(killer.kills, 1);
        assert_eq!(victim.deaths, 1);
    }

    #[tokio::test]
    async fn same_team_kill_writes_teamkill_row_not_frag() {
        let (engine, server_id) = new_engine().await;
        engine
            .process_line(
                server_id,
                "cstrike",
                &line(r#""K<2><STEAM_1:0:111><CT>" killed "V<3><STEAM_1:0:222><CT>" with "ak47""#),
            )
            .await;

        let events = engine.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EventTable::Teamkill);
        assert!(engine.store.frags().is_empty());
    }

    #[tokio::test]
    async fn suicide_writes_one_suicide_row_for_the_resolved_player() {
        let (engine, server_id) = new_engine().await;
        engine
            .process_line(
                server_id,
                "cstrike",
                &line(r#""P<2><STEAM_1:0:111><TERRORIST>" committed suicide with "world""#),
            )
            .await;

        let events = engine.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EventTable::Suicide);
        assert!(events[0].1.player_id.is_some());
        assert!(events[0].1.victim_id.is_none());
    }

    #[tokio::test]
    async fn player_action_persists_row_and_bumps_action_count() {
        let (engine, server_id) = new_engine().await;
        engine
            .process_line(
                server_id,
                "cstrike",
                &line(r#""P<2><STEAM_1:0:111><TERRORIST>" [100 200 30] triggered "Planted_The_Bomb""#),
            )
            .await;

        let events = engine.store.events();
        assert_eq!(events.len(), 1);
        let (table, row) = &events[0];
        assert_eq!(*table, EventTable::PlayerAction);
        assert_eq!(row.code.as_deref(), Some("Planted_The_Bomb"));
        assert!(row.player_id.is_some());

        let server = engine.store.get_server(server_id).await.unwrap().unwrap();
        assert_eq!(server.bombs_planted, 1);
    }

    #[tokio::test]
    async fn world_action_persists_a_world_action_row() {
        let (engine, server_id) = new_engine().await;
        engine
            .process_line(server_id, "cstrike", &line(r#"World triggered "Round_Draw""#))
            .await;
        // Round_Draw is a round-lifecycle event, not ACTION_WORLD: no row.
        assert!(engine.store.events().is_empty());

        engine
            .process_line(server_id, "cstrike", &line(r#"World triggered "Intermission_Start""#))
            .await;
        let events = engine.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EventTable::WorldAction);
        assert_eq!(events[0].1.code.as_deref(), Some("Intermission_Start"));
    }

    #[tokio::test]
    async fn unresolvable_disconnect_is_swallowed_without_failing_the_pipeline() {
        let (engine, server_id) = new_engine().await;
        engine
            .process_line(
                server_id,
                "cstrike",
                &line(r#""P<2><garbage><TERRORIST>" disconnected"#),
            )
            .await;
        assert!(engine.store.events().is_empty());
    }
}
