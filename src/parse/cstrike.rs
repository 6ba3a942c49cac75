//! Counter-Strike family parser (§4.4), specified in full. Other Source-
//! engine games share this grammar (see `parser_for_game`).

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use super::event::{DualPlayerMeta, Event};
use super::tokens::{extract_player, parse_position, PLAYER_TOKEN};
use super::{ParseError, Parser};

static TIMESTAMP_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^L \d{2}/\d{2}/\d{4} - \d{2}:\d{2}:\d{2}: ").unwrap());

static IGNORE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\[META\]",
        r"^Server shutdown$",
        r"^Log file (closed|started)",
        r"^Loading map ",
        r"^Server cvar",
        r"^Server cvars ",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static KILL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<killer>"[^"]*<\d+><[^>]*><[^>]*>") killed (?P<victim>"[^"]*<\d+><[^>]*><[^>]*>") with "(?P<weapon>[^"]*)"(?P<headshot> \(headshot\))?$"#,
    )
    .unwrap()
});

static SUICIDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"[^"]*<\d+><[^>]*><[^>]*>" committed suicide with "(?P<weapon>[^"]*)"$"#).unwrap()
});

static TEAM_ACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^Team "(?P<team>[^"]*)" triggered "(?P<code>[^"]*)""#).unwrap());

static MAP_CHANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^Started map "(?P<map>[^"]*)""#).unwrap());

static WORLD_ACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^World triggered "(?P<code>[^"]*)""#).unwrap());

static PLAYER_ACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"[^"]*<\d+><[^>]*><[^>]*>"(?P<pos> \[[^\]]*\])? triggered "(?P<code>[^"]*)""#).unwrap()
});

static CONNECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"[^"]*<\d+><[^>]*><[^>]*>" connected, address "(?P<addr>[^"]*)""#).unwrap()
});

static ENTERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^"[^"]*<\d+><[^>]*><[^>]*>" entered the game$"#).unwrap());

static DISCONNECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^"[^"]*<\d+><[^>]*><[^>]*>" disconnected(?: \(reason "(?P<reason>[^"]*)"\))?$"#).unwrap());

static CHAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"[^"]*<\d+><[^>]*><[^>]*>" say "(?P<msg>[^"]*)"(?P<dead> \(dead\))?$"#).unwrap()
});

/// `World triggered` codes that map to round lifecycle rather than `ACTION_WORLD` (§4.4.1 step 7)
fn round_event_for_code(code: &str) -> Option<Event> {
    match code {
        "Round_Start" | "Game_Commencing" => Some(Event::RoundStart),
        "Round_End" => Some(Event::RoundEnd {
            duration: None,
            winning_team: None,
        }),
        "Round_Draw" => Some(Event::RoundEnd {
            duration: None,
            winning_team: Some("DRAW".to_string()),
        }),
        _ => None,
    }
}

pub struct CstrikeParser {
    current_maps: DashMap<i64, String>,
}

impl CstrikeParser {
    pub fn new() -> Self {
        Self {
            current_maps: DashMap::new(),
        }
    }

    fn strip_timestamp(line: &str) -> &str {
        match TIMESTAMP_PREFIX.find(line) {
            Some(m) => &line[m.end()..],
            None => line,
        }
    }

    fn is_ignored(body: &str) -> bool {
        IGNORE_PATTERNS.iter().any(|re| re.is_match(body))
    }
}

impl Default for CstrikeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for CstrikeParser {
    fn parse(&self, line: &str, server_id: i64) -> Result<Event, ParseError> {
        if !self.can_parse(line) {
            return Err(ParseError::Unsupported);
        }
        let body = Self::strip_timestamp(line);

        // Step 1: filter chatter
        if Self::is_ignored(body) {
            return Err(ParseError::Ignored);
        }

        // Steps 2-3: teamkill (same-team) before generic kill (cross-team)
        if let Some(caps) = KILL.captures(body) {
            let killer_caps = PLAYER_TOKEN.captures(&caps["killer"]).ok_or(ParseError::Unsupported)?;
            let victim_caps = PLAYER_TOKEN.captures(&caps["victim"]).ok_or(ParseError::Unsupported)?;
            let killer = extract_player(&killer_caps);
            let victim = extract_player(&victim_caps);
            let weapon = caps["weapon"].to_string();
            let headshot = caps.name("headshot").is_some();
            let meta = DualPlayerMeta {
                killer: super::event::PlayerMeta {
                    steam_id: killer.steam_id,
                    name: killer.name,
                    team: killer.team.clone(),
                },
                victim: super::event::PlayerMeta {
                    steam_id: victim.steam_id,
                    name: victim.name,
                    team: victim.team.clone(),
                },
            };
            return if killer.team == victim.team {
                Ok(Event::PlayerTeamkill {
                    meta,
                    weapon,
                    headshot,
                    killer_pos: None,
                    victim_pos: None,
                })
            } else {
                Ok(Event::PlayerKill {
                    meta,
                    weapon,
                    headshot,
                    killer_pos: None,
                    victim_pos: None,
                })
            };
        }

        // Step 4: suicide
        if let Some(caps) = SUICIDE.captures(body) {
            let player_caps = PLAYER_TOKEN.captures(body).ok_or(ParseError::Unsupported)?;
            let player = extract_player(&player_caps);
            return Ok(Event::PlayerSuicide {
                meta: super::event::PlayerMeta {
                    steam_id: player.steam_id,
                    name: player.name,
                    team: player.team,
                },
                weapon: caps["weapon"].to_string(),
            });
        }

        // Step 5: team-action
        if let Some(caps) = TEAM_ACTION.captures(body) {
            return Ok(Event::ActionTeam {
                team: caps["team"].to_string(),
                code: caps["code"].to_string(),
            });
        }

        // Step 6: map-change
        if let Some(caps) = MAP_CHANGE.captures(body) {
            let new_map = caps["map"].to_string();
            let previous_map = self
                .current_maps
                .insert(server_id, new_map.clone())
                .filter(|prev| prev != &new_map);
            return Ok(Event::MapChange {
                previous_map,
                new_map,
            });
        }

        // Step 7: world-or-round-action
        if let Some(caps) = WORLD_ACTION.captures(body) {
            let code = &caps["code"];
            if let Some(event) = round_event_for_code(code) {
                return Ok(event);
            }
            return Ok(Event::ActionWorld { code: code.to_string() });
        }

        // Step 8: player-action (objective/generic actions)
        if let Some(caps) = PLAYER_ACTION.captures(body) {
            let player_caps = PLAYER_TOKEN.captures(body).ok_or(ParseError::Unsupported)?;
            let player = extract_player(&player_caps);
            let pos = caps.name("pos").and_then(|m| parse_position(m.as_str()));
            return Ok(Event::ActionPlayer {
                meta: super::event::PlayerMeta {
                    steam_id: player.steam_id,
                    name: player.name,
                    team: player.team,
                },
                code: caps["code"].to_string(),
                pos,
            });
        }

        // Step 9: connect
        if let Some(caps) = CONNECT.captures(body) {
            let player_caps = PLAYER_TOKEN.captures(body).ok_or(ParseError::Unsupported)?;
            let player = extract_player(&player_caps);
            return Ok(Event::PlayerConnect {
                meta: super::event::PlayerMeta {
                    steam_id: player.steam_id,
                    name: player.name,
                    team: player.team,
                },
                address: caps["addr"].to_string(),
            });
        }

        // "Entered the game": not enumerated in the dispatch list but required
        // by the Match/Ranking handlers' round-participant lookups (§4.9.2).
        // Placed immediately after connect, matching real server log order.
        if ENTERED.is_match(body) {
            let player_caps = PLAYER_TOKEN.captures(body).ok_or(ParseError::Unsupported)?;
            let player = extract_player(&player_caps);
            return Ok(Event::PlayerEntry {
                meta: super::event::PlayerMeta {
                    steam_id: player.steam_id,
                    name: player.name,
                    team: player.team,
                },
            });
        }

        // Step 10: disconnect
        if let Some(caps) = DISCONNECT.captures(body) {
            let player_caps = PLAYER_TOKEN.captures(body).ok_or(ParseError::Unsupported)?;
            let player = extract_player(&player_caps);
            return Ok(Event::PlayerDisconnect {
                meta: super::event::PlayerMeta {
                    steam_id: player.steam_id,
                    name: player.name,
                    team: player.team,
                },
                reason: caps.name("reason").map(|m| m.as_str().to_string()),
            });
        }

        // Step 11: chat
        if let Some(caps) = CHAT.captures(body) {
            let player_caps = PLAYER_TOKEN.captures(body).ok_or(ParseError::Unsupported)?;
            let player = extract_player(&player_caps);
            return Ok(Event::Chat {
                meta: super::event::PlayerMeta {
                    steam_id: player.steam_id,
                    name: player.name,
                    team: player.team,
                },
                message: caps["msg"].to_string(),
                dead: caps.name("dead").is_some(),
            });
        }

        Err(ParseError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(body: &str) -> String {
        format!("L 07/15/2024 - 22:33:10: {}", body)
    }

    #[test]
    fn dispatches_cross_team_kill_with_headshot() {
        let parser = CstrikeParser::new();
        let l = line(r#""K<2><STEAM_1:0:111><TERRORIST>" killed "V<3><STEAM_1:0:222><CT>" with "ak47" (headshot)"#);
        let event = parser.parse(&l, 1).unwrap();
        match event {
            Event::PlayerKill { weapon, headshot, meta, .. } => {
                assert_eq!(weapon, "ak47");
                assert!(headshot);
                assert_eq!(meta.killer.team, "TERRORIST");
                assert_eq!(meta.victim.team, "CT");
            }
            other => panic!("expected PlayerKill, got {:?}", other),
        }
    }

    #[test]
    fn dispatches_teamkill_before_generic_kill() {
        let parser = CstrikeParser::new();
        let l = line(r#""K<2><STEAM_1:0:111><CT>" killed "V<3><STEAM_1:0:222><CT>" with "ak47""#);
        let event = parser.parse(&l, 1).unwrap();
        assert!(matches!(event, Event::PlayerTeamkill { .. }));
    }

    #[test]
    fn dispatches_suicide() {
        let parser = CstrikeParser::new();
        let l = line(r#""P<2><STEAM_1:0:111><TERRORIST>" committed suicide with "world""#);
        let event = parser.parse(&l, 1).unwrap();
        assert!(matches!(event, Event::PlayerSuicide { .. }));
    }

    #[test]
    fn filters_ignored_chatter() {
        let parser = CstrikeParser::new();
        let l = line("Server cvar \"sv_gravity\" = \"800\"");
        assert_eq!(parser.parse(&l, 1), Err(ParseError::Ignored));
    }

    #[test]
    fn map_change_reports_previous_map_on_second_change() {
        let parser = CstrikeParser::new();
        let first = line(r#"Started map "de_dust""#);
        let event = parser.parse(&first, 1).unwrap();
        assert_eq!(
            event,
            Event::MapChange {
                previous_map: None,
                new_map: "de_dust".to_string()
            }
        );

        let second = line(r#"Started map "de_inferno""#);
        let event = parser.parse(&second, 1).unwrap();
        assert_eq!(
            event,
            Event::MapChange {
                previous_map: Some("de_dust".to_string()),
                new_map: "de_inferno".to_string()
            }
        );
    }

    #[test]
    fn world_triggered_round_start_and_round_end() {
        let parser = CstrikeParser::new();
        let start = line(r#"World triggered "Round_Start""#);
        assert_eq!(parser.parse(&start, 1).unwrap(), Event::RoundStart);

        let draw = line(r#"World triggered "Round_Draw""#);
        assert_eq!(
            parser.parse(&draw, 1).unwrap(),
            Event::RoundEnd {
                duration: None,
                winning_team: Some("DRAW".to_string())
            }
        );
    }

    #[test]
    fn player_action_captures_objective_code_and_position() {
        let parser = CstrikeParser::new();
        let l = line(r#""P<2><STEAM_1:0:111><TERRORIST>" [100 200 30] triggered "Planted_The_Bomb""#);
        let event = parser.parse(&l, 1).unwrap();
        match event {
            Event::ActionPlayer { code, pos, .. } => {
                assert_eq!(code, "Planted_The_Bomb");
                assert_eq!(pos, Some((100.0, 200.0, 30.0)));
            }
            other => panic!("expected ActionPlayer, got {:?}", other),
        }
    }

    #[test]
    fn connect_then_entered_then_disconnect() {
        let parser = CstrikeParser::new();
        let connect = line(r#""P<1><STEAM_1:0:111><>" connected, address "10.0.0.1:27005""#);
        assert!(matches!(parser.parse(&connect, 1).unwrap(), Event::PlayerConnect { .. }));

        let entered = line(r#""P<1><STEAM_1:0:111><>" entered the game"#);
        assert!(matches!(parser.parse(&entered, 1).unwrap(), Event::PlayerEntry { .. }));

        let disconnect = line(r#""P<1><STEAM_1:0:111><>" disconnected (reason "Kicked")"#);
        match parser.parse(&disconnect, 1).unwrap() {
            Event::PlayerDisconnect { reason, .. } => assert_eq!(reason, Some("Kicked".to_string())),
            other => panic!("expected PlayerDisconnect, got {:?}", other),
        }
    }

    #[test]
    fn chat_with_dead_flag() {
        let parser = CstrikeParser::new();
        let l = line(r#""P<1><STEAM_1:0:111><CT>" say "gg" (dead)"#);
        match parser.parse(&l, 1).unwrap() {
            Event::Chat { message, dead, .. } => {
                assert_eq!(message, "gg");
                assert!(dead);
            }
            other => panic!("expected Chat, got {:?}", other),
        }
    }
}
