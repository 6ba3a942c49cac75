//! Player token grammar (§4.4.2): `"<name>"<uid><steamId><team>`

use once_cell::sync::Lazy;
use regex::Regex;

use super::event::Pos;

/// Matches a full player token: capturing name, uid (unused beyond matching),
/// raw steamId, and team.
pub static PLAYER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]*)<(\d+)><([^>]*)><([^>]*)>""#).unwrap());

pub static POSITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\s+(-?\d+(?:\.\d+)?)\]").unwrap());

const MAX_NAME_LEN: usize = 48;

/// Raw player identity extracted from a token, prior to SteamID canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPlayer {
    pub name: String,
    pub steam_id: String,
    pub team: String,
}

/// Sanitize a player name per §4.4.2: trim, collapse internal whitespace to
/// `_`, strip characters outside `[A-Za-z0-9_-]`, truncate to 48 code units.
pub fn sanitize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let collapsed = trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    let filtered: String = collapsed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    filtered.chars().take(MAX_NAME_LEN).collect()
}

/// Extract `(name, steamId, team)` from a single player token match.
pub fn extract_player(caps: &regex::Captures) -> RawPlayer {
    RawPlayer {
        name: sanitize_name(&caps[1]),
        steam_id: caps[3].to_string(),
        team: caps[4].to_string(),
    }
}

/// Parse an optional trailing `[x y z]` position block.
pub fn parse_position(text: &str) -> Option<Pos> {
    let caps = POSITION.captures(text)?;
    let x: f64 = caps[1].parse().ok()?;
    let y: f64 = caps[2].parse().ok()?;
    let z: f64 = caps[3].parse().ok()?;
    Some((x, y, z))
}

/// A bot is recognized when the uppercased identifier equals `BOT` or begins
/// with `BOT_` (§4.4.2).
pub fn is_bot(steam_id: &str) -> bool {
    let upper = steam_id.to_ascii_uppercase();
    upper == "BOT" || upper.starts_with("BOT_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_whitespace_and_strips_symbols() {
        assert_eq!(sanitize_name("  Foo   Bar!!  "), "Foo_Bar");
    }

    #[test]
    fn sanitize_truncates_to_48_units() {
        let long = "a".repeat(60);
        assert_eq!(sanitize_name(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn extracts_player_token_fields() {
        let caps = PLAYER_TOKEN
            .captures(r#""Killer<2><STEAM_1:0:111><TERRORIST>""#)
            .unwrap();
        let player = extract_player(&caps);
        assert_eq!(player.name, "Killer");
        assert_eq!(player.steam_id, "STEAM_1:0:111");
        assert_eq!(player.team, "TERRORIST");
    }

    #[test]
    fn is_bot_matches_bot_and_bot_prefixed() {
        assert!(is_bot("BOT"));
        assert!(is_bot("bot_Ramirez"));
        assert!(!is_bot("STEAM_1:0:111"));
    }
}
