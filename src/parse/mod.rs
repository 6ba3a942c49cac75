//! Per-game log parsers (§4.4). One parser per game family, selected by the
//! `game` string the Server Registry resolved for a source.

pub mod cstrike;
pub mod event;
pub mod tokens;

pub use event::{DualPlayerMeta, Event, PlayerMeta};

/// Reasons a line fails to produce an event. Mirrors §4.4's two negative
/// outcomes: explicitly-filtered chatter vs. an unrecognized grammar.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("IGNORED")]
    Ignored,

    #[error("Unsupported log line")]
    Unsupported,
}

/// A per-game parser. Implementations own contextual per-server state (the
/// current map) and must be safe to hold behind a single shared reference
/// across worker shards — per-server ordering is enforced upstream by the
/// engine, not by the parser itself (§5).
pub trait Parser: Send + Sync {
    /// True iff the normalized line starts with the canonical `L ` prefix.
    fn can_parse(&self, line: &str) -> bool {
        line.starts_with("L ")
    }

    fn parse(&self, line: &str, server_id: i64) -> Result<Event, ParseError>;
}

/// Select a parser implementation by game family. Only `cstrike`-family
/// games are specified in full (§4.4); unrecognized games fall back to the
/// same grammar since the wire format is shared across the Source-engine
/// family this daemon targets.
pub fn parser_for_game(_game: &str) -> &'static dyn Parser {
    static CSTRIKE: once_cell::sync::Lazy<cstrike::CstrikeParser> =
        once_cell::sync::Lazy::new(cstrike::CstrikeParser::new);
    &*CSTRIKE
}
