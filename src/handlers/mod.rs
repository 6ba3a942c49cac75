//! Kind-specific handler fan-out (§4.7-§4.11). Each handler is independent
//! and reads/writes only through the storage capability slice it's given
//! (§9 design note).

pub mod match_handler;
pub mod player;
pub mod ranking;
pub mod server_stats;
pub mod weapon;

use crate::identity::IdentityError;
use crate::store::StoreError;

/// Maps a `Team "<T>" triggered "<code>"` code to whether it represents a
/// round win (§4.4.1 does not enumerate team-action codes explicitly; this
/// recognizes the common `*_Win` convention). Shared by the Match Handler
/// (round/score bookkeeping) and the Server-Stats Handler (the single
/// `ctWins`/`tsWins` counter owner, §8 invariant 5).
pub fn is_team_win_code(code: &str) -> bool {
    code.to_ascii_lowercase().ends_with("_win")
}

/// A handler failure collapses the current packet's pipeline task (§7
/// TransientStorage); it never escapes past the worker loop.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("identity resolution error: {0}")]
    Identity(#[from] IdentityError),

    #[error("missing player row for playerId {0}")]
    MissingPlayer(i64),
}
