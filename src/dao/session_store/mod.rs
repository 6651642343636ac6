/// In-process store.
pub mod memory;
/// MongoDB store.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;

use crate::dao::models::{
    Attribution, DeathEntity, PlayerEntity, SessionEntity, UserEntity,
};
use crate::dao::storage::StorageResult;
use crate::state::roles::Faction;

/// Abstraction over the persistence layer for users, sessions and players.
///
/// Every mutating method is a conditional write: its precondition is evaluated atomically with
/// the write and a failed precondition yields [`StorageError::Conflict`], distinct from
/// [`StorageError::NotFound`] (no such session) and [`StorageError::Unavailable`].
///
/// [`StorageError::Conflict`]: crate::dao::storage::StorageError::Conflict
/// [`StorageError::NotFound`]: crate::dao::storage::StorageError::NotFound
/// [`StorageError::Unavailable`]: crate::dao::storage::StorageError::Unavailable
pub trait SessionStore: Send + Sync {
    fn find_user(&self, user_id: String) -> BoxFuture<'static, StorageResult<Option<UserEntity>>>;
    fn save_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>>;

    /// Insert a new session. Conflicts when the code is already taken.
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_session(&self, code: String)
    -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Players in join order. Fails `NotFound` for an unknown session.
    fn list_players(&self, code: String) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;
    fn find_player(
        &self,
        code: String,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    /// Codes of every stored session, used to seed the code pool at startup.
    fn list_session_codes(&self) -> BoxFuture<'static, StorageResult<Vec<String>>>;

    /// Add a player. Requires LOBBY and no existing row for the user.
    fn join_player(&self, code: String, player: PlayerEntity)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Remove a player. Requires LOBBY and an existing row.
    fn leave_player(&self, code: String, user_id: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Set the ready flag. Requires LOBBY and an existing row.
    fn set_player_ready(
        &self,
        code: String,
        user_id: String,
        ready: bool,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Move LOBBY to PREGAME and store the assigned players. Requires the caller to own the
    /// session and the roster revision to still be `revision`.
    fn launch_session(
        &self,
        code: String,
        caller_id: String,
        revision: u64,
        players: Vec<PlayerEntity>,
        launched_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Move PREGAME to INGAME. Requires the caller to own the session.
    fn start_session(
        &self,
        code: String,
        caller_id: String,
        started_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Record a death. Requires INGAME and the victim to be alive.
    fn mark_player_dead(
        &self,
        code: String,
        victim_id: String,
        death: DeathEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Attach a killer to a death. Requires POSTPENDING and the victim's killer to be unknown.
    fn record_killer_confirmation(
        &self,
        code: String,
        victim_id: String,
        killer: Attribution,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Move INGAME to POSTPENDING and record the winner.
    fn transition_to_pending(
        &self,
        code: String,
        winner: Faction,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Move POSTPENDING to POSTGAME.
    fn transition_to_complete(&self, code: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Record the rematch lobby. Requires POSTGAME and no successor yet.
    fn set_successor(&self, code: String, next_code: String)
    -> BoxFuture<'static, StorageResult<()>>;

    /// Delete the session and its players. Requires a non-terminal phase.
    fn close_session(&self, code: String) -> BoxFuture<'static, StorageResult<()>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
