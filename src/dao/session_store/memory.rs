//! Process-local [`SessionStore`] used for development runs and tests.
//!
//! Each conditional write checks its precondition and mutates while holding the `DashMap` entry
//! guard for the session, which makes check-and-write atomic within the process.

use std::{sync::Arc, time::SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::{
    dao::{
        models::{Attribution, DeathEntity, PlayerEntity, SessionEntity, UserEntity},
        session_store::SessionStore,
        storage::{StorageError, StorageResult},
    },
    state::{roles::Faction, state_machine::SessionPhase},
};

/// [`SessionStore`] keeping everything in process memory.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    users: DashMap<String, UserEntity>,
    sessions: DashMap<String, SessionRecord>,
}

struct SessionRecord {
    session: SessionEntity,
    players: IndexMap<String, PlayerEntity>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, code: &str, read: impl FnOnce(&SessionRecord) -> T) -> StorageResult<T> {
        self.inner
            .sessions
            .get(code)
            .map(|record| read(&record))
            .ok_or_else(|| StorageError::not_found(code))
    }

    /// Run `apply` under the session entry lock. `apply` returns `false` when its precondition
    /// does not hold, in which case it must not have mutated anything.
    fn conditional(
        &self,
        operation: &'static str,
        code: &str,
        apply: impl FnOnce(&mut SessionRecord) -> bool,
    ) -> StorageResult<()> {
        let mut record = self
            .inner
            .sessions
            .get_mut(code)
            .ok_or_else(|| StorageError::not_found(code))?;

        if apply(&mut record) {
            Ok(())
        } else {
            Err(StorageError::conflict(operation, code))
        }
    }

    fn roster_update(
        &self,
        operation: &'static str,
        code: &str,
        apply: impl FnOnce(&mut IndexMap<String, PlayerEntity>) -> bool,
    ) -> StorageResult<()> {
        self.conditional(operation, code, |record| {
            if record.session.phase != SessionPhase::Lobby || !apply(&mut record.players) {
                return false;
            }
            record.session.revision += 1;
            true
        })
    }
}

impl SessionStore for MemorySessionStore {
    fn find_user(&self, user_id: String) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .users
                .get(&user_id)
                .map(|user| user.value().clone()))
        })
    }

    fn save_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.users.insert(user.id.clone(), user);
            Ok(())
        })
    }

    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            match store.inner.sessions.entry(session.code.clone()) {
                Entry::Occupied(_) => {
                    Err(StorageError::conflict("create_session", session.code))
                }
                Entry::Vacant(slot) => {
                    slot.insert(SessionRecord {
                        session,
                        players: IndexMap::new(),
                    });
                    Ok(())
                }
            }
        })
    }

    fn find_session(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .sessions
                .get(&code)
                .map(|record| record.session.clone()))
        })
    }

    fn list_players(&self, code: String) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.read(&code, |record| record.players.values().cloned().collect())
        })
    }

    fn find_player(
        &self,
        code: String,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.read(&code, |record| record.players.get(&user_id).cloned()) })
    }

    fn list_session_codes(&self) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .sessions
                .iter()
                .map(|entry| entry.key().clone())
                .collect())
        })
    }

    fn join_player(
        &self,
        code: String,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.roster_update("join_player", &code, |players| {
                if players.contains_key(&player.user_id) {
                    return false;
                }
                players.insert(player.user_id.clone(), player);
                true
            })
        })
    }

    fn leave_player(&self, code: String, user_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.roster_update("leave_player", &code, |players| {
                players.shift_remove(&user_id).is_some()
            })
        })
    }

    fn set_player_ready(
        &self,
        code: String,
        user_id: String,
        ready: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.roster_update("set_player_ready", &code, |players| {
                match players.get_mut(&user_id) {
                    Some(player) => {
                        player.ready = ready;
                        true
                    }
                    None => false,
                }
            })
        })
    }

    fn launch_session(
        &self,
        code: String,
        caller_id: String,
        revision: u64,
        players: Vec<PlayerEntity>,
        launched_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.conditional("launch_session", &code, |record| {
                let session = &mut record.session;
                if session.phase != SessionPhase::Lobby
                    || !session.is_owned_by(&caller_id)
                    || session.revision != revision
                {
                    return false;
                }
                session.phase = SessionPhase::Pregame;
                session.launched_at = Some(launched_at);
                session.revision += 1;
                record.players = players
                    .into_iter()
                    .map(|player| (player.user_id.clone(), player))
                    .collect();
                true
            })
        })
    }

    fn start_session(
        &self,
        code: String,
        caller_id: String,
        started_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.conditional("start_session", &code, |record| {
                let session = &mut record.session;
                if session.phase != SessionPhase::Pregame || !session.is_owned_by(&caller_id) {
                    return false;
                }
                session.phase = SessionPhase::Ingame;
                session.started_at = Some(started_at);
                true
            })
        })
    }

    fn mark_player_dead(
        &self,
        code: String,
        victim_id: String,
        death: DeathEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.conditional("mark_player_dead", &code, |record| {
                if record.session.phase != SessionPhase::Ingame {
                    return false;
                }
                match record.players.get_mut(&victim_id) {
                    Some(victim) if victim.is_alive() => {
                        victim.death = Some(death);
                        true
                    }
                    _ => false,
                }
            })
        })
    }

    fn record_killer_confirmation(
        &self,
        code: String,
        victim_id: String,
        killer: Attribution,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.conditional("record_killer_confirmation", &code, |record| {
                if record.session.phase != SessionPhase::PostPending {
                    return false;
                }
                let Some(death) = record
                    .players
                    .get_mut(&victim_id)
                    .and_then(|victim| victim.death.as_mut())
                else {
                    return false;
                };
                if !death.killer.is_unknown() {
                    return false;
                }
                death.killer = killer;
                true
            })
        })
    }

    fn transition_to_pending(
        &self,
        code: String,
        winner: Faction,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.conditional("transition_to_pending", &code, |record| {
                let session = &mut record.session;
                if session.phase != SessionPhase::Ingame {
                    return false;
                }
                session.phase = SessionPhase::PostPending;
                session.winning_team = Some(winner);
                session.ended_at = Some(ended_at);
                true
            })
        })
    }

    fn transition_to_complete(&self, code: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.conditional("transition_to_complete", &code, |record| {
                if record.session.phase != SessionPhase::PostPending {
                    return false;
                }
                record.session.phase = SessionPhase::PostGame;
                true
            })
        })
    }

    fn set_successor(
        &self,
        code: String,
        next_code: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.conditional("set_successor", &code, |record| {
                let session = &mut record.session;
                if session.phase != SessionPhase::PostGame || session.next_code.is_some() {
                    return false;
                }
                session.next_code = Some(next_code);
                true
            })
        })
    }

    fn close_session(&self, code: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let removed = store
                .inner
                .sessions
                .remove_if(&code, |_, record| !record.session.phase.is_terminal());
            match removed {
                Some(_) => Ok(()),
                None if store.inner.sessions.contains_key(&code) => {
                    Err(StorageError::conflict("close_session", code))
                }
                None => Err(StorageError::not_found(code)),
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby(code: &str, owner: &UserEntity) -> SessionEntity {
        SessionEntity::new(code.into(), "friday night".into(), owner)
    }

    #[tokio::test]
    async fn create_rejects_a_taken_code() {
        let store = MemorySessionStore::new();
        let owner = UserEntity::new("u1", "Ada");
        store.create_session(lobby("ABCDE", &owner)).await.unwrap();

        let err = store
            .create_session(lobby("ABCDE", &owner))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn roster_writes_bump_revision_and_require_lobby() {
        let store = MemorySessionStore::new();
        let owner = UserEntity::new("u1", "Ada");
        store.create_session(lobby("ABCDE", &owner)).await.unwrap();

        store
            .join_player("ABCDE".into(), PlayerEntity::joining(&owner))
            .await
            .unwrap();
        store
            .set_player_ready("ABCDE".into(), "u1".into(), true)
            .await
            .unwrap();
        let session = store.find_session("ABCDE".into()).await.unwrap().unwrap();
        assert_eq!(session.revision, 2);

        let err = store
            .join_player("ABCDE".into(), PlayerEntity::joining(&owner))
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "duplicate join must conflict");

        let players = store.list_players("ABCDE".into()).await.unwrap();
        store
            .launch_session("ABCDE".into(), "u1".into(), 2, players, SystemTime::now())
            .await
            .unwrap();

        let err = store
            .set_player_ready("ABCDE".into(), "u1".into(), false)
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "roster is frozen after launch");
    }

    #[tokio::test]
    async fn launch_requires_owner_and_current_revision() {
        let store = MemorySessionStore::new();
        let owner = UserEntity::new("u1", "Ada");
        store.create_session(lobby("ABCDE", &owner)).await.unwrap();

        let err = store
            .launch_session("ABCDE".into(), "u2".into(), 0, vec![], SystemTime::now())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let err = store
            .launch_session("ABCDE".into(), "u1".into(), 7, vec![], SystemTime::now())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn a_game_starts_only_once() {
        let store = MemorySessionStore::new();
        let owner = UserEntity::new("u1", "Ada");
        store.create_session(lobby("ABCDE", &owner)).await.unwrap();
        store
            .launch_session("ABCDE".into(), "u1".into(), 0, vec![], SystemTime::now())
            .await
            .unwrap();

        let err = store
            .start_session("ABCDE".into(), "u2".into(), SystemTime::now())
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "only the owner starts");

        let started_at = SystemTime::now();
        store
            .start_session("ABCDE".into(), "u1".into(), started_at)
            .await
            .unwrap();
        let err = store
            .start_session("ABCDE".into(), "u1".into(), SystemTime::now())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let session = store.find_session("ABCDE".into()).await.unwrap().unwrap();
        assert_eq!(session.phase, SessionPhase::Ingame);
        assert_eq!(session.started_at, Some(started_at));
    }

    #[tokio::test]
    async fn unknown_session_is_not_a_conflict() {
        let store = MemorySessionStore::new();
        let err = store.transition_to_complete("NOPE".into()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn close_refuses_finished_sessions() {
        let store = MemorySessionStore::new();
        let owner = UserEntity::new("u1", "Ada");
        let mut finished = lobby("DONEE", &owner);
        finished.phase = SessionPhase::PostGame;
        store.create_session(finished).await.unwrap();
        store.create_session(lobby("OPENN", &owner)).await.unwrap();

        assert!(store.close_session("DONEE".into()).await.unwrap_err().is_conflict());
        store.close_session("OPENN".into()).await.unwrap();
        assert!(store.find_session("OPENN".into()).await.unwrap().is_none());
    }
}
