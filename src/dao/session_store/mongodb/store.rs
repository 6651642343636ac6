use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{Bson, DateTime, Document, doc},
    error::{Error as MongoError, ErrorKind, WriteFailure},
};
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoPlayerDocument, MongoSessionDocument, MongoUserDocument, death_entry},
};
use crate::{
    dao::{
        models::{Attribution, DeathEntity, PlayerEntity, SessionEntity, UserEntity},
        session_store::SessionStore,
        storage::{StorageError, StorageResult},
    },
    state::{roles::Faction, state_machine::SessionPhase},
};

const SESSION_COLLECTION_NAME: &str = "sessions";
const USER_COLLECTION_NAME: &str = "users";
const DUPLICATE_KEY: i32 = 11000;

/// [`SessionStore`] backed by MongoDB. Players are embedded in their session document and every
/// precondition is part of the update filter, so a write either lands with its precondition or
/// matches nothing.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

fn by_code(code: &str) -> Document {
    doc! { "_id": code }
}

fn in_phase(code: &str, phase: SessionPhase) -> Document {
    doc! { "_id": code, "phase": phase.as_str() }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        Ok(Self { inner })
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn users(&self) -> Collection<MongoUserDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoUserDocument>(USER_COLLECTION_NAME)
    }

    async fn load(&self, code: &str) -> StorageResult<Option<MongoSessionDocument>> {
        let collection = self.sessions().await;
        let document = collection
            .find_one(by_code(code))
            .await
            .map_err(|source| MongoDaoError::LoadSession {
                code: code.to_owned(),
                source,
            })?;
        Ok(document)
    }

    async fn load_existing(&self, code: &str) -> StorageResult<MongoSessionDocument> {
        self.load(code)
            .await?
            .ok_or_else(|| StorageError::not_found(code))
    }

    /// Map a write that matched nothing to `NotFound` or `Conflict` depending on whether the
    /// session still exists.
    async fn unmatched(&self, operation: &'static str, code: String) -> StorageError {
        let collection = self.sessions().await;
        match collection.count_documents(by_code(&code)).await {
            Ok(0) => StorageError::not_found(code),
            Ok(_) => StorageError::conflict(operation, code),
            Err(source) => MongoDaoError::LoadSession { code, source }.into(),
        }
    }

    async fn conditional_update(
        &self,
        operation: &'static str,
        code: String,
        filter: Document,
        update: Document,
    ) -> StorageResult<()> {
        let collection = self.sessions().await;
        let result = collection
            .update_one(filter, update)
            .await
            .map_err(|source| MongoDaoError::WriteSession {
                code: code.clone(),
                operation,
                source,
            })?;

        if result.matched_count == 0 {
            return Err(self.unmatched(operation, code).await);
        }
        Ok(())
    }

    async fn find_user(&self, id: String) -> StorageResult<Option<UserEntity>> {
        let collection = self.users().await;
        let document = collection
            .find_one(doc! { "_id": id.as_str() })
            .await
            .map_err(|source| MongoDaoError::LoadUser { id, source })?;
        Ok(document.map(Into::into))
    }

    async fn save_user(&self, user: UserEntity) -> StorageResult<()> {
        let id = user.id.clone();
        let document: MongoUserDocument = user.into();
        let collection = self.users().await;
        collection
            .replace_one(doc! { "_id": id.as_str() }, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveUser { id, source })?;
        Ok(())
    }

    async fn create_session(&self, session: SessionEntity) -> StorageResult<()> {
        let code = session.code.clone();
        let document = MongoSessionDocument::lobby(session);
        let collection = self.sessions().await;
        match collection.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => {
                Err(StorageError::conflict("create_session", code))
            }
            Err(source) => Err(MongoDaoError::WriteSession {
                code,
                operation: "create_session",
                source,
            }
            .into()),
        }
    }

    async fn list_session_codes(&self) -> StorageResult<Vec<String>> {
        let collection = self.sessions().await;
        let documents: Vec<MongoSessionDocument> = collection
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListSessions { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListSessions { source })?;

        Ok(documents.into_iter().map(|document| document.code).collect())
    }

    async fn join_player(&self, code: String, player: PlayerEntity) -> StorageResult<()> {
        let mut filter = in_phase(&code, SessionPhase::Lobby);
        filter.insert("players.user_id", doc! { "$ne": player.user_id.as_str() });
        let update = doc! {
            "$push": { "players": MongoPlayerDocument::lobby_entry(&player) },
            "$inc": { "revision": 1_i64 },
        };
        self.conditional_update("join_player", code, filter, update)
            .await
    }

    async fn leave_player(&self, code: String, user_id: String) -> StorageResult<()> {
        let mut filter = in_phase(&code, SessionPhase::Lobby);
        filter.insert("players.user_id", user_id.as_str());
        let update = doc! {
            "$pull": { "players": { "user_id": user_id.as_str() } },
            "$inc": { "revision": 1_i64 },
        };
        self.conditional_update("leave_player", code, filter, update)
            .await
    }

    async fn set_player_ready(
        &self,
        code: String,
        user_id: String,
        ready: bool,
    ) -> StorageResult<()> {
        let mut filter = in_phase(&code, SessionPhase::Lobby);
        filter.insert("players.user_id", user_id.as_str());
        let update = doc! {
            "$set": { "players.$.ready": ready },
            "$inc": { "revision": 1_i64 },
        };
        self.conditional_update("set_player_ready", code, filter, update)
            .await
    }

    async fn launch_session(
        &self,
        code: String,
        caller_id: String,
        revision: u64,
        players: Vec<PlayerEntity>,
        launched_at: SystemTime,
    ) -> StorageResult<()> {
        let current = self.load_existing(&code).await?;
        let filter = doc! {
            "_id": code.as_str(),
            "phase": SessionPhase::Lobby.as_str(),
            "owner_id": caller_id.as_str(),
            "revision": revision as i64,
        };
        let launched = current.launched(players, DateTime::from_system_time(launched_at));

        let collection = self.sessions().await;
        let result = collection
            .replace_one(filter, &launched)
            .await
            .map_err(|source| MongoDaoError::WriteSession {
                code: code.clone(),
                operation: "launch_session",
                source,
            })?;

        if result.matched_count == 0 {
            return Err(self.unmatched("launch_session", code).await);
        }
        Ok(())
    }

    async fn start_session(
        &self,
        code: String,
        caller_id: String,
        started_at: SystemTime,
    ) -> StorageResult<()> {
        let mut filter = in_phase(&code, SessionPhase::Pregame);
        filter.insert("owner_id", caller_id.as_str());
        let update = doc! {
            "$set": {
                "phase": SessionPhase::Ingame.as_str(),
                "started_at": DateTime::from_system_time(started_at),
            }
        };
        self.conditional_update("start_session", code, filter, update)
            .await
    }

    async fn mark_player_dead(
        &self,
        code: String,
        victim_id: String,
        death: DeathEntity,
    ) -> StorageResult<()> {
        let mut filter = in_phase(&code, SessionPhase::Ingame);
        filter.insert(
            "players",
            doc! { "$elemMatch": { "user_id": victim_id.as_str(), "death": null } },
        );
        let update = doc! { "$set": { "players.$.death": death_entry(&death) } };
        self.conditional_update("mark_player_dead", code, filter, update)
            .await
    }

    async fn record_killer_confirmation(
        &self,
        code: String,
        victim_id: String,
        killer: Attribution,
    ) -> StorageResult<()> {
        let mut filter = in_phase(&code, SessionPhase::PostPending);
        filter.insert(
            "players",
            doc! {
                "$elemMatch": {
                    "user_id": victim_id.as_str(),
                    "death": { "$ne": null },
                    "death.killer_id": null,
                }
            },
        );
        let update = doc! { "$set": { "players.$.death.killer_id": killer.killer_id() } };
        self.conditional_update("record_killer_confirmation", code, filter, update)
            .await
    }

    async fn transition_to_pending(
        &self,
        code: String,
        winner: Faction,
        ended_at: SystemTime,
    ) -> StorageResult<()> {
        let filter = in_phase(&code, SessionPhase::Ingame);
        let update = doc! {
            "$set": {
                "phase": SessionPhase::PostPending.as_str(),
                "winning_team": winner.as_str(),
                "ended_at": DateTime::from_system_time(ended_at),
            }
        };
        self.conditional_update("transition_to_pending", code, filter, update)
            .await
    }

    async fn transition_to_complete(&self, code: String) -> StorageResult<()> {
        let filter = in_phase(&code, SessionPhase::PostPending);
        let update = doc! { "$set": { "phase": SessionPhase::PostGame.as_str() } };
        self.conditional_update("transition_to_complete", code, filter, update)
            .await
    }

    async fn set_successor(&self, code: String, next_code: String) -> StorageResult<()> {
        let mut filter = in_phase(&code, SessionPhase::PostGame);
        filter.insert("next_code", Bson::Null);
        let update = doc! { "$set": { "next_code": next_code.as_str() } };
        self.conditional_update("set_successor", code, filter, update)
            .await
    }

    async fn close_session(&self, code: String) -> StorageResult<()> {
        let filter = doc! {
            "_id": code.as_str(),
            "phase": { "$ne": SessionPhase::PostGame.as_str() },
        };
        let collection = self.sessions().await;
        let result = collection
            .delete_one(filter)
            .await
            .map_err(|source| MongoDaoError::WriteSession {
                code: code.clone(),
                operation: "close_session",
                source,
            })?;

        if result.deleted_count == 0 {
            return Err(self.unmatched("close_session", code).await);
        }
        Ok(())
    }
}

impl SessionStore for MongoSessionStore {
    fn find_user(&self, user_id: String) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_user(user_id).await })
    }

    fn save_user(&self, user: UserEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_user(user).await })
    }

    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_session(session).await })
    }

    fn find_session(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .load(&code)
                .await?
                .map(MongoSessionDocument::into_session))
        })
    }

    fn list_players(&self, code: String) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.load_existing(&code).await?.into_players()) })
    }

    fn find_player(
        &self,
        code: String,
        user_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.load_existing(&code).await?;
            Ok(document
                .players
                .into_iter()
                .find(|player| player.user_id() == user_id)
                .map(Into::into))
        })
    }

    fn list_session_codes(&self) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let store = self.clone();
        Box::pin(async move { store.list_session_codes().await })
    }

    fn join_player(
        &self,
        code: String,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.join_player(code, player).await })
    }

    fn leave_player(&self, code: String, user_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.leave_player(code, user_id).await })
    }

    fn set_player_ready(
        &self,
        code: String,
        user_id: String,
        ready: bool,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.set_player_ready(code, user_id, ready).await })
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
            store
                .launch_session(code, caller_id, revision, players, launched_at)
                .await
        })
    }

    fn start_session(
        &self,
        code: String,
        caller_id: String,
        started_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.start_session(code, caller_id, started_at).await })
    }

    fn mark_player_dead(
        &self,
        code: String,
        victim_id: String,
        death: DeathEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.mark_player_dead(code, victim_id, death).await })
    }

    fn record_killer_confirmation(
        &self,
        code: String,
        victim_id: String,
        killer: Attribution,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .record_killer_confirmation(code, victim_id, killer)
                .await
        })
    }

    fn transition_to_pending(
        &self,
        code: String,
        winner: Faction,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.transition_to_pending(code, winner, ended_at).await })
    }

    fn transition_to_complete(&self, code: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.transition_to_complete(code).await })
    }

    fn set_successor(
        &self,
        code: String,
        next_code: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.set_successor(code, next_code).await })
    }

    fn close_session(&self, code: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.close_session(code).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
