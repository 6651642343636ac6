//! Session state machine: the only code that mutates sessions and players.
//!
//! Every operation validates its preconditions locally first, then performs a conditional write
//! whose filter repeats the precondition. A lost race surfaces as
//! [`ServiceError::ConcurrencyConflict`] unless a more specific error explains it.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{AccessLevel, Attribution, DeathEntity, PlayerEntity, SessionEntity, UserEntity},
        session_store::SessionStore,
        storage::StorageError,
    },
    dto::{
        format_system_time,
        session::{
            CreateSessionRequest, KillRecordDto, LobbyPlayer, OtherPlayerView,
            RegisterUserRequest, SelfView, SessionResults, SessionSummary, SessionView,
            UserResponse,
        },
        sse::{
            ClosedEvent, ConfirmedKillEvent, LaunchedEvent, PlayerEvent, RematchEvent,
            StartedEvent,
        },
    },
    error::ServiceError,
    services::{
        kill_workflow, notifier::SessionNotification, role_allocator, visibility, win_evaluator,
    },
    state::{
        AppState, SharedState,
        state_machine::{self, SessionEvent, SessionPhase},
    },
};

const TIMER_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(500);
const TIMER_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Create or rename the profile of `user_id`.
pub async fn register_user(
    state: &SharedState,
    user_id: String,
    request: RegisterUserRequest,
) -> Result<UserResponse, ServiceError> {
    let store = state.require_session_store().await?;

    let mut user = match store.find_user(user_id.clone()).await? {
        Some(existing) => existing,
        None => UserEntity::new(user_id.clone(), request.display_name.clone()),
    };
    user.display_name = request.display_name;
    if state.config().is_admin(&user_id) {
        user.access_level = AccessLevel::Admin;
    }

    store.save_user(user.clone()).await?;
    debug!(user_id = %user_id, "user profile saved");
    Ok(user.into())
}

/// Profile of the caller.
pub async fn get_user(state: &SharedState, user_id: String) -> Result<UserResponse, ServiceError> {
    let store = state.require_session_store().await?;
    Ok(load_user(&store, &user_id).await?.into())
}

/// Open a new lobby owned by the caller.
pub async fn create_session(
    state: &SharedState,
    caller_id: String,
    request: CreateSessionRequest,
) -> Result<SessionSummary, ServiceError> {
    let store = state.require_session_store().await?;
    let owner = load_user(&store, &caller_id).await?;

    let session = create_lobby(state, &store, &owner, request.name).await?;
    Ok(SessionSummary::new(session, 0))
}

/// Public metadata of a session.
pub async fn get_session(state: &SharedState, code: String) -> Result<SessionSummary, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, &code).await?;
    let players = store.list_players(code).await?;
    Ok(SessionSummary::new(session, players.len()))
}

/// Roster without roles.
pub async fn list_players(
    state: &SharedState,
    code: String,
) -> Result<Vec<LobbyPlayer>, ServiceError> {
    let store = state.require_session_store().await?;
    let players = store.list_players(code).await?;
    Ok(players.iter().map(LobbyPlayer::from).collect())
}

/// The caller's own record plus every other player filtered for the caller's role.
pub async fn view(
    state: &SharedState,
    code: String,
    caller_id: String,
) -> Result<SessionView, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, &code).await?;
    let players = store.list_players(code).await?;

    let me = players
        .iter()
        .find(|player| player.user_id == caller_id)
        .ok_or(ServiceError::PlayerNotInSession)?;

    let others = match me.role() {
        Some(role) => visibility::visible_players(&caller_id, role, &players)
            .into_iter()
            .map(OtherPlayerView::from)
            .collect(),
        // Nobody has a role before launch.
        None => players
            .iter()
            .filter(|player| player.user_id != caller_id)
            .map(|player| OtherPlayerView {
                user_id: player.user_id.clone(),
                display_name: player.display_name.clone(),
                alive: player.is_alive(),
                role: None,
            })
            .collect(),
    };

    Ok(SessionView {
        me: SelfView::from(me),
        others,
        session: SessionSummary::new(session, players.len()),
    })
}

/// Final results. Only available once the session is finished so attributions never leak early.
pub async fn results(state: &SharedState, code: String) -> Result<SessionResults, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, &code).await?;
    if session.phase != SessionPhase::PostGame {
        return Err(ServiceError::GameInProgress);
    }
    let winning_team = session
        .winning_team
        .ok_or_else(|| ServiceError::InvalidState(format!("session `{code}` has no winner")))?;

    let players = store.list_players(code).await?;
    Ok(SessionResults {
        code: session.code,
        winning_team,
        ended_at: session.ended_at.map(format_system_time),
        kills: kill_workflow::kill_records(&players)
            .into_iter()
            .map(KillRecordDto::from)
            .collect(),
    })
}

/// Add the caller to a lobby.
pub async fn join(
    state: &SharedState,
    code: String,
    caller_id: String,
) -> Result<Vec<LobbyPlayer>, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, &code).await?;
    ensure_lobby(&session)?;
    let user = load_user(&store, &caller_id).await?;
    if store
        .find_player(code.clone(), caller_id.clone())
        .await?
        .is_some()
    {
        return Err(ServiceError::PlayerAlreadyInSession);
    }

    let player = PlayerEntity::joining(&user);
    if let Err(err) = store.join_player(code.clone(), player).await {
        return Err(explain_lobby_conflict(&store, &code, &caller_id, false, err).await);
    }

    info!(code = %code, user_id = %caller_id, "player joined");
    state.notify(
        &code,
        SessionNotification::PlayerJoined(PlayerEvent {
            user_id: user.id,
            display_name: user.display_name,
        }),
    );
    list_players(state, code).await
}

/// Remove the caller from a lobby.
pub async fn leave(
    state: &SharedState,
    code: String,
    caller_id: String,
) -> Result<Vec<LobbyPlayer>, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, &code).await?;
    ensure_lobby(&session)?;
    let player = require_member(&store, &code, &caller_id).await?;

    if let Err(err) = store.leave_player(code.clone(), caller_id.clone()).await {
        return Err(explain_lobby_conflict(&store, &code, &caller_id, true, err).await);
    }

    info!(code = %code, user_id = %caller_id, "player left");
    state.notify(
        &code,
        SessionNotification::PlayerLeft(PlayerEvent {
            user_id: player.user_id,
            display_name: player.display_name,
        }),
    );
    list_players(state, code).await
}

/// Toggle the caller's ready flag.
pub async fn set_ready(
    state: &SharedState,
    code: String,
    caller_id: String,
    ready: bool,
) -> Result<Vec<LobbyPlayer>, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, &code).await?;
    ensure_lobby(&session)?;
    let player = require_member(&store, &code, &caller_id).await?;

    if let Err(err) = store
        .set_player_ready(code.clone(), caller_id.clone(), ready)
        .await
    {
        return Err(explain_lobby_conflict(&store, &code, &caller_id, true, err).await);
    }

    debug!(code = %code, user_id = %caller_id, ready, "player readiness changed");
    let event = PlayerEvent {
        user_id: player.user_id,
        display_name: player.display_name,
    };
    let notification = if ready {
        SessionNotification::PlayerReady(event)
    } else {
        SessionNotification::PlayerUnready(event)
    };
    state.notify(&code, notification);
    list_players(state, code).await
}

/// Hand out roles and move the lobby to PREGAME.
pub async fn launch(
    state: &SharedState,
    code: String,
    caller_id: String,
) -> Result<SessionSummary, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, &code).await?;
    state_machine::plan(session.phase, SessionEvent::Launch)
        .map_err(|_| ServiceError::LobbyNotStartable)?;
    if !session.is_owned_by(&caller_id) {
        return Err(ServiceError::PlayerNotOwner);
    }

    let players = store.list_players(code.clone()).await?;
    let required = state.config().min_players;
    if players.len() < required {
        return Err(ServiceError::MinimumPlayers {
            required,
            joined: players.len(),
        });
    }
    if !players.iter().all(|player| player.ready) {
        return Err(ServiceError::PlayersNotReady);
    }

    let assigned = role_allocator::allocate(players, state.config().scan_allowance);
    let roster = assigned.iter().map(LobbyPlayer::from).collect();
    store
        .launch_session(
            code.clone(),
            caller_id,
            session.revision,
            assigned,
            SystemTime::now(),
        )
        .await?;

    info!(code = %code, phase = ?SessionPhase::Pregame, "session launched");
    state.notify(
        &code,
        SessionNotification::SessionLaunched(LaunchedEvent { players: roster }),
    );
    get_session(state, code).await
}

/// Move PREGAME to INGAME and arm the end-of-timer evaluation.
pub async fn start(
    state: &SharedState,
    code: String,
    caller_id: String,
) -> Result<SessionSummary, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, &code).await?;
    state_machine::plan(session.phase, SessionEvent::Start)
        .map_err(|_| ServiceError::LobbyNotStartable)?;
    if !session.is_owned_by(&caller_id) {
        return Err(ServiceError::PlayerNotOwner);
    }

    let started_at = SystemTime::now();
    store
        .start_session(code.clone(), caller_id, started_at)
        .await?;

    let duration = state.config().game_duration();
    info!(code = %code, phase = ?SessionPhase::Ingame, duration_secs = duration.as_secs(), "session started");
    spawn_game_timer(state.clone(), code.clone(), duration);

    state.notify(
        &code,
        SessionNotification::SessionStarted(StartedEvent {
            started_at: format_system_time(started_at),
            ends_at: format_system_time(started_at + duration),
        }),
    );
    get_session(state, code).await
}

/// Fire-and-forget end-of-timer evaluation. The conditional write in
/// [`kill_workflow::conclude`] turns it into a no-op if the game already ended.
///
/// Storage outages do not drop the evaluation: in degraded mode it waits for the store to come
/// back, and backend failures are retried with backoff until the session has left INGAME.
fn spawn_game_timer(state: SharedState, code: String, duration: Duration) {
    tokio::spawn(async move {
        sleep(duration).await;

        let mut delay = TIMER_RETRY_INITIAL_DELAY;
        loop {
            match end_of_timer(&state, &code).await {
                Ok(Some(phase)) => {
                    info!(code = %code, ?phase, "game clock ran out");
                    return;
                }
                Ok(None) => {
                    debug!(code = %code, "game clock ran out after the game ended");
                    return;
                }
                Err(ServiceError::Degraded) => {
                    debug!(code = %code, "storage degraded; holding end-of-timer evaluation");
                    let mut watcher = state.degraded_watcher();
                    if watcher.wait_for(|degraded| !degraded).await.is_err() {
                        return;
                    }
                }
                Err(ServiceError::Unavailable(err)) => {
                    warn!(
                        code = %code, error = %err, retry_in_ms = delay.as_millis() as u64,
                        "end-of-timer evaluation failed; retrying"
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(TIMER_RETRY_MAX_DELAY);
                }
                Err(err) => {
                    warn!(code = %code, error = %err, "end-of-timer evaluation abandoned");
                    return;
                }
            }
        }
    });
}

/// Decide the game by survival once the clock runs out.
///
/// Returns the phase the session moved to, or `None` when it was no longer in INGAME.
pub async fn end_of_timer(
    state: &AppState,
    code: &str,
) -> Result<Option<SessionPhase>, ServiceError> {
    let store = state.require_session_store().await?;
    let Some(session) = store.find_session(code.to_owned()).await? else {
        return Ok(None);
    };
    if session.phase != SessionPhase::Ingame {
        return Ok(None);
    }

    let players = store.list_players(code.to_owned()).await?;
    let winner = win_evaluator::evaluate_timeout(&players);
    kill_workflow::conclude(state, &store, code, winner).await
}

/// A victim reporting their own death (INGAME) or naming their killer afterwards (POSTPENDING).
pub async fn confirm_killer(
    state: &SharedState,
    code: String,
    caller_id: String,
    killer_id: Option<String>,
) -> Result<SessionSummary, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, &code).await?;

    match session.phase {
        SessionPhase::Ingame => report_death(state, &store, &code, &caller_id, killer_id).await?,
        SessionPhase::PostPending => {
            resolve_attribution(state, &store, &session, &caller_id, killer_id).await?
        }
        _ => return Err(ServiceError::GameNotInProgress),
    }

    get_session(state, code).await
}

async fn report_death(
    state: &AppState,
    store: &Arc<dyn SessionStore>,
    code: &str,
    victim_id: &str,
    killer_id: Option<String>,
) -> Result<(), ServiceError> {
    let victim = require_member(store, code, victim_id).await?;
    if !victim.is_alive() {
        return Err(ServiceError::PlayerIsDead);
    }
    let killer = resolve_killer(store, code, victim_id, killer_id).await?;

    let death = DeathEntity {
        killer,
        killed_at: SystemTime::now(),
    };
    if let Err(err) = store
        .mark_player_dead(code.to_owned(), victim_id.to_owned(), death)
        .await
    {
        if !err.is_conflict() {
            return Err(err.into());
        }
        // Either a duplicate report won the race or the game ended meanwhile.
        let victim = require_member(store, code, victim_id).await?;
        if !victim.is_alive() {
            return Err(ServiceError::PlayerIsDead);
        }
        let session = load_session(store, code).await?;
        if session.phase != SessionPhase::Ingame {
            return Err(ServiceError::GameNotInProgress);
        }
        return Err(err.into());
    }

    info!(code = %code, victim_id = %victim_id, "player died");
    state.notify(
        code,
        SessionNotification::PlayerConfirmedKill(ConfirmedKillEvent {
            victim_id: victim_id.to_owned(),
        }),
    );

    let players = store.list_players(code.to_owned()).await?;
    if let Some(winner) = win_evaluator::evaluate(&players) {
        kill_workflow::conclude(state, store, code, winner).await?;
    }
    Ok(())
}

async fn resolve_attribution(
    state: &AppState,
    store: &Arc<dyn SessionStore>,
    session: &SessionEntity,
    victim_id: &str,
    killer_id: Option<String>,
) -> Result<(), ServiceError> {
    let code = session.code.as_str();
    let victim = require_member(store, code, victim_id).await?;
    let Some(death) = victim.death.as_ref() else {
        return Err(ServiceError::PlayerIsAlive);
    };
    if !death.killer.is_unknown() {
        return Err(ServiceError::KillerAlreadyConfirmed);
    }
    let Some(killer_id) = killer_id else {
        return Err(ServiceError::UserNotFound("unknown".into()));
    };
    let killer = resolve_killer(store, code, victim_id, Some(killer_id)).await?;

    if let Err(err) = store
        .record_killer_confirmation(code.to_owned(), victim_id.to_owned(), killer)
        .await
    {
        if !err.is_conflict() {
            return Err(err.into());
        }
        let victim = require_member(store, code, victim_id).await?;
        if victim.death.is_some_and(|death| !death.killer.is_unknown()) {
            return Err(ServiceError::KillerAlreadyConfirmed);
        }
        return Err(err.into());
    }

    info!(code = %code, victim_id = %victim_id, "killer confirmed");
    state.notify(
        code,
        SessionNotification::PlayerConfirmedKill(ConfirmedKillEvent {
            victim_id: victim_id.to_owned(),
        }),
    );

    let players = store.list_players(code.to_owned()).await?;
    if kill_workflow::pending_attributions(&players).is_empty() {
        let winner = session
            .winning_team
            .ok_or_else(|| ServiceError::InvalidState(format!("session `{code}` has no winner")))?;
        kill_workflow::finish(state, store, code, winner, &players).await?;
    }
    Ok(())
}

/// Open a new lobby after a finished game and link it as the successor.
pub async fn rematch(
    state: &SharedState,
    code: String,
    caller_id: String,
) -> Result<SessionSummary, ServiceError> {
    let store = state.require_session_store().await?;
    let session = load_session(&store, &code).await?;
    if session.phase != SessionPhase::PostGame {
        return Err(ServiceError::GameInProgress);
    }
    if !session.is_owned_by(&caller_id) {
        return Err(ServiceError::PlayerNotOwner);
    }
    if let Some(next_code) = session.next_code {
        return get_session(state, next_code).await;
    }

    let owner = load_user(&store, &caller_id).await?;
    let lobby = create_lobby(state, &store, &owner, session.name).await?;

    if let Err(err) = store
        .set_successor(code.clone(), lobby.code.clone())
        .await
    {
        // Someone else linked a rematch first; drop ours.
        if let Err(cleanup) = store.close_session(lobby.code.clone()).await {
            warn!(code = %lobby.code, error = %cleanup, "failed to drop orphaned rematch lobby");
        }
        state.codes().release(&lobby.code);
        return Err(err.into());
    }

    info!(code = %code, next_code = %lobby.code, "rematch lobby opened");
    state.notify(
        &code,
        SessionNotification::SessionRematch(RematchEvent {
            next_code: lobby.code.clone(),
        }),
    );
    Ok(SessionSummary::new(lobby, 0))
}

/// Delete an unfinished session and release its code. Admins only.
pub async fn close_session(
    state: &SharedState,
    code: String,
    caller_id: String,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    let caller = load_user(&store, &caller_id).await?;
    if !caller.is_admin() {
        return Err(ServiceError::Unauthorized(
            "closing a session requires admin access".into(),
        ));
    }

    let session = load_session(&store, &code).await?;
    if session.phase.is_terminal() {
        return Err(ServiceError::SessionFinished);
    }

    match store.close_session(code.clone()).await {
        Ok(()) => {}
        Err(StorageError::Conflict { .. }) => return Err(ServiceError::SessionFinished),
        Err(err) => return Err(err.into()),
    }
    state.codes().release(&code);

    info!(code = %code, closed_by = %caller_id, "session closed by admin");
    state.notify(
        &code,
        SessionNotification::SessionClosed(ClosedEvent {
            closed_by: caller_id,
        }),
    );
    Ok(())
}

/// Reserve a code and persist a fresh lobby, retrying when storage already knows the code.
async fn create_lobby(
    state: &AppState,
    store: &Arc<dyn SessionStore>,
    owner: &UserEntity,
    name: String,
) -> Result<SessionEntity, ServiceError> {
    let config = state.config();
    for attempt in 0..config.max_create_attempts {
        let code = state
            .codes()
            .reserve(config.code_length, config.max_code_attempts)?;
        let session = SessionEntity::new(code.clone(), name.clone(), owner);

        match store.create_session(session.clone()).await {
            Ok(()) => {
                info!(code = %code, owner_id = %owner.id, "lobby created");
                return Ok(session);
            }
            // Taken by a session this process did not know about; keep it reserved.
            Err(StorageError::Conflict { .. }) => {
                debug!(attempt, code = %code, "session code already stored");
            }
            Err(err) => {
                state.codes().release(&code);
                return Err(err.into());
            }
        }
    }

    Err(ServiceError::CodePoolExhausted)
}

async fn load_session(
    store: &Arc<dyn SessionStore>,
    code: &str,
) -> Result<SessionEntity, ServiceError> {
    store
        .find_session(code.to_owned())
        .await?
        .ok_or_else(|| ServiceError::SessionNotFound(code.to_owned()))
}

async fn load_user(store: &Arc<dyn SessionStore>, user_id: &str) -> Result<UserEntity, ServiceError> {
    store
        .find_user(user_id.to_owned())
        .await?
        .ok_or_else(|| ServiceError::UserNotFound(user_id.to_owned()))
}

async fn require_member(
    store: &Arc<dyn SessionStore>,
    code: &str,
    user_id: &str,
) -> Result<PlayerEntity, ServiceError> {
    store
        .find_player(code.to_owned(), user_id.to_owned())
        .await?
        .ok_or(ServiceError::PlayerNotInSession)
}

/// Turn an optional killer id into an attribution, checking it names another session member.
async fn resolve_killer(
    store: &Arc<dyn SessionStore>,
    code: &str,
    victim_id: &str,
    killer_id: Option<String>,
) -> Result<Attribution, ServiceError> {
    let Some(killer_id) = killer_id else {
        return Ok(Attribution::Unknown);
    };
    if killer_id == victim_id {
        return Err(ServiceError::InvalidInput(
            "a player cannot name themselves as their killer".into(),
        ));
    }
    if store
        .find_player(code.to_owned(), killer_id.clone())
        .await?
        .is_none()
    {
        return Err(ServiceError::UserNotFound(killer_id));
    }
    Ok(Attribution::Killer(killer_id))
}

fn ensure_lobby(session: &SessionEntity) -> Result<(), ServiceError> {
    if session.phase != SessionPhase::Lobby {
        return Err(ServiceError::GameInProgress);
    }
    Ok(())
}

/// Translate a rejected roster write into the most specific error.
async fn explain_lobby_conflict(
    store: &Arc<dyn SessionStore>,
    code: &str,
    user_id: &str,
    expected_member: bool,
    err: StorageError,
) -> ServiceError {
    if !err.is_conflict() {
        return err.into();
    }

    match load_session(store, code).await {
        Ok(session) if session.phase != SessionPhase::Lobby => return ServiceError::GameInProgress,
        Ok(_) => {}
        Err(reload) => return reload,
    }

    match store.find_player(code.to_owned(), user_id.to_owned()).await {
        Ok(Some(_)) if !expected_member => ServiceError::PlayerAlreadyInSession,
        Ok(None) if expected_member => ServiceError::PlayerNotInSession,
        Ok(_) => err.into(),
        Err(reload) => reload.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::memory::MemorySessionStore,
        services::notifier::SseNotifier,
        state::{SseHub, roles::Role},
    };

    async fn fixture() -> (SharedState, Arc<dyn SessionStore>) {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let hub = Arc::new(SseHub::new(64));
        let state = AppState::with_store(
            AppConfig::default(),
            store.clone(),
            hub.clone(),
            Arc::new(SseNotifier::new(hub)),
        );
        for i in 0..6 {
            store
                .save_user(UserEntity::new(format!("u{i}"), format!("Player {i}")))
                .await
                .unwrap();
        }
        (state, store)
    }

    async fn ready_lobby(state: &SharedState, players: usize) -> String {
        let summary = create_session(
            state,
            "u0".into(),
            CreateSessionRequest {
                name: "lobby".into(),
            },
        )
        .await
        .unwrap();
        for i in 0..players {
            join(state, summary.code.clone(), format!("u{i}"))
                .await
                .unwrap();
            set_ready(state, summary.code.clone(), format!("u{i}"), true)
                .await
                .unwrap();
        }
        summary.code
    }

    #[tokio::test]
    async fn create_registers_the_code_in_the_pool() {
        let (state, _) = fixture().await;
        let code = ready_lobby(&state, 0).await;
        assert_eq!(code.len(), 5);
        assert!(state.codes().is_in_use(&code));
    }

    #[tokio::test]
    async fn unknown_owner_cannot_create() {
        let (state, _) = fixture().await;
        let err = create_session(
            &state,
            "ghost".into(),
            CreateSessionRequest {
                name: "lobby".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn launch_checks_run_in_order() {
        let (state, _) = fixture().await;
        let code = ready_lobby(&state, 2).await;

        let err = launch(&state, code.clone(), "u1".into()).await.unwrap_err();
        assert!(matches!(err, ServiceError::PlayerNotOwner));

        let err = launch(&state, code.clone(), "u0".into()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::MinimumPlayers {
                required: 3,
                joined: 2
            }
        ));

        join(&state, code.clone(), "u2".into()).await.unwrap();
        let err = launch(&state, code.clone(), "u0".into()).await.unwrap_err();
        assert!(matches!(err, ServiceError::PlayersNotReady));
    }

    #[tokio::test]
    async fn start_requires_pregame() {
        let (state, _) = fixture().await;
        let code = ready_lobby(&state, 3).await;
        let err = start(&state, code, "u0".into()).await.unwrap_err();
        assert!(matches!(err, ServiceError::LobbyNotStartable));
    }

    #[tokio::test]
    async fn view_hides_traitors_from_innocents() {
        let (state, store) = fixture().await;
        let code = ready_lobby(&state, 6).await;
        launch(&state, code.clone(), "u0".into()).await.unwrap();

        for player in store.list_players(code.clone()).await.unwrap() {
            let view = view(&state, code.clone(), player.user_id.clone())
                .await
                .unwrap();
            assert_eq!(view.others.len(), 5);
            assert_eq!(view.me.role, player.role());
            if player.role() != Some(Role::Traitor) {
                assert!(view.others.iter().all(|other| other.role != Some(Role::Traitor)));
            }
        }

        let err = view(&state, code, "outsider".into()).await.unwrap_err();
        assert!(matches!(err, ServiceError::PlayerNotInSession));
    }

    #[tokio::test]
    async fn timer_decides_by_detective_survival() {
        let (state, store) = fixture().await;
        let code = ready_lobby(&state, 6).await;
        launch(&state, code.clone(), "u0".into()).await.unwrap();
        store
            .start_session(code.clone(), "u0".into(), SystemTime::now())
            .await
            .unwrap();

        let phase = end_of_timer(&state, &code).await.unwrap();
        assert_eq!(phase, Some(SessionPhase::PostGame));
        let session = store.find_session(code.clone()).await.unwrap().unwrap();
        assert_eq!(session.winning_team, Some(crate::state::roles::Faction::Innocent));

        // A second firing finds the session out of INGAME and does nothing.
        assert_eq!(end_of_timer(&state, &code).await.unwrap(), None);
    }

    #[tokio::test]
    async fn admin_close_releases_code() {
        let (state, store) = fixture().await;
        store
            .save_user(UserEntity::new("root", "Root").admin())
            .await
            .unwrap();
        let code = ready_lobby(&state, 1).await;

        let err = close_session(&state, code.clone(), "u0".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        close_session(&state, code.clone(), "root".into())
            .await
            .unwrap();
        assert!(!state.codes().is_in_use(&code));
        let err = get_session(&state, code).await.unwrap_err();
        assert!(matches!(err, ServiceError::SessionNotFound(_)));
    }
}
