use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use futures::future::{self, BoxFuture};
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tower::ServiceExt;
use traitor_back::{
    config::AppConfig,
    dao::{
        models::{PlayerEntity, UserEntity},
        session_store::{SessionStore, memory::MemorySessionStore},
    },
    dto::session::CreateSessionRequest,
    error::ServiceError,
    routes,
    services::{
        notifier::{Notifier, NotifyError, SessionNotification},
        session_service,
    },
    state::{
        AppState, SharedState, SseHub,
        roles::{Faction, Role},
        state_machine::SessionPhase,
    },
};

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<(String, &'static str)>>,
    /// Deliveries never complete, like a relay that stopped answering.
    stalled: bool,
}

impl RecordingNotifier {
    fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, name)| *name)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        code: &str,
        notification: &SessionNotification,
    ) -> BoxFuture<'static, Result<(), NotifyError>> {
        self.events
            .lock()
            .unwrap()
            .push((code.to_owned(), notification.name()));
        if self.stalled {
            return Box::pin(future::pending());
        }
        Box::pin(async { Ok(()) })
    }
}

struct Harness {
    state: SharedState,
    store: Arc<dyn SessionStore>,
    notifier: Arc<RecordingNotifier>,
}

async fn harness() -> Harness {
    build_harness(AppConfig::default(), RecordingNotifier::default()).await
}

async fn build_harness(config: AppConfig, notifier: RecordingNotifier) -> Harness {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let notifier = Arc::new(notifier);
    let state = AppState::with_store(
        config,
        store.clone(),
        Arc::new(SseHub::new(16)),
        notifier.clone(),
    );
    for i in 0..6 {
        store
            .save_user(UserEntity::new(format!("u{i}"), format!("Player {i}")))
            .await
            .unwrap();
    }
    Harness {
        state,
        store,
        notifier,
    }
}

/// Six ready players, launched and started by `u0`.
async fn running_game(harness: &Harness) -> String {
    let state = &harness.state;
    let code = session_service::create_session(
        state,
        "u0".into(),
        CreateSessionRequest {
            name: "friday".into(),
        },
    )
    .await
    .unwrap()
    .code;
    for i in 0..6 {
        session_service::join(state, code.clone(), format!("u{i}"))
            .await
            .unwrap();
        session_service::set_ready(state, code.clone(), format!("u{i}"), true)
            .await
            .unwrap();
    }
    session_service::launch(state, code.clone(), "u0".into())
        .await
        .unwrap();
    session_service::start(state, code.clone(), "u0".into())
        .await
        .unwrap();
    code
}

async fn players_with(harness: &Harness, code: &str, role: Role) -> Vec<PlayerEntity> {
    harness
        .store
        .list_players(code.to_owned())
        .await
        .unwrap()
        .into_iter()
        .filter(|player| player.role() == Some(role))
        .collect()
}

async fn phase_of(harness: &Harness, code: &str) -> SessionPhase {
    session_service::get_session(&harness.state, code.to_owned())
        .await
        .unwrap()
        .phase
}

#[tokio::test]
async fn six_players_get_two_traitors_and_one_detective() {
    let harness = harness().await;
    let code = running_game(&harness).await;

    assert_eq!(players_with(&harness, &code, Role::Traitor).await.len(), 2);
    assert_eq!(players_with(&harness, &code, Role::Detective).await.len(), 1);
    assert_eq!(players_with(&harness, &code, Role::Innocent).await.len(), 3);
    assert_eq!(phase_of(&harness, &code).await, SessionPhase::Ingame);
}

#[tokio::test]
async fn traitors_win_once_every_innocent_is_attributed() {
    let harness = harness().await;
    let code = running_game(&harness).await;
    let traitor = players_with(&harness, &code, Role::Traitor).await[0]
        .user_id
        .clone();

    let mut victims = players_with(&harness, &code, Role::Innocent).await;
    victims.extend(players_with(&harness, &code, Role::Detective).await);
    for victim in victims {
        session_service::confirm_killer(
            &harness.state,
            code.clone(),
            victim.user_id,
            Some(traitor.clone()),
        )
        .await
        .unwrap();
    }

    assert_eq!(phase_of(&harness, &code).await, SessionPhase::PostGame);
    let results = session_service::results(&harness.state, code.clone())
        .await
        .unwrap();
    assert_eq!(results.winning_team.as_str(), "TRAITOR");
    assert_eq!(results.kills.len(), 4);
    assert!(
        results
            .kills
            .iter()
            .all(|kill| kill.killer_id.as_deref() == Some(traitor.as_str()))
    );
    assert!(harness.notifier.names().contains(&"session.ended"));
}

#[tokio::test]
async fn unknown_killer_holds_the_session_in_postpending() {
    let harness = harness().await;
    let code = running_game(&harness).await;
    let traitors = players_with(&harness, &code, Role::Traitor).await;
    let detective = players_with(&harness, &code, Role::Detective).await[0]
        .user_id
        .clone();
    let innocent = players_with(&harness, &code, Role::Innocent).await[0]
        .user_id
        .clone();

    // The innocent does not know who killed them.
    session_service::confirm_killer(&harness.state, code.clone(), innocent.clone(), None)
        .await
        .unwrap();
    for traitor in &traitors {
        session_service::confirm_killer(
            &harness.state,
            code.clone(),
            traitor.user_id.clone(),
            Some(detective.clone()),
        )
        .await
        .unwrap();
    }

    assert_eq!(phase_of(&harness, &code).await, SessionPhase::PostPending);
    assert!(
        harness
            .notifier
            .names()
            .contains(&"kills.confirmation_requested")
    );
    let err = session_service::results(&harness.state, code.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::GameInProgress));

    let blamed = traitors[0].user_id.clone();
    session_service::confirm_killer(&harness.state, code.clone(), innocent.clone(), Some(blamed))
        .await
        .unwrap();
    assert_eq!(phase_of(&harness, &code).await, SessionPhase::PostGame);

    let err = session_service::confirm_killer(
        &harness.state,
        code.clone(),
        innocent,
        Some(traitors[1].user_id.clone()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::GameNotInProgress));
}

#[tokio::test]
async fn a_player_cannot_die_twice() {
    let harness = harness().await;
    let code = running_game(&harness).await;
    let innocent = players_with(&harness, &code, Role::Innocent).await[0]
        .user_id
        .clone();

    session_service::confirm_killer(&harness.state, code.clone(), innocent.clone(), None)
        .await
        .unwrap();
    let err = session_service::confirm_killer(&harness.state, code, innocent, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PlayerIsDead));
}

#[tokio::test]
async fn lobby_is_frozen_after_launch() {
    let harness = harness().await;
    let code = running_game(&harness).await;

    let err = session_service::leave(&harness.state, code.clone(), "u1".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::GameInProgress));
    let err = session_service::set_ready(&harness.state, code, "u1".into(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::GameInProgress));
}

#[tokio::test]
async fn rematch_is_idempotent() {
    let harness = harness().await;
    let code = running_game(&harness).await;
    session_service::end_of_timer(&harness.state, &code)
        .await
        .unwrap();

    let err = session_service::rematch(&harness.state, code.clone(), "u1".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PlayerNotOwner));

    let first = session_service::rematch(&harness.state, code.clone(), "u0".into())
        .await
        .unwrap();
    let second = session_service::rematch(&harness.state, code.clone(), "u0".into())
        .await
        .unwrap();
    assert_eq!(first.code, second.code);
    assert_ne!(first.code, code);
    assert_eq!(first.phase, SessionPhase::Lobby);
}

#[tokio::test]
async fn routes_require_a_caller_and_map_errors() {
    let harness = harness().await;
    let app = routes::router(harness.state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::post("/sessions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"name":"friday"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::post("/sessions")
                .header("content-type", "application/json")
                .header("x-user-id", "u0")
                .body(Body::from(r#"{"name":"friday"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let summary: Value = serde_json::from_slice(&body).unwrap();
    let code = summary["code"].as_str().unwrap().to_owned();
    assert_eq!(summary["phase"], "LOBBY");

    let response = app
        .oneshot(
            Request::post(format!("/sessions/{code}/launch"))
                .header("x-user-id", "u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "ERR_NOT_OWNER");
}

#[tokio::test]
async fn blank_display_names_are_rejected() {
    let harness = harness().await;
    let app = routes::router(harness.state.clone());

    let response = app
        .oneshot(
            Request::put("/users/u9")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"display_name":"   "}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stalled_deliveries_do_not_hold_up_the_game() {
    let notifier = RecordingNotifier {
        stalled: true,
        ..RecordingNotifier::default()
    };
    let harness = build_harness(AppConfig::default(), notifier).await;

    let code = timeout(Duration::from_secs(5), running_game(&harness))
        .await
        .expect("lobby flow waited on a delivery");
    let traitor = players_with(&harness, &code, Role::Traitor).await[0]
        .user_id
        .clone();
    let mut victims = players_with(&harness, &code, Role::Innocent).await;
    victims.extend(players_with(&harness, &code, Role::Detective).await);

    timeout(Duration::from_secs(5), async {
        for victim in victims {
            session_service::confirm_killer(
                &harness.state,
                code.clone(),
                victim.user_id,
                Some(traitor.clone()),
            )
            .await
            .unwrap();
        }
    })
    .await
    .expect("kill reports waited on a delivery");

    assert_eq!(phase_of(&harness, &code).await, SessionPhase::PostGame);
    let names = harness.notifier.names();
    assert!(names.contains(&"session.started"));
    assert!(names.contains(&"session.ended"));
}

#[tokio::test]
async fn the_clock_waits_out_a_storage_outage() {
    let config = AppConfig {
        game_duration_secs: 1,
        ..AppConfig::default()
    };
    let harness = build_harness(config, RecordingNotifier::default()).await;
    let code = running_game(&harness).await;

    harness.state.update_degraded(true);
    sleep(Duration::from_millis(1500)).await;
    let session = harness
        .store
        .find_session(code.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.phase, SessionPhase::Ingame);

    harness.state.update_degraded(false);
    let session = timeout(Duration::from_secs(5), async {
        loop {
            let session = harness
                .store
                .find_session(code.clone())
                .await
                .unwrap()
                .unwrap();
            if session.phase == SessionPhase::PostGame {
                return session;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("game was never decided by the clock");

    // Nobody died, so the detective is still alive.
    assert_eq!(session.winning_team, Some(Faction::Innocent));
}

#[tokio::test]
async fn only_unattributed_victims_may_name_a_killer_after_the_game() {
    let harness = harness().await;
    let code = running_game(&harness).await;
    let traitors = players_with(&harness, &code, Role::Traitor).await;
    let detective = players_with(&harness, &code, Role::Detective).await[0]
        .user_id
        .clone();
    let innocent = players_with(&harness, &code, Role::Innocent).await[0]
        .user_id
        .clone();

    session_service::confirm_killer(&harness.state, code.clone(), innocent.clone(), None)
        .await
        .unwrap();
    for traitor in &traitors {
        session_service::confirm_killer(
            &harness.state,
            code.clone(),
            traitor.user_id.clone(),
            Some(detective.clone()),
        )
        .await
        .unwrap();
    }
    assert_eq!(phase_of(&harness, &code).await, SessionPhase::PostPending);

    let err = session_service::confirm_killer(
        &harness.state,
        code.clone(),
        detective.clone(),
        Some(traitors[0].user_id.clone()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::PlayerIsAlive));

    let err = session_service::confirm_killer(
        &harness.state,
        code.clone(),
        traitors[0].user_id.clone(),
        Some(innocent.clone()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::KillerAlreadyConfirmed));

    let err = session_service::confirm_killer(&harness.state, code.clone(), innocent.clone(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UserNotFound(_)));

    let err = session_service::confirm_killer(
        &harness.state,
        code.clone(),
        innocent.clone(),
        Some(innocent.clone()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    // None of the rejected attempts resolved the pending attribution.
    assert_eq!(phase_of(&harness, &code).await, SessionPhase::PostPending);
}

#[tokio::test]
async fn a_victim_cannot_name_themselves() {
    let harness = harness().await;
    let code = running_game(&harness).await;
    let innocent = players_with(&harness, &code, Role::Innocent).await[0]
        .user_id
        .clone();

    let err = session_service::confirm_killer(
        &harness.state,
        code.clone(),
        innocent.clone(),
        Some(innocent.clone()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let victim = harness
        .store
        .find_player(code.clone(), innocent)
        .await
        .unwrap()
        .unwrap();
    assert!(victim.is_alive());
}

#[tokio::test]
async fn a_started_game_cannot_be_started_again() {
    let harness = harness().await;
    let code = running_game(&harness).await;

    let err = session_service::start(&harness.state, code.clone(), "u0".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::LobbyNotStartable));
    assert_eq!(phase_of(&harness, &code).await, SessionPhase::Ingame);
}

#[tokio::test]
async fn callers_can_read_their_own_profile() {
    let harness = harness().await;
    let app = routes::router(harness.state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::put("/users/u9")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"display_name":"Grace"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::get("/users/me")
                .header("x-user-id", "u9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let profile: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(profile["id"], "u9");
    assert_eq!(profile["display_name"], "Grace");
    assert_eq!(profile["admin"], false);

    let response = app
        .oneshot(Request::get("/users/me").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
