use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use validator::Validate;

use crate::{
    dto::session::{
        ConfirmKillerRequest, CreateSessionRequest, LobbyPlayer, SessionResults, SessionSummary,
        SessionView,
    },
    error::{AppError, ErrorBody},
    services::session_service,
    state::SharedState,
};

/// Header carrying the authenticated caller id, set by the credential layer in front of us.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity of the user issuing the request.
#[derive(Clone, Debug)]
pub struct Caller(pub String);

/// Session lifecycle routes. Every route requires the `X-User-Id` header.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{code}", get(get_session).delete(close_session))
        .route("/sessions/{code}/players", get(list_players))
        .route("/sessions/{code}/view", get(view))
        .route("/sessions/{code}/results", get(results))
        .route("/sessions/{code}/join", post(join))
        .route("/sessions/{code}/leave", post(leave))
        .route("/sessions/{code}/ready", post(ready))
        .route("/sessions/{code}/unready", post(unready))
        .route("/sessions/{code}/launch", post(launch))
        .route("/sessions/{code}/start", post(start))
        .route("/sessions/{code}/confirm-killer", post(confirm_killer))
        .route("/sessions/{code}/rematch", post(rematch))
        .route_layer(middleware::from_fn(require_caller))
}

/// Open a new lobby owned by the caller.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller")),
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Lobby created", body = SessionSummary),
        (status = 400, description = "Invalid name", body = ErrorBody),
        (status = 404, description = "Caller has no profile", body = ErrorBody)
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<Json<SessionSummary>, AppError> {
    payload.validate()?;
    let summary = session_service::create_session(&state, caller_id, payload).await?;
    Ok(Json(summary))
}

/// Public metadata of a session.
#[utoipa::path(
    get,
    path = "/sessions/{code}",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Session", body = SessionSummary),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(session_service::get_session(&state, code).await?))
}

/// Delete an unfinished session and release its code.
#[utoipa::path(
    delete,
    path = "/sessions/{code}",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller, must be an admin"),
    ("code" = String, Path, description = "Session code")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 401, description = "Caller is not an admin", body = ErrorBody),
        (status = 409, description = "Session already finished", body = ErrorBody)
    )
)]
pub async fn close_session(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Path(code): Path<String>,
) -> Result<StatusCode, AppError> {
    session_service::close_session(&state, code, caller_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Roster of the session, without roles.
#[utoipa::path(
    get,
    path = "/sessions/{code}/players",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses((status = 200, description = "Players in join order", body = [LobbyPlayer]))
)]
pub async fn list_players(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<Vec<LobbyPlayer>>, AppError> {
    Ok(Json(session_service::list_players(&state, code).await?))
}

/// The session as seen by the caller: own record plus role-filtered teammates.
#[utoipa::path(
    get,
    path = "/sessions/{code}/view",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Filtered view", body = SessionView),
        (status = 403, description = "Caller is not a player", body = ErrorBody)
    )
)]
pub async fn view(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Path(code): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::view(&state, code, caller_id).await?))
}

/// Winner and full kill list of a finished session.
#[utoipa::path(
    get,
    path = "/sessions/{code}/results",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Results", body = SessionResults),
        (status = 409, description = "Session not finished yet", body = ErrorBody)
    )
)]
pub async fn results(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionResults>, AppError> {
    Ok(Json(session_service::results(&state, code).await?))
}

/// Join a lobby.
#[utoipa::path(
    post,
    path = "/sessions/{code}/join",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Updated roster", body = [LobbyPlayer]),
        (status = 409, description = "Already joined or game in progress", body = ErrorBody)
    )
)]
pub async fn join(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Path(code): Path<String>,
) -> Result<Json<Vec<LobbyPlayer>>, AppError> {
    Ok(Json(session_service::join(&state, code, caller_id).await?))
}

/// Leave a lobby.
#[utoipa::path(
    post,
    path = "/sessions/{code}/leave",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Updated roster", body = [LobbyPlayer]),
        (status = 409, description = "Game in progress", body = ErrorBody)
    )
)]
pub async fn leave(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Path(code): Path<String>,
) -> Result<Json<Vec<LobbyPlayer>>, AppError> {
    Ok(Json(session_service::leave(&state, code, caller_id).await?))
}

/// Mark the caller ready.
#[utoipa::path(
    post,
    path = "/sessions/{code}/ready",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses((status = 200, description = "Updated roster", body = [LobbyPlayer]))
)]
pub async fn ready(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Path(code): Path<String>,
) -> Result<Json<Vec<LobbyPlayer>>, AppError> {
    Ok(Json(
        session_service::set_ready(&state, code, caller_id, true).await?,
    ))
}

/// Clear the caller's ready flag.
#[utoipa::path(
    post,
    path = "/sessions/{code}/unready",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses((status = 200, description = "Updated roster", body = [LobbyPlayer]))
)]
pub async fn unready(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Path(code): Path<String>,
) -> Result<Json<Vec<LobbyPlayer>>, AppError> {
    Ok(Json(
        session_service::set_ready(&state, code, caller_id, false).await?,
    ))
}

/// Allocate roles and move the lobby to PREGAME. Owner only.
#[utoipa::path(
    post,
    path = "/sessions/{code}/launch",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Session launched", body = SessionSummary),
        (status = 400, description = "Not enough players or not all ready", body = ErrorBody),
        (status = 403, description = "Caller is not the owner", body = ErrorBody)
    )
)]
pub async fn launch(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Path(code): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(session_service::launch(&state, code, caller_id).await?))
}

/// Start the game clock. Owner only.
#[utoipa::path(
    post,
    path = "/sessions/{code}/start",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Session started", body = SessionSummary),
        (status = 403, description = "Caller is not the owner", body = ErrorBody)
    )
)]
pub async fn start(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Path(code): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(session_service::start(&state, code, caller_id).await?))
}

/// Report the caller's death, or name their killer once the game is decided.
#[utoipa::path(
    post,
    path = "/sessions/{code}/confirm-killer",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller, the victim"),
    ("code" = String, Path, description = "Session code")),
    request_body = ConfirmKillerRequest,
    responses(
        (status = 200, description = "Death recorded", body = SessionSummary),
        (status = 409, description = "Already dead or killer already confirmed", body = ErrorBody)
    )
)]
pub async fn confirm_killer(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Path(code): Path<String>,
    Json(payload): Json<ConfirmKillerRequest>,
) -> Result<Json<SessionSummary>, AppError> {
    let summary =
        session_service::confirm_killer(&state, code, caller_id, payload.killer_id).await?;
    Ok(Json(summary))
}

/// Open the follow-up lobby of a finished session. Owner only.
#[utoipa::path(
    post,
    path = "/sessions/{code}/rematch",
    tag = "sessions",
    params(("X-User-Id" = String, Header, description = "Authenticated caller"),
    ("code" = String, Path, description = "Session code")),
    responses(
        (status = 200, description = "Rematch lobby", body = SessionSummary),
        (status = 409, description = "Session not finished", body = ErrorBody)
    )
)]
pub async fn rematch(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
    Path(code): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    Ok(Json(session_service::rematch(&state, code, caller_id).await?))
}

/// Reject requests without a caller id and expose it to handlers as a [`Caller`] extension.
pub(crate) async fn require_caller(
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let caller = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| Caller(value.to_owned()))
        .ok_or_else(|| AppError::Unauthorized {
            code: "ERR_UNAUTHORIZED",
            message: "missing caller header `X-User-Id`".into(),
        })?;

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
