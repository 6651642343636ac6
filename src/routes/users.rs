use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    routing::{get, put},
};
use validator::Validate;

use crate::{
    dto::session::{RegisterUserRequest, UserResponse},
    error::{AppError, ErrorBody},
    routes::session::{Caller, require_caller},
    services::session_service,
    state::SharedState,
};

/// Profile routes. Reading back the own profile requires the `X-User-Id` header.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/users/me", get(get_self_profile))
        .route_layer(middleware::from_fn(require_caller))
        .route("/users/{id}", put(register_user))
}

/// Profile of the authenticated caller.
#[utoipa::path(
    get,
    path = "/users/me",
    tag = "users",
    params(("X-User-Id" = String, Header, description = "Authenticated caller")),
    responses(
        (status = 200, description = "Caller profile", body = UserResponse),
        (status = 401, description = "Missing caller header", body = ErrorBody),
        (status = 404, description = "Caller has no profile", body = ErrorBody)
    )
)]
pub async fn get_self_profile(
    State(state): State<SharedState>,
    Extension(Caller(caller_id)): Extension<Caller>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(session_service::get_user(&state, caller_id).await?))
}

/// Create or rename a player profile.
#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "users",
    params(("id" = String, Path, description = "User identifier issued by the identity provider")),
    request_body = RegisterUserRequest,
    responses(
        (status = 200, description = "Profile saved", body = UserResponse),
        (status = 400, description = "Invalid display name", body = ErrorBody)
    )
)]
pub async fn register_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    payload.validate()?;
    Ok(Json(
        session_service::register_user(&state, id, payload).await?,
    ))
}
