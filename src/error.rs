use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The caller does not own the session.
    #[error("only the session owner can do this")]
    PlayerNotOwner,
    /// Launch or start requested from the wrong phase.
    #[error("the session cannot be launched or started from its current phase")]
    LobbyNotStartable,
    /// Not enough players joined to launch.
    #[error("at least {required} players are required, {joined} joined")]
    MinimumPlayers { required: usize, joined: usize },
    /// At least one joined player is not ready.
    #[error("every player must be ready")]
    PlayersNotReady,
    /// The session already left the lobby, or results are not final yet.
    #[error("the game is already in progress")]
    GameInProgress,
    /// Kill reports are only accepted while the game runs or awaits attributions.
    #[error("the game is not in progress")]
    GameNotInProgress,
    /// The caller already reported their death.
    #[error("the player is already dead")]
    PlayerIsDead,
    /// Only dead players can name their killer after the game was decided.
    #[error("the player is still alive")]
    PlayerIsAlive,
    /// The victim's killer is already known.
    #[error("the killer has already been confirmed")]
    KillerAlreadyConfirmed,
    /// The session reached POSTGAME and cannot be closed.
    #[error("the session is finished")]
    SessionFinished,
    /// The caller is not a player of the session.
    #[error("the user is not part of this session")]
    PlayerNotInSession,
    /// The caller already joined the session.
    #[error("the user already joined this session")]
    PlayerAlreadyInSession,
    /// No profile or session member with this id.
    #[error("user `{0}` not found")]
    UserNotFound(String),
    /// No session with this code.
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    /// No unused session code could be drawn.
    #[error("no free session code could be allocated")]
    CodePoolExhausted,
    /// Another request changed the session first.
    #[error("concurrent update rejected: {0}")]
    ConcurrencyConflict(String),
    /// The caller lacks the privileges for this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Storage backend failed.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { operation, code } => {
                ServiceError::ConcurrencyConflict(format!("{operation} on `{code}`"))
            }
            StorageError::NotFound { code } => ServiceError::SessionNotFound(code),
            err @ StorageError::Unavailable { .. } => ServiceError::Unavailable(err),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest {
            code: "ERR_INVALID_INPUT",
            message: format!("validation failed: {err}"),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or rejected input (400).
    #[error("{message}")]
    BadRequest { code: &'static str, message: String },
    /// Missing identity or privileges (401).
    #[error("{message}")]
    Unauthorized { code: &'static str, message: String },
    /// Caller identified but not allowed (403).
    #[error("{message}")]
    Forbidden { code: &'static str, message: String },
    /// Unknown session or user (404).
    #[error("{message}")]
    NotFound { code: &'static str, message: String },
    /// Operation not valid in the current phase (409).
    #[error("{message}")]
    Conflict { code: &'static str, message: String },
    /// Storage or code pool unavailable (503).
    #[error("{message}")]
    ServiceUnavailable { code: &'static str, message: String },
    /// Unexpected failure; details are only logged (500).
    #[error("internal error")]
    Internal,
}

impl AppError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest { code, .. }
            | AppError::Unauthorized { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::ServiceUnavailable { code, .. } => code,
            AppError::Internal => "ERR_UNKNOWN",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::PlayerNotOwner => AppError::Forbidden {
                code: "ERR_NOT_OWNER",
                message,
            },
            ServiceError::LobbyNotStartable => AppError::Conflict {
                code: "ERR_LOBBY_NOT_STARTABLE",
                message,
            },
            ServiceError::MinimumPlayers { .. } => AppError::BadRequest {
                code: "ERR_MINIMUM_PLAYERS",
                message,
            },
            ServiceError::PlayersNotReady => AppError::BadRequest {
                code: "ERR_PLAYERS_NOT_READY",
                message,
            },
            ServiceError::GameInProgress => AppError::Conflict {
                code: "ERR_GAME_IN_PROGRESS",
                message,
            },
            ServiceError::GameNotInProgress => AppError::Conflict {
                code: "ERR_GAME_NOT_IN_PROGRESS",
                message,
            },
            ServiceError::PlayerIsDead => AppError::Conflict {
                code: "ERR_PLAYER_IS_DEAD",
                message,
            },
            ServiceError::PlayerIsAlive => AppError::Conflict {
                code: "ERR_PLAYER_IS_ALIVE",
                message,
            },
            ServiceError::KillerAlreadyConfirmed => AppError::Conflict {
                code: "ERR_KILLER_ALREADY_CONFIRMED",
                message,
            },
            ServiceError::SessionFinished => AppError::Conflict {
                code: "ERR_GAME_FINISHED",
                message,
            },
            ServiceError::PlayerNotInSession => AppError::Forbidden {
                code: "ERR_PLAYER_NOT_IN_GAME",
                message,
            },
            ServiceError::PlayerAlreadyInSession => AppError::Conflict {
                code: "ERR_PLAYER_ALREADY_IN_GAME",
                message,
            },
            ServiceError::UserNotFound(_) => AppError::NotFound {
                code: "ERR_USER_NOT_FOUND",
                message,
            },
            ServiceError::SessionNotFound(_) => AppError::NotFound {
                code: "ERR_GAME_NOT_FOUND",
                message,
            },
            ServiceError::CodePoolExhausted => AppError::ServiceUnavailable {
                code: "ERR_CODE_POOL_EXHAUSTED",
                message,
            },
            ServiceError::ConcurrencyConflict(_) => AppError::Conflict {
                code: "ERR_CONCURRENCY_CONFLICT",
                message,
            },
            ServiceError::Unauthorized(_) => AppError::Unauthorized {
                code: "ERR_UNAUTHORIZED",
                message,
            },
            ServiceError::InvalidInput(_) => AppError::BadRequest {
                code: "ERR_INVALID_INPUT",
                message,
            },
            ServiceError::Degraded => AppError::ServiceUnavailable {
                code: "ERR_SERVICE_DEGRADED",
                message,
            },
            ServiceError::InvalidState(_) | ServiceError::Unavailable(_) => {
                error!(error = ?err, "unexpected service failure");
                AppError::Internal
            }
        }
    }
}

/// Error payload returned by every failing endpoint.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human readable description.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let payload = Json(ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
        });

        (self.status(), payload).into_response()
    }
}
