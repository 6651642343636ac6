use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Traitor Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::session_stream,
        crate::routes::users::get_self_profile,
        crate::routes::users::register_user,
        crate::routes::session::create_session,
        crate::routes::session::get_session,
        crate::routes::session::close_session,
        crate::routes::session::list_players,
        crate::routes::session::view,
        crate::routes::session::results,
        crate::routes::session::join,
        crate::routes::session::leave,
        crate::routes::session::ready,
        crate::routes::session::unready,
        crate::routes::session::launch,
        crate::routes::session::start,
        crate::routes::session::confirm_killer,
        crate::routes::session::rematch,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::error::ErrorBody,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::RegisterUserRequest,
            crate::dto::session::ConfirmKillerRequest,
            crate::dto::session::UserResponse,
            crate::dto::session::SessionSummary,
            crate::dto::session::LobbyPlayer,
            crate::dto::session::SessionView,
            crate::dto::session::SelfView,
            crate::dto::session::OtherPlayerView,
            crate::dto::session::SessionResults,
            crate::dto::session::KillRecordDto,
            crate::dto::sse::Handshake,
            crate::dto::sse::PlayerEvent,
            crate::dto::sse::LaunchedEvent,
            crate::dto::sse::StartedEvent,
            crate::dto::sse::EndedEvent,
            crate::dto::sse::ConfirmationRequestedEvent,
            crate::dto::sse::ConfirmedKillEvent,
            crate::dto::sse::RematchEvent,
            crate::dto::sse::ClosedEvent,
            crate::state::roles::Role,
            crate::state::roles::Faction,
            crate::state::state_machine::SessionPhase,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Lobby and game lifecycle"),
        (name = "users", description = "Player profiles"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
/// OpenAPI document for the HTTP surface.
pub struct ApiDoc;
