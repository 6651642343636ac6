use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dto::session::{KillRecordDto, LobbyPlayer},
    state::roles::Faction,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// Session the event belongs to; `None` for process-wide events.
    pub code: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(code: Option<String>, event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            code,
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Whether a subscriber of session `code` should receive this event.
    pub fn is_for(&self, code: &str) -> bool {
        self.code.as_deref().is_none_or(|target| target == code)
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Session the stream is bound to.
    pub code: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// A lobby roster change (`player.joined`, `player.left`, `player.ready`, `player.unready`).
pub struct PlayerEvent {
    /// Player concerned by the change.
    pub user_id: String,
    /// Their display name.
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `session.launched`: roles were handed out. Roles themselves are never broadcast.
pub struct LaunchedEvent {
    /// Launched roster.
    pub players: Vec<LobbyPlayer>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `session.started`.
pub struct StartedEvent {
    /// When the game started.
    pub started_at: String,
    /// When the end-of-timer evaluation fires.
    pub ends_at: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `session.ended`: final results.
pub struct EndedEvent {
    /// Faction that won.
    pub winning_team: Faction,
    /// Every death, fully disclosed.
    pub kills: Vec<KillRecordDto>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `kills.confirmation_requested`: victims that still have to name their killer.
pub struct ConfirmationRequestedEvent {
    /// Ids of the pending victims.
    pub victims: Vec<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `player.confirmed_kill`. Only the victim is disclosed.
pub struct ConfirmedKillEvent {
    /// Victim who named a killer.
    pub victim_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `session.rematch`: the owner opened a new lobby.
pub struct RematchEvent {
    /// Code of the new lobby.
    pub next_code: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `session.closed`: an administrator deleted the session.
pub struct ClosedEvent {
    /// Administrator who closed it.
    pub closed_by: String,
}
