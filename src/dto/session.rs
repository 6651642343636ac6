use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dao::models::{AccessLevel, PlayerEntity, SessionEntity, UserEntity},
    dto::{format_system_time, validation::validate_name},
    services::{kill_workflow::KillRecord, visibility::VisiblePlayer},
    state::{
        roles::{Faction, Role},
        state_machine::SessionPhase,
    },
};

/// Payload used to open a new lobby.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Session name shown to players.
    #[validate(custom(function = validate_name))]
    pub name: String,
}

/// Payload used to register or rename a user profile.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RegisterUserRequest {
    /// New display name.
    #[validate(custom(function = validate_name))]
    pub display_name: String,
}

/// A victim naming their killer. `null` means the killer is unknown.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmKillerRequest {
    /// Named killer.
    #[serde(default)]
    pub killer_id: Option<String>,
}

/// Registered user profile.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    /// User identifier.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Whether the user may close sessions.
    pub admin: bool,
}

impl From<UserEntity> for UserResponse {
    fn from(value: UserEntity) -> Self {
        Self {
            admin: value.access_level == AccessLevel::Admin,
            id: value.id,
            display_name: value.display_name,
        }
    }
}

/// Public metadata of a session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummary {
    /// Join code.
    pub code: String,
    /// Session name.
    pub name: String,
    /// Owner user id.
    pub owner_id: String,
    /// Owner display name.
    pub owner_name: String,
    /// Current phase.
    pub phase: SessionPhase,
    /// RFC 3339 timestamps.
    pub created_at: String,
    /// Set at launch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launched_at: Option<String>,
    /// Set when the game started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Set once the game ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Known once the game left INGAME.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_team: Option<Faction>,
    /// Rematch lobby opened after this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_code: Option<String>,
    /// Number of players in the session.
    pub player_count: usize,
}

impl SessionSummary {
    /// Summarize a session with its roster size.
    pub fn new(session: SessionEntity, player_count: usize) -> Self {
        Self {
            code: session.code,
            name: session.name,
            owner_id: session.owner_id,
            owner_name: session.owner_name,
            phase: session.phase,
            created_at: format_system_time(session.created_at),
            launched_at: session.launched_at.map(format_system_time),
            started_at: session.started_at.map(format_system_time),
            ended_at: session.ended_at.map(format_system_time),
            winning_team: session.winning_team,
            next_code: session.next_code,
            player_count,
        }
    }
}

/// Roster entry without any role information.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LobbyPlayer {
    /// Player id.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// Ready flag, lobby only.
    pub ready: bool,
    /// False once dead.
    pub alive: bool,
}

impl From<&PlayerEntity> for LobbyPlayer {
    fn from(value: &PlayerEntity) -> Self {
        Self {
            user_id: value.user_id.clone(),
            display_name: value.display_name.clone(),
            ready: value.ready,
            alive: value.is_alive(),
        }
    }
}

/// The caller's own record, secrets included.
#[derive(Debug, Serialize, ToSchema)]
pub struct SelfView {
    /// Caller id.
    pub user_id: String,
    /// Caller display name.
    pub display_name: String,
    /// False once dead.
    pub alive: bool,
    /// Absent until the session is launched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Code other players scan with the analyzer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer_code: Option<String>,
    /// Analyzer scans left.
    pub scans_remaining: u8,
    /// Set once the caller died and named a killer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_killer_id: Option<String>,
}

impl From<&PlayerEntity> for SelfView {
    fn from(value: &PlayerEntity) -> Self {
        let assignment = value.assignment.as_ref();
        Self {
            user_id: value.user_id.clone(),
            display_name: value.display_name.clone(),
            alive: value.is_alive(),
            role: assignment.map(|assignment| assignment.role),
            analyzer_code: assignment.map(|assignment| assignment.analyzer_code.clone()),
            scans_remaining: assignment.map_or(0, |assignment| assignment.scans_remaining),
            confirmed_killer_id: value
                .death
                .as_ref()
                .and_then(|death| death.killer.killer_id())
                .map(str::to_owned),
        }
    }
}

/// Another player, role redacted for the viewer.
#[derive(Debug, Serialize, ToSchema)]
pub struct OtherPlayerView {
    /// Player id.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// False once dead.
    pub alive: bool,
    /// Only present when the viewer may see it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl From<VisiblePlayer<'_>> for OtherPlayerView {
    fn from(value: VisiblePlayer<'_>) -> Self {
        Self {
            user_id: value.player.user_id.clone(),
            display_name: value.player.display_name.clone(),
            alive: value.player.is_alive(),
            role: value.role,
        }
    }
}

/// Everything a member is allowed to know about a session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionView {
    /// Session metadata.
    pub session: SessionSummary,
    /// The caller.
    pub me: SelfView,
    /// Everybody else.
    pub others: Vec<OtherPlayerView>,
}

/// One death with its attribution.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KillRecordDto {
    /// Victim id.
    pub victim_id: String,
    /// Victim display name.
    pub victim_name: String,
    /// Victim role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub victim_role: Option<Role>,
    /// `null` while the killer is unknown.
    pub killer_id: Option<String>,
    /// Killer display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killer_name: Option<String>,
    /// Killer role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killer_role: Option<Role>,
    /// When the death was reported.
    pub killed_at: String,
}

impl From<KillRecord> for KillRecordDto {
    fn from(value: KillRecord) -> Self {
        Self {
            killer_id: value.killer.killer_id().map(str::to_owned),
            victim_id: value.victim_id,
            victim_name: value.victim_name,
            victim_role: value.victim_role,
            killer_name: value.killer_name,
            killer_role: value.killer_role,
            killed_at: format_system_time(value.killed_at),
        }
    }
}

/// Final results of a finished session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResults {
    /// Session code.
    pub code: String,
    /// Winning faction.
    pub winning_team: Faction,
    /// End of the game.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Every death with its attribution.
    pub kills: Vec<KillRecordDto>,
}
