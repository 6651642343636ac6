use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::state::{
    roles::{Faction, Role},
    state_machine::SessionPhase,
};

/// Privilege level attached to a registered user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessLevel {
    /// Regular player.
    #[default]
    User,
    /// May close any unfinished session.
    Admin,
}

/// User profile created by the login exchange and read by the session engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntity {
    /// Stable identifier of the user.
    pub id: String,
    /// Name shown to other players.
    pub display_name: String,
    /// Privilege level (admins may close sessions).
    pub access_level: AccessLevel,
    /// Registration timestamp.
    pub joined_at: SystemTime,
}

impl UserEntity {
    /// Build a regular user profile registered now.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            access_level: AccessLevel::User,
            joined_at: SystemTime::now(),
        }
    }

    /// Return the same profile with admin privileges.
    pub fn admin(mut self) -> Self {
        self.access_level = AccessLevel::Admin;
        self
    }

    /// Whether the user has admin access.
    pub fn is_admin(&self) -> bool {
        self.access_level == AccessLevel::Admin
    }
}

/// Session metadata persisted by the storage layer. A session starts as a lobby and becomes a
/// game once launched; its code stays its identifier for its whole life.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Short human-enterable code, unique while the session exists.
    pub code: String,
    /// Lobby name chosen by the owner.
    pub name: String,
    /// Identifier of the user that created the session.
    pub owner_id: String,
    /// Display name of the owner at creation time.
    pub owner_name: String,
    /// Creation time.
    pub created_at: SystemTime,
    /// Set when roles were dealt.
    pub launched_at: Option<SystemTime>,
    /// Set when the game clock started.
    pub started_at: Option<SystemTime>,
    /// Set when the game was decided.
    pub ended_at: Option<SystemTime>,
    /// Current lifecycle stage.
    pub phase: SessionPhase,
    /// Winning faction, set when the game leaves INGAME.
    pub winning_team: Option<Faction>,
    /// Code of the rematch lobby created after this session finished.
    pub next_code: Option<String>,
    /// Bumped by every roster mutation so launch can detect a roster that moved under it.
    pub revision: u64,
}

impl SessionEntity {
    /// Build a fresh lobby owned by `owner`.
    pub fn new(code: String, name: String, owner: &UserEntity) -> Self {
        Self {
            code,
            name,
            owner_id: owner.id.clone(),
            owner_name: owner.display_name.clone(),
            created_at: SystemTime::now(),
            launched_at: None,
            started_at: None,
            ended_at: None,
            phase: SessionPhase::Lobby,
            winning_team: None,
            next_code: None,
            revision: 0,
        }
    }

    /// Whether `user_id` created the session.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

/// Role-specific data handed out at launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentEntity {
    /// Hidden role.
    pub role: Role,
    /// Secret 4-character token identifying the player to analyzers.
    pub analyzer_code: String,
    /// Analyzer scans left (detectives only).
    pub scans_remaining: u8,
    /// Time of the last scan.
    pub last_scan_at: Option<SystemTime>,
}

/// Who killed a player, as far as the game knows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Attribution {
    /// The victim did not name a killer yet.
    Unknown,
    /// The victim named this session member as their killer.
    Killer(String),
}

impl Attribution {
    /// Whether the killer is still unknown.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Attribution::Unknown)
    }

    /// Id of the named killer.
    pub fn killer_id(&self) -> Option<&str> {
        match self {
            Attribution::Unknown => None,
            Attribution::Killer(id) => Some(id),
        }
    }
}

impl From<Option<String>> for Attribution {
    fn from(value: Option<String>) -> Self {
        value.map_or(Attribution::Unknown, Attribution::Killer)
    }
}

/// Death record of a player. Its presence is what makes a player dead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeathEntity {
    /// Killer as named by the victim.
    pub killer: Attribution,
    /// When the death was reported.
    pub killed_at: SystemTime,
}

/// One row per (session, user) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Identifier of the user.
    pub user_id: String,
    /// Display name at join time.
    pub display_name: String,
    /// Only meaningful while the session is a lobby.
    pub ready: bool,
    /// Role data, present once the session has been launched.
    pub assignment: Option<AssignmentEntity>,
    /// Present once the player died.
    pub death: Option<DeathEntity>,
}

impl PlayerEntity {
    /// A freshly joined lobby player, not ready yet.
    pub fn joining(user: &UserEntity) -> Self {
        Self {
            user_id: user.id.clone(),
            display_name: user.display_name.clone(),
            ready: false,
            assignment: None,
            death: None,
        }
    }

    /// Whether the player has not died.
    pub fn is_alive(&self) -> bool {
        self.death.is_none()
    }

    /// Assigned role, if launched.
    pub fn role(&self) -> Option<Role> {
        self.assignment.as_ref().map(|assignment| assignment.role)
    }

    /// Whether this player is dead and still waiting to name their killer.
    pub fn awaits_attribution(&self) -> bool {
        self.death
            .as_ref()
            .is_some_and(|death| death.killer.is_unknown())
    }
}
