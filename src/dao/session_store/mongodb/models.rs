use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::{
    dao::models::{
        AccessLevel, AssignmentEntity, Attribution, DeathEntity, PlayerEntity, SessionEntity,
        UserEntity,
    },
    state::{
        roles::{Faction, Role},
        state_machine::SessionPhase,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoUserDocument {
    #[serde(rename = "_id")]
    id: String,
    display_name: String,
    #[serde(default)]
    access_level: AccessLevel,
    joined_at: DateTime,
}

impl From<UserEntity> for MongoUserDocument {
    fn from(value: UserEntity) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            access_level: value.access_level,
            joined_at: DateTime::from_system_time(value.joined_at),
        }
    }
}

impl From<MongoUserDocument> for UserEntity {
    fn from(value: MongoUserDocument) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            access_level: value.access_level,
            joined_at: value.joined_at.to_system_time(),
        }
    }
}

/// A session with its players embedded, so every conditional write targets one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    pub code: String,
    name: String,
    pub owner_id: String,
    owner_name: String,
    created_at: DateTime,
    launched_at: Option<DateTime>,
    started_at: Option<DateTime>,
    ended_at: Option<DateTime>,
    pub phase: SessionPhase,
    winning_team: Option<Faction>,
    next_code: Option<String>,
    pub revision: i64,
    #[serde(default)]
    pub players: Vec<MongoPlayerDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPlayerDocument {
    user_id: String,
    display_name: String,
    ready: bool,
    assignment: Option<MongoAssignmentDocument>,
    death: Option<MongoDeathDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoAssignmentDocument {
    role: Role,
    analyzer_code: String,
    scans_remaining: i32,
    last_scan_at: Option<DateTime>,
}

/// `killer_id: null` is an unknown killer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoDeathDocument {
    killer_id: Option<String>,
    killed_at: DateTime,
}

impl MongoSessionDocument {
    /// A brand new lobby document with no players.
    pub fn lobby(session: SessionEntity) -> Self {
        Self {
            code: session.code,
            name: session.name,
            owner_id: session.owner_id,
            owner_name: session.owner_name,
            created_at: DateTime::from_system_time(session.created_at),
            launched_at: session.launched_at.map(DateTime::from_system_time),
            started_at: session.started_at.map(DateTime::from_system_time),
            ended_at: session.ended_at.map(DateTime::from_system_time),
            phase: session.phase,
            winning_team: session.winning_team,
            next_code: session.next_code,
            revision: session.revision as i64,
            players: Vec::new(),
        }
    }

    /// Turn the lobby into a launched game holding the assigned roster.
    pub fn launched(mut self, players: Vec<PlayerEntity>, launched_at: DateTime) -> Self {
        self.phase = SessionPhase::Pregame;
        self.launched_at = Some(launched_at);
        self.revision += 1;
        self.players = players.into_iter().map(Into::into).collect();
        self
    }

    pub fn into_session(self) -> SessionEntity {
        SessionEntity {
            code: self.code,
            name: self.name,
            owner_id: self.owner_id,
            owner_name: self.owner_name,
            created_at: self.created_at.to_system_time(),
            launched_at: self.launched_at.map(DateTime::to_system_time),
            started_at: self.started_at.map(DateTime::to_system_time),
            ended_at: self.ended_at.map(DateTime::to_system_time),
            phase: self.phase,
            winning_team: self.winning_team,
            next_code: self.next_code,
            revision: self.revision.max(0) as u64,
        }
    }

    pub fn into_players(self) -> Vec<PlayerEntity> {
        self.players.into_iter().map(Into::into).collect()
    }
}

impl MongoPlayerDocument {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Embedded form used by `$push` when a player joins a lobby.
    pub fn lobby_entry(player: &PlayerEntity) -> Document {
        doc! {
            "user_id": player.user_id.as_str(),
            "display_name": player.display_name.as_str(),
            "ready": player.ready,
            "assignment": null,
            "death": null,
        }
    }
}

/// Embedded form of a death written by `$set`.
pub fn death_entry(death: &DeathEntity) -> Document {
    doc! {
        "killer_id": death.killer.killer_id(),
        "killed_at": DateTime::from_system_time(death.killed_at),
    }
}

impl From<PlayerEntity> for MongoPlayerDocument {
    fn from(value: PlayerEntity) -> Self {
        Self {
            user_id: value.user_id,
            display_name: value.display_name,
            ready: value.ready,
            assignment: value.assignment.map(|assignment| MongoAssignmentDocument {
                role: assignment.role,
                analyzer_code: assignment.analyzer_code,
                scans_remaining: i32::from(assignment.scans_remaining),
                last_scan_at: assignment.last_scan_at.map(DateTime::from_system_time),
            }),
            death: value.death.map(|death| MongoDeathDocument {
                killer_id: death.killer.killer_id().map(str::to_owned),
                killed_at: DateTime::from_system_time(death.killed_at),
            }),
        }
    }
}

impl From<MongoPlayerDocument> for PlayerEntity {
    fn from(value: MongoPlayerDocument) -> Self {
        Self {
            user_id: value.user_id,
            display_name: value.display_name,
            ready: value.ready,
            assignment: value.assignment.map(|assignment| AssignmentEntity {
                role: assignment.role,
                analyzer_code: assignment.analyzer_code,
                scans_remaining: u8::try_from(assignment.scans_remaining).unwrap_or(0),
                last_scan_at: assignment.last_scan_at.map(DateTime::to_system_time),
            }),
            death: value.death.map(|death| DeathEntity {
                killer: Attribution::from(death.killer_id),
                killed_at: death.killed_at.to_system_time(),
            }),
        }
    }
}
