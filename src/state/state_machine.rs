use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle stages of a session. Progression is strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionPhase {
    /// Players join, leave and toggle their ready flag.
    Lobby,
    /// Roles are assigned; waiting for the owner to start.
    Pregame,
    /// The game is being played; deaths are reported.
    Ingame,
    /// A faction won but some victims still have to name their killer.
    #[serde(rename = "POSTPENDING")]
    PostPending,
    /// Terminal: results are final.
    #[serde(rename = "POSTGAME")]
    PostGame,
}

impl SessionPhase {
    /// Status string stored by the persistence layer.
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Lobby => "LOBBY",
            SessionPhase::Pregame => "PREGAME",
            SessionPhase::Ingame => "INGAME",
            SessionPhase::PostPending => "POSTPENDING",
            SessionPhase::PostGame => "POSTGAME",
        }
    }

    /// Position of the phase in the lifecycle, used to assert forward-only progression.
    pub const fn rank(self) -> u8 {
        match self {
            SessionPhase::Lobby => 0,
            SessionPhase::Pregame => 1,
            SessionPhase::Ingame => 2,
            SessionPhase::PostPending => 3,
            SessionPhase::PostGame => 4,
        }
    }

    /// Whether no event can leave this phase.
    pub const fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::PostGame)
    }
}

/// Events moving a session from one phase to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Owner launched the lobby and roles were allocated.
    Launch,
    /// Owner started the game.
    Start,
    /// A faction has won (by elimination or by the timer).
    GameDecided,
    /// Every victim has a known killer.
    AttributionsResolved,
}

/// Error returned when an event cannot be applied from the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the session was in when the event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// A validated transition. `from` is the precondition the conditional write must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// Phase the session must still be in.
    pub from: SessionPhase,
    /// Phase after the write.
    pub to: SessionPhase,
    /// Event that triggered the transition.
    pub event: SessionEvent,
}

/// Validate `event` against `from` and describe the resulting transition.
///
/// This is the local half of every phase change; the persistence layer re-checks `plan.from`
/// atomically when the write lands.
pub fn plan(from: SessionPhase, event: SessionEvent) -> Result<Plan, InvalidTransition> {
    let to = match (from, event) {
        (SessionPhase::Lobby, SessionEvent::Launch) => SessionPhase::Pregame,
        (SessionPhase::Pregame, SessionEvent::Start) => SessionPhase::Ingame,
        (SessionPhase::Ingame, SessionEvent::GameDecided) => SessionPhase::PostPending,
        (SessionPhase::PostPending, SessionEvent::AttributionsResolved) => SessionPhase::PostGame,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(Plan { from, to, event })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHASES: [SessionPhase; 5] = [
        SessionPhase::Lobby,
        SessionPhase::Pregame,
        SessionPhase::Ingame,
        SessionPhase::PostPending,
        SessionPhase::PostGame,
    ];

    const EVENTS: [SessionEvent; 4] = [
        SessionEvent::Launch,
        SessionEvent::Start,
        SessionEvent::GameDecided,
        SessionEvent::AttributionsResolved,
    ];

    #[test]
    fn full_happy_path_through_session() {
        let mut phase = SessionPhase::Lobby;
        for event in EVENTS {
            phase = plan(phase, event).unwrap().to;
        }
        assert_eq!(phase, SessionPhase::PostGame);
    }

    #[test]
    fn every_valid_transition_moves_forward() {
        for from in PHASES {
            for event in EVENTS {
                if let Ok(plan) = plan(from, event) {
                    assert!(
                        plan.to.rank() > plan.from.rank(),
                        "{from:?} --{event:?}--> {:?} goes backwards",
                        plan.to
                    );
                }
            }
        }
    }

    #[test]
    fn terminal_phase_accepts_nothing() {
        for event in EVENTS {
            assert!(plan(SessionPhase::PostGame, event).is_err());
        }
    }

    #[test]
    fn invalid_transition_returns_error() {
        let err = plan(SessionPhase::Lobby, SessionEvent::Start).unwrap_err();
        assert_eq!(err.from, SessionPhase::Lobby);
        assert_eq!(err.event, SessionEvent::Start);
    }

    #[test]
    fn status_strings_match_serde() {
        for phase in PHASES {
            assert_eq!(
                serde_json::to_string(&phase).unwrap(),
                format!("\"{}\"", phase.as_str())
            );
        }
    }

    #[test]
    fn phases_serialize_like_status_strings() {
        assert_eq!(
            serde_json::to_string(&SessionPhase::PostPending).unwrap(),
            "\"POSTPENDING\""
        );
        assert_eq!(
            serde_json::to_string(&SessionPhase::PostGame).unwrap(),
            "\"POSTGAME\""
        );
        assert_eq!(
            serde_json::to_string(&SessionPhase::Ingame).unwrap(),
            "\"INGAME\""
        );
    }
}
