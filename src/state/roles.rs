use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Hidden allegiance handed to every player at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Plays for the innocents without any ability.
    Innocent,
    /// Knows the other traitors and kills.
    Traitor,
    /// Publicly known innocent with analyzer scans.
    Detective,
}

impl Role {
    /// Faction this role plays for. Detectives side with the innocents.
    pub const fn faction(self) -> Faction {
        match self {
            Role::Innocent | Role::Detective => Faction::Innocent,
            Role::Traitor => Faction::Traitor,
        }
    }
}

/// One of the two sides that can win a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Faction {
    /// Innocents and detectives.
    Innocent,
    /// Traitors.
    Traitor,
}

impl Faction {
    /// Team string stored by the persistence layer.
    pub const fn as_str(self) -> &'static str {
        match self {
            Faction::Innocent => "INNOCENT",
            Faction::Traitor => "TRAITOR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detectives_play_for_the_innocents() {
        assert_eq!(Role::Innocent.faction(), Faction::Innocent);
        assert_eq!(Role::Detective.faction(), Faction::Innocent);
        assert_eq!(Role::Traitor.faction(), Faction::Traitor);
    }

    #[test]
    fn roles_serialize_uppercase() {
        assert_eq!(
            serde_json::to_string(&Role::Detective).unwrap(),
            "\"DETECTIVE\""
        );
        assert_eq!(
            serde_json::from_str::<Faction>("\"TRAITOR\"").unwrap(),
            Faction::Traitor
        );
    }
}
