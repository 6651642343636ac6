//! Faction elimination and end-of-timer verdicts.

use crate::{
    dao::models::PlayerEntity,
    state::roles::{Faction, Role},
};

/// Alive players per faction. Players without a role are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Census {
    /// Alive innocents.
    pub innocents_alive: usize,
    /// Alive traitors.
    pub traitors_alive: usize,
    /// Alive detectives.
    pub detectives_alive: usize,
}

impl Census {
    /// Count the alive players of every role.
    pub fn of(players: &[PlayerEntity]) -> Self {
        players
            .iter()
            .filter(|player| player.is_alive())
            .filter_map(PlayerEntity::role)
            .fold(Census::default(), |mut census, role| {
                match role {
                    Role::Innocent => census.innocents_alive += 1,
                    Role::Detective => census.detectives_alive += 1,
                    Role::Traitor => census.traitors_alive += 1,
                }
                census
            })
    }

    /// Innocents and detectives together.
    pub fn innocent_faction_alive(&self) -> usize {
        self.innocents_alive + self.detectives_alive
    }
}

/// Winner by elimination, or `None` while both factions still have someone alive.
///
/// Both factions at zero is reported as an innocent win.
pub fn evaluate(players: &[PlayerEntity]) -> Option<Faction> {
    let census = Census::of(players);
    if census.traitors_alive == 0 {
        Some(Faction::Innocent)
    } else if census.innocent_faction_alive() == 0 {
        Some(Faction::Traitor)
    } else {
        None
    }
}

/// Verdict once the game clock runs out: innocents survive if any detective is still alive.
pub fn evaluate_timeout(players: &[PlayerEntity]) -> Faction {
    if Census::of(players).detectives_alive > 0 {
        Faction::Innocent
    } else {
        Faction::Traitor
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::{AssignmentEntity, Attribution, DeathEntity, UserEntity};

    fn player(id: &str, role: Role, alive: bool) -> PlayerEntity {
        let mut player = PlayerEntity::joining(&UserEntity::new(id, id));
        player.assignment = Some(AssignmentEntity {
            role,
            analyzer_code: "AAAA".into(),
            scans_remaining: 0,
            last_scan_at: None,
        });
        if !alive {
            player.death = Some(DeathEntity {
                killer: Attribution::Unknown,
                killed_at: SystemTime::now(),
            });
        }
        player
    }

    #[test]
    fn game_continues_while_both_factions_live() {
        let players = [
            player("t", Role::Traitor, true),
            player("i", Role::Innocent, true),
        ];
        assert_eq!(evaluate(&players), None);
    }

    #[test]
    fn traitors_win_when_innocent_faction_is_gone() {
        let players = [
            player("t", Role::Traitor, true),
            player("i", Role::Innocent, false),
            player("d", Role::Detective, false),
        ];
        assert_eq!(evaluate(&players), Some(Faction::Traitor));
    }

    #[test]
    fn a_living_detective_keeps_the_game_going() {
        let players = [
            player("t", Role::Traitor, true),
            player("i", Role::Innocent, false),
            player("d", Role::Detective, true),
        ];
        assert_eq!(evaluate(&players), None);
    }

    #[test]
    fn innocents_win_when_traitors_are_gone() {
        let players = [
            player("t", Role::Traitor, false),
            player("i", Role::Innocent, true),
        ];
        assert_eq!(evaluate(&players), Some(Faction::Innocent));
    }

    #[test]
    fn nobody_alive_counts_as_innocent_win() {
        let players = [
            player("t", Role::Traitor, false),
            player("i", Role::Innocent, false),
        ];
        assert_eq!(evaluate(&players), Some(Faction::Innocent));
    }

    #[test]
    fn timeout_depends_on_detective_survival() {
        let with_detective = [
            player("t", Role::Traitor, true),
            player("d", Role::Detective, true),
        ];
        let without = [
            player("t", Role::Traitor, true),
            player("i", Role::Innocent, true),
            player("d", Role::Detective, false),
        ];
        assert_eq!(evaluate_timeout(&with_detective), Faction::Innocent);
        assert_eq!(evaluate_timeout(&without), Faction::Traitor);
    }
}
