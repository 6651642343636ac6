//! Role partitioning performed once, at launch.

use std::collections::HashSet;

use rand::{Rng, seq::SliceRandom};

use crate::{
    dao::models::{AssignmentEntity, PlayerEntity},
    state::roles::Role,
};

/// Alphabet of analyzer tokens. Excludes `I`, `O`, `0` and `1`.
pub const ANALYZER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Length of an analyzer token.
pub const ANALYZER_CODE_LEN: usize = 4;

/// Number of players of each role for a roster of `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleCounts {
    /// Players dealt TRAITOR.
    pub traitors: usize,
    /// Players dealt DETECTIVE.
    pub detectives: usize,
    /// Players dealt INNOCENT.
    pub innocents: usize,
}

impl RoleCounts {
    /// `n/6 + 1` traitors and `n/8 + 1` detectives, capped so that they never exceed the roster.
    pub fn for_players(n: usize) -> Self {
        let traitors = (n / 6 + 1).min(n);
        let detectives = (n / 8 + 1).min(n - traitors);
        Self {
            traitors,
            detectives,
            innocents: n - traitors - detectives,
        }
    }

    fn role_at(&self, position: usize) -> Role {
        if position < self.traitors {
            Role::Traitor
        } else if position < self.traitors + self.detectives {
            Role::Detective
        } else {
            Role::Innocent
        }
    }
}

/// Assign a role and an analyzer token to every player.
///
/// Duplicate user ids are dropped (first occurrence wins) before shuffling. Every returned player
/// is alive and carries a token unique within the roster; detectives get `scan_allowance` scans.
pub fn allocate(players: Vec<PlayerEntity>, scan_allowance: u8) -> Vec<PlayerEntity> {
    let mut seen = HashSet::new();
    let mut roster: Vec<PlayerEntity> = players
        .into_iter()
        .filter(|player| seen.insert(player.user_id.clone()))
        .collect();

    let mut rng = rand::rng();
    roster.shuffle(&mut rng);

    let counts = RoleCounts::for_players(roster.len());
    let mut issued = HashSet::with_capacity(roster.len());

    for (position, player) in roster.iter_mut().enumerate() {
        let role = counts.role_at(position);
        let analyzer_code = loop {
            let candidate = draw_analyzer_code(&mut rng);
            if issued.insert(candidate.clone()) {
                break candidate;
            }
        };

        player.assignment = Some(AssignmentEntity {
            role,
            analyzer_code,
            scans_remaining: if role == Role::Detective {
                scan_allowance
            } else {
                0
            },
            last_scan_at: None,
        });
        player.death = None;
    }

    roster
}

fn draw_analyzer_code(rng: &mut impl Rng) -> String {
    (0..ANALYZER_CODE_LEN)
        .map(|_| char::from(ANALYZER_ALPHABET[rng.random_range(0..ANALYZER_ALPHABET.len())]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::UserEntity;

    fn roster(n: usize) -> Vec<PlayerEntity> {
        (0..n)
            .map(|i| PlayerEntity::joining(&UserEntity::new(format!("u{i}"), format!("P{i}"))))
            .collect()
    }

    fn count(players: &[PlayerEntity], role: Role) -> usize {
        players.iter().filter(|p| p.role() == Some(role)).count()
    }

    #[test]
    fn six_players_get_two_traitors_and_one_detective() {
        assert_eq!(
            RoleCounts::for_players(6),
            RoleCounts {
                traitors: 2,
                detectives: 1,
                innocents: 3
            }
        );
    }

    #[test]
    fn tiny_rosters_are_capped() {
        assert_eq!(
            RoleCounts::for_players(1),
            RoleCounts {
                traitors: 1,
                detectives: 0,
                innocents: 0
            }
        );
        assert_eq!(
            RoleCounts::for_players(2),
            RoleCounts {
                traitors: 1,
                detectives: 1,
                innocents: 0
            }
        );
    }

    #[test]
    fn allocation_matches_counts_for_every_roster_size() {
        for n in 1..=40 {
            let players = allocate(roster(n), 3);
            let expected = RoleCounts::for_players(n);
            assert_eq!(players.len(), n);
            assert_eq!(count(&players, Role::Traitor), expected.traitors, "n = {n}");
            assert_eq!(count(&players, Role::Detective), expected.detectives, "n = {n}");
            assert_eq!(count(&players, Role::Innocent), expected.innocents, "n = {n}");
            assert!(players.iter().all(PlayerEntity::is_alive));

            let tokens: HashSet<_> = players
                .iter()
                .filter_map(|p| p.assignment.as_ref())
                .map(|a| a.analyzer_code.clone())
                .collect();
            assert_eq!(tokens.len(), n, "analyzer codes must be unique");
        }
    }

    #[test]
    fn only_detectives_receive_scans() {
        for player in allocate(roster(16), 3) {
            let assignment = player.assignment.unwrap();
            let expected = if assignment.role == Role::Detective { 3 } else { 0 };
            assert_eq!(assignment.scans_remaining, expected);
        }
    }

    #[test]
    fn analyzer_codes_avoid_confusable_characters() {
        for player in allocate(roster(30), 3) {
            let code = player.assignment.unwrap().analyzer_code;
            assert_eq!(code.len(), ANALYZER_CODE_LEN);
            assert!(!code.contains(['I', 'O', '0', '1']));
        }
    }

    #[test]
    fn duplicate_users_are_assigned_once() {
        let mut players = roster(4);
        players.push(players[0].clone());
        let assigned = allocate(players, 3);
        assert_eq!(assigned.len(), 4);
    }
}
