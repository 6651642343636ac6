//! Hidden-information rules: which role a viewer is shown for each other player.

use crate::{dao::models::PlayerEntity, state::roles::Role};

/// Role of `subject` as shown to `viewer`.
///
/// Detectives are public, traitors see everyone, everybody else looks innocent.
pub fn visible_role(viewer: Role, subject: Role) -> Role {
    match (viewer, subject) {
        (_, Role::Detective) => Role::Detective,
        (Role::Traitor, subject) => subject,
        _ => Role::Innocent,
    }
}

/// Another player as seen by the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisiblePlayer<'a> {
    /// The player being looked at.
    pub player: &'a PlayerEntity,
    /// Role as shown to the viewer; `None` before launch.
    pub role: Option<Role>,
}

/// Every player except the viewer, with roles redacted for `viewer_role`.
///
/// Players without an assignment (a lobby) are returned without a role.
pub fn visible_players<'a>(
    viewer_id: &str,
    viewer_role: Role,
    players: &'a [PlayerEntity],
) -> Vec<VisiblePlayer<'a>> {
    players
        .iter()
        .filter(|player| player.user_id != viewer_id)
        .map(|player| VisiblePlayer {
            player,
            role: player.role().map(|role| visible_role(viewer_role, role)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dao::models::{AssignmentEntity, UserEntity}, services::role_allocator};

    const ROLES: [Role; 3] = [Role::Innocent, Role::Traitor, Role::Detective];

    #[test]
    fn traitors_see_true_roles() {
        for subject in ROLES {
            assert_eq!(visible_role(Role::Traitor, subject), subject);
        }
    }

    #[test]
    fn detectives_are_visible_to_everyone() {
        for viewer in ROLES {
            assert_eq!(visible_role(viewer, Role::Detective), Role::Detective);
        }
    }

    #[test]
    fn innocent_side_cannot_spot_traitors() {
        assert_eq!(visible_role(Role::Innocent, Role::Traitor), Role::Innocent);
        assert_eq!(visible_role(Role::Detective, Role::Traitor), Role::Innocent);
        assert_eq!(visible_role(Role::Innocent, Role::Innocent), Role::Innocent);
    }

    #[test]
    fn viewer_is_never_listed() {
        let players = role_allocator::allocate(
            (0..8)
                .map(|i| PlayerEntity::joining(&UserEntity::new(format!("u{i}"), "P")))
                .collect(),
            3,
        );

        for viewer in &players {
            let role = viewer.role().unwrap();
            let visible = visible_players(&viewer.user_id, role, &players);
            assert_eq!(visible.len(), players.len() - 1);
            assert!(visible.iter().all(|v| v.player.user_id != viewer.user_id));
            if role != Role::Traitor {
                assert!(visible.iter().all(|v| v.role != Some(Role::Traitor)));
            }
        }
    }

    #[test]
    fn lobby_players_have_no_role() {
        let mut players = vec![
            PlayerEntity::joining(&UserEntity::new("u1", "A")),
            PlayerEntity::joining(&UserEntity::new("u2", "B")),
        ];
        players[0].assignment = Some(AssignmentEntity {
            role: Role::Traitor,
            analyzer_code: "ABCD".into(),
            scans_remaining: 0,
            last_scan_at: None,
        });
        let visible = visible_players("u2", Role::Innocent, &players);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].role, Some(Role::Innocent));
    }
}
