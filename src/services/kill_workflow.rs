//! Deaths, killer attribution, and the way out of INGAME.
//!
//! A kill record is never stored on its own: it is derived from a dead player and its
//! [`Attribution`]. Once a faction wins, the session moves to POSTPENDING and waits until no victim
//! has an unknown killer before moving to POSTGAME.

use std::{sync::Arc, time::SystemTime};

use tracing::{debug, info};

use crate::{
    dao::{
        models::{Attribution, PlayerEntity},
        session_store::SessionStore,
        storage::StorageError,
    },
    dto::sse::{ConfirmationRequestedEvent, EndedEvent},
    error::ServiceError,
    services::notifier::SessionNotification,
    state::{AppState, roles::{Faction, Role}, state_machine::SessionPhase},
};

/// A dead player paired with its killer attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillRecord {
    /// Player who died.
    pub victim_id: String,
    /// Display name of the victim.
    pub victim_name: String,
    /// Role the victim held.
    pub victim_role: Option<Role>,
    /// Killer named by the victim, if any.
    pub killer: Attribution,
    /// Display name of the killer once known.
    pub killer_name: Option<String>,
    /// Role of the killer once known.
    pub killer_role: Option<Role>,
    /// When the death was reported.
    pub killed_at: SystemTime,
}

/// Kill records of every dead player, oldest first.
pub fn kill_records(players: &[PlayerEntity]) -> Vec<KillRecord> {
    let mut records: Vec<KillRecord> = players
        .iter()
        .filter_map(|victim| {
            let death = victim.death.as_ref()?;
            let killer = death
                .killer
                .killer_id()
                .and_then(|id| players.iter().find(|player| player.user_id == id));
            Some(KillRecord {
                victim_id: victim.user_id.clone(),
                victim_name: victim.display_name.clone(),
                victim_role: victim.role(),
                killer: death.killer.clone(),
                killer_name: killer.map(|killer| killer.display_name.clone()),
                killer_role: killer.and_then(PlayerEntity::role),
                killed_at: death.killed_at,
            })
        })
        .collect();
    records.sort_by_key(|record| record.killed_at);
    records
}

/// Ids of victims that still have to name their killer.
pub fn pending_attributions(players: &[PlayerEntity]) -> Vec<String> {
    players
        .iter()
        .filter(|player| player.awaits_attribution())
        .map(|player| player.user_id.clone())
        .collect()
}

/// Leave INGAME with `winner`: POSTPENDING while attributions are missing, POSTGAME otherwise.
///
/// Returns `None` when the session had already left INGAME (a concurrent kill or the timer got
/// there first); that race is expected and not an error.
pub async fn conclude(
    state: &AppState,
    store: &Arc<dyn SessionStore>,
    code: &str,
    winner: Faction,
) -> Result<Option<SessionPhase>, ServiceError> {
    match store
        .transition_to_pending(code.to_owned(), winner, SystemTime::now())
        .await
    {
        Ok(()) => {}
        Err(StorageError::Conflict { .. }) => {
            debug!(code = %code, ?winner, "session already left INGAME");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    }
    info!(code = %code, ?winner, "game decided");

    let players = store.list_players(code.to_owned()).await?;
    let victims = pending_attributions(&players);
    if !victims.is_empty() {
        info!(code = %code, pending = victims.len(), "waiting for killer confirmations");
        state.notify(
            code,
            SessionNotification::ConfirmationRequested(ConfirmationRequestedEvent { victims }),
        );
        return Ok(Some(SessionPhase::PostPending));
    }

    finish(state, store, code, winner, &players).await?;
    Ok(Some(SessionPhase::PostGame))
}

/// Move POSTPENDING to POSTGAME and publish the final results.
///
/// Losing the conditional write means another confirmation already finished the session, which
/// also published the results.
pub async fn finish(
    state: &AppState,
    store: &Arc<dyn SessionStore>,
    code: &str,
    winner: Faction,
    players: &[PlayerEntity],
) -> Result<(), ServiceError> {
    match store.transition_to_complete(code.to_owned()).await {
        Ok(()) => {}
        Err(StorageError::Conflict { .. }) => {
            debug!(code = %code, "session already finished");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }
    info!(code = %code, ?winner, "session finished");

    let kills = kill_records(players).into_iter().map(Into::into).collect();
    state.notify(
        code,
        SessionNotification::SessionEnded(EndedEvent {
            winning_team: winner,
            kills,
        }),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::models::{AssignmentEntity, DeathEntity, UserEntity};

    fn player(id: &str, role: Role) -> PlayerEntity {
        let mut player = PlayerEntity::joining(&UserEntity::new(id, id.to_uppercase()));
        player.assignment = Some(AssignmentEntity {
            role,
            analyzer_code: "AAAA".into(),
            scans_remaining: 0,
            last_scan_at: None,
        });
        player
    }

    fn kill(victim: &mut PlayerEntity, killer: Option<&str>, at: SystemTime) {
        victim.death = Some(DeathEntity {
            killer: Attribution::from(killer.map(str::to_owned)),
            killed_at: at,
        });
    }

    #[test]
    fn records_exist_only_for_dead_players_in_death_order() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let mut players = vec![
            player("t", Role::Traitor),
            player("i", Role::Innocent),
            player("d", Role::Detective),
        ];
        kill(&mut players[2], Some("t"), start + Duration::from_secs(30));
        kill(&mut players[1], None, start);

        let records = kill_records(&players);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].victim_id, "i");
        assert!(records[0].killer.is_unknown());
        assert_eq!(records[0].killer_name, None);
        assert_eq!(records[1].victim_id, "d");
        assert_eq!(records[1].killer_name.as_deref(), Some("T"));
        assert_eq!(records[1].killer_role, Some(Role::Traitor));

        assert_eq!(pending_attributions(&players), vec!["i".to_owned()]);
    }
}
