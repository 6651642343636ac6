//! Outbound notification collaborator.
//!
//! Session code persists first and notifies second; delivery is best effort and a failed
//! notification never undoes a transition (see [`AppState::notify`]).
//!
//! [`AppState::notify`]: crate::state::AppState::notify

use std::{sync::Arc, time::SystemTime};

use futures::future::{self, BoxFuture};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    dto::{
        format_system_time,
        sse::{
            ClosedEvent, ConfirmationRequestedEvent, ConfirmedKillEvent, EndedEvent, LaunchedEvent,
            PlayerEvent, RematchEvent, ServerEvent, StartedEvent,
        },
    },
    state::SseHub,
};

/// Failure to hand a notification to its transport.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The notification could not be serialised.
    #[error("failed to encode `{event}` notification")]
    Encode {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// The relay request failed or timed out.
    #[cfg(feature = "socket-relay")]
    #[error("failed to relay `{event}` notification")]
    Relay {
        event: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// Several transports failed; the first error is kept.
    #[error("{failed} notifier(s) failed, first: {first}")]
    Partial {
        failed: usize,
        first: Box<NotifyError>,
    },
}

/// Events pushed to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SessionNotification {
    /// A player joined the lobby.
    PlayerJoined(PlayerEvent),
    /// A player left the lobby.
    PlayerLeft(PlayerEvent),
    /// A player is ready.
    PlayerReady(PlayerEvent),
    /// A player is no longer ready.
    PlayerUnready(PlayerEvent),
    /// Roles were dealt.
    SessionLaunched(LaunchedEvent),
    /// The game clock started.
    SessionStarted(StartedEvent),
    /// Final results.
    SessionEnded(EndedEvent),
    /// A faction won but some victims still have to name their killer.
    ConfirmationRequested(ConfirmationRequestedEvent),
    /// A death was reported or attributed.
    PlayerConfirmedKill(ConfirmedKillEvent),
    /// A rematch lobby was opened.
    SessionRematch(RematchEvent),
    /// An admin closed the session.
    SessionClosed(ClosedEvent),
}

impl SessionNotification {
    /// Dotted event name used on every transport.
    pub fn name(&self) -> &'static str {
        match self {
            SessionNotification::PlayerJoined(_) => "player.joined",
            SessionNotification::PlayerLeft(_) => "player.left",
            SessionNotification::PlayerReady(_) => "player.ready",
            SessionNotification::PlayerUnready(_) => "player.unready",
            SessionNotification::SessionLaunched(_) => "session.launched",
            SessionNotification::SessionStarted(_) => "session.started",
            SessionNotification::SessionEnded(_) => "session.ended",
            SessionNotification::ConfirmationRequested(_) => "kills.confirmation_requested",
            SessionNotification::PlayerConfirmedKill(_) => "player.confirmed_kill",
            SessionNotification::SessionRematch(_) => "session.rematch",
            SessionNotification::SessionClosed(_) => "session.closed",
        }
    }
}

/// Wire form shared by all transports.
#[derive(Debug, Serialize)]
pub struct NotificationEnvelope<'a> {
    /// Unique id of this delivery.
    pub id: Uuid,
    /// Session code.
    pub code: &'a str,
    /// Dotted event name.
    pub event: &'static str,
    /// RFC3339 send time.
    pub sent_at: String,
    /// Event body.
    pub payload: &'a SessionNotification,
}

impl<'a> NotificationEnvelope<'a> {
    /// Wrap `notification` for session `code`.
    pub fn new(code: &'a str, notification: &'a SessionNotification) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            event: notification.name(),
            sent_at: format_system_time(SystemTime::now()),
            payload: notification,
        }
    }
}

/// Notification collaborator. Implementations must not block the caller for long; the returned
/// future owns everything it needs.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        code: &str,
        notification: &SessionNotification,
    ) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Publishes notifications on the in-process SSE hub.
pub struct SseNotifier {
    hub: Arc<SseHub>,
}

impl SseNotifier {
    /// Publish on `hub`.
    pub fn new(hub: Arc<SseHub>) -> Self {
        Self { hub }
    }
}

impl Notifier for SseNotifier {
    fn notify(
        &self,
        code: &str,
        notification: &SessionNotification,
    ) -> BoxFuture<'static, Result<(), NotifyError>> {
        let event = notification.name();
        let result = ServerEvent::json(
            Some(code.to_owned()),
            event.to_owned(),
            &NotificationEnvelope::new(code, notification),
        )
        .map(|payload| self.hub.broadcast(payload))
        .map_err(|source| NotifyError::Encode { event, source });

        Box::pin(future::ready(result))
    }
}

/// Posts notifications to an external socket relay at `{base}/game/{code}/{event}`.
#[cfg(feature = "socket-relay")]
pub struct SocketRelayNotifier {
    client: reqwest::Client,
    base_url: String,
}

/// Upper bound for one relay request, connection included.
#[cfg(feature = "socket-relay")]
pub const RELAY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[cfg(feature = "socket-relay")]
impl SocketRelayNotifier {
    /// Build a relay notifier whose requests give up after [`RELAY_TIMEOUT`].
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(RELAY_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }
}

#[cfg(feature = "socket-relay")]
impl Notifier for SocketRelayNotifier {
    fn notify(
        &self,
        code: &str,
        notification: &SessionNotification,
    ) -> BoxFuture<'static, Result<(), NotifyError>> {
        let event = notification.name();
        let url = format!("{}/game/{code}/{event}", self.base_url);
        let body = match serde_json::to_value(NotificationEnvelope::new(code, notification)) {
            Ok(body) => body,
            Err(source) => {
                return Box::pin(future::ready(Err(NotifyError::Encode { event, source })));
            }
        };
        let client = self.client.clone();

        Box::pin(async move {
            client
                .post(url)
                .json(&body)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map(|_| ())
                .map_err(|source| NotifyError::Relay { event, source })
        })
    }
}

/// Delivers every notification to all inner notifiers.
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    /// Deliver to every notifier in `targets`.
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

impl Notifier for FanoutNotifier {
    fn notify(
        &self,
        code: &str,
        notification: &SessionNotification,
    ) -> BoxFuture<'static, Result<(), NotifyError>> {
        let deliveries: Vec<_> = self
            .targets
            .iter()
            .map(|target| target.notify(code, notification))
            .collect();

        Box::pin(async move {
            let mut errors = future::join_all(deliveries)
                .await
                .into_iter()
                .filter_map(Result::err);
            match errors.next() {
                None => Ok(()),
                Some(first) => Err(NotifyError::Partial {
                    failed: 1 + errors.count(),
                    first: Box::new(first),
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined() -> SessionNotification {
        SessionNotification::PlayerJoined(PlayerEvent {
            user_id: "u1".into(),
            display_name: "Ada".into(),
        })
    }

    #[tokio::test]
    async fn sse_notifier_tags_events_with_the_session_code() {
        let hub = Arc::new(SseHub::new(8));
        let mut receiver = hub.subscribe();
        let notifier = SseNotifier::new(hub.clone());

        notifier.notify("ABCDE", &joined()).await.unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("player.joined"));
        assert!(event.is_for("ABCDE"));
        assert!(!event.is_for("ZZZZZ"));

        let body: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(body["code"], "ABCDE");
        assert_eq!(body["event"], "player.joined");
        assert_eq!(body["payload"]["user_id"], "u1");
    }

    struct Failing;

    impl Notifier for Failing {
        fn notify(
            &self,
            _code: &str,
            notification: &SessionNotification,
        ) -> BoxFuture<'static, Result<(), NotifyError>> {
            let source = serde_json::from_str::<u8>("nope").unwrap_err();
            let event = notification.name();
            Box::pin(future::ready(Err(NotifyError::Encode { event, source })))
        }
    }

    #[tokio::test]
    async fn fanout_delivers_to_healthy_targets_even_when_one_fails() {
        let hub = Arc::new(SseHub::new(8));
        let mut receiver = hub.subscribe();
        let fanout = FanoutNotifier::new(vec![
            Arc::new(Failing),
            Arc::new(SseNotifier::new(hub.clone())),
        ]);

        let err = fanout.notify("ABCDE", &joined()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Partial { failed: 1, .. }));
        assert!(receiver.try_recv().is_ok());
    }
}
