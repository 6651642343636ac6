use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::sse::{Handshake, ServerEvent, SystemStatus},
    error::ServiceError,
    state::SharedState,
};

/// Subscribe to the events of session `code`. Fails if the session does not exist.
pub async fn subscribe_session(
    state: &SharedState,
    code: &str,
) -> Result<broadcast::Receiver<ServerEvent>, ServiceError> {
    let store = state.require_session_store().await?;
    if store.find_session(code.to_owned()).await?.is_none() {
        return Err(ServiceError::SessionNotFound(code.to_owned()));
    }
    Ok(state.sse().subscribe())
}

/// First event sent on a fresh stream.
pub fn handshake(state: &SharedState, code: &str) -> Option<ServerEvent> {
    ServerEvent::json(
        Some(code.to_owned()),
        "handshake".to_owned(),
        &Handshake {
            code: code.to_owned(),
            degraded: state.is_degraded(),
        },
    )
    .ok()
}

/// Relay degraded mode changes to every connected stream until the state is dropped.
pub fn spawn_status_broadcaster(state: SharedState) {
    let mut watcher = state.degraded_watcher();
    tokio::spawn(async move {
        while watcher.changed().await.is_ok() {
            let degraded = *watcher.borrow_and_update();
            match ServerEvent::json(None, "system.status".to_owned(), &SystemStatus { degraded }) {
                Ok(event) => state.sse().broadcast(event),
                Err(err) => debug!(error = %err, "failed to encode system status"),
            }
        }
    });
}

/// Convert a broadcast receiver into an SSE response, forwarding the events of session `code`
/// and cleaning up once the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    code: String,
    greeting: Option<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(greeting) = greeting {
            if tx.send(Ok(to_event(greeting))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) if payload.is_for(&code) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => continue,
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(code = %code, skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!(code = %code, "session SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}
