//! Traitor Back binary entrypoint wiring REST, SSE, notifications and the session store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use traitor_back::{
    config::AppConfig,
    dao::session_store::{SessionStore, memory::MemorySessionStore},
    routes,
    services::{
        notifier::{FanoutNotifier, Notifier, SseNotifier},
        sse_service, storage_supervisor,
    },
    state::{AppState, SSE_CAPACITY, SharedState, SseHub},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let sse = Arc::new(SseHub::new(SSE_CAPACITY));
    let notifier = build_notifier(sse.clone());

    let app_state = AppState::new(config, sse, notifier);
    sse_service::spawn_status_broadcaster(app_state.clone());
    install_store(&app_state).await?;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Select the storage backend from `STORE_BACKEND` (`mongo` by default, or `memory`).
async fn install_store(state: &SharedState) -> anyhow::Result<()> {
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "mongo".into());
    match backend.to_ascii_lowercase().as_str() {
        "memory" => {
            info!("using in-memory session store");
            let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
            state.set_session_store(store).await;
            Ok(())
        }
        #[cfg(feature = "mongo-store")]
        "mongo" | "mongodb" => {
            use traitor_back::dao::{
                session_store::mongodb::{MongoConfig, MongoSessionStore},
                storage::StorageError,
            };

            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = MongoConfig::from_env().await.map_err(StorageError::from)?;
                let store = MongoSessionStore::connect(config)
                    .await
                    .map_err(StorageError::from)?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn SessionStore>)
            }));
            Ok(())
        }
        other => anyhow::bail!("unsupported STORE_BACKEND `{other}`"),
    }
}

/// Every notification goes to the SSE hub, and to the socket relay when `SOCKET_RELAY_URI` is set.
fn build_notifier(sse: Arc<SseHub>) -> Arc<dyn Notifier> {
    let mut targets: Vec<Arc<dyn Notifier>> = vec![Arc::new(SseNotifier::new(sse))];

    match env::var("SOCKET_RELAY_URI") {
        #[cfg(feature = "socket-relay")]
        Ok(uri) => match traitor_back::services::notifier::SocketRelayNotifier::new(uri.clone()) {
            Ok(relay) => {
                info!(%uri, "relaying session notifications");
                targets.push(Arc::new(relay));
            }
            Err(err) => warn!(%uri, error = %err, "failed to build socket relay client"),
        },
        #[cfg(not(feature = "socket-relay"))]
        Ok(_) => warn!("SOCKET_RELAY_URI set but the socket-relay feature is disabled"),
        Err(_) => {}
    }

    Arc::new(FanoutNotifier::new(targets))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
