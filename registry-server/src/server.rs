use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::registry::AssetRegistry;
use crate::routes;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AssetRegistry>,
}

impl AppState {
    pub fn new(config: &AppConfig, store: Store) -> Result<Self, AppError> {
        Ok(Self {
            registry: Arc::new(AssetRegistry::new(store, config)?),
        })
    }
}

pub fn app(state: AppState) -> axum::Router {
    routes::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(config: AppConfig, store: Store) -> Result<(), AppError> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await.map_err(AppError::Io)?;

    let state = AppState::new(&config, store.clone())?;

    info!(
        addr = %addr,
        config = %config.config_path.display(),
        backend = ?config.store.backend,
        admin = config.auth.admin_token.is_some(),
        updaters = config.auth.allowed_updaters.len(),
        "server listening"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::Io)?;

    store.persist().await?;
    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}
