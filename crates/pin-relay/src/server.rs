//! Relay server wiring and lifecycle

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::ServerConfig;
use crate::metrics::RelayMetrics;
use crate::pairing::PairingCoordinator;
use crate::registry::ConnectionRegistry;
use crate::store::{SessionStore, SqliteStore};

pub struct RelayServer {
    config: ServerConfig,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    /// Open the session database and wire the pairing core together.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn SessionStore> =
            Arc::new(SqliteStore::new(&config.database_path).await?);
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(RelayMetrics::new()?);
        let coordinator = Arc::new(PairingCoordinator::new(
            store.clone(),
            registry.clone(),
            metrics.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            state: AppState {
                store,
                registry,
                coordinator,
                metrics,
            },
            shutdown_tx,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let app = api::create_router(self.state.clone()).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // The clients are browser-based; mirror the permissive CORS
                // policy they expect.
                .layer(CorsLayer::permissive()),
        );

        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        info!("pin-relay listening on {}", self.config.listen_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(Self::shutdown_signal(self.shutdown_tx.subscribe()))
            .await?;

        Ok(())
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("received SIGTERM, shutting down");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
            }
            _ = shutdown.changed() => {
                info!("shutdown requested");
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
