//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::engine::Orchestrator;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    /// Candidate speed tests
    pub speed: Arc<Orchestrator>,
    /// Service comparisons
    pub compare: Arc<Orchestrator>,
}

/// Web server for edgeprobe.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        speed: Arc<Orchestrator>,
        compare: Arc<Orchestrator>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                store,
                speed,
                compare,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/api/candidates", get(handlers::handle_get_candidates))
            .route("/api/candidates", post(handlers::handle_create_candidates))
            .route("/api/candidates/{id}", delete(handlers::handle_delete_candidate))
            .route("/api/services", get(handlers::handle_get_services))
            .route("/api/services", post(handlers::handle_create_service))
            .route("/api/services/{id}", delete(handlers::handle_delete_service))
            .route("/api/speedtest", post(handlers::handle_speed_test))
            .route("/api/compare", post(handlers::handle_compare))
            .route("/api/selection", get(handlers::handle_get_selection))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
