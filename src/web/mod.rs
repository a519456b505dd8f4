//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::service::GuardService;
use crate::wizard::DraftStore;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
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
    pub service: Arc<GuardService>,
    pub drafts: Arc<DraftStore>,
}

/// Backend-for-frontend server over the guard service.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, service: Arc<GuardService>, drafts: Arc<DraftStore>) -> Self {
        Self {
            state: AppState {
                config,
                service,
                drafts,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            // Guards
            .route("/api/guards", get(handlers::handle_list_guards))
            .route(
                "/api/guards/{id}",
                get(handlers::handle_get_guard).patch(handlers::handle_update_guard),
            )
            .route("/api/guards/{id}/refresh", post(handlers::handle_refresh_guard))
            .route("/api/guards/{id}/profile", get(handlers::handle_get_profile))
            .route("/api/guards/{id}/assignments", get(handlers::handle_get_assignments))
            .route("/api/guard-types", get(handlers::handle_get_guard_types))
            // Performance
            .route("/api/guards/{id}/defaults", get(handlers::handle_get_defaults))
            .route("/api/guards/{id}/incidents", get(handlers::handle_get_incidents))
            .route("/api/guards/{id}/tasks", get(handlers::handle_get_tasks))
            .route("/api/guards/{id}/history", get(handlers::handle_get_history))
            // Registration
            .route(
                "/api/registration/validate/{step}",
                post(handlers::handle_validate_step),
            )
            .route(
                "/api/registration/draft",
                get(handlers::handle_get_draft)
                    .put(handlers::handle_save_draft)
                    .delete(handlers::handle_delete_draft),
            )
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(8 * 1024 * 1024)) // profile photos
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
