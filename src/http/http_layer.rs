// Dashboard API: staff-authenticated JSON routes plus a live event stream.

#[path = "auth.rs"]
pub mod auth;
#[path = "error.rs"]
pub mod error;
#[path = "handlers.rs"]
pub mod handlers;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::Engine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub jwt_secret: Arc<String>,
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new().route("/health", get(handlers::health));

    // Staff routes (dashboard JWT auth)
    let staff_routes = Router::new()
        .route(
            "/api/v1/guilds/:guild_id/settings",
            get(handlers::get_settings).post(handlers::save_settings),
        )
        .route("/api/v1/guilds/:guild_id/logs", get(handlers::list_logs))
        .route("/api/v1/guilds/:guild_id/trust", get(handlers::get_trust))
        .route("/api/v1/guilds/:guild_id/action", post(handlers::manual_action))
        .route("/api/v1/guilds/:guild_id/revoke", post(handlers::revoke))
        .route("/api/v1/guilds/:guild_id/reset-trust", post(handlers::reset_trust))
        .route("/api/v1/guilds/:guild_id/events", get(handlers::events))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::require_staff,
        ));

    Router::new()
        .merge(public_routes)
        .merge(staff_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Dashboard API listening on http://{}", addr);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
