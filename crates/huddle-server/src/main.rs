mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use huddle_api::middleware::decode_claims;
use huddle_api::{AppState, AppStateInner};
use huddle_gateway::Gateway;
use huddle_gateway::connection;
use huddle_gateway::store::ChatStore;
use huddle_gateway::typing;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_gateway=debug,huddle_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = huddle_db::Database::open(&config.db_path)?;
    let store: Arc<dyn ChatStore> = Arc::new(db);
    let gateway = Gateway::new(store, config.typing_ttl);

    tokio::spawn(typing::run_expiry_loop(
        gateway.typing.clone(),
        gateway.dispatcher.clone(),
        config.typing_sweep,
    ));

    let state: AppState = Arc::new(AppStateInner {
        gateway,
        jwt_secret: config.jwt_secret.clone(),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(huddle_api::routes(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Huddle server listening on {}", config.addr);
    info!("Typing indicators expire after {:?}", config.typing_ttl);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Deserialize)]
struct UpgradeQuery {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also arrive as `?token=`.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or(query.token);

    let Some(claims) = token.and_then(|t| decode_claims(&state.jwt_secret, &t)) else {
        warn!("rejected gateway upgrade without a valid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if let Err(e) = state.gateway.ensure_identity(&claims).await {
        error!("failed to mirror identity {}: {}", claims.sub, e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| connection::handle_connection_authenticated(socket, gateway, claims))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
