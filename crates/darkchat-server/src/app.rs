use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use darkchat_db::Database;
use darkchat_gateway::connection::{self, GatewayState};
use darkchat_gateway::directory::GatewayDirectory;
use darkchat_gateway::dispatcher::Dispatcher;
use darkchat_service::{ChannelService, ServiceOptions, SqliteStore};

/// Wire the channel service to the gateway around one database.
pub fn build_state(db: Arc<Database>, jwt_secret: String, options: ServiceOptions) -> GatewayState {
    let dispatcher = Dispatcher::new();
    let directory = GatewayDirectory::new(dispatcher.clone(), db.clone());
    let store = SqliteStore::new(db.clone());

    let service = ChannelService::new(
        Arc::new(store),
        Arc::new(directory),
        Arc::new(dispatcher.clone()),
        options,
    );

    GatewayState {
        dispatcher,
        service: Arc::new(service),
        db,
        jwt_secret,
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state))
}
