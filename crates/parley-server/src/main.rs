use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::middleware::require_auth;
use parley_api::{AppState, AppStateInner, conversations, messages, search};
use parley_core::notify::LogNotifier;
use parley_core::sweeper::{DEFAULT_SWEEP_PERIOD, Sweeper};
use parley_core::Lifecycle;
use parley_db::Database;
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::registry::Registry;
use parley_gateway::typing::{self, TypingTracker};

#[derive(Clone)]
struct ServerState {
    app: AppState,
    dispatcher: Dispatcher,
    typing: TypingTracker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let sweep_period = std::env::var("PARLEY_SWEEP_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SWEEP_PERIOD);

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let registry = Registry::new();
    let dispatcher = Dispatcher::new(registry);
    let typing = TypingTracker::new();
    let lifecycle = Arc::new(Lifecycle::new(
        db.clone(),
        dispatcher.clone(),
        Arc::new(LogNotifier),
    ));

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        lifecycle: lifecycle.clone(),
        jwt_secret: jwt_secret.clone(),
    });

    let state = ServerState {
        app: app_state.clone(),
        dispatcher: dispatcher.clone(),
        typing: typing.clone(),
    };

    // Background tasks: expiry sweeper and typing auto-stop
    tokio::spawn(Sweeper::new(lifecycle.clone(), sweep_period).run());
    tokio::spawn(typing::run_expiry(typing.clone(), dispatcher.clone()));

    // Routes
    let protected_routes = Router::new()
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route("/conversations/{conversation_id}", patch(conversations::update_conversation))
        .route("/conversations/{conversation_id}", delete(conversations::remove_conversation))
        .route("/conversations/{conversation_id}/display", patch(conversations::set_member_display))
        .route("/conversations/{conversation_id}/members", post(conversations::add_member))
        .route(
            "/conversations/{conversation_id}/members/{user_id}",
            delete(conversations::remove_member),
        )
        .route(
            "/conversations/{conversation_id}/members/{user_id}/permissions",
            patch(conversations::update_permissions),
        )
        .route("/conversations/{conversation_id}/transfer", post(conversations::transfer_creator))
        .route("/conversations/{conversation_id}/messages", get(messages::get_messages))
        .route("/conversations/{conversation_id}/messages", post(messages::send_message))
        .route(
            "/conversations/{conversation_id}/messages/{message_id}",
            patch(messages::edit_message),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}",
            delete(messages::delete_message),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}/reactions",
            post(messages::toggle_reaction),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}/pin",
            post(messages::toggle_pin),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}/forward",
            post(messages::forward_message),
        )
        .route("/conversations/{conversation_id}/read", post(messages::mark_read))
        .route("/search", get(search::search))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher,
            state.app.db.clone(),
            state.typing,
            state.app.jwt_secret.clone(),
        )
    })
}
