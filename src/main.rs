//! USSD engine - menu navigation service for USSD aggregators
//!
//! A Rust backend implementing a session navigation state machine over a
//! tree of menus, questions and form fields.

mod api;
mod cleaner;
mod config;
mod db;
mod runtime;
mod screen;
mod state_machine;

use api::{create_router, AppState};
use cleaner::TypedFieldCleaner;
use config::GatewayConfig;
use db::Database;
use runtime::{DatabaseStorage, HomeShortcutHook, NoopHook, PreTransitionHook, RuntimeManager};
use screen::MenuDocument;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ussd_engine=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = GatewayConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    // Content errors are fatal before the server accepts anything
    tracing::info!(path = %config.menu_path.display(), "Loading menu");
    let tree = MenuDocument::load(&config.menu_path)?.into_tree(config.root_id)?;
    tracing::info!(screens = tree.len(), root = %tree.root(), "Menu loaded");

    let hook: Arc<dyn PreTransitionHook> = match &config.home_token {
        Some(token) => {
            tracing::info!(token = %token, "Home shortcut enabled");
            Arc::new(HomeShortcutHook::new(token.clone(), tree.root()))
        }
        None => Arc::new(NoopHook),
    };

    let manager = Arc::new(RuntimeManager::new(
        Arc::new(tree),
        Arc::new(TypedFieldCleaner),
        hook,
        DatabaseStorage::new(db),
        config.session_idle,
    ));

    // Outbox consumer
    let mut notifications = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => tracing::info!(
                    event = notification.event_type(),
                    transaction_id = %notification.transaction_id(),
                    notification = %serde_json::to_string(&notification).unwrap_or_default(),
                    "Notification"
                ),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Notification consumer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = create_router(AppState::new(manager)).layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("USSD engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
