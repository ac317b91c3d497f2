//! Documentation of a todo list backend with a self-healing database connection.
//!
//! [Publishing](https://www.reddit.com/r/rust/comments/195ao81/publishing_documentation_as_github_page/) docs to GitHub Pages.
//!
//!
//!
//! # General Infrastructure
//! - One axum server exposes the JSON API under `/api` and the static frontend at `/`
//! - MongoDB holds a single flat `todos` collection
//! - The server starts listening before the database is reachable
//! - A background supervisor connects, pings and reconnects for the lifetime of the process
//! - `/api/status` reports the connection state at any time
//!
//!
//!
//! # Surviving Database Outages
//!
//! **Goal**: A database that is down, slow to start or misconfigured never takes the HTTP server with it.
//!
//! - Connection attempts that fail are logged with hints (allow-list, credentials, TLS) and retried after `DB_RETRY_DELAY_MS`
//! - Retries are unbounded unless `DB_RETRY_MAX_ATTEMPTS` is set
//! - Every CRUD request waits up to `DB_WAIT_TIMEOUT_MS` for a live connection
//! - If the connection is down, or drops while waiting, the request gets a 503 carrying `dbStatus`
//! - A heartbeat ping every `DB_HEARTBEAT_MS` notices dropped connections between requests
//!
//!
//!
//! # API
//!
//! | Method | Path | Success |
//! |---|---|---|
//! | GET | `/api/todos` | 200 `{ message, todos }` newest first |
//! | POST | `/api/todos` | 201 `{ message, todo }` |
//! | PUT | `/api/todos/{id}` | 200 `{ message, todo }` |
//! | DELETE | `/api/todos/{id}` | 200 `{ message, todo }` |
//! | GET | `/api/status` | 200 `{ message, status, mongodb }` |
//!
//! Errors are `{ error }` for 400/404, `{ error, message, dbStatus }` for 503 and
//! `{ error, message }` for 500, with `details` added outside production.
//!
//!
//!
//! # Notes
//!
//! ## Concurrent edits
//! Updates replace title and description wholesale and the last write wins. Two
//! browser tabs editing the same todo can overwrite each other. No version field yet.
//!
//! ## Credentials
//! Connection strings are only ever logged or returned with the user info replaced by `***:***`.
//!
//!
//!
//! # Setup
//!
//! Run against a local database.
//! ```sh
//! MONGODB_URI=mongodb://localhost:27017/todo cargo run --bin todo
//! ```
//!
//! More logging.
//! ```sh
//! RUST_LOG=debug cargo run --bin todo
//! ```
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! `````
//!
//!
//!
//! # Environment
//!
//! | Variable | Default |
//! |---|---|
//! | `PORT` | `5000`, falls back to `PORT + 1` in development when taken |
//! | `MONGODB_URI` | `mongodb://localhost:27017/todo` |
//! | `NODE_ENV` | development unless `production` |
//! | `FRONTEND_DIR` | `frontend` |
//! | `DB_RETRY_DELAY_MS` / `DB_RETRY_MAX_DELAY_MS` | `10000` / `10000` |
//! | `DB_RETRY_JITTER` | `0` |
//! | `DB_RETRY_MAX_ATTEMPTS` | unbounded |
//! | `DB_WAIT_TIMEOUT_MS` | `5000` |
//! | `DB_HEARTBEAT_MS` | `10000` |
//! | `DB_MAX_POOL_SIZE` / `DB_MIN_POOL_SIZE` | `10` / `1` |
//! | `DB_SERVER_SELECTION_TIMEOUT_MS` | `30000` |
//! | `DB_SOCKET_IDLE_TIMEOUT_MS` | `45000` |
use std::{io::ErrorKind, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Router,
    handler::HandlerWithoutStateExt,
    http::{Method, header::CONTENT_TYPE},
    middleware,
    routing::{get, put},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod memory;
pub mod models;
pub mod repository;
pub mod retry;
pub mod routes;
pub mod state;
pub mod utils;

use config::{Config, Environment};
use database::MongoConnector;
use error::report_errors;
use routes::{
    create_todo, delete_todo, legacy_create_notice, legacy_list_redirect, list_todos,
    not_found_handler, status_handler, update_todo,
};
use state::AppState;

pub async fn start_server() -> anyhow::Result<()> {
    let environment = Environment::from_env();
    init_tracing(environment);

    info!("Loading config...");
    let config = Config::load().context("Invalid configuration")?;

    info!("Initializing state...");
    let connector = Arc::new(MongoConnector::new(config.database.clone()));
    let state = AppState::new(config, connector);

    state.connection.start().await;

    info!("Starting server...");
    let listener = bind_listener(&state.config).await?;
    let address = listener.local_addr()?;

    info!("Server running on {address}");
    info!("Environment: {:?}", state.config.environment);
    info!("Database: {}", state.config.database.masked_uri());
    info!("Frontend: {}", state.config.frontend_dir.display());

    let app = build_router(state.clone());

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Server shutting down...");
    state.connection.shutdown().await;

    served.context("Server error")
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let frontend = ServeDir::new(&state.config.frontend_dir)
        .call_fallback_on_method_not_allowed(true)
        .not_found_service(not_found_handler.into_service());

    Router::new()
        .route("/api/todos", get(list_todos).post(create_todo))
        .route("/api/todos/{id}", put(update_todo).delete(delete_todo))
        .route("/api/status", get(status_handler))
        .route("/todos", get(legacy_list_redirect).post(legacy_create_notice))
        .method_not_allowed_fallback(not_found_handler)
        .fallback_service(frontend)
        .layer(middleware::from_fn_with_state(state.clone(), report_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn init_tracing(environment: Environment) {
    let default_filter = if environment.is_production() {
        "warn,todo=info"
    } else {
        "info,tower_http=debug"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt().with_env_filter(filter).init();
}

async fn bind_listener(config: &Config) -> anyhow::Result<TcpListener> {
    let address = format!("0.0.0.0:{}", config.port);
    info!("Binding to {address}");

    let error = match TcpListener::bind(&address).await {
        Ok(listener) => return Ok(listener),
        Err(error) => error,
    };

    if error.kind() != ErrorKind::AddrInUse {
        return Err(error).with_context(|| format!("Failed to bind {address}"));
    }

    let Some(fallback) = config.fallback_port() else {
        error!("Port {} is already in use", config.port);
        return Err(error).with_context(|| format!("Port {} is already in use", config.port));
    };

    warn!("Port {} is in use, trying {fallback}", config.port);

    TcpListener::bind(format!("0.0.0.0:{fallback}"))
        .await
        .with_context(|| format!("Failed to bind fallback port {fallback}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(error) => {
                error!("Failed to install Ctrl+C handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(error) => {
                error!("Failed to install signal handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
