//! Health AI Prediction Server
//!
//! Serves tabular risk scores and image classifications with explanations,
//! and keeps an append-only audit log of every inference.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    HEALTH AI SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌──────────────────┐  ┌──────────────────┐ │
//! │  │  API      │  │  Model Registry  │  │  Explanation     │ │
//! │  │  (Axum)   │─►│  tabular / image │─►│  Grad-CAM,       │ │
//! │  │           │  │  (Arc, read-only)│  │  attributions    │ │
//! │  └─────┬─────┘  └──────────────────┘  └──────────────────┘ │
//! │        ▼                                                    │
//! │  ┌─────────────┐                                           │
//! │  │   SQLite    │  users · prediction_logs · simulation_logs │
//! │  └─────────────┘                                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod error;
mod handlers;
mod models;


use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use healthai_core::ModelRegistry;
use sqlx::SqlitePool;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{AppError, AppResult};

/// Health AI prediction server
#[derive(Parser, Debug)]
#[command(name = "healthai-server")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Create the database schema and exit
    InitDb,

    /// Insert the demo user if it does not exist
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration files before anything reads the environment
    dotenvy::from_filename("app.env").ok();
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = config::Config::from_env();
    config.validate().context("Invalid configuration")?;

    tracing::info!("Health AI server {} starting...", env!("CARGO_PKG_VERSION"));
    tracing::info!("Database: {}", config.database_url);

    // Initialize database pool
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::InitDb => {
            tracing::info!("Database initialized");
            Ok(())
        }
        Command::Seed => {
            match models::User::find_by_id(&pool, "demo").await? {
                Some(user) => tracing::info!("Demo user '{}' already present", user.id),
                None => {
                    let user = models::User::seed_demo(&pool).await?;
                    tracing::info!("Seeded demo user '{}'", user.id);
                }
            }
            Ok(())
        }
        Command::Serve => serve(config, pool).await,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "healthai_server=debug,healthai_core=info,tower_http=debug".into());

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn serve(config: config::Config, pool: SqlitePool) -> anyhow::Result<()> {
    // Load models
    let registry = ModelRegistry::load_all(&config.models_dir, &config.load_options())
        .context("Failed to load models")?;
    if registry.is_empty() {
        tracing::warn!("No models found in {}", config.models_dir.display());
    } else {
        tracing::info!("Models loaded: {:?}", registry.ids());
    }

    // Build application state
    let state = AppState {
        pool,
        config: config.clone(),
        registry: Arc::new(registry),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: config::Config,
    pub registry: Arc<ModelRegistry>,
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let allow_origin = match origins {
        None => AllowOrigin::from(Any),
        Some(list) => AllowOrigin::list(
            list.iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin {:?}", o);
                        None
                    }
                }),
        ),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_origins.as_deref());
    let body_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::check))
        .route("/models", get(handlers::registry::list))
        // Predictions
        .route("/predict/tabular", post(handlers::tabular::predict))
        .route("/predict/image", post(handlers::image::predict))
        // Audit log
        .route("/admin/predictions", get(handlers::admin::predictions))
        .route("/admin/simulations", get(handlers::admin::simulations))
        .layer(body_limit)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
