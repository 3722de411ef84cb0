use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use clap_serde_derive::ClapSerde;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api::auth::{Auth, SessionKeys};
use crate::api::user::{SqliteUserStore, UserStore};
use crate::config::{Config, DatabaseMode, PredictorKind};
use crate::inference::bridge::{BridgeLimits, PredictHandler, PredictionBridge};
use crate::inference::invoker::SubprocessPredictor;
use crate::inference::remote::RemotePredictor;
use crate::telemetry::{init_telemetry, shutdown_telemetry};

mod api;
mod config;
mod error;
mod extractors;
mod handlers;
mod inference;
mod telemetry;

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DEFAULT_CONFIG_FILE: &str = "voltiq.toml";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) users: Arc<dyn UserStore>,
    pub(crate) auth: Auth,
    pub(crate) sessions: SessionKeys,
    pub(crate) bridge: Arc<PredictionBridge>,
    pub(crate) interpreter: Arc<SubprocessPredictor>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, config_err) = match Config::from_toml(&args.config_file) {
        Ok(conf) => (conf.merge(args.opt_config), None),
        // A missing default file is fine, an explicitly named one has to load
        Err(err) => (
            Config::default().merge(args.opt_config),
            (args.config_file != DEFAULT_CONFIG_FILE).then_some(err),
        ),
    };
    init_telemetry(&config.otlp_endpoint)?;
    if let Some(err) = config_err {
        exit_err!(
            1,
            "Failed to read configuration file {} with error: {}",
            args.config_file,
            err
        );
    }

    if config.uses_default_jwt_secret() {
        warn!("jwt_secret is not configured, session tokens use the built-in default");
    }

    let pool = match connect_database(&config).await {
        Ok(pool) => pool,
        Err(err) => exit_err!(1, "Failed to prepare database: {:#}", err),
    };

    let subprocess = SubprocessPredictor::new(
        config.predictor_program.clone(),
        vec![config.predictor_script.clone()],
    );
    let timeout = Duration::from_secs(config.prediction_timeout_secs);
    let predictor: Arc<dyn PredictHandler> = match config.predictor {
        PredictorKind::Subprocess => Arc::new(subprocess.clone()),
        PredictorKind::Remote => Arc::new(RemotePredictor::new(&config.predictor_url, timeout)?),
    };
    let bridge = PredictionBridge::new(
        predictor,
        BridgeLimits {
            max_concurrent: config.max_concurrent_predictions,
            max_queued: config.max_queued_predictions,
            timeout,
        },
        config.validation_mode,
    );

    let state = AppState {
        users: Arc::new(SqliteUserStore::new(pool)),
        auth: Auth::default(),
        sessions: SessionKeys::new(
            &config.jwt_secret,
            Duration::from_secs(config.token_ttl_hours * 3600),
        ),
        bridge: Arc::new(bridge),
        interpreter: Arc::new(subprocess),
    };

    let listener = TcpListener::bind(format!("{}:{}", config.address, config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);
    info!(
        "Predictor: {:?}, validation: {:?}, max concurrent: {}, max queued: {}",
        config.predictor,
        config.validation_mode,
        config.max_concurrent_predictions,
        config.max_queued_predictions
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    shutdown_telemetry();
    Ok(())
}

pub(crate) fn app(state: AppState) -> Router {
    let api_router = Router::new()
        .route("/predict", post(handlers::handle_predict))
        .route("/public/predict", post(handlers::handle_public_predict))
        .route("/signup", post(handlers::handle_signup))
        .route("/login", post(handlers::handle_login))
        .route("/profile", get(handlers::handle_profile))
        .route("/health", get(handlers::handle_health))
        .route("/system/check", get(handlers::handle_system_check));

    Router::new()
        .nest("/api", api_router)
        .fallback(handlers::handle_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Opens the database and applies migrations. With `DatabaseMode::Optional`
/// failures are logged and a lazily connecting pool is returned instead.
async fn connect_database(config: &Config) -> Result<SqlitePool> {
    let connected = async {
        let pool = SqlitePoolOptions::new()
            .connect(&config.database_url)
            .await?;
        SqliteUserStore::new(pool.clone()).migrate().await?;
        Ok::<_, anyhow::Error>(pool)
    }
    .await;

    match (connected, config.database_mode) {
        (Ok(pool), _) => {
            info!("Connected to database {}", config.database_url);
            Ok(pool)
        }
        (Err(err), DatabaseMode::Required) => Err(err),
        (Err(err), DatabaseMode::Optional) => {
            warn!(
                "Database unavailable, serving predictions only until it recovers: {:#}",
                err
            );
            Ok(SqlitePoolOptions::new().connect_lazy(&config.database_url)?)
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

#[macro_export]
macro_rules! exit_err {
    ($code:expr, $fmt:expr $(, $arg:expr)*) => {
        {
            error!($fmt $(, $arg)*);
            std::process::exit($code);
        }
    };
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::config::ValidationMode;
    use crate::handlers::tests::{send, state_with};
    use crate::inference::invoker::tests::shell_predictor;

    const UNOPENABLE_DATABASE: &str = "sqlite:///nonexistent-voltiq-dir/voltiq.db";

    fn config_with(mode: DatabaseMode) -> Config {
        let mut config = Config::default();
        config.database_url = UNOPENABLE_DATABASE.to_string();
        config.database_mode = mode;
        config
    }

    #[tokio::test]
    async fn required_database_must_open() {
        assert!(connect_database(&config_with(DatabaseMode::Required))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn optional_database_falls_back_to_lazy_pool() {
        let pool = connect_database(&config_with(DatabaseMode::Optional))
            .await
            .unwrap();
        let store = SqliteUserStore::new(pool);
        assert!(store.ping().await.is_err());

        let mut state = state_with(shell_predictor("echo '{}'"), ValidationMode::Fill).await;
        state.users = Arc::new(store);
        let app = app(state);

        let (status, body) = send(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["database"], json!("unavailable"));

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/login",
            None,
            Some(json!({"email": "demo@example.com", "password": "password"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"success": false, "message": "Server error"}));
    }
}
