//! HTTP surface of the relief coordination backend.
//!
//! All routes live under `/api` and exchange camelCase JSON. Store work runs
//! on the blocking pool; see [`state::AppState::run`].

use std::{sync::Arc, time::Duration};

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post, put},
    Router,
};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod config;
pub mod error;
pub mod incidents;
pub mod resources;
pub mod state;

use config::Config;
use error::AppError;
use state::AppState;

pub fn init_tracing() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let api = Router::new()
        .route("/incidents", post(incidents::report).get(incidents::list))
        .route("/incidents/nearby", post(incidents::nearby))
        .route(
            "/incidents/:id",
            get(incidents::get_one).put(incidents::update),
        )
        .route("/incidents/:id/assign", post(incidents::assign))
        .route(
            "/incidents/:id/assign/:volunteer_id",
            put(incidents::update_assignment),
        )
        .route("/incidents/:id/notes", post(incidents::add_note))
        .route("/incidents/:id/complete", post(incidents::complete))
        .route("/resources", post(resources::add).get(resources::list))
        .route("/resources/nearby", get(resources::nearby))
        .route("/resources/:id/restock", put(resources::restock))
        .route("/resources/:id/allocate", put(resources::allocate))
        .route("/resources/request", post(resources::create_request))
        .route("/resources/requests/:id", get(resources::get_request))
        .route(
            "/resources/requests/:id/approve",
            put(resources::approve_request),
        )
        .route(
            "/resources/requests/:id/reject",
            put(resources::reject_request),
        )
        .route(
            "/resources/requests/:id/cancel",
            put(resources::cancel_request),
        )
        .route(
            "/resources/requests/:id/fulfill",
            put(resources::fulfill_request),
        )
        .route(
            "/resources/requests/:id/matches",
            get(resources::match_candidates),
        );

    Router::new()
        .nest("/api", api)
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(config: Config) -> Result<(), AppError> {
    info!(db_path = %config.db_path, "Opening store...");
    let state = AppState::new(config)?;

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| AppError::Internal(format!("bind {address}: {e}")))?;
    info!("Server running on {address}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Internal(format!("serve: {e}")))?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        } else {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
