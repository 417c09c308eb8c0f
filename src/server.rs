use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, HeaderName, Method, StatusCode, Uri,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::{
    auth::require_admin,
    clock::Clock,
    error::AppError,
    progression::{run_progression, ProgressionOutcome, ProgressionRequest, Term},
    store::{IdentityVerifier, ProfileStore, RoleStore},
};

pub struct AppState {
    pub profiles: Arc<dyn ProfileStore>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub roles: Arc<dyn RoleStore>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressionParams {
    force: Option<String>,
    term: Option<String>,
}

impl ProgressionParams {
    fn from_uri(uri: &Uri) -> Result<Self, AppError> {
        Query::<Self>::try_from_uri(uri)
            .map(|Query(params)| params)
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
    }

    fn into_request(self) -> Result<ProgressionRequest, AppError> {
        let term = self
            .term
            .as_deref()
            .map(str::parse::<Term>)
            .transpose()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        Ok(ProgressionRequest {
            force: self.force.as_deref() == Some("true"),
            term,
        })
    }
}

/// The query string is parsed only after the caller is known to be an admin,
/// so a malformed query never masks an auth failure.
pub async fn progression_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<ProgressionOutcome>, AppError> {
    let admin = require_admin(&headers, state.identity.as_ref(), state.roles.as_ref()).await?;
    let request = ProgressionParams::from_uri(&uri)?.into_request()?;

    info!(%admin, force = request.force, "Semester progression requested");

    let outcome = run_progression(state.profiles.as_ref(), state.clock.as_ref(), request).await?;
    Ok(Json(outcome))
}

async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}

async fn health_handler() -> &'static str {
    "ok"
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route(
            "/semester-progression",
            post(progression_handler).options(preflight_handler),
        )
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let app = router(state);

    let address = format!("0.0.0.0:{port}");
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
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
