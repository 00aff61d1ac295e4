use crate::config::Listener as ListenerConfig;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use brevo::cache::AttributeCache;
use brevo::submit::{self, FormSettings, SubmitContext, SubmitOutcome, UnsubscribeSettings};
use migration::{CURRENT_VERSION, MigrationReport, MigrationRunner, MigrationState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

const ADMIN_KEY_HEADER: &str = "x-admin-key";

pub struct AppState {
    pub cache: Arc<AttributeCache>,
    pub runner: Arc<MigrationRunner>,
    pub submit_ctx: SubmitContext,
    pub admin_key: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub async fn serve(listener: ListenerConfig, state: Arc<AppState>) -> Result<(), ApiError> {
    let app = router(state);

    let addr = format!("{}:{}", listener.host, listener.port);
    tracing::info!(addr = %addr, "listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/submit", post(submit_form))
        .route("/unsubscribe", post(unsubscribe_form))
        .route("/admin/cache/clear", post(clear_cache))
        .with_state(state)
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    migration: MigrationState,
    /// Present exactly once after a migration finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    last_migration: Option<MigrationReport>,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: CURRENT_VERSION,
        migration: state.runner.state(),
        last_migration: state.runner.take_done_notice(),
    })
}

#[derive(Deserialize)]
struct SubmitRequest {
    #[serde(default)]
    settings: FormSettings,
    #[serde(default)]
    fields: HashMap<String, String>,
}

#[derive(Deserialize)]
struct UnsubscribeRequest {
    #[serde(default)]
    settings: UnsubscribeSettings,
    #[serde(default)]
    fields: HashMap<String, String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        let (outcome, reason) = match outcome {
            SubmitOutcome::Submitted => ("submitted", None),
            SubmitOutcome::DoubleOptinSent => ("double_optin_sent", None),
            SubmitOutcome::Deleted => ("deleted", None),
            SubmitOutcome::Skipped(reason) => ("skipped", Some(format!("{reason:?}"))),
        };
        SubmitResponse { outcome, reason }
    }
}

// Submissions always answer 200: the person filling in the form must
// never see this integration fail.
async fn submit_form(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Json<SubmitResponse> {
    let outcome = submit::run(&request.settings, &request.fields, &state.submit_ctx).await;
    Json(outcome.into())
}

async fn unsubscribe_form(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UnsubscribeRequest>,
) -> Json<SubmitResponse> {
    let outcome =
        submit::unsubscribe(&request.settings, &request.fields, &state.submit_ctx).await;
    Json(outcome.into())
}

#[derive(Deserialize, Default)]
struct ClearCacheRequest {
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ClearCacheResponse {
    cleared: bool,
}

async fn clear_cache(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(expected) = state.admin_key.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let presented = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != expected {
        tracing::warn!("cache clear rejected: bad admin key");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    // An empty or non-JSON body clears every entry.
    let request: ClearCacheRequest = serde_json::from_slice(&body).unwrap_or_default();
    state.cache.clear(request.api_key.as_deref());
    tracing::info!("attribute cache cleared");
    Json(ClearCacheResponse { cleared: true }).into_response()
}
