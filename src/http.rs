use crate::cache::{CacheView, RefreshError};
use crate::metrics::Metrics;
use crate::refresh::Refresher;
use crate::state::{CheckResult, SiteRecord};
use crate::store::{SiteStore, StoreError};
use crate::triggers::SiteChangeDebouncer;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub refresher: Refresher,
    pub store: Arc<SiteStore>,
    pub debouncer: Arc<SiteChangeDebouncer>,
}

pub fn build_router(state: HttpAppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .route("/check-status", get(check_status))
        .route("/refresh-status", post(refresh_status))
        .route(
            "/sites",
            get(list_sites).post(add_site).delete(remove_site),
        )
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    Refresh(RefreshError),
    Payload(JsonRejection),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        Self::Refresh(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        Self::Payload(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Store(err) => {
                let status = match &err {
                    StoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    StoreError::Duplicate(_) => StatusCode::CONFLICT,
                    StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    StoreError::Read { .. } | StoreError::Write { .. } => {
                        error!(error = %err, "site store failure");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, Json(json!({ "error": err.to_string() }))).into_response()
            }
            Self::Refresh(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": err.to_string() })),
            )
                .into_response(),
            Self::Payload(rejection) => (
                rejection.status(),
                Json(json!({ "error": rejection.body_text() })),
            )
                .into_response(),
        }
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler(State(state): State<HttpAppState>) -> Json<CacheView> {
    Json(state.refresher.cache().view())
}

#[derive(Debug, Deserialize)]
struct CheckStatusQuery {
    url: Option<String>,
}

async fn check_status(
    State(state): State<HttpAppState>,
    Query(query): Query<CheckStatusQuery>,
) -> Result<Json<Vec<CheckResult>>, ApiError> {
    match query.url.filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            let record = state
                .store
                .find(url.trim())
                .await?
                .ok_or(StoreError::NotFound(url))?;
            let result = state.refresher.cache().check_site(&record).await;
            Ok(Json(vec![result]))
        }
        None => {
            let (snapshot, _stale) = state.refresher.get_snapshot();
            Ok(Json(snapshot.to_vec()))
        }
    }
}

async fn refresh_status(State(state): State<HttpAppState>) -> Result<Response, ApiError> {
    let summary = state.refresher.force_refresh().await?;
    Ok(Json(json!({
        "success": true,
        "lastUpdate": summary.last_update,
        "sitesChecked": summary.sites_checked,
    }))
    .into_response())
}

async fn list_sites(State(state): State<HttpAppState>) -> Result<Json<Vec<SiteRecord>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddSiteRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    manual_check: bool,
}

async fn add_site(
    State(state): State<HttpAppState>,
    payload: Result<Json<AddSiteRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let record = SiteRecord {
        name: body.name.unwrap_or_default(),
        url: body.url.unwrap_or_default(),
        manual_check: body.manual_check,
    };
    state.store.add(record).await?;
    state.debouncer.notify();
    Ok(Json(json!({ "success": true })).into_response())
}

#[derive(Debug, Deserialize)]
struct RemoveSiteRequest {
    #[serde(default)]
    url: Option<String>,
}

async fn remove_site(
    State(state): State<HttpAppState>,
    payload: Result<Json<RemoveSiteRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    state.store.remove(&body.url.unwrap_or_default()).await?;
    state.debouncer.notify();
    Ok(Json(json!({ "success": true })).into_response())
}
