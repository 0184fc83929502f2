use std::sync::Arc;

use axum::{
    extract::{Query as QueryParams, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use boter_core::BackendError;

use crate::{
    auth::{auth_middleware, CallerIdentity},
    config::AuthConfig,
    models::{Category, FineType, Player},
    store::{CollectionView, StoreError},
    stores::Stores,
    views::{self, FineForm, SummaryView},
};

#[derive(Clone)]
pub struct AppState {
    pub stores: Arc<Stores>,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Backend(#[from] BackendError),
    #[error("admin role required")]
    Forbidden,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let backend = match self {
            ApiError::Forbidden => return StatusCode::FORBIDDEN,
            ApiError::Store(StoreError::Backend(e)) | ApiError::Backend(e) => e,
            ApiError::Store(_) => return StatusCode::BAD_REQUEST,
        };
        match backend {
            BackendError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            BackendError::NotFound(_) => StatusCode::NOT_FOUND,
            BackendError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            BackendError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BackendError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(ErrorBody {
            success: false,
            error: self.to_string(),
        })).into_response()
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Created {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct NewPlayer {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TypesParams {
    pub category: Option<String>,
}

pub fn router(state: AppState, auth: Arc<AuthConfig>) -> Router {
    let api = Router::new()
        .route("/summary", get(get_summary))
        .route("/summary/table", get(get_summary_table))
        .route("/players", get(list_players).post(create_player))
        .route("/categories", get(list_categories))
        .route("/types", get(list_types))
        .route("/entries", axum::routing::post(create_entry))
        .route_layer(middleware::from_fn(auth_middleware))
        .layer(Extension(auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .merge(api)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state.metrics.as_ref().map(|handle| handle.render()).unwrap_or_default()
}

pub async fn get_summary(State(state): State<AppState>) -> Json<SummaryView> {
    Json(views::summary(&state.stores))
}

pub async fn get_summary_table(State(state): State<AppState>) -> String {
    views::summary(&state.stores).summary.to_string()
}

pub async fn list_players(State(state): State<AppState>) -> Json<CollectionView<Player>> {
    Json(views::roster(&state.stores))
}

pub async fn list_categories(State(state): State<AppState>) -> Json<CollectionView<Category>> {
    Json(views::categories(&state.stores))
}

pub async fn list_types(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<TypesParams>,
) -> Result<Json<CollectionView<FineType>>, ApiError> {
    Ok(Json(views::fine_types(&state.stores, params.category.as_deref())?))
}

pub async fn create_player(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<NewPlayer>,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    ensure_admin(&caller)?;
    let reference = views::add_player(&state.stores, &body.name)?;
    Ok((StatusCode::CREATED, Json(Created {
        id: reference.id().to_string(),
        path: reference.path().to_string(),
    })))
}

pub async fn create_entry(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(form): Json<FineForm>,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    ensure_admin(&caller)?;
    let reference = views::record_fines(&state.stores, &form)?;
    Ok((StatusCode::CREATED, Json(Created {
        id: reference.id().to_string(),
        path: reference.path().to_string(),
    })))
}

fn ensure_admin(caller: &CallerIdentity) -> Result<(), ApiError> {
    if caller.is_admin() {
        Ok(())
    } else {
        tracing::warn!(caller = %caller.name, "Admin route refused");
        Err(ApiError::Forbidden)
    }
}
