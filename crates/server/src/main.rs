use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use shared::{
    domain::{CameraId, TicketId},
    error::{ApiError, ErrorCode},
    protocol::{
        Camera, CameraPatch, CameraProfile, CameraTicketCreated, NearbyCamera,
        NearbyCamerasRequest, OnGroundCameraRequest, ReportIssueRequest, Ticket,
        TicketStatusQuery,
    },
};
use storage::Storage;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use api::ApiContext;
use app_state::AppState;
use config::load_settings;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = settings.database_url.clone();
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext { storage },
    };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "registry server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/cameras", post(http_create_camera))
        .route(
            "/cameras/:camera_id",
            get(http_get_camera)
                .put(http_update_camera)
                .delete(http_delete_camera),
        )
        .route("/nearby_cameras", post(http_nearby_cameras))
        .route("/report", post(http_report_issue))
        .route("/OnGroundCreateCamera", post(http_on_ground_create))
        .route("/tickets", get(http_list_tickets))
        .route("/tickets/:ticket_id", put(http_update_ticket))
        .route("/tickets/:ticket_id/close", put(http_close_ticket))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => {
            error!(message = %err.message, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}

async fn http_create_camera(
    State(state): State<Arc<AppState>>,
    Json(profile): Json<CameraProfile>,
) -> ApiResult<Json<Camera>> {
    let camera = api::create_camera(&state.api, profile)
        .await
        .map_err(reject)?;
    Ok(Json(camera))
}

async fn http_get_camera(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> ApiResult<Json<Camera>> {
    let camera = api::get_camera(&state.api, &CameraId::new(camera_id))
        .await
        .map_err(reject)?;
    Ok(Json(camera))
}

async fn http_update_camera(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
    Json(patch): Json<CameraPatch>,
) -> ApiResult<Json<Camera>> {
    let camera = api::update_camera(&state.api, &CameraId::new(camera_id), patch)
        .await
        .map_err(reject)?;
    Ok(Json(camera))
}

async fn http_delete_camera(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    api::delete_camera(&state.api, &CameraId::new(camera_id))
        .await
        .map_err(reject)?;
    Ok(Json(
        serde_json::json!({ "message": "Camera deleted successfully" }),
    ))
}

async fn http_nearby_cameras(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NearbyCamerasRequest>,
) -> ApiResult<Json<Vec<NearbyCamera>>> {
    let cameras = api::nearby_cameras(&state.api, &request)
        .await
        .map_err(reject)?;
    Ok(Json(cameras))
}

async fn http_report_issue(
    State(state): State<Arc<AppState>>,
    Json(report): Json<ReportIssueRequest>,
) -> ApiResult<Json<Ticket>> {
    let ticket = api::report_issue(&state.api, report)
        .await
        .map_err(reject)?;
    Ok(Json(ticket))
}

async fn http_on_ground_create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OnGroundCameraRequest>,
) -> ApiResult<Json<CameraTicketCreated>> {
    let created = api::create_camera_with_ticket(&state.api, request)
        .await
        .map_err(reject)?;
    Ok(Json(created))
}

async fn http_list_tickets(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Ticket>>> {
    let tickets = api::list_tickets(&state.api).await.map_err(reject)?;
    Ok(Json(tickets))
}

async fn http_update_ticket(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
    Query(q): Query<TicketStatusQuery>,
) -> ApiResult<Json<Ticket>> {
    let ticket = api::update_ticket_status(&state.api, &TicketId::new(ticket_id), q.status)
        .await
        .map_err(reject)?;
    Ok(Json(ticket))
}

async fn http_close_ticket(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<Ticket>> {
    let ticket = api::close_ticket(&state.api, &TicketId::new(ticket_id))
        .await
        .map_err(reject)?;
    Ok(Json(ticket))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
