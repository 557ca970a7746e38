use super::*;

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Multipart, Path as UrlPath, Query, State},
    http::StatusCode as HttpStatus,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use shared::{domain::CameraStatus, protocol::ON_GROUND_REPORTER};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct Recorded {
    status_updates: Arc<Mutex<Vec<(String, HashMap<String, String>, Value)>>>,
    uploads: Arc<Mutex<Vec<(String, String, usize)>>>,
    bodies: Arc<Mutex<Vec<(&'static str, Value)>>>,
}

impl Recorded {
    async fn body(&self, route: &str) -> Option<Value> {
        self.bodies
            .lock()
            .await
            .iter()
            .find(|(name, _)| *name == route)
            .map(|(_, body)| body.clone())
    }
}

async fn spawn_backend(app: Router) -> HttpBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    HttpBackend::new(Url::parse(&format!("http://{addr}/")).expect("url")).expect("backend")
}

async fn list_tickets() -> Json<Value> {
    Json(json!([
        { "id": 1, "camera_id": "cam-1", "status": "Pending",
          "reported_at": "2024-10-12T08:30:00.123456" },
        { "id": "abc", "camera_id": "cam-2", "status": "Accepted" },
        { "camera_id": "cam-3", "status": "Pending" }
    ]))
}

async fn update_ticket(
    State(recorded): State<Recorded>,
    UrlPath(ticket_id): UrlPath<String>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (HttpStatus, Json<Value>) {
    if ticket_id == "boom" {
        return (
            HttpStatus::INTERNAL_SERVER_ERROR,
            Json(json!({ "code": "internal", "message": "database unavailable" })),
        );
    }
    if ticket_id == "missing" {
        return (
            HttpStatus::NOT_FOUND,
            Json(json!({ "detail": "Ticket not found" })),
        );
    }
    let status = query.get("status").cloned().unwrap_or_default();
    recorded
        .status_updates
        .lock()
        .await
        .push((ticket_id.clone(), query, body));
    (
        HttpStatus::OK,
        Json(json!({ "id": ticket_id, "camera_id": "cam-1", "status": status })),
    )
}

async fn get_camera(UrlPath(camera_id): UrlPath<String>) -> (HttpStatus, Json<Value>) {
    match camera_id.as_str() {
        "cam-1" => (
            HttpStatus::OK,
            Json(json!({
                "id": "cam-1",
                "location": "Main Gate",
                "latitude": "12.9716",
                "longitude": "77.5946",
                "contact_no": 9876543210_i64,
                "status": "Not Working"
            })),
        ),
        "drifted" => (
            HttpStatus::OK,
            Json(json!({ "id": "drifted", "latitude": 123.0, "longitude": 10.0 })),
        ),
        _ => (
            HttpStatus::NOT_FOUND,
            Json(json!({ "detail": "Camera not found" })),
        ),
    }
}

async fn upload(
    State(recorded): State<Recorded>,
    mut multipart: Multipart,
) -> Json<Value> {
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let len = field.bytes().await.map(|b| b.len()).unwrap_or_default();
        recorded.uploads.lock().await.push((name, file_name, len));
    }
    Json(json!({ "message": "Camera data uploaded and processed successfully!" }))
}

async fn create_camera(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.bodies.lock().await.push(("create_camera", body.clone()));
    let mut camera = body;
    camera["id"] = json!("cam-new");
    Json(camera)
}

async fn update_camera(
    State(recorded): State<Recorded>,
    UrlPath(camera_id): UrlPath<String>,
    Json(patch): Json<Value>,
) -> Json<Value> {
    recorded.bodies.lock().await.push(("update_camera", patch.clone()));
    let mut camera = json!({
        "id": camera_id,
        "location": "Main Gate",
        "latitude": 12.9716,
        "longitude": 77.5946,
        "status": "Pending"
    });
    if let (Some(fields), Value::Object(patch)) = (camera.as_object_mut(), patch) {
        fields.extend(patch);
    }
    Json(camera)
}

async fn delete_camera(UrlPath(camera_id): UrlPath<String>) -> (HttpStatus, Json<Value>) {
    if camera_id == "cam-1" {
        (
            HttpStatus::OK,
            Json(json!({ "message": "Camera deleted successfully" })),
        )
    } else {
        (
            HttpStatus::NOT_FOUND,
            Json(json!({ "code": "not_found", "message": "camera not found" })),
        )
    }
}

async fn nearby(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.bodies.lock().await.push(("nearby", body));
    Json(json!([
        { "id": "cam-1", "camera_id": "cam-1", "latitude": 12.9720, "longitude": 77.5946,
          "status": "Working", "distance": 0.044 },
        { "id": "cam-bad", "camera_id": "cam-bad", "latitude": 123.0, "longitude": 77.5946,
          "status": "Working", "distance": 0.1 },
        { "id": "cam-2", "camera_id": "cam-2", "latitude": "12.9740", "longitude": "77.5946",
          "status": "Not Working", "distance": 0.267 }
    ]))
}

async fn report(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.bodies.lock().await.push(("report", body.clone()));
    Json(json!({
        "id": "t-new",
        "camera_id": body["camera_id"],
        "description": body["description"],
        "status": "Pending",
        "reported_at": "2024-10-12T08:30:00Z"
    }))
}

async fn on_ground(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.bodies.lock().await.push(("on_ground", body.clone()));
    Json(json!({
        "camera": {
            "id": "cam-og",
            "latitude": body["latitude"],
            "longitude": body["longitude"],
            "location": body["location"]
        },
        "ticket": {
            "id": "t-og",
            "camera_id": "cam-og",
            "description": body["description"],
            "status": "Pending",
            "reported_by": ON_GROUND_REPORTER
        }
    }))
}

async fn close_ticket(UrlPath(ticket_id): UrlPath<String>) -> (HttpStatus, Json<Value>) {
    if ticket_id == "t-pending" {
        return (
            HttpStatus::BAD_REQUEST,
            Json(json!({
                "code": "validation",
                "message": "Pending tickets cannot be closed until a decision is made"
            })),
        );
    }
    (
        HttpStatus::OK,
        Json(json!({ "id": ticket_id, "status": "Closed" })),
    )
}

fn registry_router(recorded: Recorded) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/tickets", get(list_tickets))
        .route("/tickets/:ticket_id", put(update_ticket))
        .route("/tickets/:ticket_id/close", put(close_ticket))
        .route("/cameras", post(create_camera))
        .route(
            "/cameras/:camera_id",
            get(get_camera).put(update_camera).delete(delete_camera),
        )
        .route("/nearby_cameras", post(nearby))
        .route("/report", post(report))
        .route("/OnGroundCreateCamera", post(on_ground))
        .route("/upload_camera_data", post(upload))
        .with_state(recorded)
}

#[tokio::test]
async fn list_tickets_normalises_ids_and_drops_malformed_entries() {
    let backend = spawn_backend(registry_router(Recorded::default())).await;

    let tickets = backend.list_tickets().await.expect("tickets");

    assert_eq!(tickets.len(), 2);
    assert_eq!(tickets[0].id, TicketId::from("1"));
    assert!(tickets[0].is_pending());
    assert!(tickets[0].reported_at.is_some());
    assert_eq!(tickets[1].status, TicketStatus::Accepted);
}

#[tokio::test]
async fn empty_registry_404_means_no_tickets() {
    let app = Router::new().route(
        "/tickets",
        get(|| async {
            (
                HttpStatus::NOT_FOUND,
                Json(json!({ "detail": "No valid tickets found" })),
            )
        }),
    );
    let backend = spawn_backend(app).await;

    assert!(backend.list_tickets().await.expect("tickets").is_empty());
}

#[tokio::test]
async fn registry_envelope_404_means_no_tickets() {
    let app = Router::new().route(
        "/tickets",
        get(|| async {
            (
                HttpStatus::NOT_FOUND,
                Json(json!({ "code": "not_found", "message": "No valid tickets found" })),
            )
        }),
    );
    let backend = spawn_backend(app).await;

    assert!(backend.list_tickets().await.expect("tickets").is_empty());
}

#[tokio::test]
async fn missing_tickets_route_is_reported_not_hidden() {
    let backend = spawn_backend(Router::new()).await;

    let err = backend.list_tickets().await.expect_err("no such route");

    match err {
        WorkflowError::Network(message) => assert!(message.contains("404")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn status_update_sends_query_and_id_body() {
    let recorded = Recorded::default();
    let backend = spawn_backend(registry_router(recorded.clone())).await;

    let ticket = backend
        .update_ticket_status(&TicketId::from("t-5"), TicketStatus::Rejected)
        .await
        .expect("update");

    assert_eq!(ticket.status, TicketStatus::Rejected);
    let updates = recorded.status_updates.lock().await.clone();
    assert_eq!(updates.len(), 1);
    let (path_id, query, body) = &updates[0];
    assert_eq!(path_id, "t-5");
    assert_eq!(query.get("status").map(String::as_str), Some("Rejected"));
    assert_eq!(body, &json!({ "id": "t-5" }));
}

#[tokio::test]
async fn status_update_maps_failures() {
    let backend = spawn_backend(registry_router(Recorded::default())).await;

    let err = backend
        .update_ticket_status(&TicketId::from("boom"), TicketStatus::Accepted)
        .await
        .expect_err("server error");
    match err {
        WorkflowError::Network(message) => assert!(message.contains("database unavailable")),
        other => panic!("unexpected error {other:?}"),
    }

    let err = backend
        .update_ticket_status(&TicketId::from("missing"), TicketStatus::Accepted)
        .await
        .expect_err("missing ticket");
    assert_eq!(err, WorkflowError::not_found("ticket", "missing"));
}

#[tokio::test]
async fn fetch_camera_decodes_loose_payloads() {
    let backend = spawn_backend(registry_router(Recorded::default())).await;

    let camera = backend
        .fetch_camera(&CameraId::from("cam-1"))
        .await
        .expect("camera");

    assert_eq!(camera.profile.latitude, 12.9716);
    assert_eq!(camera.profile.contact_no.as_deref(), Some("9876543210"));
    assert_eq!(camera.profile.status, CameraStatus::NotWorking);
}

#[tokio::test]
async fn fetch_camera_distinguishes_missing_from_invalid() {
    let backend = spawn_backend(registry_router(Recorded::default())).await;

    let err = backend
        .fetch_camera(&CameraId::from("ghost"))
        .await
        .expect_err("missing");
    assert!(err.is_not_found());

    let err = backend
        .fetch_camera(&CameraId::from("drifted"))
        .await
        .expect_err("out of range");
    assert!(matches!(err, WorkflowError::Validation(_)));
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let backend =
        HttpBackend::new(Url::parse(&format!("http://{addr}/")).expect("url")).expect("backend");

    let err = backend.list_tickets().await.expect_err("refused");
    assert!(matches!(err, WorkflowError::Network(_)));
}

#[tokio::test]
async fn base_path_prefix_is_kept_and_ids_are_escaped() {
    let app = Router::new().nest("/api", registry_router(Recorded::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let backend = HttpBackend::new(
        crate::config::base_url(&format!("http://{addr}/api")).expect("url"),
    )
    .expect("backend");

    assert_eq!(backend.list_tickets().await.expect("tickets").len(), 2);
    let err = backend
        .fetch_camera(&CameraId::from("a/b"))
        .await
        .expect_err("escaped id is looked up as one segment");
    assert_eq!(err, WorkflowError::not_found("camera", "a/b"));
}

#[tokio::test]
async fn upload_only_accepts_spreadsheets() {
    let recorded = Recorded::default();
    let backend = spawn_backend(registry_router(recorded.clone())).await;

    let err = backend
        .upload_camera_data(std::path::Path::new("cameras.csv"))
        .await
        .expect_err("csv rejected");
    assert!(matches!(err, WorkflowError::Validation(_)));
    assert!(recorded.uploads.lock().await.is_empty());

    let dir = std::env::temp_dir().join(format!("cctv_upload_{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("cameras.xlsx");
    std::fs::write(&path, b"PK\x03\x04 sheet").expect("write");

    let ack = backend.upload_camera_data(&path).await.expect("upload");

    assert!(ack.message.contains("uploaded"));
    assert_eq!(
        recorded.uploads.lock().await.clone(),
        vec![("file".to_string(), "cameras.xlsx".to_string(), 10)]
    );
    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[tokio::test]
async fn health_checks_the_backend() {
    let backend = spawn_backend(registry_router(Recorded::default())).await;
    backend.health().await.expect("healthy");

    let bare = spawn_backend(Router::new()).await;
    assert!(bare.health().await.expect_err("no health route").is_not_found());
}

#[tokio::test]
async fn create_camera_posts_the_profile() {
    let recorded = Recorded::default();
    let backend = spawn_backend(registry_router(recorded.clone())).await;
    let profile = CameraProfile {
        location: Some("Bus stand".to_string()),
        ..CameraProfile::at(12.9716, 77.5946)
    };

    let camera = backend.create_camera(&profile).await.expect("create");

    assert_eq!(camera.id, CameraId::from("cam-new"));
    assert_eq!(camera.profile, profile);
    let body = recorded.body("create_camera").await.expect("body");
    assert_eq!(body["location"], "Bus stand");
    assert_eq!(body["status"], "Pending");
}

#[tokio::test]
async fn create_camera_rejects_bad_coordinates_before_sending() {
    let recorded = Recorded::default();
    let backend = spawn_backend(registry_router(recorded.clone())).await;

    let err = backend
        .create_camera(&CameraProfile::at(95.0, 77.0))
        .await
        .expect_err("latitude out of range");

    assert!(matches!(err, WorkflowError::Validation(_)));
    assert!(recorded.body("create_camera").await.is_none());
}

#[tokio::test]
async fn update_camera_sends_only_the_changed_fields() {
    let recorded = Recorded::default();
    let backend = spawn_backend(registry_router(recorded.clone())).await;

    let camera = backend
        .update_camera(
            &CameraId::from("cam-1"),
            &CameraPatch {
                location: Some("North Gate".to_string()),
                status: Some(CameraStatus::Working),
                ..CameraPatch::default()
            },
        )
        .await
        .expect("update");

    assert_eq!(camera.profile.location.as_deref(), Some("North Gate"));
    assert_eq!(camera.profile.status, CameraStatus::Working);
    assert_eq!(camera.profile.latitude, 12.9716);
    assert_eq!(
        recorded.body("update_camera").await,
        Some(json!({ "location": "North Gate", "status": "Working" }))
    );
}

#[tokio::test]
async fn delete_camera_maps_missing_records() {
    let backend = spawn_backend(registry_router(Recorded::default())).await;

    backend
        .delete_camera(&CameraId::from("cam-1"))
        .await
        .expect("delete");
    let err = backend
        .delete_camera(&CameraId::from("ghost"))
        .await
        .expect_err("missing");
    assert_eq!(err, WorkflowError::not_found("camera", "ghost"));
}

#[tokio::test]
async fn nearby_drops_results_with_out_of_range_coordinates() {
    let recorded = Recorded::default();
    let backend = spawn_backend(registry_router(recorded.clone())).await;
    let query = NearbyCamerasRequest {
        radius_meters: 300,
        ..NearbyCamerasRequest::around(12.9716, 77.5946)
    };

    let found = backend.nearby_cameras(&query).await.expect("nearby");

    let ids: Vec<&str> = found.iter().map(|n| n.camera_id.as_str()).collect();
    assert_eq!(ids, vec!["cam-1", "cam-2"]);
    assert_eq!(found[1].camera.profile.latitude, 12.974);
    assert_eq!(found[1].camera.profile.status, CameraStatus::NotWorking);
    let body = recorded.body("nearby").await.expect("body");
    assert_eq!(body["radius_meters"], 300);
}

#[tokio::test]
async fn nearby_validates_the_origin_before_sending() {
    let recorded = Recorded::default();
    let backend = spawn_backend(registry_router(recorded.clone())).await;

    let err = backend
        .nearby_cameras(&NearbyCamerasRequest::around(12.0, 181.0))
        .await
        .expect_err("longitude out of range");

    assert!(matches!(err, WorkflowError::Validation(_)));
    assert!(recorded.body("nearby").await.is_none());
}

#[tokio::test]
async fn report_issue_opens_a_pending_ticket() {
    let recorded = Recorded::default();
    let backend = spawn_backend(registry_router(recorded.clone())).await;

    let ticket = backend
        .report_issue(&ReportIssueRequest {
            camera_id: Some(CameraId::from("cam-1")),
            description: Some("lens cracked".to_string()),
            ..ReportIssueRequest::default()
        })
        .await
        .expect("report");

    assert_eq!(ticket.id, TicketId::from("t-new"));
    assert!(ticket.is_pending());
    assert_eq!(ticket.camera_id, Some(CameraId::from("cam-1")));
    let body = recorded.body("report").await.expect("body");
    assert_eq!(body["description"], "lens cracked");
}

#[tokio::test]
async fn on_ground_creation_returns_camera_and_ticket() {
    let recorded = Recorded::default();
    let backend = spawn_backend(registry_router(recorded.clone())).await;
    let request = OnGroundCameraRequest {
        profile: CameraProfile {
            location: Some("Clock Tower".to_string()),
            ..CameraProfile::at(13.0, 77.6)
        },
        description: "New Camera Created".to_string(),
    };

    let created = backend
        .create_camera_with_ticket(&request)
        .await
        .expect("create");

    assert_eq!(created.camera.id, CameraId::from("cam-og"));
    assert_eq!(created.ticket.camera_id, Some(created.camera.id.clone()));
    assert_eq!(created.ticket.reported_by.as_deref(), Some(ON_GROUND_REPORTER));
    let body = recorded.body("on_ground").await.expect("body");
    assert_eq!(body["location"], "Clock Tower");
    assert_eq!(body["description"], "New Camera Created");

    let err = backend
        .create_camera_with_ticket(&OnGroundCameraRequest {
            profile: CameraProfile::at(-91.0, 0.0),
            description: "New Camera Created".to_string(),
        })
        .await
        .expect_err("latitude out of range");
    assert!(matches!(err, WorkflowError::Validation(_)));
}

#[tokio::test]
async fn close_ticket_surfaces_the_backend_refusal() {
    let backend = spawn_backend(registry_router(Recorded::default())).await;

    let closed = backend
        .close_ticket(&TicketId::from("t-5"))
        .await
        .expect("close");
    assert_eq!(closed.status, TicketStatus::Closed);

    let err = backend
        .close_ticket(&TicketId::from("t-pending"))
        .await
        .expect_err("undecided");
    match err {
        WorkflowError::Network(message) => assert!(message.contains("cannot be closed")),
        other => panic!("unexpected error {other:?}"),
    }
}
