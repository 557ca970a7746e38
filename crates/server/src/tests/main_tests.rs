use super::*;
use axum::{body, body::Body, http::Request};
use shared::domain::TicketStatus;
use tower::ServiceExt;

async fn test_app() -> (Router, Storage) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let app = build_router(
        Arc::new(AppState {
            api: ApiContext {
                storage: storage.clone(),
            },
        }),
        64 * 1024,
    );
    (app, storage)
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn post_json(uri: &str, value: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .expect("request")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _storage) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn camera_routes_create_read_and_delete() {
    let (app, _storage) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/cameras",
            serde_json::json!({
                "location": "Clock Tower",
                "latitude": "17.3850",
                "longitude": "78.4867",
                "connected_network": "No"
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let created: Camera = json_body(response).await;
    assert_eq!(created.profile.status.as_str(), "Pending");

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/cameras/{}", created.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let fetched: Camera = json_body(response).await;
    assert_eq!(fetched, created);

    let response = app
        .clone()
        .oneshot(
            Request::delete(format!("/cameras/{}", created.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get(format!("/cameras/{}", created.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let err: ApiError = json_body(response).await;
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn ticket_routes_follow_the_triage_lifecycle() {
    let (app, _storage) = test_app().await;

    let response = app
        .clone()
        .oneshot(Request::get("/tickets").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(post_json(
            "/report",
            serde_json::json!({
                "camera_id": "cam-7",
                "location": "Station Road",
                "description": "camera facing wall",
                "reported_by": "citizen"
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let ticket: Ticket = json_body(response).await;
    assert_eq!(ticket.status, TicketStatus::Pending);

    let response = app
        .clone()
        .oneshot(
            Request::put(format!("/tickets/{}?status=Accepted", ticket.id))
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "id": ticket.id }).to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Ticket = json_body(response).await;
    assert_eq!(updated.status, TicketStatus::Accepted);

    let response = app
        .clone()
        .oneshot(
            Request::put(format!("/tickets/{}/close", ticket.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/tickets").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let tickets: Vec<Ticket> = json_body(response).await;
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].status, TicketStatus::Closed);
}

#[tokio::test]
async fn unknown_ticket_status_is_a_bad_request() {
    let (app, _storage) = test_app().await;
    let response = app
        .oneshot(
            Request::put("/tickets/anything?status=Approved")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn updating_missing_ticket_is_not_found() {
    let (app, _storage) = test_app().await;
    let response = app
        .oneshot(
            Request::put("/tickets/ghost?status=Rejected")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn nearby_route_validates_origin() {
    let (app, _storage) = test_app().await;
    let response = app
        .oneshot(post_json(
            "/nearby_cameras",
            serde_json::json!({ "latitude": 120.0, "longitude": 10.0 }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn on_ground_route_returns_camera_and_ticket() {
    let (app, storage) = test_app().await;
    let response = app
        .oneshot(post_json(
            "/OnGroundCreateCamera",
            serde_json::json!({
                "location": "Ring Road",
                "latitude": 12.5,
                "longitude": 77.5
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let created: CameraTicketCreated = json_body(response).await;
    assert_eq!(created.ticket.description.as_deref(), Some("New Camera Created"));

    let stored = storage
        .ticket(&created.ticket.id)
        .await
        .expect("query")
        .expect("ticket stored");
    assert_eq!(stored.camera_id, Some(created.camera.id));
}
