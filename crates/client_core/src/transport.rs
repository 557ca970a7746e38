//! Store adapters for the triage workflow and the reqwest client that talks
//! to the registry backend.

use std::path::Path;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{CameraId, TicketId, TicketStatus},
    error::{ApiError, ErrorCode},
    protocol::{
        Camera, CameraPatch, CameraProfile, CameraTicketCreated, NearbyCamera,
        NearbyCamerasRequest, OnGroundCameraRequest, ReportIssueRequest, Ticket,
        TicketStatusBody, UploadAck,
    },
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{config::ClientSettings, error::WorkflowError};

const UPLOAD_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];
/// `detail` text of the document-store backend's empty ticket answer.
const NO_TICKETS_DETAIL: &str = "No valid tickets found";

/// Source of truth for tickets.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Every ticket the backend holds, whatever its status.
    async fn list_tickets(&self) -> Result<Vec<Ticket>, WorkflowError>;
    async fn update_ticket_status(
        &self,
        ticket_id: &TicketId,
        status: TicketStatus,
    ) -> Result<Ticket, WorkflowError>;
}

/// Source of truth for camera records.
#[async_trait]
pub trait CameraDirectory: Send + Sync {
    async fn fetch_camera(&self, camera_id: &CameraId) -> Result<Camera, WorkflowError>;
}

pub struct HttpBackend {
    http: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: Url) -> Result<Self, WorkflowError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, WorkflowError> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Self::with_client(http, settings.backend_base()?)
    }

    pub fn with_client(http: Client, base_url: Url) -> Result<Self, WorkflowError> {
        if base_url.cannot_be_a_base() {
            return Err(WorkflowError::validation(format!(
                "backend url {base_url} cannot carry a path"
            )));
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, WorkflowError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| WorkflowError::validation("backend url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn health(&self) -> Result<(), WorkflowError> {
        let response = self.http.get(self.endpoint(&["healthz"])?).send().await?;
        expect_success(response, "service", "healthz").await?;
        Ok(())
    }

    pub async fn create_camera(&self, profile: &CameraProfile) -> Result<Camera, WorkflowError> {
        profile.validate().map_err(|e| WorkflowError::validation(e.message))?;
        let request = self.http.post(self.endpoint(&["cameras"])?).json(profile);
        let camera: Camera = send_json(request, "camera", "new").await?;
        checked_camera(camera)
    }

    pub async fn update_camera(
        &self,
        camera_id: &CameraId,
        patch: &CameraPatch,
    ) -> Result<Camera, WorkflowError> {
        let request = self
            .http
            .put(self.endpoint(&["cameras", camera_id.as_str()])?)
            .json(patch);
        let camera: Camera = send_json(request, "camera", camera_id.as_str()).await?;
        checked_camera(camera)
    }

    pub async fn delete_camera(&self, camera_id: &CameraId) -> Result<(), WorkflowError> {
        let response = self
            .http
            .delete(self.endpoint(&["cameras", camera_id.as_str()])?)
            .send()
            .await?;
        expect_success(response, "camera", camera_id.as_str()).await?;
        info!(camera_id = %camera_id, "camera deleted");
        Ok(())
    }

    pub async fn nearby_cameras(
        &self,
        query: &NearbyCamerasRequest,
    ) -> Result<Vec<NearbyCamera>, WorkflowError> {
        query
            .validate()
            .map_err(|e| WorkflowError::validation(e.message))?;
        let request = self
            .http
            .post(self.endpoint(&["nearby_cameras"])?)
            .json(query);
        let raw: Vec<Value> = send_json(request, "nearby cameras", "search").await?;
        Ok(decode_each(raw, "nearby camera", |nearby: &NearbyCamera| {
            nearby.camera.profile.validate().is_ok()
        }))
    }

    /// Sends a spreadsheet for bulk import. Only `.xlsx` and `.xls` files are
    /// accepted.
    pub async fn upload_camera_data(&self, path: &Path) -> Result<UploadAck, WorkflowError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| WorkflowError::validation("upload path has no file name"))?
            .to_string();
        let is_spreadsheet = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| UPLOAD_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_spreadsheet {
            return Err(WorkflowError::validation(
                "Invalid file type. Please upload an Excel file.",
            ));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| WorkflowError::validation(format!("cannot read {file_name}: {e}")))?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(mime.essence_str())?;
        let form = multipart::Form::new().part("file", part);

        let request = self
            .http
            .post(self.endpoint(&["upload_camera_data"])?)
            .multipart(form);
        let ack: UploadAck = send_json(request, "upload endpoint", &file_name).await?;
        info!(%file_name, "camera data uploaded");
        Ok(ack)
    }

    pub async fn report_issue(&self, report: &ReportIssueRequest) -> Result<Ticket, WorkflowError> {
        let request = self.http.post(self.endpoint(&["report"])?).json(report);
        send_json(request, "report endpoint", "report").await
    }

    pub async fn create_camera_with_ticket(
        &self,
        request: &OnGroundCameraRequest,
    ) -> Result<CameraTicketCreated, WorkflowError> {
        request
            .profile
            .validate()
            .map_err(|e| WorkflowError::validation(e.message))?;
        let builder = self
            .http
            .post(self.endpoint(&["OnGroundCreateCamera"])?)
            .json(request);
        let created: CameraTicketCreated = send_json(builder, "camera", "new").await?;
        checked_camera(created.camera.clone())?;
        Ok(created)
    }

    pub async fn close_ticket(&self, ticket_id: &TicketId) -> Result<Ticket, WorkflowError> {
        let request = self
            .http
            .put(self.endpoint(&["tickets", ticket_id.as_str(), "close"])?);
        send_json(request, "ticket", ticket_id.as_str()).await
    }
}

#[async_trait]
impl TicketStore for HttpBackend {
    async fn list_tickets(&self) -> Result<Vec<Ticket>, WorkflowError> {
        let url = self.endpoint(&["tickets"])?;
        let response = self.http.get(url.clone()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            let body = response.bytes().await?;
            // The registry answers 404 when it holds no tickets at all. Any
            // other 404 means the url does not point at a registry.
            if is_empty_ticket_collection(&body) {
                debug!("ticket store is empty");
                return Ok(Vec::new());
            }
            warn!(%url, "tickets route not found; check the backend url");
            return Err(WorkflowError::Network(format!(
                "404 Not Found: {url} is not a ticket registry endpoint"
            )));
        }
        let raw: Vec<Value> = decode_body(expect_success(response, "tickets", "all").await?).await?;
        Ok(decode_each(raw, "ticket", |_: &Ticket| true))
    }

    async fn update_ticket_status(
        &self,
        ticket_id: &TicketId,
        status: TicketStatus,
    ) -> Result<Ticket, WorkflowError> {
        let request = self
            .http
            .put(self.endpoint(&["tickets", ticket_id.as_str()])?)
            .query(&[("status", status.as_str())])
            .json(&TicketStatusBody {
                id: ticket_id.clone(),
            });
        send_json(request, "ticket", ticket_id.as_str()).await
    }
}

#[async_trait]
impl CameraDirectory for HttpBackend {
    async fn fetch_camera(&self, camera_id: &CameraId) -> Result<Camera, WorkflowError> {
        let request = self
            .http
            .get(self.endpoint(&["cameras", camera_id.as_str()])?);
        let camera: Camera = send_json(request, "camera", camera_id.as_str()).await?;
        checked_camera(camera)
    }
}

async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    resource: &'static str,
    id: &str,
) -> Result<T, WorkflowError> {
    let response = expect_success(request.send().await?, resource, id).await?;
    decode_body(response).await
}

async fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T, WorkflowError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| WorkflowError::validation(format!("unexpected payload: {e}")))
}

/// Maps 404 to `NotFound` and every other non-success status to `Network`,
/// keeping the backend's error message when it sent one.
async fn expect_success(
    response: Response,
    resource: &'static str,
    id: &str,
) -> Result<Response, WorkflowError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(WorkflowError::not_found(resource, id));
    }

    let detail = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| {
            body.get("message")
                .or_else(|| body.get("detail"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(WorkflowError::Network(format!("{status}: {detail}")))
}

fn is_empty_ticket_collection(body: &[u8]) -> bool {
    if let Ok(envelope) = serde_json::from_slice::<ApiError>(body) {
        return envelope.code == ErrorCode::NotFound;
    }
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("detail").and_then(Value::as_str).map(str::to_string))
        .is_some_and(|detail| detail == NO_TICKETS_DETAIL)
}

fn checked_camera(camera: Camera) -> Result<Camera, WorkflowError> {
    camera
        .profile
        .validate()
        .map_err(|e| WorkflowError::validation(format!("camera {}: {}", camera.id, e.message)))?;
    Ok(camera)
}

/// Decodes a list item by item, dropping entries that do not fit the schema.
fn decode_each<T: DeserializeOwned>(
    raw: Vec<Value>,
    kind: &'static str,
    keep: impl Fn(&T) -> bool,
) -> Vec<T> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(item) if keep(&item) => Some(item),
            Ok(_) => {
                warn!(%kind, "dropping record with out-of-range coordinates");
                None
            }
            Err(error) => {
                warn!(%kind, %error, "dropping malformed record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
